pub mod action_flow;
pub mod csharp;
pub mod error;
pub mod expr_recovery;
pub mod idioms;
pub mod stack;
pub mod structuring;

pub use action_flow::ActionFlowGraph;
pub use error::{DecompileError, Result};

use ildc_ir::builder::MethodSource;
use ildc_ir::cfg::Cfg;
use ildc_ir::stmt::Statement;

/// Decompile one method body into a statement tree rooted at a `Block`.
///
/// Methods are independent: a failure here says nothing about any other
/// method of the same type.
pub fn decompile_method(source: &dyn MethodSource) -> Result<Statement> {
    let method = source.method();
    if source.instructions().is_empty() {
        return Ok(Statement::Block(vec![]));
    }
    let cfg = Cfg::build(source.instructions(), source.exception_regions())
        .map_err(|e| DecompileError::from_ir(method, e))?;
    let mut graph = ActionFlowGraph::build(source, &cfg)?;
    let folded = graph.simplify();
    if folded > 0 {
        log::debug!("{method}: folded {folded} boolean return(s)");
    }
    let mut body = structuring::structure_method(&graph, source)?;
    body = idioms::recover_idioms(body);
    if method.returns_void() && body.last() == Some(&Statement::Return(None)) {
        body.pop();
    }
    Ok(Statement::Block(body))
}
