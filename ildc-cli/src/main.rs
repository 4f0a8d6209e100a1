mod fixture;

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use fixture::{Fixture, FixtureError, MethodFixture};
use ildc_decompiler::action_flow::{ActionFlowGraph, ActionKind};
use ildc_decompiler::csharp::{write_expression, write_method};
use ildc_decompiler::{DecompileError, decompile_method};
use ildc_ir::builder::{MethodBody, MethodSource};
use ildc_ir::cfg::Cfg;
use ildc_ir::instruction::RegionKind;

#[derive(Parser)]
#[command(name = "ildc", about = "Stack-machine bytecode method decompiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the annotated instruction listing of each method
    Disasm {
        /// Path to the YAML fixture
        input: PathBuf,
        /// Only this method
        #[arg(short, long)]
        method: Option<String>,
    },
    /// Print the action-flow graph of each method
    Actions {
        /// Path to the YAML fixture
        input: PathBuf,
        /// Only this method
        #[arg(short, long)]
        method: Option<String>,
        /// Skip the boolean-return folding pass
        #[arg(long)]
        raw: bool,
    },
    /// Decompile each method to C#
    Decompile {
        /// Path to the YAML fixture
        input: PathBuf,
        /// Only this method
        #[arg(short, long)]
        method: Option<String>,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let (input, method) = match &cli.command {
        Commands::Disasm { input, method }
        | Commands::Actions { input, method, .. }
        | Commands::Decompile { input, method, .. } => (input, method.as_deref()),
    };
    let fixture = match Fixture::load(input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let failures = match &cli.command {
        Commands::Disasm { .. } => for_each_method(&fixture, method, |body| {
            print!("{}", disasm_method(body));
            Ok(())
        }),
        Commands::Actions { raw, .. } => for_each_method(&fixture, method, |body| {
            print!("{}", dump_actions(body, *raw)?);
            Ok(())
        }),
        Commands::Decompile { output, .. } => cmd_decompile(&fixture, method, output.as_deref()),
    };
    if failures > 0 {
        log::warn!("{failures} method(s) failed");
        std::process::exit(2);
    }
}

#[derive(Debug, thiserror::Error)]
enum MethodError {
    #[error(transparent)]
    Fixture(#[from] FixtureError),
    #[error(transparent)]
    Decompile(#[from] DecompileError),
}

/// Run `f` on every selected method; a failing method is logged and skipped.
/// Returns the number of failures.
fn for_each_method(
    fixture: &Fixture,
    only: Option<&str>,
    mut f: impl FnMut(&MethodBody) -> Result<(), MethodError>,
) -> usize {
    let mut failures = 0;
    for method in selected(fixture, only) {
        let result = fixture
            .build(method)
            .map_err(MethodError::from)
            .and_then(|body| f(&body));
        if let Err(e) = result {
            log::error!("{e}");
            failures += 1;
        }
    }
    failures
}

fn selected<'a>(
    fixture: &'a Fixture,
    only: Option<&'a str>,
) -> impl Iterator<Item = &'a MethodFixture> + 'a {
    fixture
        .methods
        .iter()
        .filter(move |m| only.is_none_or(|name| m.name == name))
}

fn disasm_method(body: &MethodBody) -> String {
    let mut out = String::new();
    let method = body.method();
    out.push_str(&format!(".method {method} {{\n"));
    for local in &body.variables.locals {
        out.push_str(&format!(
            "    .local [{}] {} {}\n",
            local.index, local.ty, local.name
        ));
    }
    for insn in &body.instructions {
        let text = insn.to_string();
        out.push_str(&format!(
            "    {text:<48} // stack {} -> {}\n",
            insn.stack_before, insn.stack_after
        ));
    }
    for region in &body.exception_regions {
        let kind = match &region.kind {
            RegionKind::Catch(ty) => format!("catch {ty}"),
            RegionKind::Filter { filter_start } => format!("filter IL_{filter_start:04x}"),
            RegionKind::Finally => "finally".to_string(),
            RegionKind::Fault => "fault".to_string(),
        };
        out.push_str(&format!(
            "    # try [IL_{:04x}..IL_{:04x}) {kind} -> [IL_{:04x}..IL_{:04x})\n",
            region.try_start, region.try_end, region.handler_start, region.handler_end
        ));
    }
    out.push_str("}\n\n");
    out
}

fn dump_actions(body: &MethodBody, raw: bool) -> Result<String, MethodError> {
    let method = body.method();
    let cfg = Cfg::build(&body.instructions, &body.exception_regions)
        .map_err(|e| DecompileError::from_ir(method, e))?;
    let mut graph = ActionFlowGraph::build(body, &cfg)?;
    if !raw {
        graph.simplify();
    }

    let mut out = format!("{method}: {} action(s)\n", graph.len());
    for block in graph.blocks() {
        let kind = match &block.kind {
            ActionKind::Assign(e) => format!("assign {}", write_expression(e)),
            ActionKind::Invoke(e) => format!("invoke {}", write_expression(e)),
            ActionKind::Return(Some(e)) => format!("return {}", write_expression(e)),
            ActionKind::Return(None) => "return".to_string(),
            ActionKind::Throw(Some(e)) => format!("throw {}", write_expression(e)),
            ActionKind::Throw(None) => "rethrow".to_string(),
            ActionKind::Branch => "branch".to_string(),
            ActionKind::ConditionalBranch(e) => format!("if {}", write_expression(e)),
            ActionKind::Switch(e) => format!("switch {}", write_expression(e)),
            ActionKind::EndHandler => "end handler".to_string(),
        };
        let succs: Vec<String> = block.succs.iter().map(|s| format!("A{s}")).collect();
        out.push_str(&format!(
            "  A{} IL_{:04x}  {kind}  -> [{}]\n",
            block.id,
            block.offset,
            succs.join(", ")
        ));
    }
    out.push('\n');
    Ok(out)
}

fn cmd_decompile(fixture: &Fixture, only: Option<&str>, output: Option<&Path>) -> usize {
    let mut text = format!("// {}\n\n", fixture.type_name);
    let failures = for_each_method(fixture, only, |body| {
        match decompile_method(body) {
            Ok(tree) => {
                text.push_str(&write_method(body.method(), &body.variables, &tree));
                text.push('\n');
                Ok(())
            }
            Err(e) => {
                // keep the batch going, leave a marker in the output
                text.push_str(&format!("// {}: decompilation failed\n\n", body.method()));
                Err(e.into())
            }
        }
    });

    match output {
        Some(path) => {
            if let Err(e) = fs::write(path, &text) {
                eprintln!("Error writing {}: {e}", path.display());
                std::process::exit(1);
            }
        }
        None => print!("{text}"),
    }
    failures
}
