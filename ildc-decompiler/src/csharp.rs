use std::fmt::Write;

use ildc_ir::expr::{BinaryOperator, Expression, Literal, UnaryOperator};
use ildc_ir::metadata::{FieldRef, MethodRef, TypeRef};
use ildc_ir::stmt::{Block, CatchClause, Statement, SwitchCase};
use ildc_ir::variables::{Parameter, Variable, VariableTable};
use ildc_ir::visit::{ExpressionVisitor, StatementVisitor};

/// Render a statement tree as C# text. A root `Block` is written without
/// braces.
pub fn write_statement(stmt: &Statement) -> String {
    let mut writer = CSharpWriter::new();
    match stmt {
        Statement::Block(block) => writer.statements(block),
        other => other.accept(&mut writer),
    }
    writer.finish()
}

pub fn write_expression(expr: &Expression) -> String {
    expr.accept(&mut CSharpWriter::new())
}

/// Render a whole method: signature, local declarations and body.
pub fn write_method(method: &MethodRef, variables: &VariableTable, body: &Statement) -> String {
    let mut writer = CSharpWriter::new();
    let params: Vec<String> = variables
        .parameters
        .iter()
        .map(|p| format!("{} {}", type_name(&p.ty), p.name))
        .collect();
    let modifier = if method.has_this { "" } else { "static " };
    let name = if method.is_constructor() {
        method.declaring_type.name()
    } else {
        method.name.as_str()
    };
    if method.is_constructor() {
        writer.line(format!("{name}({})", params.join(", ")));
    } else {
        writer.line(format!(
            "{modifier}{} {name}({})",
            type_name(&method.return_type),
            params.join(", ")
        ));
    }
    writer.line("{");
    writer.indent += 1;
    for local in &variables.locals {
        writer.line(format!("{} {};", type_name(&local.ty), local.name));
    }
    if !variables.locals.is_empty() {
        writer.out.push('\n');
    }
    match body {
        Statement::Block(block) => writer.statements(block),
        other => other.accept(&mut writer),
    }
    writer.indent -= 1;
    writer.line("}");
    writer.finish()
}

/// C# spelling of a type: keywords for primitives, otherwise the short name.
pub fn type_name(ty: &TypeRef) -> String {
    if let Some(element) = ty.full_name.strip_suffix("[]") {
        return format!("{}[]", type_name(&TypeRef::new(element)));
    }
    let keyword = match ty.full_name.as_str() {
        "System.Void" => "void",
        "System.Boolean" => "bool",
        "System.Char" => "char",
        "System.SByte" => "sbyte",
        "System.Byte" => "byte",
        "System.Int16" => "short",
        "System.UInt16" => "ushort",
        "System.Int32" => "int",
        "System.UInt32" => "uint",
        "System.Int64" => "long",
        "System.UInt64" => "ulong",
        "System.Single" => "float",
        "System.Double" => "double",
        "System.String" => "string",
        "System.Object" => "object",
        _ => return ty.name().to_string(),
    };
    keyword.to_string()
}

/// Writes statements line by line and expressions as strings.
#[derive(Debug, Default)]
pub struct CSharpWriter {
    out: String,
    indent: usize,
}

impl CSharpWriter {
    pub fn new() -> Self {
        CSharpWriter::default()
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn line(&mut self, text: impl AsRef<str>) {
        let _ = writeln!(self.out, "{}{}", "    ".repeat(self.indent), text.as_ref());
    }

    fn statements(&mut self, block: &[Statement]) {
        for stmt in block {
            stmt.accept(self);
        }
    }

    fn nested(&mut self, block: &[Statement]) {
        self.indent += 1;
        self.statements(block);
        self.indent -= 1;
    }

    /// Operand text, parenthesized when it is itself an operator expression.
    fn operand(&mut self, expr: &Expression) -> String {
        let text = expr.accept(self);
        match expr {
            Expression::Binary { .. }
            | Expression::Condition { .. }
            | Expression::Assign { .. }
            | Expression::NullCoalesce { .. }
            | Expression::SafeCast { .. }
            | Expression::CanCast { .. }
            | Expression::Cast { .. } => format!("({text})"),
            _ => text,
        }
    }

    fn arguments(&mut self, arguments: &[Expression]) -> String {
        let args: Vec<String> = arguments.iter().map(|a| a.accept(self)).collect();
        args.join(", ")
    }

    fn write_if(
        &mut self,
        keyword: &str,
        condition: &Expression,
        then_block: &Block,
        else_block: Option<&Block>,
    ) {
        let condition = condition.accept(self);
        self.line(format!("{keyword}if ({condition}) {{"));
        self.nested(then_block);
        match else_block.map(Vec::as_slice) {
            None | Some([]) => self.line("}"),
            Some(
                [
                    Statement::If {
                        condition,
                        then_block,
                        else_block,
                    },
                ],
            ) => self.write_if("} else ", condition, then_block, else_block.as_ref()),
            Some(block) => {
                self.line("} else {");
                self.nested(block);
                self.line("}");
            }
        }
    }
}

impl ExpressionVisitor for CSharpWriter {
    type Output = String;

    fn visit_literal(&mut self, literal: &Literal) -> String {
        match literal {
            Literal::Null => "null".into(),
            Literal::Boolean(b) => b.to_string(),
            Literal::Int32(v) => v.to_string(),
            Literal::Int64(v) => format!("{v}L"),
            Literal::Float32(v) => format!("{v:?}f"),
            Literal::Float64(v) => format!("{v:?}"),
            Literal::String(s) => format!("\"{}\"", escape_string(s)),
        }
    }

    fn visit_variable(&mut self, variable: &Variable) -> String {
        variable.name.clone()
    }

    fn visit_argument(&mut self, parameter: &Parameter) -> String {
        parameter.name.clone()
    }

    fn visit_field(&mut self, target: Option<&Expression>, field: &FieldRef) -> String {
        match target {
            Some(target) => format!("{}.{}", self.operand(target), field.name),
            None => format!("{}.{}", type_name(&field.declaring_type), field.name),
        }
    }

    fn visit_this(&mut self) -> String {
        "this".into()
    }

    fn visit_base(&mut self) -> String {
        "base".into()
    }

    fn visit_binary(&mut self, op: BinaryOperator, left: &Expression, right: &Expression) -> String {
        let l = self.operand(left);
        let r = self.operand(right);
        format!("{l} {op} {r}")
    }

    fn visit_unary(&mut self, op: UnaryOperator, operand: &Expression) -> String {
        let e = match operand {
            Expression::Unary { .. } => format!("({})", operand.accept(self)),
            _ => self.operand(operand),
        };
        match op {
            UnaryOperator::PostIncrement | UnaryOperator::PostDecrement => format!("{e}{op}"),
            _ => format!("{op}{e}"),
        }
    }

    fn visit_assign(&mut self, target: &Expression, value: &Expression) -> String {
        format!("{} = {}", target.accept(self), value.accept(self))
    }

    fn visit_invocation(
        &mut self,
        target: Option<&Expression>,
        method: &MethodRef,
        arguments: &[Expression],
    ) -> String {
        let receiver = match target {
            Some(target) => self.operand(target),
            None => type_name(&method.declaring_type),
        };
        if method.is_constructor() {
            return format!("{receiver}({})", self.arguments(arguments));
        }
        match (method.name.strip_prefix("get_"), method.name.strip_prefix("set_"), arguments) {
            (Some("Item"), _, [index]) => format!("{receiver}[{}]", index.accept(self)),
            (_, Some("Item"), [index, value]) => format!(
                "{receiver}[{}] = {}",
                index.accept(self),
                value.accept(self)
            ),
            (Some(property), _, []) => format!("{receiver}.{property}"),
            (_, Some(property), [value]) => {
                format!("{receiver}.{property} = {}", value.accept(self))
            }
            _ => format!("{receiver}.{}({})", method.name, self.arguments(arguments)),
        }
    }

    fn visit_cast(&mut self, ty: &TypeRef, operand: &Expression) -> String {
        format!("({}){}", type_name(ty), self.operand(operand))
    }

    fn visit_safe_cast(&mut self, ty: &TypeRef, operand: &Expression) -> String {
        format!("{} as {}", self.operand(operand), type_name(ty))
    }

    fn visit_can_cast(&mut self, ty: &TypeRef, operand: &Expression) -> String {
        format!("{} is {}", self.operand(operand), type_name(ty))
    }

    fn visit_array_indexer(&mut self, array: &Expression, index: &Expression) -> String {
        format!("{}[{}]", self.operand(array), index.accept(self))
    }

    fn visit_array_creation(&mut self, element_type: &TypeRef, size: &Expression) -> String {
        format!("new {}[{}]", type_name(element_type), size.accept(self))
    }

    fn visit_object_creation(&mut self, constructor: &MethodRef, arguments: &[Expression]) -> String {
        format!(
            "new {}({})",
            type_name(&constructor.declaring_type),
            self.arguments(arguments)
        )
    }

    fn visit_condition(
        &mut self,
        condition: &Expression,
        then_value: &Expression,
        else_value: &Expression,
    ) -> String {
        format!(
            "{} ? {} : {}",
            self.operand(condition),
            self.operand(then_value),
            self.operand(else_value)
        )
    }

    fn visit_null_coalesce(&mut self, value: &Expression, fallback: &Expression) -> String {
        format!("{} ?? {}", self.operand(value), self.operand(fallback))
    }

    fn visit_type_of(&mut self, ty: &TypeRef) -> String {
        format!("typeof({})", type_name(ty))
    }
}

impl StatementVisitor for CSharpWriter {
    type Output = ();

    fn visit_block(&mut self, block: &Block) {
        self.line("{");
        self.nested(block);
        self.line("}");
    }

    fn visit_expression_statement(&mut self, expr: &Expression) {
        let text = expr.accept(self);
        self.line(format!("{text};"));
    }

    fn visit_if(&mut self, condition: &Expression, then_block: &Block, else_block: Option<&Block>) {
        self.write_if("", condition, then_block, else_block);
    }

    fn visit_while(&mut self, condition: &Expression, body: &Block) {
        let condition = condition.accept(self);
        self.line(format!("while ({condition}) {{"));
        self.nested(body);
        self.line("}");
    }

    fn visit_do_while(&mut self, condition: &Expression, body: &Block) {
        self.line("do {");
        self.nested(body);
        let condition = condition.accept(self);
        self.line(format!("}} while ({condition});"));
    }

    fn visit_for(
        &mut self,
        init: &Expression,
        condition: &Expression,
        increment: &Expression,
        body: &Block,
    ) {
        let header = format!(
            "for ({}; {}; {}) {{",
            init.accept(self),
            condition.accept(self),
            increment.accept(self)
        );
        self.line(header);
        self.nested(body);
        self.line("}");
    }

    fn visit_foreach(&mut self, variable: &Variable, collection: &Expression, body: &Block) {
        let collection = collection.accept(self);
        self.line(format!(
            "foreach ({} {} in {collection}) {{",
            type_name(&variable.ty),
            variable.name
        ));
        self.nested(body);
        self.line("}");
    }

    fn visit_switch(
        &mut self,
        discriminant: &Expression,
        cases: &[SwitchCase],
        default: Option<&Block>,
    ) {
        let discriminant = discriminant.accept(self);
        self.line(format!("switch ({discriminant}) {{"));
        self.indent += 1;
        for case in cases {
            let value = case.value.accept(self);
            self.line(format!("case {value}:"));
            if !case.falls_through {
                self.nested(&case.body);
            }
        }
        if let Some(default) = default {
            self.line("default:");
            self.nested(default);
        }
        self.indent -= 1;
        self.line("}");
    }

    fn visit_try(&mut self, body: &Block, catches: &[CatchClause], finally: Option<&Block>) {
        self.line("try {");
        self.nested(body);
        for clause in catches {
            let header = match &clause.variable {
                None if clause.exception_type.is_object() => "} catch {".to_string(),
                None => format!("}} catch ({}) {{", type_name(&clause.exception_type)),
                Some(v) => format!(
                    "}} catch ({} {}) {{",
                    type_name(&clause.exception_type),
                    v.name
                ),
            };
            self.line(header);
            self.nested(&clause.body);
        }
        if let Some(finally) = finally {
            self.line("} finally {");
            self.nested(finally);
        }
        self.line("}");
    }

    fn visit_throw(&mut self, value: Option<&Expression>) {
        match value {
            Some(value) => {
                let value = value.accept(self);
                self.line(format!("throw {value};"));
            }
            None => self.line("throw;"),
        }
    }

    fn visit_return(&mut self, value: Option<&Expression>) {
        match value {
            Some(value) => {
                let value = value.accept(self);
                self.line(format!("return {value};"));
            }
            None => self.line("return;"),
        }
    }

    fn visit_break(&mut self) {
        self.line("break;");
    }

    fn visit_continue(&mut self) {
        self.line("continue;");
    }

    fn visit_goto(&mut self, label: &str) {
        self.line(format!("goto {label};"));
    }

    fn visit_labeled(&mut self, label: &str) {
        self.line(format!("{label}:"));
    }
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
