//! YAML method-body fixtures.
//!
//! ```yaml
//! type: Demo.Sample
//! methods:
//!   - name: Check
//!     static: true
//!     returns: bool
//!     parameters: [{ name: flag, type: bool }]
//!     code:
//!       - ldarg.0
//!       - brtrue IS_SET
//!       - call bool Demo.Sample::Fallback()
//!       - ret
//!       - "IS_SET:"
//!       - ldc.i4.1
//!       - ret
//! ```
//!
//! Method operands are written `[instance] Ret Decl::Name(P1,P2)`, field
//! operands `Type Decl::name`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ildc_ir::builder::{Handler, Label, MethodBody, MethodBuilder};
use ildc_ir::error::IrError;
use ildc_ir::instruction::{Opcode, Operand};
use ildc_ir::metadata::{FieldRef, MethodRef, TypeRef};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid fixture: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{method}: code line {line}: {reason}")]
    Code {
        method: String,
        line: usize,
        reason: String,
    },

    #[error("{method}: {source}")]
    Build {
        method: String,
        #[source]
        source: IrError,
    },
}

pub type Result<T> = std::result::Result<T, FixtureError>;

#[derive(Debug, Deserialize)]
pub struct Fixture {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub methods: Vec<MethodFixture>,
}

#[derive(Debug, Deserialize)]
pub struct MethodFixture {
    pub name: String,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    #[serde(default = "default_return")]
    pub returns: String,
    #[serde(default)]
    pub parameters: Vec<SlotFixture>,
    #[serde(default)]
    pub locals: Vec<SlotFixture>,
    #[serde(default)]
    pub code: Vec<String>,
    #[serde(default)]
    pub regions: Vec<RegionFixture>,
}

fn default_return() -> String {
    "void".to_string()
}

#[derive(Debug, Deserialize)]
pub struct SlotFixture {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKindFixture {
    Catch,
    Filter,
    Finally,
    Fault,
}

/// Labels are `[start, end)`.
#[derive(Debug, Deserialize)]
pub struct RegionFixture {
    pub kind: RegionKindFixture,
    #[serde(rename = "try")]
    pub try_range: [String; 2],
    pub handler: [String; 2],
    /// Exception type of a `catch` region.
    #[serde(default)]
    pub catch: Option<String>,
    /// Label where the filter code of a `filter` region starts.
    #[serde(default)]
    pub filter: Option<String>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Fixture> {
        let text = fs::read_to_string(path).map_err(|source| FixtureError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Fixture::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Fixture> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Assemble one method body. Failures are reported per method.
    pub fn build(&self, method: &MethodFixture) -> Result<MethodBody> {
        MethodAssembler::new(&self.type_name, method).assemble()
    }
}

struct MethodAssembler<'a> {
    fixture: &'a MethodFixture,
    qualified: String,
    builder: MethodBuilder,
    labels: BTreeMap<String, Label>,
    params: BTreeMap<String, u16>,
    locals: BTreeMap<String, u16>,
}

impl<'a> MethodAssembler<'a> {
    fn new(type_name: &str, fixture: &'a MethodFixture) -> Self {
        let mut builder = MethodBuilder::new(
            type_name,
            fixture.name.clone(),
            parse_type(&fixture.returns),
            fixture.is_static,
        );
        let params = fixture
            .parameters
            .iter()
            .map(|p| (p.name.clone(), builder.param(p.name.clone(), parse_type(&p.ty))))
            .collect();
        let locals = fixture
            .locals
            .iter()
            .map(|l| (l.name.clone(), builder.local(l.name.clone(), parse_type(&l.ty))))
            .collect();
        MethodAssembler {
            fixture,
            qualified: format!("{type_name}::{}", fixture.name),
            builder,
            labels: BTreeMap::new(),
            params,
            locals,
        }
    }

    fn assemble(mut self) -> Result<MethodBody> {
        let fixture = self.fixture;
        for (i, line) in fixture.code.iter().enumerate() {
            self.line(line.trim())
                .map_err(|reason| FixtureError::Code {
                    method: self.qualified.clone(),
                    line: i + 1,
                    reason,
                })?;
        }
        for region in &fixture.regions {
            self.region(region).map_err(|reason| FixtureError::Code {
                method: self.qualified.clone(),
                line: 0,
                reason,
            })?;
        }
        self.builder.build().map_err(|source| FixtureError::Build {
            method: self.qualified.clone(),
            source,
        })
    }

    fn label(&mut self, name: &str) -> Label {
        if let Some(label) = self.labels.get(name) {
            return *label;
        }
        let label = self.builder.label();
        self.labels.insert(name.to_string(), label);
        label
    }

    fn line(&mut self, line: &str) -> std::result::Result<(), String> {
        if line.is_empty() {
            return Ok(());
        }
        if let Some(name) = line
            .strip_suffix(':')
            .filter(|name| !name.contains(char::is_whitespace))
        {
            let label = self.label(name.trim());
            self.builder.mark(label);
            return Ok(());
        }

        let (mnemonic, operand) = match line.split_once(char::is_whitespace) {
            Some((m, rest)) => (m, rest.trim()),
            None => (line, ""),
        };
        // short forms with the operand folded into the mnemonic
        if let Some((base, index)) = short_form(mnemonic) {
            let opcode = Opcode::from_mnemonic(base).ok_or(format!("unknown mnemonic `{base}`"))?;
            let operand = match opcode {
                Opcode::LdcI4 => Operand::Int32(index),
                Opcode::Ldarg => Operand::Argument(index as u16),
                _ => Operand::Variable(index as u16),
            };
            self.builder.emit_with(opcode, operand);
            return Ok(());
        }

        let opcode =
            Opcode::from_mnemonic(mnemonic).ok_or(format!("unknown mnemonic `{mnemonic}`"))?;
        match opcode {
            Opcode::Switch => {
                let targets: Vec<Label> = operand
                    .trim_start_matches('(')
                    .trim_end_matches(')')
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(|name| self.label(name))
                    .collect();
                self.builder.switch(&targets);
            }
            op if op.is_jump() => {
                if operand.is_empty() {
                    return Err(format!("`{mnemonic}` needs a target label"));
                }
                let target = self.label(operand);
                self.builder.branch(op, target);
            }
            _ => {
                let operand = self.operand(opcode, operand)?;
                self.builder.emit_with(opcode, operand);
            }
        }
        Ok(())
    }

    fn operand(&self, opcode: Opcode, text: &str) -> std::result::Result<Operand, String> {
        let number_error = |e: &dyn std::fmt::Display| format!("bad operand `{text}`: {e}");
        let operand = match opcode {
            Opcode::LdcI4 => Operand::Int32(parse_int(text).map_err(|e| number_error(&e))?),
            Opcode::LdcI8 => Operand::Int64(
                text.trim_end_matches(['L', 'l'])
                    .parse()
                    .map_err(|e| number_error(&e))?,
            ),
            Opcode::LdcR4 => Operand::Float32(
                text.trim_end_matches(['f', 'F'])
                    .parse()
                    .map_err(|e| number_error(&e))?,
            ),
            Opcode::LdcR8 => Operand::Float64(text.parse().map_err(|e| number_error(&e))?),
            Opcode::Ldstr => Operand::String(parse_string(text)?),
            Opcode::Ldloc | Opcode::Ldloca | Opcode::Stloc => {
                Operand::Variable(self.slot(text, &self.locals, "local")?)
            }
            Opcode::Ldarg | Opcode::Ldarga | Opcode::Starg => {
                if text == "this" {
                    Operand::Argument(0)
                } else {
                    let index = self.slot(text, &self.params, "parameter")?;
                    Operand::Argument(index)
                }
            }
            Opcode::Ldfld | Opcode::Ldflda | Opcode::Stfld => Operand::Field(parse_field(text, false)?),
            Opcode::Ldsfld | Opcode::Stsfld => Operand::Field(parse_field(text, true)?),
            Opcode::Call | Opcode::Callvirt | Opcode::Newobj => {
                let force_this = matches!(opcode, Opcode::Callvirt | Opcode::Newobj);
                Operand::Method(parse_method(text, force_this)?)
            }
            Opcode::Newarr
            | Opcode::Ldelem
            | Opcode::Ldelema
            | Opcode::Stelem
            | Opcode::Castclass
            | Opcode::Isinst
            | Opcode::Box
            | Opcode::Unbox
            | Opcode::UnboxAny
            | Opcode::Ldtoken => {
                if text.is_empty() {
                    return Err(format!("`{}` needs a type", opcode.mnemonic()));
                }
                Operand::Type(parse_type(text))
            }
            _ if text.is_empty() => Operand::None,
            _ => return Err(format!("`{}` takes no operand", opcode.mnemonic())),
        };
        Ok(operand)
    }

    /// Numeric index, or a declared name resolved through `names`.
    fn slot(
        &self,
        text: &str,
        names: &BTreeMap<String, u16>,
        what: &str,
    ) -> std::result::Result<u16, String> {
        if let Ok(index) = text.parse::<u16>() {
            return Ok(index);
        }
        names
            .get(text)
            .copied()
            .ok_or_else(|| format!("unknown {what} `{text}`"))
    }

    fn region(&mut self, region: &RegionFixture) -> std::result::Result<(), String> {
        let handler = match region.kind {
            RegionKindFixture::Catch => Handler::Catch(parse_type(
                region.catch.as_deref().unwrap_or("System.Object"),
            )),
            RegionKindFixture::Filter => {
                let start = region
                    .filter
                    .as_deref()
                    .ok_or("filter region without a `filter` label")?;
                Handler::Filter(self.label(start))
            }
            RegionKindFixture::Finally => Handler::Finally,
            RegionKindFixture::Fault => Handler::Fault,
        };
        let try_start = self.label(&region.try_range[0]);
        let try_end = self.label(&region.try_range[1]);
        let handler_start = self.label(&region.handler[0]);
        let handler_end = self.label(&region.handler[1]);
        self.builder
            .region(handler, try_start, try_end, handler_start, handler_end);
        Ok(())
    }
}

/// `ldc.i4.3`, `ldc.i4.m1`, `ldloc.0`, `stloc.2`, `ldarg.1`.
fn short_form(mnemonic: &str) -> Option<(&'static str, i32)> {
    let (base, suffix) = mnemonic.rsplit_once('.')?;
    let base = match base {
        "ldc.i4" => "ldc.i4",
        "ldloc" => "ldloc",
        "stloc" => "stloc",
        "ldarg" => "ldarg",
        _ => return None,
    };
    let value = match suffix {
        "m1" | "M1" if base == "ldc.i4" => -1,
        digits => digits.parse::<i32>().ok()?,
    };
    Some((base, value))
}

fn parse_int(text: &str) -> std::result::Result<i32, std::num::ParseIntError> {
    match text.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).map(|v| v as i32),
        None => text.parse(),
    }
}

fn parse_string(text: &str) -> std::result::Result<String, String> {
    let inner = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .ok_or_else(|| format!("expected a quoted string, got `{text}`"))?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => return Err("dangling escape in string".to_string()),
        }
    }
    Ok(out)
}

/// Fixture type spelling: a C# keyword or a full name.
pub fn parse_type(text: &str) -> TypeRef {
    let text = text.trim();
    if let Some(element) = text.strip_suffix("[]") {
        return TypeRef::new(format!("{}[]", parse_type(element).full_name));
    }
    let full = match text {
        "void" => "System.Void",
        "bool" => "System.Boolean",
        "char" => "System.Char",
        "sbyte" => "System.SByte",
        "byte" => "System.Byte",
        "short" => "System.Int16",
        "ushort" => "System.UInt16",
        "int" => "System.Int32",
        "uint" => "System.UInt32",
        "long" => "System.Int64",
        "ulong" => "System.UInt64",
        "float" => "System.Single",
        "double" => "System.Double",
        "string" => "System.String",
        "object" => "System.Object",
        other => other,
    };
    TypeRef::new(full)
}

/// `Decl::name` split at the last `::`.
fn split_member(text: &str) -> std::result::Result<(TypeRef, &str), String> {
    let (decl, name) = text
        .rsplit_once("::")
        .ok_or_else(|| format!("expected `Type::member`, got `{text}`"))?;
    Ok((parse_type(decl), name))
}

/// `[static] Type Decl::name`
fn parse_field(text: &str, is_static: bool) -> std::result::Result<FieldRef, String> {
    let (is_static, rest) = match text.strip_prefix("static ") {
        Some(rest) => (true, rest.trim()),
        None => (is_static, text),
    };
    let (ty, member) = rest
        .split_once(char::is_whitespace)
        .ok_or_else(|| format!("expected `Type Decl::name`, got `{text}`"))?;
    let (decl, name) = split_member(member.trim())?;
    Ok(FieldRef::new(decl, name, parse_type(ty), is_static))
}

/// `[instance] Ret Decl::Name(P1,P2)`
fn parse_method(text: &str, force_this: bool) -> std::result::Result<MethodRef, String> {
    let (instance, rest) = match text.strip_prefix("instance ") {
        Some(rest) => (true, rest.trim()),
        None => (false, text),
    };
    let (ret, signature) = rest
        .split_once(char::is_whitespace)
        .ok_or_else(|| format!("expected `Ret Decl::Name(..)`, got `{text}`"))?;
    let (member, params) = signature
        .trim()
        .strip_suffix(')')
        .and_then(|s| s.split_once('('))
        .ok_or_else(|| format!("missing parameter list in `{text}`"))?;
    let (decl, name) = split_member(member)?;
    let parameters = params
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(parse_type)
        .collect();
    Ok(MethodRef::new(
        decl,
        name,
        parameters,
        parse_type(ret),
        instance || force_this,
    ))
}
