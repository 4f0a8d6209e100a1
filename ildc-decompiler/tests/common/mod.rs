use ildc_decompiler::csharp::write_statement;
use ildc_decompiler::{DecompileError, decompile_method};
use ildc_ir::*;

pub const DECLARING_TYPE: &str = "Demo.Sample";

/// A static helper on the type under test.
pub fn helper(name: &str, parameters: Vec<TypeRef>, return_type: TypeRef) -> MethodRef {
    MethodRef::new(
        TypeRef::new(DECLARING_TYPE),
        name,
        parameters,
        return_type,
        false,
    )
}

/// An instance method on `declaring_type`.
pub fn instance(
    declaring_type: &str,
    name: &str,
    parameters: Vec<TypeRef>,
    return_type: TypeRef,
) -> MethodRef {
    MethodRef::new(
        TypeRef::new(declaring_type),
        name,
        parameters,
        return_type,
        true,
    )
}

pub fn static_builder(name: &str, return_type: TypeRef) -> MethodBuilder {
    MethodBuilder::new(DECLARING_TYPE, name, return_type, true)
}

/// Decompile and render as C# body text.
pub fn decompile(body: &MethodBody) -> String {
    let stmt = decompile_method(body).unwrap_or_else(|e| panic!("{e}"));
    write_statement(&stmt)
}

pub fn decompile_err(body: &MethodBody) -> DecompileError {
    match decompile_method(body) {
        Ok(stmt) => panic!("expected a failure, got:\n{}", write_statement(&stmt)),
        Err(e) => e,
    }
}

/// `try { Work(); } catch (Exception ex) { Report(ex); } finally { Cleanup(); }`
/// as a catch region nested in a finally region.
pub fn try_catch_finally() -> MethodBody {
    let mut b = static_builder("Guarded", TypeRef::void());
    let ex = b.local("ex", TypeRef::new("System.Exception"));
    let work = helper("Work", vec![], TypeRef::void());
    let report = helper("Report", vec![TypeRef::new("System.Exception")], TypeRef::void());
    let cleanup = helper("Cleanup", vec![], TypeRef::void());

    let (start, catch, finally, end) = (b.label(), b.label(), b.label(), b.label());
    b.mark(start).call(work).branch(Opcode::Leave, end);
    b.mark(catch).stloc(ex).ldloc(ex).call(report).branch(Opcode::Leave, end);
    b.mark(finally).call(cleanup).emit(Opcode::Endfinally);
    b.mark(end).emit(Opcode::Ret);
    b.region(
        Handler::Catch(TypeRef::new("System.Exception")),
        start,
        catch,
        catch,
        finally,
    );
    b.region(Handler::Finally, start, finally, finally, end);
    b.build().unwrap()
}

/// Shape knobs for the enumerator protocol.
#[derive(Debug, Clone, Default)]
pub struct ForEachShape {
    /// Null check around `Dispose` in the finally block.
    pub guarded: bool,
    /// Cast the current element to this type.
    pub cast: Option<TypeRef>,
    /// Pass the enumerator itself to `Show` instead of the element.
    pub body_uses_enumerator: bool,
}

/// `foreach (item in items) Show(item);` compiled through
/// `GetEnumerator`/`MoveNext`/`Current` with a disposing finally block.
pub fn enumerator_loop(shape: &ForEachShape) -> MethodBody {
    let mut b = static_builder("Print", TypeRef::void());
    let items = b.param("items", TypeRef::new("System.Collections.IEnumerable"));
    let e = b.local("e", TypeRef::new("System.Collections.IEnumerator"));
    let item_type = shape.cast.clone().unwrap_or_else(TypeRef::object);
    let item = b.local("item", item_type);

    let get_enumerator = instance(
        "System.Collections.IEnumerable",
        "GetEnumerator",
        vec![],
        TypeRef::new("System.Collections.IEnumerator"),
    );
    let move_next = instance(
        "System.Collections.IEnumerator",
        "MoveNext",
        vec![],
        TypeRef::boolean(),
    );
    let current = instance(
        "System.Collections.IEnumerator",
        "get_Current",
        vec![],
        TypeRef::object(),
    );
    let dispose = instance("System.IDisposable", "Dispose", vec![], TypeRef::void());
    let show = helper("Show", vec![TypeRef::object()], TypeRef::void());

    let (try_start, body, cond, finally, skip, end) = (
        b.label(),
        b.label(),
        b.label(),
        b.label(),
        b.label(),
        b.label(),
    );
    b.ldarg(items).callvirt(get_enumerator).stloc(e);
    b.mark(try_start).branch(Opcode::Br, cond);
    b.mark(body).ldloc(e).callvirt(current);
    if let Some(ty) = &shape.cast {
        b.emit_with(Opcode::Castclass, Operand::Type(ty.clone()));
    }
    b.stloc(item);
    if shape.body_uses_enumerator {
        b.ldloc(e);
    } else {
        b.ldloc(item);
    }
    b.call(show);
    b.mark(cond)
        .ldloc(e)
        .callvirt(move_next)
        .branch(Opcode::Brtrue, body);
    b.branch(Opcode::Leave, end);
    b.mark(finally);
    if shape.guarded {
        b.ldloc(e).branch(Opcode::Brfalse, skip);
    }
    b.ldloc(e).callvirt(dispose);
    b.mark(skip).emit(Opcode::Endfinally);
    b.mark(end).emit(Opcode::Ret);
    b.region(Handler::Finally, try_start, finally, finally, end);
    b.build().unwrap()
}
