mod common;

use common::*;
use ildc_ir::*;

fn guarded_body(handler: Handler, store_exception: bool) -> MethodBody {
    let mut b = static_builder("Guarded", TypeRef::void());
    let ex = b.local("ex", TypeRef::new("System.Exception"));
    let (start, catch, end) = (b.label(), b.label(), b.label());
    b.mark(start)
        .call(helper("Work", vec![], TypeRef::void()))
        .branch(Opcode::Leave, end);
    b.mark(catch);
    if store_exception {
        b.stloc(ex).ldloc(ex).call(helper(
            "Report",
            vec![TypeRef::new("System.Exception")],
            TypeRef::void(),
        ));
    } else {
        b.emit(Opcode::Pop);
    }
    b.branch(Opcode::Leave, end);
    b.mark(end).emit(Opcode::Ret);
    b.region(handler, start, catch, catch, end);
    b.build().unwrap()
}

#[test]
fn typed_catch_binds_its_variable() {
    let body = guarded_body(Handler::Catch(TypeRef::new("System.Exception")), true);
    let expected = "\
try {
    Sample.Work();
} catch (Exception ex) {
    Sample.Report(ex);
}
";
    assert_eq!(decompile(&body), expected);
}

#[test]
fn catch_all_without_variable_is_bare() {
    let body = guarded_body(Handler::Catch(TypeRef::object()), false);
    assert_eq!(
        decompile(&body),
        "try {\n    Sample.Work();\n} catch {\n}\n"
    );
}

#[test]
fn typed_catch_without_variable_names_the_type() {
    let body = guarded_body(Handler::Catch(TypeRef::new("System.IO.IOException")), false);
    assert!(decompile(&body).contains("} catch (IOException) {\n"));
}

#[test]
fn finally_block() {
    let mut b = static_builder("Cleanup", TypeRef::void());
    let (start, finally, end) = (b.label(), b.label(), b.label());
    b.mark(start)
        .call(helper("Work", vec![], TypeRef::void()))
        .branch(Opcode::Leave, end);
    b.mark(finally)
        .call(helper("Cleanup", vec![], TypeRef::void()))
        .emit(Opcode::Endfinally);
    b.mark(end).emit(Opcode::Ret);
    b.region(Handler::Finally, start, finally, finally, end);
    assert_eq!(
        decompile(&b.build().unwrap()),
        "try {\n    Sample.Work();\n} finally {\n    Sample.Cleanup();\n}\n"
    );
}

#[test]
fn fault_handler_is_written_as_finally() {
    let mut b = static_builder("Cleanup", TypeRef::void());
    let (start, fault, end) = (b.label(), b.label(), b.label());
    b.mark(start)
        .call(helper("Work", vec![], TypeRef::void()))
        .branch(Opcode::Leave, end);
    b.mark(fault)
        .call(helper("Undo", vec![], TypeRef::void()))
        .emit(Opcode::Endfinally);
    b.mark(end).emit(Opcode::Ret);
    b.region(Handler::Fault, start, fault, fault, end);
    assert!(decompile(&b.build().unwrap()).contains("} finally {\n    Sample.Undo();\n}"));
}

#[test]
fn catch_nested_in_finally_merges_into_one_statement() {
    let expected = "\
try {
    Sample.Work();
} catch (Exception ex) {
    Sample.Report(ex);
} finally {
    Sample.Cleanup();
}
";
    assert_eq!(decompile(&try_catch_finally()), expected);
}

#[test]
fn rethrow_inside_catch() {
    let mut b = static_builder("Wrap", TypeRef::void());
    let (start, catch, end) = (b.label(), b.label(), b.label());
    b.mark(start)
        .call(helper("Work", vec![], TypeRef::void()))
        .branch(Opcode::Leave, end);
    b.mark(catch).emit(Opcode::Pop).emit(Opcode::Rethrow);
    b.mark(end).emit(Opcode::Ret);
    b.region(
        Handler::Catch(TypeRef::new("System.Exception")),
        start,
        catch,
        catch,
        end,
    );
    assert!(
        decompile(&b.build().unwrap()).contains("} catch (Exception) {\n    throw;\n}"),
    );
}

#[test]
fn enumerator_protocol_becomes_foreach() {
    let body = enumerator_loop(&ForEachShape {
        guarded: true,
        ..ForEachShape::default()
    });
    assert_eq!(
        decompile(&body),
        "foreach (object item in items) {\n    Sample.Show(item);\n}\n"
    );
}

#[test]
fn cast_of_the_current_element_types_the_loop_variable() {
    let body = enumerator_loop(&ForEachShape {
        guarded: true,
        cast: Some(TypeRef::string()),
        ..ForEachShape::default()
    });
    assert_eq!(
        decompile(&body),
        "foreach (string item in items) {\n    Sample.Show(item);\n}\n"
    );
}

#[test]
fn unguarded_dispose_keeps_the_enumerator_code() {
    let body = enumerator_loop(&ForEachShape::default());
    let expected = "\
e = items.GetEnumerator();
try {
    while (e.MoveNext()) {
        item = e.Current;
        Sample.Show(item);
    }
} finally {
    e.Dispose();
}
";
    assert_eq!(decompile(&body), expected);
}

#[test]
fn body_touching_the_enumerator_keeps_the_enumerator_code() {
    let body = enumerator_loop(&ForEachShape {
        guarded: true,
        body_uses_enumerator: true,
        ..ForEachShape::default()
    });
    let text = decompile(&body);
    assert!(!text.contains("foreach"), "{text}");
    assert!(text.contains("Sample.Show(e);"), "{text}");
    assert!(text.contains("if (e != null) {"), "{text}");
}

fn work() -> MethodRef {
    helper("Work", vec![], TypeRef::void())
}

fn cond() -> MethodRef {
    helper("Cond", vec![], TypeRef::boolean())
}

#[test]
fn do_while_around_try_catch() {
    let mut b = static_builder("Retry", TypeRef::void());
    let (start, catch, test) = (b.label(), b.label(), b.label());
    b.mark(start).call(work()).branch(Opcode::Leave, test);
    b.mark(catch).emit(Opcode::Pop).branch(Opcode::Leave, test);
    b.mark(test).call(cond()).branch(Opcode::Brtrue, start);
    b.emit(Opcode::Ret);
    b.region(Handler::Catch(TypeRef::object()), start, catch, catch, test);
    let expected = "\
do {
    try {
        Sample.Work();
    } catch {
    }
} while (Sample.Cond());
";
    assert_eq!(decompile(&b.build().unwrap()), expected);
}

#[test]
fn endless_loop_around_try_catch() {
    let mut b = static_builder("Spin", TypeRef::void());
    let (start, catch, next) = (b.label(), b.label(), b.label());
    b.mark(start).call(work()).branch(Opcode::Leave, next);
    b.mark(catch).emit(Opcode::Pop).branch(Opcode::Leave, next);
    b.mark(next).branch(Opcode::Br, start);
    b.region(Handler::Catch(TypeRef::object()), start, catch, catch, next);
    let expected = "\
while (true) {
    try {
        Sample.Work();
    } catch {
    }
}
";
    assert_eq!(decompile(&b.build().unwrap()), expected);
}

#[test]
fn try_catch_ending_a_while_body_needs_no_continue() {
    let mut b = static_builder("Poll", TypeRef::void());
    let (start, catch, test) = (b.label(), b.label(), b.label());
    b.branch(Opcode::Br, test);
    b.mark(start).call(work()).branch(Opcode::Leave, test);
    b.mark(catch).emit(Opcode::Pop).branch(Opcode::Leave, test);
    b.mark(test).call(cond()).branch(Opcode::Brtrue, start);
    b.emit(Opcode::Ret);
    b.region(Handler::Catch(TypeRef::object()), start, catch, catch, test);
    let text = decompile(&b.build().unwrap());
    let expected = "\
while (Sample.Cond()) {
    try {
        Sample.Work();
    } catch {
    }
}
";
    assert_eq!(text, expected);
    assert!(!text.contains("continue;"), "{text}");
}
