mod common;

use common::*;
use ildc_ir::*;

#[test]
fn early_return_flattens_the_if() {
    let mut b = static_builder("Max", TypeRef::int32());
    let x = b.param("a", TypeRef::int32());
    let y = b.param("b", TypeRef::int32());
    let other = b.label();
    b.ldarg(x).ldarg(y).branch(Opcode::Ble, other);
    b.ldarg(x).emit(Opcode::Ret);
    b.mark(other).ldarg(y).emit(Opcode::Ret);
    assert_eq!(
        decompile(&b.build().unwrap()),
        "if (a > b) {\n    return a;\n}\nreturn b;\n"
    );
}

#[test]
fn if_else_rejoins_before_the_tail() {
    let mut b = static_builder("Log", TypeRef::void());
    let f = b.param("f", TypeRef::boolean());
    let (on_false, join) = (b.label(), b.label());
    b.ldarg(f).branch(Opcode::Brfalse, on_false);
    b.call(helper("A", vec![], TypeRef::void()))
        .branch(Opcode::Br, join);
    b.mark(on_false).call(helper("B", vec![], TypeRef::void()));
    b.mark(join).call(helper("C", vec![], TypeRef::void()));
    b.emit(Opcode::Ret);
    let expected = "\
if (f) {
    Sample.A();
} else {
    Sample.B();
}
Sample.C();
";
    assert_eq!(decompile(&b.build().unwrap()), expected);
}

#[test]
fn shared_arm_tests_combine_into_one_condition() {
    let mut b = static_builder("Both", TypeRef::boolean());
    let a = b.param("a", TypeRef::boolean());
    let bb = b.param("b", TypeRef::boolean());
    let c = b.param("c", TypeRef::boolean());
    let (check_c, fail) = (b.label(), b.label());
    b.ldarg(a).branch(Opcode::Brtrue, check_c);
    b.ldarg(bb).branch(Opcode::Brfalse, fail);
    b.mark(check_c).ldarg(c).emit(Opcode::Ret);
    b.mark(fail).ldc_i4(0).emit(Opcode::Ret);
    assert_eq!(
        decompile(&b.build().unwrap()),
        "if (a || b) {\n    return c;\n}\nreturn false;\n"
    );
}

#[test]
fn bottom_tested_loop_becomes_while() {
    let mut b = static_builder("Drain", TypeRef::void());
    let (body, cond) = (b.label(), b.label());
    b.branch(Opcode::Br, cond);
    b.mark(body).call(helper("Work", vec![], TypeRef::void()));
    b.mark(cond)
        .call(helper("Poll", vec![], TypeRef::boolean()))
        .branch(Opcode::Brtrue, body);
    b.emit(Opcode::Ret);
    assert_eq!(
        decompile(&b.build().unwrap()),
        "while (Sample.Poll()) {\n    Sample.Work();\n}\n"
    );
}

#[test]
fn counting_loop_becomes_for() {
    let body = counting_loop();
    let text = ildc_decompiler::csharp::write_method(
        &body.method,
        &body.variables,
        &ildc_decompiler::decompile_method(&body).unwrap(),
    );
    let expected = "\
static int Sum(int n)
{
    int s;
    int i;

    s = 0;
    for (i = 0; i < n; i++) {
        s = s + i;
    }
    return s;
}
";
    assert_eq!(text, expected);
}

fn counting_loop() -> MethodBody {
    let mut b = static_builder("Sum", TypeRef::int32());
    let n = b.param("n", TypeRef::int32());
    let s = b.local("s", TypeRef::int32());
    let i = b.local("i", TypeRef::int32());
    let (body, cond) = (b.label(), b.label());
    b.ldc_i4(0).stloc(s).ldc_i4(0).stloc(i).branch(Opcode::Br, cond);
    b.mark(body)
        .ldloc(s)
        .ldloc(i)
        .emit(Opcode::Add)
        .stloc(s);
    b.ldloc(i).ldc_i4(1).emit(Opcode::Add).stloc(i);
    b.mark(cond).ldloc(i).ldarg(n).branch(Opcode::Blt, body);
    b.ldloc(s).emit(Opcode::Ret);
    b.build().unwrap()
}

#[test]
fn loop_whose_body_does_not_step_the_counter_stays_while() {
    let mut b = static_builder("Wait", TypeRef::void());
    let i = b.local("i", TypeRef::int32());
    let (body, cond) = (b.label(), b.label());
    b.ldc_i4(0).stloc(i).branch(Opcode::Br, cond);
    b.mark(body).call(helper("Work", vec![], TypeRef::void()));
    b.mark(cond).ldloc(i).ldc_i4(10).branch(Opcode::Blt, body);
    b.emit(Opcode::Ret);
    assert_eq!(
        decompile(&b.build().unwrap()),
        "i = 0;\nwhile (i < 10) {\n    Sample.Work();\n}\n"
    );
}

#[test]
fn latch_test_becomes_do_while() {
    let mut b = static_builder("Spin", TypeRef::void());
    let n = b.param("n", TypeRef::int32());
    let top = b.label();
    b.mark(top).call(helper("Work", vec![], TypeRef::void()));
    b.ldarg(n).ldc_i4(1).emit(Opcode::Sub).starg(n);
    b.ldarg(n).ldc_i4(0).branch(Opcode::Bgt, top);
    b.emit(Opcode::Ret);
    let expected = "\
do {
    Sample.Work();
    n = n - 1;
} while (n > 0);
";
    assert_eq!(decompile(&b.build().unwrap()), expected);
}

#[test]
fn exit_in_the_middle_becomes_endless_loop_with_break() {
    let mut b = static_builder("Pump", TypeRef::void());
    let (top, exit) = (b.label(), b.label());
    b.mark(top).call(helper("Work", vec![], TypeRef::void()));
    b.call(helper("Done", vec![], TypeRef::boolean()))
        .branch(Opcode::Brtrue, exit);
    b.call(helper("Step", vec![], TypeRef::void()))
        .branch(Opcode::Br, top);
    b.mark(exit).call(helper("Finish", vec![], TypeRef::void()));
    b.emit(Opcode::Ret);
    let expected = "\
while (true) {
    Sample.Work();
    if (Sample.Done()) {
        break;
    }
    Sample.Step();
}
Sample.Finish();
";
    assert_eq!(decompile(&b.build().unwrap()), expected);
}

#[test]
fn switch_table_groups_stacked_labels() {
    let mut b = static_builder("Name", TypeRef::string());
    let k = b.param("k", TypeRef::int32());
    let (even, one, other) = (b.label(), b.label(), b.label());
    b.ldarg(k).switch(&[even, one, even]);
    b.branch(Opcode::Br, other);
    b.mark(even).ldstr("even").emit(Opcode::Ret);
    b.mark(one).ldstr("one").emit(Opcode::Ret);
    b.mark(other).ldstr("other").emit(Opcode::Ret);
    let expected = "\
switch (k) {
    case 0:
    case 2:
        return \"even\";
    case 1:
        return \"one\";
    default:
        return \"other\";
}
";
    assert_eq!(decompile(&b.build().unwrap()), expected);
}

#[test]
fn switch_on_a_biased_index_shifts_case_values() {
    let mut b = static_builder("Count", TypeRef::string());
    let k = b.param("k", TypeRef::int32());
    let (one, two, many) = (b.label(), b.label(), b.label());
    b.ldarg(k).ldc_i4(1).emit(Opcode::Sub).switch(&[one, two]);
    b.branch(Opcode::Br, many);
    b.mark(one).ldstr("one").emit(Opcode::Ret);
    b.mark(two).ldstr("two").emit(Opcode::Ret);
    b.mark(many).ldstr("many").emit(Opcode::Ret);
    let text = decompile(&b.build().unwrap());
    assert!(text.starts_with("switch (k) {\n    case 1:\n"), "{text}");
    assert!(text.contains("    case 2:\n        return \"two\";\n"), "{text}");
}

#[test]
fn switch_cases_break_to_the_shared_follow() {
    let mut b = static_builder("Route", TypeRef::void());
    let k = b.param("k", TypeRef::int32());
    let (zero, one, end) = (b.label(), b.label(), b.label());
    b.ldarg(k).switch(&[zero, one]);
    b.branch(Opcode::Br, end);
    b.mark(zero)
        .call(helper("A", vec![], TypeRef::void()))
        .branch(Opcode::Br, end);
    b.mark(one)
        .call(helper("B", vec![], TypeRef::void()))
        .branch(Opcode::Br, end);
    b.mark(end).call(helper("C", vec![], TypeRef::void()));
    b.emit(Opcode::Ret);
    let expected = "\
switch (k) {
    case 0:
        Sample.A();
        break;
    case 1:
        Sample.B();
        break;
}
Sample.C();
";
    assert_eq!(decompile(&b.build().unwrap()), expected);
}

#[test]
fn equality_chain_becomes_switch() {
    let mut b = static_builder("Letter", TypeRef::string());
    let k = b.param("k", TypeRef::int32());
    let (l1, l2, l3) = (b.label(), b.label(), b.label());
    b.ldarg(k).ldc_i4(1).branch(Opcode::Beq, l1);
    b.ldarg(k).ldc_i4(2).branch(Opcode::Beq, l2);
    b.ldarg(k).ldc_i4(3).branch(Opcode::Beq, l3);
    b.ldstr("none").emit(Opcode::Ret);
    b.mark(l1).ldstr("a").emit(Opcode::Ret);
    b.mark(l2).ldstr("b").emit(Opcode::Ret);
    b.mark(l3).ldstr("c").emit(Opcode::Ret);
    let expected = "\
switch (k) {
    case 1:
        return \"a\";
    case 2:
        return \"b\";
    case 3:
        return \"c\";
    default:
        return \"none\";
}
";
    assert_eq!(decompile(&b.build().unwrap()), expected);
}

#[test]
fn equality_chain_cases_follow_the_body_layout() {
    let mut b = static_builder("Letter", TypeRef::string());
    let k = b.param("k", TypeRef::int32());
    let (l1, l2, l3) = (b.label(), b.label(), b.label());
    b.ldarg(k).ldc_i4(3).branch(Opcode::Beq, l3);
    b.ldarg(k).ldc_i4(1).branch(Opcode::Beq, l1);
    b.ldarg(k).ldc_i4(2).branch(Opcode::Beq, l2);
    b.ldstr("none").emit(Opcode::Ret);
    b.mark(l1).ldstr("a").emit(Opcode::Ret);
    b.mark(l2).ldstr("b").emit(Opcode::Ret);
    b.mark(l3).ldstr("c").emit(Opcode::Ret);
    let expected = "\
switch (k) {
    case 1:
        return \"a\";
    case 2:
        return \"b\";
    case 3:
        return \"c\";
    default:
        return \"none\";
}
";
    assert_eq!(decompile(&b.build().unwrap()), expected);
}

#[test]
fn two_equality_tests_stay_ifs() {
    let mut b = static_builder("Letter", TypeRef::string());
    let k = b.param("k", TypeRef::int32());
    let (l1, l2) = (b.label(), b.label());
    b.ldarg(k).ldc_i4(1).branch(Opcode::Beq, l1);
    b.ldarg(k).ldc_i4(2).branch(Opcode::Beq, l2);
    b.ldstr("none").emit(Opcode::Ret);
    b.mark(l1).ldstr("a").emit(Opcode::Ret);
    b.mark(l2).ldstr("b").emit(Opcode::Ret);
    let text = decompile(&b.build().unwrap());
    assert!(!text.contains("switch"), "{text}");
    assert!(text.contains("if (k == 1) {"), "{text}");
}

#[test]
fn decompiling_twice_gives_identical_text() {
    let body = counting_loop();
    assert_eq!(decompile(&body), decompile(&body));
    let guarded = try_catch_finally();
    assert_eq!(decompile(&guarded), decompile(&guarded));
}
