mod common;

use common::*;
use ildc_ir::*;

#[test]
fn comparison_returns_directly() {
    let mut b = static_builder("IsPositive", TypeRef::boolean());
    let x = b.param("x", TypeRef::int32());
    b.ldarg(x).ldc_i4(0).emit(Opcode::Cgt).emit(Opcode::Ret);
    assert_eq!(decompile(&b.build().unwrap()), "return x > 0;\n");
}

#[test]
fn ceq_against_zero_negates_a_boolean() {
    let mut b = static_builder("Not", TypeRef::boolean());
    let flag = b.param("flag", TypeRef::boolean());
    b.ldarg(flag).ldc_i4(0).emit(Opcode::Ceq).emit(Opcode::Ret);
    assert_eq!(decompile(&b.build().unwrap()), "return !flag;\n");
}

#[test]
fn ceq_against_zero_on_integers_stays_a_comparison() {
    let mut b = static_builder("IsZero", TypeRef::boolean());
    let x = b.param("x", TypeRef::int32());
    b.ldarg(x).ldc_i4(0).emit(Opcode::Ceq).emit(Opcode::Ret);
    assert_eq!(decompile(&b.build().unwrap()), "return x == 0;\n");
}

#[test]
fn integer_literal_into_boolean_local_becomes_true() {
    let mut b = static_builder("Flag", TypeRef::boolean());
    let done = b.local("done", TypeRef::boolean());
    b.ldc_i4(1).stloc(done).ldloc(done).emit(Opcode::Ret);
    assert_eq!(decompile(&b.build().unwrap()), "done = true;\nreturn done;\n");
}

#[test]
fn nested_arithmetic_is_parenthesized() {
    let mut b = static_builder("Scale", TypeRef::int32());
    let x = b.param("x", TypeRef::int32());
    let y = b.param("y", TypeRef::int32());
    b.ldarg(x)
        .ldarg(y)
        .emit(Opcode::Add)
        .ldc_i4(3)
        .emit(Opcode::Mul)
        .emit(Opcode::Ret);
    assert_eq!(decompile(&b.build().unwrap()), "return (x + y) * 3;\n");
}

#[test]
fn fields_properties_and_construction() {
    let mut b = MethodBuilder::new(DECLARING_TYPE, "Reset", TypeRef::void(), false);
    let count = FieldRef::new(TypeRef::new(DECLARING_TYPE), "count", TypeRef::int32(), false);
    let items = FieldRef::new(
        TypeRef::new(DECLARING_TYPE),
        "items",
        TypeRef::new("System.Collections.ArrayList"),
        false,
    );
    let ctor = instance(
        "System.Collections.ArrayList",
        ".ctor",
        vec![],
        TypeRef::void(),
    );
    let get_count = instance(
        "System.Collections.ArrayList",
        "get_Count",
        vec![],
        TypeRef::int32(),
    );
    b.ldarg(0).newobj(ctor).stfld(items.clone());
    b.ldarg(0)
        .ldarg(0)
        .ldfld(items)
        .callvirt(get_count)
        .stfld(count);
    b.emit(Opcode::Ret);
    assert_eq!(
        decompile(&b.build().unwrap()),
        "this.items = new ArrayList();\nthis.count = this.items.Count;\n"
    );
}

#[test]
fn indexer_and_setter_calls() {
    let mut b = static_builder("Swap", TypeRef::void());
    let list = b.param("list", TypeRef::new("System.Collections.IList"));
    let get_item = instance(
        "System.Collections.IList",
        "get_Item",
        vec![TypeRef::int32()],
        TypeRef::object(),
    );
    let set_item = instance(
        "System.Collections.IList",
        "set_Item",
        vec![TypeRef::int32(), TypeRef::object()],
        TypeRef::void(),
    );
    let set_name = instance(
        "System.Collections.IList",
        "set_Name",
        vec![TypeRef::string()],
        TypeRef::void(),
    );
    b.ldarg(list)
        .ldc_i4(0)
        .ldarg(list)
        .ldc_i4(1)
        .callvirt(get_item)
        .callvirt(set_item);
    b.ldarg(list).ldstr("pair").callvirt(set_name);
    b.emit(Opcode::Ret);
    assert_eq!(
        decompile(&b.build().unwrap()),
        "list[0] = list[1];\nlist.Name = \"pair\";\n"
    );
}

#[test]
fn ternary_from_value_branches() {
    let mut b = static_builder("Pick", TypeRef::int32());
    let f = b.param("f", TypeRef::boolean());
    let (taken, merge) = (b.label(), b.label());
    b.ldarg(f).branch(Opcode::Brtrue, taken);
    b.ldc_i4(20).branch(Opcode::Br, merge);
    b.mark(taken).ldc_i4(10);
    b.mark(merge).emit(Opcode::Ret);
    assert_eq!(decompile(&b.build().unwrap()), "return f ? 10 : 20;\n");
}

#[test]
fn null_coalescing_from_dup_and_pop() {
    let mut b = static_builder("OrDefault", TypeRef::string());
    let s = b.param("s", TypeRef::string());
    let merge = b.label();
    b.ldarg(s).emit(Opcode::Dup).branch(Opcode::Brtrue, merge);
    b.emit(Opcode::Pop).ldstr("none");
    b.mark(merge).emit(Opcode::Ret);
    assert_eq!(decompile(&b.build().unwrap()), "return s ?? \"none\";\n");
}

#[test]
fn value_or_inside_and_in_an_assignment() {
    let mut b = static_builder("Both", TypeRef::boolean());
    let a = b.param("a", TypeRef::boolean());
    let bb = b.param("b", TypeRef::boolean());
    let c = b.param("c", TypeRef::boolean());
    let r = b.local("r", TypeRef::boolean());
    let (check_c, fail, store) = (b.label(), b.label(), b.label());
    b.ldarg(a).branch(Opcode::Brtrue, check_c);
    b.ldarg(bb).branch(Opcode::Brfalse, fail);
    b.mark(check_c).ldarg(c).branch(Opcode::Br, store);
    b.mark(fail).ldc_i4(0);
    b.mark(store).stloc(r).ldloc(r).emit(Opcode::Ret);
    assert_eq!(
        decompile(&b.build().unwrap()),
        "r = (a || b) && c;\nreturn r;\n"
    );
}

#[test]
fn return_or_folds_into_one_statement() {
    let mut b = static_builder("Check", TypeRef::boolean());
    let cond = b.param("cond", TypeRef::boolean());
    let f = helper("F", vec![], TypeRef::boolean());
    let taken = b.label();
    b.ldarg(cond).branch(Opcode::Brtrue, taken);
    b.call(f).emit(Opcode::Ret);
    b.mark(taken).ldc_i4(1).emit(Opcode::Ret);
    assert_eq!(
        decompile(&b.build().unwrap()),
        "return cond || Sample.F();\n"
    );
}

#[test]
fn return_not_and_folds_into_one_statement() {
    let mut b = static_builder("Check", TypeRef::boolean());
    let cond = b.param("cond", TypeRef::boolean());
    let f = helper("F", vec![], TypeRef::boolean());
    let taken = b.label();
    b.ldarg(cond).branch(Opcode::Brtrue, taken);
    b.call(f).emit(Opcode::Ret);
    b.mark(taken).ldc_i4(0).emit(Opcode::Ret);
    assert_eq!(
        decompile(&b.build().unwrap()),
        "return !cond && Sample.F();\n"
    );
}

#[test]
fn type_test_from_isinst() {
    let mut b = static_builder("IsText", TypeRef::boolean());
    let o = b.param("o", TypeRef::object());
    b.ldarg(o)
        .emit_with(Opcode::Isinst, Operand::Type(TypeRef::string()))
        .emit(Opcode::Ldnull)
        .emit(Opcode::CgtUn)
        .emit(Opcode::Ret);
    assert_eq!(decompile(&b.build().unwrap()), "return o is string;\n");
}

#[test]
fn embedded_assignment_from_dup() {
    let mut b = static_builder("Bump", TypeRef::int32());
    let x = b.local("x", TypeRef::int32());
    b.ldc_i4(5).emit(Opcode::Dup).stloc(x).emit(Opcode::Ret);
    assert_eq!(decompile(&b.build().unwrap()), "return x = 5;\n");
}

#[test]
fn typeof_folds_the_handle_lookup() {
    let mut b = static_builder("Kind", TypeRef::new("System.Type"));
    let from_handle = MethodRef::new(
        TypeRef::new("System.Type"),
        "GetTypeFromHandle",
        vec![TypeRef::new("System.RuntimeTypeHandle")],
        TypeRef::new("System.Type"),
        false,
    );
    b.emit_with(Opcode::Ldtoken, Operand::Type(TypeRef::int32()))
        .call(from_handle)
        .emit(Opcode::Ret);
    assert_eq!(decompile(&b.build().unwrap()), "return typeof(int);\n");
}

#[test]
fn string_literals_are_escaped() {
    let mut b = static_builder("Quote", TypeRef::string());
    b.ldstr("say \"hi\"\n").emit(Opcode::Ret);
    assert_eq!(
        decompile(&b.build().unwrap()),
        "return \"say \\\"hi\\\"\\n\";\n"
    );
}

/// `slot = c ? 1 : 0; return slot;` with `slot` of the given type.
fn zero_or_one(slot_type: TypeRef) -> MethodBody {
    let mut b = static_builder("Flag", slot_type.clone());
    let c = b.param("c", TypeRef::boolean());
    let slot = b.local("x", slot_type);
    let (taken, merge) = (b.label(), b.label());
    b.ldarg(c).branch(Opcode::Brtrue, taken);
    b.ldc_i4(0).branch(Opcode::Br, merge);
    b.mark(taken).ldc_i4(1);
    b.mark(merge).stloc(slot).ldloc(slot).emit(Opcode::Ret);
    b.build().unwrap()
}

#[test]
fn integer_ternary_of_zero_and_one_stays_a_ternary() {
    assert_eq!(
        decompile(&zero_or_one(TypeRef::int32())),
        "x = c ? 1 : 0;\nreturn x;\n"
    );
}

#[test]
fn boolean_ternary_of_zero_and_one_is_its_condition() {
    assert_eq!(
        decompile(&zero_or_one(TypeRef::boolean())),
        "x = c;\nreturn x;\n"
    );
}
