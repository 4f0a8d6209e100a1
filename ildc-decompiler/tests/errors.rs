mod common;

use common::*;
use ildc_decompiler::{DecompileError, decompile_method};
use ildc_ir::*;

#[test]
fn leftover_value_at_a_statement_is_an_inconsistent_stack() {
    let mut b = static_builder("Leak", TypeRef::void());
    let v = b.local("v", TypeRef::int32());
    b.ldc_i4(1).ldc_i4(2).stloc(v).emit(Opcode::Ret);
    let err = decompile_err(&b.build().unwrap());
    assert!(
        matches!(err, DecompileError::InconsistentStack { offset: 10, .. }),
        "{err}"
    );
    assert_eq!(err.method(), "Demo.Sample::Leak");
}

#[test]
fn branch_with_values_on_both_arms_is_an_unknown_pattern() {
    let mut b = static_builder("Odd", TypeRef::void());
    let flag = b.param("flag", TypeRef::boolean());
    let other = b.label();
    b.ldc_i4(1).ldarg(flag).branch(Opcode::Brtrue, other);
    b.emit(Opcode::Pop).emit(Opcode::Ret);
    b.mark(other).emit(Opcode::Pop).emit(Opcode::Ret);
    let err = decompile_err(&b.build().unwrap());
    assert_eq!(
        err,
        DecompileError::UnknownExpressionPattern {
            method: "Demo.Sample::Odd".into(),
            offset: 8,
        }
    );
}

#[test]
fn falling_off_the_end_is_malformed() {
    let method = helper("Open", vec![], TypeRef::void());
    let body = MethodBody {
        method,
        instructions: vec![Instruction {
            offset: 0,
            opcode: Opcode::Nop,
            operand: Operand::None,
            stack_before: 0,
            stack_after: 0,
        }],
        exception_regions: vec![],
        variables: VariableTable::new(false),
    };
    let err = decompile_err(&body);
    assert!(
        matches!(err, DecompileError::MalformedBytecode { offset: 0, .. }),
        "{err}"
    );
}

#[test]
fn undeclared_local_is_malformed() {
    let mut b = static_builder("Ghost", TypeRef::int32());
    b.ldloc(3).emit(Opcode::Ret);
    let err = decompile_err(&b.build().unwrap());
    assert!(matches!(err, DecompileError::MalformedBytecode { .. }), "{err}");
    assert!(err.to_string().contains("local 3 is not declared"), "{err}");
}

#[test]
fn two_entry_cycle_is_unsupported() {
    let mut b = static_builder("Tangle", TypeRef::void());
    let c = b.param("c", TypeRef::boolean());
    let (first, second) = (b.label(), b.label());
    b.ldarg(c).branch(Opcode::Brtrue, second);
    b.mark(first).call(helper("Work", vec![], TypeRef::void()));
    b.mark(second)
        .call(helper("Work", vec![], TypeRef::void()))
        .branch(Opcode::Br, first);
    let err = decompile_err(&b.build().unwrap());
    assert!(
        matches!(err, DecompileError::UnsupportedConstruct { offset: 13, .. }),
        "{err}"
    );
    assert!(err.to_string().contains("irreducible"), "{err}");
}

#[test]
fn catch_handler_that_ignores_the_exception_slot_is_unsupported() {
    let mut b = static_builder("Sloppy", TypeRef::void());
    let (start, catch, end) = (b.label(), b.label(), b.label());
    b.mark(start)
        .call(helper("Work", vec![], TypeRef::void()))
        .branch(Opcode::Leave, end);
    b.mark(catch)
        .call(helper("Work", vec![], TypeRef::void()))
        .emit(Opcode::Pop)
        .branch(Opcode::Leave, end);
    b.mark(end).emit(Opcode::Ret);
    b.region(
        Handler::Catch(TypeRef::new("System.Exception")),
        start,
        catch,
        catch,
        end,
    );
    let err = decompile_err(&b.build().unwrap());
    assert!(
        matches!(err, DecompileError::UnsupportedConstruct { offset: 10, .. }),
        "{err}"
    );
}

#[test]
fn filter_and_finally_on_one_block_is_unsupported() {
    let mut b = static_builder("Both", TypeRef::void());
    let (start, filter, handler, finally, end) =
        (b.label(), b.label(), b.label(), b.label(), b.label());
    b.mark(start)
        .call(helper("Work", vec![], TypeRef::void()))
        .branch(Opcode::Leave, end);
    b.mark(filter).emit(Opcode::Pop).ldc_i4(1).emit(Opcode::Endfilter);
    b.mark(handler).emit(Opcode::Pop).branch(Opcode::Leave, end);
    b.mark(finally).emit(Opcode::Endfinally);
    b.mark(end).emit(Opcode::Ret);
    b.region(Handler::Filter(filter), start, filter, handler, finally);
    b.region(Handler::Finally, start, filter, finally, end);
    let err = decompile_err(&b.build().unwrap());
    assert!(
        matches!(err, DecompileError::UnsupportedConstruct { offset: 0, .. }),
        "{err}"
    );
}

#[test]
fn empty_body_is_an_empty_block() {
    let body = MethodBody {
        method: helper("Nothing", vec![], TypeRef::void()),
        instructions: vec![],
        exception_regions: vec![],
        variables: VariableTable::new(false),
    };
    assert_eq!(decompile_method(&body).unwrap(), Statement::Block(vec![]));
}

#[test]
fn a_failing_method_does_not_poison_the_next() {
    let mut bad = static_builder("Leak", TypeRef::void());
    let v = bad.local("v", TypeRef::int32());
    bad.ldc_i4(1).ldc_i4(2).stloc(v).emit(Opcode::Ret);
    assert!(decompile_method(&bad.build().unwrap()).is_err());

    let mut good = static_builder("Fine", TypeRef::int32());
    good.ldc_i4(7).emit(Opcode::Ret);
    assert_eq!(decompile(&good.build().unwrap()), "return 7;\n");
}
