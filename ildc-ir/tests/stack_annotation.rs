use ildc_ir::*;

#[test]
fn depths_follow_pushes_and_pops() {
    let mut b = MethodBuilder::new("Demo.Math", "Sum", TypeRef::int32(), true);
    let x = b.param("x", TypeRef::int32());
    let y = b.param("y", TypeRef::int32());
    b.ldarg(x).ldarg(y).emit(Opcode::Add).emit(Opcode::Ret);
    let body = b.build().unwrap();

    let before: Vec<u16> = body.instructions.iter().map(|i| i.stack_before).collect();
    let after: Vec<u16> = body.instructions.iter().map(|i| i.stack_after).collect();
    assert_eq!(before, vec![0, 1, 2, 1]);
    assert_eq!(after, vec![1, 2, 1, 0]);
}

#[test]
fn call_pops_receiver_and_arguments() {
    let mut b = MethodBuilder::new("Demo.Sample", "Run", TypeRef::void(), false);
    let append = MethodRef::new(
        TypeRef::new("System.Text.StringBuilder"),
        "Append",
        vec![TypeRef::string()],
        TypeRef::new("System.Text.StringBuilder"),
        true,
    );
    b.ldarg(0).ldstr("x").callvirt(append).emit(Opcode::Pop).emit(Opcode::Ret);
    let body = b.build().unwrap();

    let call = &body.instructions[2];
    assert_eq!((call.stack_before, call.stack_after), (2, 1));
}

#[test]
fn underflow_is_reported_with_offset() {
    let mut b = MethodBuilder::new("Demo.Sample", "Bad", TypeRef::void(), true);
    b.emit(Opcode::Pop).emit(Opcode::Ret);
    let err = b.build().unwrap_err();
    assert_eq!(
        err,
        IrError::StackUnderflow {
            offset: 0,
            needed: 1,
            available: 0
        }
    );
}

#[test]
fn merge_with_different_depths_is_a_mismatch() {
    let mut b = MethodBuilder::new("Demo.Sample", "Bad", TypeRef::void(), true);
    b.param("flag", TypeRef::boolean());
    let join = b.label();
    b.ldarg(0).branch(Opcode::Brfalse, join);
    b.ldc_i4(1);
    b.mark(join).emit(Opcode::Ret);
    let err = b.build().unwrap_err();
    assert!(
        matches!(err, IrError::StackMismatch { offset: 13, .. }),
        "got {err}"
    );
}

#[test]
fn catch_handler_starts_with_the_exception() {
    let mut b = MethodBuilder::new("Demo.Sample", "Guarded", TypeRef::void(), true);
    let work = b.method_ref();
    let (try_start, handler, end) = (b.label(), b.label(), b.label());
    b.mark(try_start).call(work).branch(Opcode::Leave, end);
    b.mark(handler).emit(Opcode::Pop).branch(Opcode::Leave, end);
    b.mark(end).emit(Opcode::Ret);
    b.region(
        Handler::Catch(TypeRef::new("System.Exception")),
        try_start,
        handler,
        handler,
        end,
    );
    let body = b.build().unwrap();

    let pop = &body.instructions[2];
    assert_eq!(pop.opcode, Opcode::Pop);
    assert_eq!(pop.stack_before, 1);
    assert_eq!(pop.stack_after, 0);
}

#[test]
fn finally_handler_starts_empty() {
    let mut b = MethodBuilder::new("Demo.Sample", "Cleanup", TypeRef::void(), true);
    let work = b.method_ref();
    let (try_start, handler, end) = (b.label(), b.label(), b.label());
    b.mark(try_start).call(work.clone()).branch(Opcode::Leave, end);
    b.mark(handler).call(work).emit(Opcode::Endfinally);
    b.mark(end).emit(Opcode::Ret);
    b.region(Handler::Finally, try_start, handler, handler, end);
    let body = b.build().unwrap();

    let handler_call = &body.instructions[2];
    assert_eq!(handler_call.stack_before, 0);
}
