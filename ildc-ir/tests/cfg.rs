use ildc_ir::cfg::Cfg;
use ildc_ir::*;

fn bool_param_method() -> MethodBuilder {
    let mut b = MethodBuilder::new("Demo.Sample", "Pick", TypeRef::int32(), true);
    b.param("flag", TypeRef::boolean());
    b
}

#[test]
fn conditional_splits_into_three_blocks() {
    let mut b = bool_param_method();
    let other = b.label();
    b.ldarg(0).branch(Opcode::Brfalse, other);
    b.ldc_i4(1).emit(Opcode::Ret);
    b.mark(other).ldc_i4(0).emit(Opcode::Ret);
    let body = b.build().unwrap();

    let cfg = Cfg::build(&body.instructions, &body.exception_regions).unwrap();
    assert_eq!(cfg.blocks.len(), 3);
    let starts: Vec<u32> = cfg.blocks.iter().map(|b| b.start).collect();
    assert_eq!(starts, vec![0, 8, 14]);

    // branch target first, fall-through last
    assert_eq!(cfg.blocks[0].succs, vec![2, 1]);
    assert_eq!(cfg.blocks[1].preds, vec![0]);
    assert_eq!(cfg.blocks[2].preds, vec![0]);
    assert!(cfg.blocks[1].succs.is_empty());
}

#[test]
fn block_lookup_by_offset() {
    let mut b = bool_param_method();
    let other = b.label();
    b.ldarg(0).branch(Opcode::Brfalse, other);
    b.ldc_i4(1).emit(Opcode::Ret);
    b.mark(other).ldc_i4(0).emit(Opcode::Ret);
    let body = b.build().unwrap();
    let cfg = Cfg::build(&body.instructions, &body.exception_regions).unwrap();

    assert_eq!(cfg.block_at_offset(3), Some(0));
    assert_eq!(cfg.block_at_offset(13), Some(1));
    assert_eq!(cfg.block_starting_at(14), Some(2));
    assert_eq!(cfg.block_starting_at(13), None);
    assert_eq!(cfg.block_at_offset(500), None);
}

#[test]
fn empty_body_has_no_blocks() {
    let cfg = Cfg::build(&[], &[]).unwrap();
    assert!(cfg.blocks.is_empty());
}

#[test]
fn handler_entry_is_a_leader() {
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

    let cfg = Cfg::build(&body.instructions, &body.exception_regions).unwrap();
    assert_eq!(cfg.blocks.len(), 3);
    assert!(!cfg.blocks[0].is_handler_entry);
    assert!(cfg.blocks[1].is_handler_entry);
    assert!(cfg.blocks[1].preds.is_empty());
    assert_eq!(cfg.blocks[0].succs, vec![2]);
    assert_eq!(cfg.blocks[1].succs, vec![2]);
}

#[test]
fn switch_keeps_every_target() {
    let mut b = MethodBuilder::new("Demo.Sample", "Dispatch", TypeRef::void(), true);
    b.param("k", TypeRef::int32());
    let (a, c, end) = (b.label(), b.label(), b.label());
    b.ldarg(0).switch(&[a, c, a]);
    b.branch(Opcode::Br, end);
    b.mark(a).emit(Opcode::Nop).branch(Opcode::Br, end);
    b.mark(c).emit(Opcode::Nop);
    b.mark(end).emit(Opcode::Ret);
    let body = b.build().unwrap();

    let cfg = Cfg::build(&body.instructions, &body.exception_regions).unwrap();
    // duplicate table entries collapse into one edge
    let head = &cfg.blocks[0];
    assert_eq!(head.succs.len(), 3);
}

#[test]
fn branch_into_the_middle_of_an_instruction_is_rejected() {
    let insns = vec![
        Instruction {
            offset: 0,
            opcode: Opcode::Br,
            operand: Operand::Branch(3),
            stack_before: 0,
            stack_after: 0,
        },
        Instruction {
            offset: 5,
            opcode: Opcode::Ret,
            operand: Operand::None,
            stack_before: 0,
            stack_after: 0,
        },
    ];
    let err = Cfg::build(&insns, &[]).unwrap_err();
    assert_eq!(
        err,
        IrError::UnresolvedTarget {
            offset: 0,
            target: 3
        }
    );
}

#[test]
fn falling_off_the_end_is_rejected() {
    let insns = vec![Instruction {
        offset: 0,
        opcode: Opcode::Nop,
        operand: Operand::None,
        stack_before: 0,
        stack_after: 0,
    }];
    let err = Cfg::build(&insns, &[]).unwrap_err();
    assert_eq!(err, IrError::FallsOffEnd { offset: 0 });
}
