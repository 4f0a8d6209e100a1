//! Evaluation-stack depth annotation.

use std::collections::BTreeMap;

use crate::error::{IrError, Result};
use crate::instruction::{ExceptionRegion, Instruction, Opcode, Operand, RegionKind};
use crate::metadata::MethodRef;

/// Number of stack slots an instruction pops and pushes.
///
/// `method` is the method whose body contains the instruction; it decides
/// whether `ret` consumes a value. `leave` is reported as (0, 0): it empties
/// the stack, which [`annotate`] handles separately.
pub fn stack_effect(insn: &Instruction, method: &MethodRef) -> Result<(usize, usize)> {
    let effect = match insn.opcode {
        Opcode::Nop | Opcode::Br | Opcode::Leave | Opcode::Rethrow | Opcode::Endfinally => (0, 0),
        Opcode::Dup => (1, 2),
        Opcode::Pop
        | Opcode::Starg
        | Opcode::Stloc
        | Opcode::Stsfld
        | Opcode::Brtrue
        | Opcode::Brfalse
        | Opcode::Switch
        | Opcode::Throw
        | Opcode::Endfilter => (1, 0),
        Opcode::Ldarg
        | Opcode::Ldarga
        | Opcode::Ldloc
        | Opcode::Ldloca
        | Opcode::Ldnull
        | Opcode::LdcI4
        | Opcode::LdcI8
        | Opcode::LdcR4
        | Opcode::LdcR8
        | Opcode::Ldstr
        | Opcode::Ldsfld
        | Opcode::Ldtoken => (0, 1),
        Opcode::Ldfld
        | Opcode::Ldflda
        | Opcode::Neg
        | Opcode::Not
        | Opcode::Newarr
        | Opcode::Ldlen
        | Opcode::Castclass
        | Opcode::Isinst
        | Opcode::Box
        | Opcode::Unbox
        | Opcode::UnboxAny
        | Opcode::ConvI1
        | Opcode::ConvI2
        | Opcode::ConvI4
        | Opcode::ConvI8
        | Opcode::ConvU1
        | Opcode::ConvU2
        | Opcode::ConvU4
        | Opcode::ConvU8
        | Opcode::ConvR4
        | Opcode::ConvR8 => (1, 1),
        Opcode::Stfld => (2, 0),
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::DivUn
        | Opcode::Rem
        | Opcode::RemUn
        | Opcode::And
        | Opcode::Or
        | Opcode::Xor
        | Opcode::Shl
        | Opcode::Shr
        | Opcode::ShrUn
        | Opcode::Ceq
        | Opcode::Cgt
        | Opcode::CgtUn
        | Opcode::Clt
        | Opcode::CltUn
        | Opcode::Ldelem
        | Opcode::Ldelema => (2, 1),
        Opcode::Beq
        | Opcode::BneUn
        | Opcode::Bge
        | Opcode::BgeUn
        | Opcode::Bgt
        | Opcode::BgtUn
        | Opcode::Ble
        | Opcode::BleUn
        | Opcode::Blt
        | Opcode::BltUn => (2, 0),
        Opcode::Stelem => (3, 0),
        Opcode::Ret => (usize::from(!method.returns_void()), 0),
        Opcode::Call | Opcode::Callvirt => {
            let callee = callee(insn)?;
            (callee.pop_count(), usize::from(!callee.returns_void()))
        }
        Opcode::Newobj => (callee(insn)?.parameters.len(), 1),
    };
    Ok(effect)
}

fn callee(insn: &Instruction) -> Result<&MethodRef> {
    match &insn.operand {
        Operand::Method(method) => Ok(method),
        _ => Err(IrError::OperandMismatch {
            offset: insn.offset,
            opcode: insn.opcode.mnemonic(),
        }),
    }
}

/// Fill in `stack_before`/`stack_after` for every reachable instruction.
///
/// Depths propagate from offset 0 and from every handler entry along
/// fall-through and branch edges. Unreachable instructions keep depth 0.
pub fn annotate(
    instructions: &mut [Instruction],
    regions: &[ExceptionRegion],
    method: &MethodRef,
) -> Result<()> {
    if instructions.is_empty() {
        return Ok(());
    }

    let index_of: BTreeMap<u32, usize> = instructions
        .iter()
        .enumerate()
        .map(|(i, insn)| (insn.offset, i))
        .collect();
    let resolve = |from: u32, target: u32| {
        index_of
            .get(&target)
            .copied()
            .ok_or(IrError::UnresolvedTarget {
                offset: from,
                target,
            })
    };

    let mut depth_before: Vec<Option<u16>> = vec![None; instructions.len()];
    let mut worklist: Vec<(usize, u16)> = vec![(0, 0)];
    for region in regions {
        let entry_depth = u16::from(region.receives_exception());
        if let RegionKind::Filter { filter_start } = region.kind {
            worklist.push((resolve(filter_start, filter_start)?, 1));
        }
        worklist.push((resolve(region.handler_start, region.handler_start)?, entry_depth));
    }

    while let Some((idx, depth)) = worklist.pop() {
        if let Some(known) = depth_before[idx] {
            if known != depth {
                return Err(IrError::StackMismatch {
                    offset: instructions[idx].offset,
                    first: known,
                    second: depth,
                });
            }
            continue;
        }
        depth_before[idx] = Some(depth);

        let insn = &instructions[idx];
        let (pops, pushes) = stack_effect(insn, method)?;
        if (depth as usize) < pops {
            return Err(IrError::StackUnderflow {
                offset: insn.offset,
                needed: pops,
                available: depth as usize,
            });
        }
        let after = if insn.opcode == Opcode::Leave {
            0
        } else {
            (depth as usize - pops + pushes) as u16
        };

        for target in insn.branch_targets() {
            worklist.push((resolve(insn.offset, target)?, after));
        }
        if !insn.opcode.ends_flow() {
            if idx + 1 >= instructions.len() {
                return Err(IrError::FallsOffEnd {
                    offset: insn.offset,
                });
            }
            worklist.push((idx + 1, after));
        }

        let insn = &mut instructions[idx];
        insn.stack_before = depth;
        insn.stack_after = after;
    }

    Ok(())
}
