use std::collections::{BTreeMap, BTreeSet};

use crate::error::{IrError, Result};
use crate::instruction::{ExceptionRegion, Instruction, OpcodeFlags, RegionKind};

/// Position of a block in [`Cfg::blocks`].
pub type BlockId = usize;

/// Straight-line run of instructions entered only at the top.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    /// Offsets `[start, end)` covered by the block.
    pub start: u32,
    pub end: u32,
    /// Instructions `[first_insn, last_insn)` of the method body.
    pub first_insn: usize,
    pub last_insn: usize,
    /// Successor block IDs: branch target(s) first, fall-through last.
    pub succs: Vec<BlockId>,
    pub preds: Vec<BlockId>,
    /// First block of a handler or filter.
    pub is_handler_entry: bool,
}

impl BasicBlock {
    /// Index of the final instruction.
    pub fn last_index(&self) -> usize {
        self.last_insn - 1
    }
}

/// Basic blocks of one method body and the edges between them.
#[derive(Debug)]
pub struct Cfg {
    /// In offset order.
    pub blocks: Vec<BasicBlock>,
    pub entry: BlockId,
    offset_to_block: BTreeMap<u32, BlockId>,
}

impl Cfg {
    /// The block covering `offset`.
    pub fn block_at_offset(&self, offset: u32) -> Option<BlockId> {
        self.offset_to_block
            .range(..=offset)
            .next_back()
            .map(|(_, &id)| id)
            .filter(|&id| offset < self.blocks[id].end)
    }

    /// The block starting exactly at `offset`.
    pub fn block_starting_at(&self, offset: u32) -> Option<BlockId> {
        self.offset_to_block.get(&offset).copied()
    }

    /// Instructions of one block.
    pub fn instructions<'a>(&self, block: BlockId, all: &'a [Instruction]) -> &'a [Instruction] {
        let block = &self.blocks[block];
        &all[block.first_insn..block.last_insn]
    }

    /// Build a CFG from annotated instructions and exception regions.
    pub fn build(instructions: &[Instruction], regions: &[ExceptionRegion]) -> Result<Self> {
        if instructions.is_empty() {
            return Ok(Cfg {
                blocks: vec![],
                entry: 0,
                offset_to_block: BTreeMap::new(),
            });
        }

        let off_to_idx: BTreeMap<u32, usize> = instructions
            .iter()
            .enumerate()
            .map(|(i, insn)| (insn.offset, i))
            .collect();
        let body_end = instructions[instructions.len() - 1].next_offset();

        // leaders: entry, branch targets, instructions after a transfer
        let mut leaders = BTreeSet::new();
        leaders.insert(instructions[0].offset);

        for (i, insn) in instructions.iter().enumerate() {
            let flags = insn.opcode.flags();

            if flags.contains(OpcodeFlags::JUMP) {
                for target in insn.branch_targets() {
                    if !off_to_idx.contains_key(&target) {
                        return Err(IrError::UnresolvedTarget {
                            offset: insn.offset,
                            target,
                        });
                    }
                    leaders.insert(target);
                }
            }

            if flags.intersects(
                OpcodeFlags::JUMP
                    | OpcodeFlags::RETURN
                    | OpcodeFlags::THROW
                    | OpcodeFlags::END_HANDLER,
            ) && i + 1 < instructions.len()
            {
                leaders.insert(instructions[i + 1].offset);
            }
        }

        // and every region boundary
        let mut handler_entries = BTreeSet::new();
        for region in regions {
            let mut boundaries = vec![
                region.try_start,
                region.try_end,
                region.handler_start,
                region.handler_end,
            ];
            handler_entries.insert(region.handler_start);
            if let RegionKind::Filter { filter_start } = region.kind {
                boundaries.push(filter_start);
                handler_entries.insert(filter_start);
            }
            for offset in boundaries {
                if offset == body_end {
                    continue;
                }
                if !off_to_idx.contains_key(&offset) {
                    return Err(IrError::UnresolvedTarget {
                        offset: region.try_start,
                        target: offset,
                    });
                }
                leaders.insert(offset);
            }
        }

        let starts: Vec<u32> = leaders.into_iter().collect();
        let mut offset_to_block = BTreeMap::new();
        let mut blocks = Vec::with_capacity(starts.len());

        for (i, &start) in starts.iter().enumerate() {
            let first_insn = off_to_idx[&start];
            let end = starts.get(i + 1).copied().unwrap_or(body_end);
            let last_insn = off_to_idx
                .range(end..)
                .next()
                .map(|(_, &idx)| idx)
                .unwrap_or(instructions.len());

            let id = blocks.len();
            offset_to_block.insert(start, id);
            blocks.push(BasicBlock {
                id,
                start,
                end,
                first_insn,
                last_insn,
                succs: vec![],
                preds: vec![],
                is_handler_entry: handler_entries.contains(&start),
            });
        }

        for bi in 0..blocks.len() {
            let last = &instructions[blocks[bi].last_index()];
            let flags = last.opcode.flags();

            let mut succs = Vec::new();
            for target in last.branch_targets() {
                let target_id = offset_to_block[&target];
                if !succs.contains(&target_id) {
                    succs.push(target_id);
                }
            }
            if !last.opcode.ends_flow() {
                if bi + 1 >= blocks.len() {
                    return Err(IrError::FallsOffEnd {
                        offset: last.offset,
                    });
                }
                if !succs.contains(&(bi + 1)) {
                    succs.push(bi + 1);
                }
            }
            debug_assert!(flags.contains(OpcodeFlags::SWITCH) || succs.len() <= 2);
            blocks[bi].succs = succs;
        }

        let edges: Vec<(BlockId, BlockId)> = blocks
            .iter()
            .flat_map(|b| b.succs.iter().map(move |&s| (b.id, s)))
            .collect();
        for (from, to) in edges {
            blocks[to].preds.push(from);
        }

        Ok(Cfg {
            blocks,
            entry: 0,
            offset_to_block,
        })
    }
}
