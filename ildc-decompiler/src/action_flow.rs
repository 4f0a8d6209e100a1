//! Action-flow graph: one statement-shaped node per control point.
//!
//! Blocks of the CFG are replayed through the [`ExpressionDecompiler`]; every
//! instruction that ends a statement becomes an [`ActionBlock`]. Two-way
//! blocks whose arms leave values on the stack encode `&&`, `||`, `?:` or
//! `??` and are folded into a single expression before any action is made.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ildc_ir::builder::MethodSource;
use ildc_ir::cfg::{BlockId, Cfg};
use ildc_ir::expr::{Expression, Literal};
use ildc_ir::instruction::{Instruction, Opcode, OpcodeFlags, Operand, RegionKind};
use ildc_ir::metadata::MethodRef;

use crate::error::{DecompileError, Result};
use crate::expr_recovery::{Effect, ExpressionDecompiler};

/// Index of an action within the graph arena.
pub type ActionId = usize;

/// What an action does. Successor meaning is positional, see
/// [`ActionBlock::succs`].
#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    Assign(Expression),
    Invoke(Expression),
    Return(Option<Expression>),
    Throw(Option<Expression>),
    Branch,
    /// Goes to `succs[0]` when the condition holds, else to `succs[1]`.
    ConditionalBranch(Expression),
    /// `succs[i]` for case `i`, the last successor when out of range.
    Switch(Expression),
    /// End of a finally, fault or filter handler.
    EndHandler,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionBlock {
    pub id: ActionId,
    /// Offset of the first instruction of the statement.
    pub offset: u32,
    pub kind: ActionKind,
    /// Assign/Invoke/Branch: `[next]`; ConditionalBranch: `[then, else]`;
    /// Switch: `[case 0, .., case n-1, default]`; others: empty.
    pub succs: Vec<ActionId>,
    pub preds: Vec<ActionId>,
}

impl ActionBlock {
    pub fn condition(&self) -> Option<&Expression> {
        match &self.kind {
            ActionKind::ConditionalBranch(condition) => Some(condition),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActionFlowGraph {
    blocks: Vec<Option<ActionBlock>>,
    entry: Option<ActionId>,
    /// Block and statement start offsets.
    offsets: BTreeMap<u32, ActionId>,
    /// Handler start offset to the local the caught exception is stored in.
    catch_variables: BTreeMap<u32, Option<u16>>,
}

impl ActionFlowGraph {
    /// Build the graph for one method body.
    pub fn build(source: &dyn MethodSource, cfg: &Cfg) -> Result<Self> {
        let mut builder = GraphBuilder::new(source, cfg);
        for block in 0..cfg.blocks.len() {
            builder.process(block)?;
        }
        builder.finish()
    }

    pub fn entry(&self) -> Option<ActionId> {
        self.entry
    }

    pub fn get(&self, id: ActionId) -> Option<&ActionBlock> {
        self.blocks.get(id).and_then(Option::as_ref)
    }

    /// Live actions in offset order.
    pub fn blocks(&self) -> impl Iterator<Item = &ActionBlock> {
        self.blocks.iter().flatten()
    }

    pub fn ids(&self) -> Vec<ActionId> {
        self.blocks().map(|b| b.id).collect()
    }

    /// Number of live actions.
    pub fn len(&self) -> usize {
        self.blocks().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upper bound (exclusive) of action ids.
    pub fn capacity(&self) -> usize {
        self.blocks.len()
    }

    /// The action a block or statement starting at `offset` became.
    pub fn action_at(&self, offset: u32) -> Option<ActionId> {
        self.offsets.get(&offset).copied()
    }

    /// The catch variable bound at the handler starting at `handler_start`.
    pub fn catch_variable(&self, handler_start: u32) -> Option<u16> {
        self.catch_variables.get(&handler_start).copied().flatten()
    }

    /// Every successor lists its predecessor and vice versa.
    pub fn check_symmetry(&self) -> bool {
        self.blocks().all(|block| {
            block.succs.iter().all(|&s| {
                self.get(s)
                    .is_some_and(|succ| succ.preds.contains(&block.id))
            }) && block.preds.iter().all(|&p| {
                self.get(p)
                    .is_some_and(|pred| pred.succs.contains(&block.id))
            })
        })
    }

    /// Replace the successor list of `id`, keeping predecessor lists in step.
    fn set_successors(&mut self, id: ActionId, succs: Vec<ActionId>) {
        let old = match self.blocks[id].as_mut() {
            Some(block) => std::mem::replace(&mut block.succs, succs.clone()),
            None => return,
        };
        for s in old {
            if succs.contains(&s) {
                continue;
            }
            if let Some(block) = self.blocks[s].as_mut() {
                block.preds.retain(|&p| p != id);
            }
        }
        for s in succs {
            if let Some(block) = self.blocks[s].as_mut() {
                if !block.preds.contains(&id) {
                    block.preds.push(id);
                }
            }
        }
    }

    /// Drop an action nothing points at any more; its offsets move to `into`.
    fn remove(&mut self, id: ActionId, into: ActionId) {
        self.set_successors(id, vec![]);
        debug_assert!(self.get(id).is_some_and(|b| b.preds.is_empty()));
        self.blocks[id] = None;
        for target in self.offsets.values_mut() {
            if *target == id {
                *target = into;
            }
        }
    }

    /// Fold conditional branches between two single-use returns into one
    /// short-circuit return. Returns the number of folds.
    pub fn simplify(&mut self) -> usize {
        let mut folds = 0;
        // each fold removes two actions, so this terminates
        loop {
            let found = self
                .ids()
                .into_iter()
                .find_map(|id| self.foldable_return(id));
            let Some((id, value, then_id, else_id)) = found else {
                break;
            };
            log::trace!("folding returns at A{then_id}/A{else_id} into A{id}");
            if let Some(block) = self.blocks[id].as_mut() {
                block.kind = ActionKind::Return(Some(value));
            }
            self.set_successors(id, vec![]);
            self.remove(then_id, id);
            self.remove(else_id, id);
            folds += 1;
        }
        folds
    }

    fn foldable_return(&self, id: ActionId) -> Option<(ActionId, Expression, ActionId, ActionId)> {
        let block = self.get(id)?;
        let condition = block.condition()?;
        let [then_id, else_id] = block.succs.as_slice() else {
            return None;
        };
        let (then_id, else_id) = (*then_id, *else_id);
        if then_id == else_id || then_id == id || else_id == id {
            return None;
        }
        let then_value = self.single_use_return(then_id, id)?;
        let else_value = self.single_use_return(else_id, id)?;

        let value = match (boolean_literal(then_value), boolean_literal(else_value)) {
            (Some(true), Some(false)) => condition.clone(),
            (Some(false), Some(true)) => condition.clone().negate(),
            (Some(true), _) => Expression::or(condition.clone(), else_value.clone()),
            (Some(false), _) => Expression::and(condition.clone().negate(), else_value.clone()),
            (None, Some(false)) => Expression::and(condition.clone(), then_value.clone()),
            (None, Some(true)) => Expression::or(condition.clone().negate(), then_value.clone()),
            (None, None) => return None,
        };
        Some((id, value, then_id, else_id))
    }

    fn single_use_return(&self, id: ActionId, pred: ActionId) -> Option<&Expression> {
        let block = self.get(id)?;
        if block.preds.as_slice() != [pred] {
            return None;
        }
        match &block.kind {
            ActionKind::Return(Some(value)) => Some(value),
            _ => None,
        }
    }
}

fn boolean_literal(expr: &Expression) -> Option<bool> {
    match expr {
        Expression::Literal(Literal::Boolean(b)) => Some(*b),
        _ => None,
    }
}

/// An action before its targets are resolved.
struct RawAction {
    offset: u32,
    kind: ActionKind,
    /// Successor offsets, positional as in [`ActionBlock::succs`].
    targets: Vec<u32>,
}

struct GraphBuilder<'a> {
    source: &'a dyn MethodSource,
    method: &'a MethodRef,
    cfg: &'a Cfg,
    insns: &'a [Instruction],
    processed: Vec<bool>,
    actions: Vec<RawAction>,
    /// Offsets that name whichever action is created next.
    pending: Vec<u32>,
    starts: BTreeMap<u32, usize>,
    catch_variables: BTreeMap<u32, Option<u16>>,
    filter_ranges: Vec<(u32, u32)>,
}

/// Bookkeeping for one value-producing branch shape.
struct ValuePattern {
    consumed: BTreeSet<BlockId>,
    steps: usize,
    limit: usize,
}

impl<'a> GraphBuilder<'a> {
    fn new(source: &'a dyn MethodSource, cfg: &'a Cfg) -> Self {
        let filter_ranges = source
            .exception_regions()
            .iter()
            .filter_map(|region| match region.kind {
                RegionKind::Filter { filter_start } => Some((filter_start, region.handler_start)),
                _ => None,
            })
            .collect();
        GraphBuilder {
            source,
            method: source.method(),
            cfg,
            insns: source.instructions(),
            processed: vec![false; cfg.blocks.len()],
            actions: Vec::new(),
            pending: Vec::new(),
            starts: BTreeMap::new(),
            catch_variables: BTreeMap::new(),
            filter_ranges,
        }
    }

    fn process(&mut self, block: BlockId) -> Result<()> {
        if self.processed[block] {
            return Ok(());
        }
        self.processed[block] = true;
        let start = self.cfg.blocks[block].start;

        if let Some(&(filter_start, _)) = self
            .filter_ranges
            .iter()
            .find(|&&(from, to)| start >= from && start < to)
        {
            if start == filter_start {
                log::warn!(
                    "{}: filter at IL_{filter_start:04x} is not decompiled; its handler becomes a catch-all",
                    self.method
                );
            }
            return Ok(());
        }

        self.pending.push(start);
        let mut exprs = ExpressionDecompiler::new(self.method, self.source.variables());
        let mut first = self.cfg.blocks[block].first_insn;

        let catches_here = self
            .source
            .exception_regions()
            .iter()
            .any(|r| r.handler_start == start && r.receives_exception());
        if catches_here {
            let insns = self.insns;
            let insn = &insns[first];
            let variable = match (insn.opcode, &insn.operand) {
                (Opcode::Stloc, Operand::Variable(index)) => Some(*index),
                (Opcode::Pop, _) => None,
                _ => {
                    return Err(DecompileError::unsupported(
                        self.method,
                        insn.offset,
                        "catch handler does not begin by storing or discarding the exception",
                    ));
                }
            };
            self.catch_variables.insert(start, variable);
            first += 1;
        }

        self.run(block, first, &mut exprs)
    }

    /// Decompile instructions from `first` on, continuing inline into the
    /// merge block of every value pattern encountered.
    fn run(
        &mut self,
        mut block: BlockId,
        mut first: usize,
        exprs: &mut ExpressionDecompiler<'a>,
    ) -> Result<()> {
        let insns = self.insns;
        'blocks: loop {
            let last_insn = self.cfg.blocks[block].last_insn;
            for i in first..last_insn {
                let insn = &insns[i];
                let is_last = i + 1 == last_insn;
                if is_last && insn.opcode.is_conditional() {
                    if let Some(merge) = self.value_pattern(block, exprs)? {
                        block = merge;
                        first = self.cfg.blocks[merge].first_insn;
                        continue 'blocks;
                    }
                }
                let Some(effect) = exprs.step(insn)? else {
                    continue;
                };
                if !exprs.stack().is_empty() {
                    return Err(match effect {
                        Effect::ConditionalBranch { .. } => {
                            DecompileError::unknown_pattern(self.method, insn.offset)
                        }
                        _ => DecompileError::inconsistent_stack(
                            self.method,
                            insn.offset,
                            format!("{} value(s) left at a statement boundary", exprs.depth()),
                        ),
                    });
                }
                self.emit(effect, insn);
                if !is_last {
                    self.pending.push(insn.next_offset());
                }
            }
            if !exprs.stack().is_empty() {
                let insn = &insns[last_insn - 1];
                return Err(DecompileError::inconsistent_stack(
                    self.method,
                    insn.offset,
                    "values flow into the next block outside any expression",
                ));
            }
            return Ok(());
        }
    }

    fn emit(&mut self, effect: Effect, insn: &Instruction) {
        let next = insn.next_offset();
        let (kind, targets) = match effect {
            Effect::Assign(expr) => (ActionKind::Assign(expr), vec![next]),
            Effect::Invoke(expr) => (ActionKind::Invoke(expr), vec![next]),
            Effect::Return(value) => (ActionKind::Return(value), vec![]),
            Effect::Throw(value) => (ActionKind::Throw(value), vec![]),
            Effect::Branch { target } => (ActionKind::Branch, vec![target]),
            Effect::ConditionalBranch { condition, target } => {
                (ActionKind::ConditionalBranch(condition), vec![target, next])
            }
            Effect::Switch { value, mut targets } => {
                targets.push(next);
                (ActionKind::Switch(value), targets)
            }
            Effect::EndHandler => (ActionKind::EndHandler, vec![]),
        };
        let index = self.actions.len();
        let offset = self.pending.first().copied().unwrap_or(insn.offset);
        for start in self.pending.drain(..) {
            self.starts.insert(start, index);
        }
        self.actions.push(RawAction {
            offset,
            kind,
            targets,
        });
    }

    /// Resolve offsets to ids and link predecessors.
    fn finish(self) -> Result<ActionFlowGraph> {
        let mut order: Vec<usize> = (0..self.actions.len()).collect();
        order.sort_by_key(|&i| self.actions[i].offset);
        let mut id_of = vec![0; self.actions.len()];
        for (id, &raw) in order.iter().enumerate() {
            id_of[raw] = id;
        }

        let offsets: BTreeMap<u32, ActionId> = self
            .starts
            .iter()
            .map(|(&offset, &raw)| (offset, id_of[raw]))
            .collect();

        let mut slots: Vec<Option<RawAction>> = self.actions.into_iter().map(Some).collect();
        let mut blocks = Vec::with_capacity(slots.len());
        for (id, &raw) in order.iter().enumerate() {
            let Some(action) = slots[raw].take() else {
                continue;
            };
            let mut succs = Vec::with_capacity(action.targets.len());
            for target in action.targets {
                let succ = offsets.get(&target).copied().ok_or_else(|| {
                    DecompileError::malformed(
                        self.method,
                        action.offset,
                        format!("IL_{target:04x} does not start a statement"),
                    )
                })?;
                succs.push(succ);
            }
            blocks.push(Some(ActionBlock {
                id,
                offset: action.offset,
                kind: action.kind,
                succs,
                preds: vec![],
            }));
        }

        let edges: Vec<(ActionId, ActionId)> = blocks
            .iter()
            .flatten()
            .flat_map(|b| b.succs.iter().map(move |&s| (b.id, s)))
            .collect();
        for (from, to) in edges {
            if let Some(block) = blocks[to].as_mut() {
                if !block.preds.contains(&from) {
                    block.preds.push(from);
                }
            }
        }

        let entry = offsets.get(&0).copied();
        log::debug!(
            "{}: {} actions from {} blocks",
            self.method,
            blocks.len(),
            self.cfg.blocks.len()
        );
        Ok(ActionFlowGraph {
            blocks,
            entry,
            offsets,
            catch_variables: self.catch_variables,
        })
    }

    // --- value patterns ---------------------------------------------------

    /// Fold the value-producing branch shape headed by `head`, if it is one.
    ///
    /// On success the folded value is on the stack and the merge block, which
    /// the caller continues with, is returned.
    fn value_pattern(
        &mut self,
        head: BlockId,
        exprs: &mut ExpressionDecompiler<'a>,
    ) -> Result<Option<BlockId>> {
        let insns = self.insns;
        let branch = &insns[self.cfg.blocks[head].last_index()];
        let baseline = branch.stack_after as usize;
        let target = self.target_block(head)?;
        let fallthrough = self.fallthrough_block(head)?;

        if self.is_null_coalesce(head) {
            return self.null_coalesce(head, target, fallthrough, exprs).map(Some);
        }

        let mut memo = HashMap::new();
        let is_value = self.produces_value(target, baseline, &mut memo)
            && self.produces_value(fallthrough, baseline, &mut memo);
        if !is_value {
            let leaves_value = [target, fallthrough].iter().any(|&arm| {
                let last = &self.insns[self.cfg.blocks[arm].last_index()];
                last.stack_after as usize > baseline
            });
            if baseline > 0 || leaves_value {
                return Err(DecompileError::unknown_pattern(self.method, branch.offset));
            }
            return Ok(None);
        }

        let condition = match exprs.step(branch)? {
            Some(Effect::ConditionalBranch { condition, .. }) => condition,
            _ => return Err(DecompileError::unknown_pattern(self.method, branch.offset)),
        };
        let mut pattern = ValuePattern {
            consumed: BTreeSet::new(),
            steps: 0,
            limit: 2 * self.cfg.blocks.len() + 2,
        };
        let (value, merge) =
            self.value_of_branch(condition, target, fallthrough, exprs, &mut pattern)?;
        self.commit(head, merge, &pattern.consumed, branch.offset)?;
        log::trace!(
            "{}: value pattern at IL_{:04x} spans {} block(s)",
            self.method,
            branch.offset,
            pattern.consumed.len() + 1
        );
        exprs.stack_mut().push(value);
        Ok(Some(merge))
    }

    /// `x ?? y` compiles to `x; dup; brtrue M; pop; y; M:`.
    fn is_null_coalesce(&self, head: BlockId) -> bool {
        let block = &self.cfg.blocks[head];
        let last = block.last_index();
        if self.insns[last].opcode != Opcode::Brtrue || last == block.first_insn {
            return false;
        }
        if self.insns[last - 1].opcode != Opcode::Dup {
            return false;
        }
        let next = self.insns.get(block.last_insn);
        next.is_some_and(|insn| insn.opcode == Opcode::Pop)
    }

    fn null_coalesce(
        &mut self,
        head: BlockId,
        target: BlockId,
        fallthrough: BlockId,
        exprs: &mut ExpressionDecompiler<'a>,
    ) -> Result<BlockId> {
        let insns = self.insns;
        let branch = &insns[self.cfg.blocks[head].last_index()];
        exprs.step(branch)?;
        let value = exprs
            .stack_mut()
            .pop()
            .ok_or_else(|| DecompileError::unknown_pattern(self.method, branch.offset))?;
        let skip = self.cfg.blocks[fallthrough].first_insn + 1;
        let (fallback, merge) = self.plain_arm(fallthrough, skip, exprs)?;
        if merge != target {
            return Err(DecompileError::unknown_pattern(self.method, branch.offset));
        }
        let consumed = BTreeSet::from([fallthrough]);
        self.commit(head, merge, &consumed, branch.offset)?;
        exprs.stack_mut().push(Expression::NullCoalesce {
            value: Box::new(value),
            fallback: Box::new(fallback),
        });
        Ok(merge)
    }

    /// Every consumed block and the merge block are entered only from inside
    /// the pattern.
    fn commit(
        &mut self,
        head: BlockId,
        merge: BlockId,
        consumed: &BTreeSet<BlockId>,
        offset: u32,
    ) -> Result<()> {
        if consumed.contains(&merge) || merge == head || self.processed[merge] {
            return Err(DecompileError::unknown_pattern(self.method, offset));
        }
        for &block in consumed.iter().chain([&merge]) {
            let outside = self.cfg.blocks[block]
                .preds
                .iter()
                .any(|p| *p != head && !consumed.contains(p));
            if outside || self.processed[block] {
                return Err(DecompileError::unknown_pattern(self.method, offset));
            }
        }
        for &block in consumed {
            self.processed[block] = true;
        }
        self.processed[merge] = true;
        Ok(())
    }

    /// The arm starting at `block` leaves exactly one more value than
    /// `baseline` on the stack and joins forward.
    fn produces_value(
        &self,
        block: BlockId,
        baseline: usize,
        memo: &mut HashMap<BlockId, bool>,
    ) -> bool {
        if let Some(&known) = memo.get(&block) {
            return known;
        }
        memo.insert(block, false);
        let b = &self.cfg.blocks[block];
        let first = &self.insns[b.first_insn];
        let last = &self.insns[b.last_index()];
        let flags = last.opcode.flags();
        let result = if first.stack_before as usize != baseline {
            false
        } else if last.opcode.is_conditional() {
            last.stack_after as usize == baseline
                && match (self.target_block(block), self.fallthrough_block(block)) {
                    (Ok(t), Ok(f)) => {
                        self.produces_value(t, baseline, memo)
                            && self.produces_value(f, baseline, memo)
                    }
                    _ => false,
                }
        } else if flags.intersects(
            OpcodeFlags::RETURN
                | OpcodeFlags::THROW
                | OpcodeFlags::END_HANDLER
                | OpcodeFlags::SWITCH
                | OpcodeFlags::LEAVE,
        ) {
            false
        } else {
            last.stack_after as usize == baseline + 1
        };
        memo.insert(block, result);
        result
    }

    /// Value of a two-way branch on `condition` (true goes to `then_block`).
    fn value_of_branch(
        &self,
        condition: Expression,
        then_block: BlockId,
        else_block: BlockId,
        exprs: &ExpressionDecompiler<'a>,
        pattern: &mut ValuePattern,
    ) -> Result<(Expression, BlockId)> {
        let offset = self.cfg.blocks[then_block].start;
        pattern.steps += 1;
        if pattern.steps > pattern.limit {
            return Err(DecompileError::unknown_pattern(self.method, offset));
        }

        let then_plain = self.try_plain_arm(then_block, exprs)?;
        let else_plain = self.try_plain_arm(else_block, exprs)?;
        let then_literal = then_plain.as_ref().and_then(|(v, _)| v.as_boolean_literal());
        let else_literal = else_plain.as_ref().and_then(|(v, _)| v.as_boolean_literal());

        // SimpleOr / SimpleNotAnd: the taken arm is a literal
        if let (Some(literal), Some((_, then_merge))) = (then_literal, &then_plain) {
            let (rest, merge) = match &else_plain {
                Some(plain) => plain.clone(),
                None => self.value_of_arm(else_block, exprs, pattern)?,
            };
            if merge == *then_merge && is_logical_operand(&rest) {
                pattern.consumed.extend([then_block, else_block]);
                let value = match (literal, rest.as_boolean_literal()) {
                    (true, Some(false)) => condition,
                    (false, Some(true)) => condition.negate(),
                    (true, _) => Expression::or(condition, rest),
                    (false, _) => Expression::and(condition.negate(), rest),
                };
                return Ok((value, merge));
            }
        }

        // the same with the literal on the fall-through side
        if let (Some(literal), Some((_, else_merge))) = (else_literal, &else_plain) {
            let (rest, merge) = match &then_plain {
                Some(plain) => plain.clone(),
                None => self.value_of_arm(then_block, exprs, pattern)?,
            };
            if merge == *else_merge && is_logical_operand(&rest) {
                pattern.consumed.extend([then_block, else_block]);
                let value = if literal {
                    Expression::or(condition.negate(), rest)
                } else {
                    Expression::and(condition, rest)
                };
                return Ok((value, merge));
            }
        }

        if else_plain.is_none() && self.ends_conditional(else_block) {
            let inner_target = self.target_block(else_block)?;
            let inner_fallthrough = self.fallthrough_block(else_block)?;

            // NestedNotAnd: the inner test falls through to our taken arm
            if inner_fallthrough == then_block {
                let inner = self.arm_condition(else_block, exprs)?;
                pattern.consumed.insert(else_block);
                let combined = Expression::and(condition.negate(), inner);
                return self.value_of_branch(combined, inner_target, then_block, exprs, pattern);
            }
            // NestedOr: the inner test jumps to our taken arm
            if inner_target == then_block {
                let inner = self.arm_condition(else_block, exprs)?;
                pattern.consumed.insert(else_block);
                let combined = Expression::or(condition, inner);
                return self.value_of_branch(
                    combined,
                    then_block,
                    inner_fallthrough,
                    exprs,
                    pattern,
                );
            }
        }

        // Ternary
        let (then_value, then_merge) = match then_plain {
            Some(plain) => plain,
            None => self.value_of_arm(then_block, exprs, pattern)?,
        };
        let (else_value, else_merge) = match else_plain {
            Some(plain) => plain,
            None => self.value_of_arm(else_block, exprs, pattern)?,
        };
        if then_merge != else_merge {
            return Err(DecompileError::unknown_pattern(self.method, offset));
        }
        pattern.consumed.extend([then_block, else_block]);
        Ok((
            Expression::Condition {
                condition: Box::new(condition),
                then_value: Box::new(then_value),
                else_value: Box::new(else_value),
            },
            then_merge,
        ))
    }

    /// Value of an arm that may itself branch.
    fn value_of_arm(
        &self,
        block: BlockId,
        exprs: &ExpressionDecompiler<'a>,
        pattern: &mut ValuePattern,
    ) -> Result<(Expression, BlockId)> {
        if self.ends_conditional(block) {
            let condition = self.arm_condition(block, exprs)?;
            pattern.consumed.insert(block);
            let target = self.target_block(block)?;
            let fallthrough = self.fallthrough_block(block)?;
            return self.value_of_branch(condition, target, fallthrough, exprs, pattern);
        }
        let first = self.cfg.blocks[block].first_insn;
        let arm = self.plain_arm(block, first, exprs)?;
        pattern.consumed.insert(block);
        Ok(arm)
    }

    fn try_plain_arm(
        &self,
        block: BlockId,
        exprs: &ExpressionDecompiler<'a>,
    ) -> Result<Option<(Expression, BlockId)>> {
        if self.ends_conditional(block) {
            return Ok(None);
        }
        let first = self.cfg.blocks[block].first_insn;
        self.plain_arm(block, first, exprs).map(Some)
    }

    /// Evaluate a straight-line arm on a copy of the stack; returns the value
    /// it pushes and the block it joins.
    fn plain_arm(
        &self,
        block: BlockId,
        first: usize,
        exprs: &ExpressionDecompiler<'a>,
    ) -> Result<(Expression, BlockId)> {
        let b = &self.cfg.blocks[block];
        let mut fork = exprs.clone();
        let mut merge = None;
        for i in first..b.last_insn {
            let insn = &self.insns[i];
            if insn.opcode.flags().contains(OpcodeFlags::SWITCH) {
                return Err(DecompileError::malformed(
                    self.method,
                    insn.offset,
                    "multi-way branch inside a value expression",
                ));
            }
            if i == b.last_index() && insn.opcode == Opcode::Br {
                merge = Some(self.target_block(block)?);
                break;
            }
            if fork.step(insn)?.is_some() {
                return Err(DecompileError::unknown_pattern(self.method, insn.offset));
            }
        }
        let last = &self.insns[b.last_index()];
        let merge = match merge {
            Some(merge) => merge,
            None if !last.opcode.ends_flow() => self.fallthrough_block(block)?,
            None => return Err(DecompileError::unknown_pattern(self.method, last.offset)),
        };
        if fork.depth() != exprs.depth() + 1 {
            return Err(DecompileError::unknown_pattern(self.method, last.offset));
        }
        let value = fork
            .stack_mut()
            .pop()
            .ok_or_else(|| DecompileError::unknown_pattern(self.method, last.offset))?;
        Ok((value, merge))
    }

    /// Condition of an arm that only computes a test and branches on it.
    fn arm_condition(&self, block: BlockId, exprs: &ExpressionDecompiler<'a>) -> Result<Expression> {
        let b = &self.cfg.blocks[block];
        let mut fork = exprs.clone();
        for i in b.first_insn..b.last_insn {
            let insn = &self.insns[i];
            match fork.step(insn)? {
                None => {}
                Some(Effect::ConditionalBranch { condition, .. })
                    if i == b.last_index() && fork.depth() == exprs.depth() =>
                {
                    return Ok(condition);
                }
                Some(Effect::Switch { .. }) => {
                    return Err(DecompileError::malformed(
                        self.method,
                        insn.offset,
                        "multi-way branch inside a value expression",
                    ));
                }
                Some(_) => {
                    return Err(DecompileError::unknown_pattern(self.method, insn.offset));
                }
            }
        }
        Err(DecompileError::unknown_pattern(self.method, b.start))
    }

    fn ends_conditional(&self, block: BlockId) -> bool {
        self.insns[self.cfg.blocks[block].last_index()]
            .opcode
            .is_conditional()
    }

    fn target_block(&self, block: BlockId) -> Result<BlockId> {
        let last = &self.insns[self.cfg.blocks[block].last_index()];
        match last.branch_targets().as_slice() {
            [target] => self.cfg.block_starting_at(*target).ok_or_else(|| {
                DecompileError::malformed(self.method, last.offset, "branch into a block interior")
            }),
            _ => Err(DecompileError::malformed(
                self.method,
                last.offset,
                "expected a single branch target",
            )),
        }
    }

    fn fallthrough_block(&self, block: BlockId) -> Result<BlockId> {
        let last = &self.insns[self.cfg.blocks[block].last_index()];
        self.cfg
            .block_starting_at(last.next_offset())
            .ok_or_else(|| {
                DecompileError::malformed(self.method, last.offset, "falls off the end of the body")
            })
    }
}

/// The non-literal side of `||`/`&&` must itself be a condition; `0`/`1`
/// against another integer is a ternary.
fn is_logical_operand(expr: &Expression) -> bool {
    expr.is_boolean_valued()
}
