use std::collections::{BTreeMap, BTreeSet, VecDeque};

use ildc_ir::builder::MethodSource;
use ildc_ir::expr::{BinaryOperator, Expression, Literal};
use ildc_ir::instruction::{ExceptionRegion, RegionKind};
use ildc_ir::metadata::{MethodRef, TypeRef};
use ildc_ir::stmt::{Block, CatchClause, Statement, SwitchCase, ends_in_terminal};
use ildc_ir::variables::VariableTable;

use crate::action_flow::{ActionFlowGraph, ActionId, ActionKind};
use crate::error::{DecompileError, Result};

/// Structure a method's action-flow graph into nested statements.
pub fn structure_method(graph: &ActionFlowGraph, source: &dyn MethodSource) -> Result<Block> {
    let Some(entry) = graph.entry() else {
        return Ok(vec![]);
    };
    let method = source.method();
    let regions = source.exception_regions();

    // handlers hang off the first action of their protected block
    let mut roots = vec![entry];
    let mut handler_edges = Vec::new();
    for region in regions {
        let Some(handler) = graph.action_at(region.handler_start) else {
            continue;
        };
        match graph.action_at(region.try_start) {
            Some(protected) if protected != handler => {
                if !handler_edges.contains(&(protected, handler)) {
                    handler_edges.push((protected, handler));
                }
            }
            _ if !roots.contains(&handler) => roots.push(handler),
            _ => {}
        }
    }
    let flow = FlowAnalysis::new(graph, &roots, &handler_edges, method)?;
    let groups = group_regions(regions);

    // gotos discovered in one pass get their label markers in the next
    let mut labels = BTreeSet::new();
    loop {
        let mut structurer = Structurer {
            graph,
            method,
            variables: source.variables(),
            flow: &flow,
            groups: &groups,
            labels: &labels,
            wanted_labels: BTreeSet::new(),
            emitted: vec![false; graph.capacity()],
            labeled: vec![false; graph.capacity()],
            entered_loops: BTreeSet::new(),
            entered_tries: vec![false; groups.len()],
        };
        let body = structurer.sequence(entry, &Scope::default())?;
        if structurer.wanted_labels.is_subset(&labels) {
            log::debug!(
                "{method}: structured {} actions, {} loop(s), {} label(s)",
                graph.len(),
                flow.loops.len(),
                labels.len()
            );
            return Ok(body);
        }
        log::trace!("{method}: restructuring for {} label(s)", structurer.wanted_labels.len());
        labels.extend(structurer.wanted_labels);
    }
}

/// Protected ranges sharing one try block, with all their handlers.
#[derive(Debug, Clone)]
struct TryGroup {
    try_start: u32,
    try_end: u32,
    handlers: Vec<ExceptionRegion>,
}

/// Group regions by try range, outermost first among equal starts.
fn group_regions(regions: &[ExceptionRegion]) -> Vec<TryGroup> {
    let mut groups: Vec<TryGroup> = Vec::new();
    for region in regions {
        match groups
            .iter_mut()
            .find(|g| g.try_start == region.try_start && g.try_end == region.try_end)
        {
            Some(group) => group.handlers.push(region.clone()),
            None => groups.push(TryGroup {
                try_start: region.try_start,
                try_end: region.try_end,
                handlers: vec![region.clone()],
            }),
        }
    }
    groups.sort_by(|a, b| {
        a.try_start
            .cmp(&b.try_start)
            .then(b.try_end.cmp(&a.try_end))
    });
    groups
}

/// A natural loop.
#[derive(Debug, Clone)]
struct Loop {
    header: ActionId,
    body: BTreeSet<ActionId>,
    latches: Vec<ActionId>,
}

/// Dominators and loops of the action-flow graph.
struct FlowAnalysis {
    /// Immediate dominator; `virtual_root` for roots, `None` if unreachable.
    idom: Vec<Option<usize>>,
    virtual_root: usize,
    /// Innermost (smallest) first.
    loops: Vec<Loop>,
    header_of: BTreeMap<ActionId, usize>,
}

impl FlowAnalysis {
    /// `handler_edges` link a protected block's first action to each of its
    /// handler entries; they count for dominance but never close a loop.
    fn new(
        graph: &ActionFlowGraph,
        roots: &[ActionId],
        handler_edges: &[(ActionId, ActionId)],
        method: &MethodRef,
    ) -> Result<Self> {
        let n = graph.capacity();
        let virtual_root = n;
        let real_succs = |node: usize| graph.get(node).map_or(0, |b| b.succs.len());
        let succs = |node: usize| -> Vec<usize> {
            if node == virtual_root {
                return roots.to_vec();
            }
            let mut succs = graph.get(node).map(|b| b.succs.clone()).unwrap_or_default();
            succs.extend(
                handler_edges
                    .iter()
                    .filter(|&&(from, _)| from == node)
                    .map(|&(_, to)| to),
            );
            succs
        };

        // iterative DFS: post-order plus retreating edges
        let mut postorder = Vec::with_capacity(n + 1);
        let mut state = vec![0u8; n + 1]; // 0 new, 1 on stack, 2 done
        let mut retreating = Vec::new();
        let mut stack: Vec<(usize, usize)> = vec![(virtual_root, 0)];
        state[virtual_root] = 1;
        while let Some((node, next)) = stack.pop() {
            let node_succs = succs(node);
            if next < node_succs.len() {
                stack.push((node, next + 1));
                let succ = node_succs[next];
                match state[succ] {
                    0 => {
                        state[succ] = 1;
                        stack.push((succ, 0));
                    }
                    1 if next < real_succs(node) => retreating.push((node, succ)),
                    _ => {}
                }
            } else {
                state[node] = 2;
                postorder.push(node);
            }
        }

        let mut order = vec![usize::MAX; n + 1];
        for (i, &node) in postorder.iter().enumerate() {
            order[node] = i;
        }
        let preds = |node: usize| -> Vec<usize> {
            let mut preds = graph.get(node).map(|b| b.preds.clone()).unwrap_or_default();
            preds.extend(
                handler_edges
                    .iter()
                    .filter(|&&(_, to)| to == node)
                    .map(|&(from, _)| from),
            );
            if roots.contains(&node) {
                preds.push(virtual_root);
            }
            preds
        };

        // Cooper, Harvey and Kennedy
        let mut idom: Vec<Option<usize>> = vec![None; n + 1];
        idom[virtual_root] = Some(virtual_root);
        let mut changed = true;
        while changed {
            changed = false;
            for &node in postorder.iter().rev() {
                if node == virtual_root {
                    continue;
                }
                let mut new_idom: Option<usize> = None;
                for p in preds(node) {
                    if idom[p].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(current) => intersect(&idom, &order, p, current),
                    });
                }
                if new_idom.is_some() && idom[node] != new_idom {
                    idom[node] = new_idom;
                    changed = true;
                }
            }
        }

        let mut analysis = FlowAnalysis {
            idom,
            virtual_root,
            loops: Vec::new(),
            header_of: BTreeMap::new(),
        };

        let mut latches: BTreeMap<ActionId, Vec<ActionId>> = BTreeMap::new();
        for (from, to) in retreating {
            if !analysis.dominates(to, from) {
                let offset = graph.get(to).map_or(0, |b| b.offset);
                return Err(DecompileError::unsupported(
                    method,
                    offset,
                    "irreducible control flow: loop with more than one entry",
                ));
            }
            latches.entry(to).or_default().push(from);
        }

        for (header, latches) in latches {
            let mut body = BTreeSet::from([header]);
            let mut work: Vec<ActionId> = latches.clone();
            while let Some(node) = work.pop() {
                if analysis.idom[node].is_some() && body.insert(node) {
                    if let Some(block) = graph.get(node) {
                        work.extend(block.preds.iter().copied());
                    }
                }
            }
            analysis.loops.push(Loop {
                header,
                body,
                latches,
            });
        }
        analysis
            .loops
            .sort_by_key(|l| (l.body.len(), l.header));
        for (i, l) in analysis.loops.iter().enumerate() {
            analysis.header_of.insert(l.header, i);
        }
        Ok(analysis)
    }

    fn dominates(&self, a: usize, b: usize) -> bool {
        let mut node = b;
        loop {
            if node == a {
                return true;
            }
            match self.idom[node] {
                Some(parent) if parent != node => node = parent,
                _ => return false,
            }
        }
    }

    fn loop_at(&self, header: ActionId) -> Option<&Loop> {
        self.header_of.get(&header).map(|&i| &self.loops[i])
    }

    fn is_loop_header(&self, id: ActionId) -> bool {
        self.header_of.contains_key(&id)
    }
}

fn intersect(idom: &[Option<usize>], order: &[usize], mut a: usize, mut b: usize) -> usize {
    while a != b {
        while order[a] < order[b] {
            match idom[a] {
                Some(parent) => a = parent,
                None => return b,
            }
        }
        while order[b] < order[a] {
            match idom[b] {
                Some(parent) => b = parent,
                None => return a,
            }
        }
    }
    a
}

/// Where the current walk is and what its edges mean.
#[derive(Debug, Clone, Default)]
struct Scope {
    /// Reaching this ends the sequence silently.
    exit: Option<ActionId>,
    /// Exits of enclosing constructs; reaching one from here needs a goto.
    outer_exits: Vec<ActionId>,
    /// Offsets `[start, end)` of the try block or handler being walked.
    range: Option<(u32, u32)>,
    break_target: Option<ActionId>,
    continue_target: Option<ActionId>,
}

impl Scope {
    /// A nested scope ending at `exit`.
    fn nested(&self, exit: Option<ActionId>) -> Scope {
        let mut outer_exits = self.outer_exits.clone();
        if let Some(current) = self.exit {
            if exit != Some(current) {
                outer_exits.push(current);
            }
        }
        Scope {
            exit,
            outer_exits,
            ..self.clone()
        }
    }
}

enum Edge {
    Exit,
    Continue,
    Break,
    Goto,
    Walk,
}

/// A recognized multi-way dispatch.
struct SwitchShape {
    discriminant: Expression,
    cases: Vec<(i64, ActionId)>,
    default: ActionId,
}

struct Structurer<'a> {
    graph: &'a ActionFlowGraph,
    method: &'a MethodRef,
    variables: &'a VariableTable,
    flow: &'a FlowAnalysis,
    groups: &'a [TryGroup],
    labels: &'a BTreeSet<ActionId>,
    wanted_labels: BTreeSet<ActionId>,
    emitted: Vec<bool>,
    labeled: Vec<bool>,
    entered_loops: BTreeSet<ActionId>,
    entered_tries: Vec<bool>,
}

impl Structurer<'_> {
    fn offset(&self, id: ActionId) -> u32 {
        self.graph.get(id).map_or(u32::MAX, |b| b.offset)
    }

    fn in_range(&self, id: ActionId, scope: &Scope) -> bool {
        match scope.range {
            Some((start, end)) => {
                let offset = self.offset(id);
                offset >= start && offset < end
            }
            None => true,
        }
    }

    fn classify(&self, id: ActionId, scope: &Scope) -> Edge {
        if scope.exit == Some(id) {
            Edge::Exit
        } else if scope.continue_target == Some(id) {
            Edge::Continue
        } else if scope.break_target == Some(id) {
            Edge::Break
        } else if self.emitted[id] || scope.outer_exits.contains(&id) || !self.in_range(id, scope)
        {
            Edge::Goto
        } else {
            Edge::Walk
        }
    }

    /// Nodes a walk from `id` could visit without leaving the scope.
    fn is_stop(&self, id: ActionId, scope: &Scope) -> bool {
        !matches!(self.classify(id, scope), Edge::Walk)
    }

    fn goto(&mut self, id: ActionId) -> Statement {
        self.wanted_labels.insert(id);
        Statement::Goto(label_name(self.offset(id)))
    }

    /// Structure the straight-line walk starting at `start`.
    fn sequence(&mut self, start: ActionId, scope: &Scope) -> Result<Block> {
        let mut out = Vec::new();
        self.walk(Some(start), scope, &mut out)?;
        Ok(out)
    }

    fn walk(&mut self, mut next: Option<ActionId>, scope: &Scope, out: &mut Block) -> Result<()> {
        while let Some(id) = next {
            match self.classify(id, scope) {
                Edge::Exit => break,
                Edge::Continue => {
                    out.push(Statement::Continue);
                    break;
                }
                Edge::Break => {
                    out.push(Statement::Break);
                    break;
                }
                Edge::Goto => {
                    let goto = self.goto(id);
                    out.push(goto);
                    break;
                }
                Edge::Walk => next = self.node(id, scope, out)?,
            }
        }
        Ok(())
    }

    /// Emit the construct starting at `id`; returns where the walk continues.
    fn node(&mut self, id: ActionId, scope: &Scope, out: &mut Block) -> Result<Option<ActionId>> {
        if self.labels.contains(&id) && !self.labeled[id] {
            self.labeled[id] = true;
            out.push(Statement::Labeled(label_name(self.offset(id))));
        }
        if let Some(group) = self.try_group_at(id) {
            if !self.loop_encloses_try(id, group) {
                return self.structure_try(group, id, scope, out);
            }
        }
        if self.flow.is_loop_header(id) && self.entered_loops.insert(id) {
            return self.structure_loop(id, scope, out);
        }

        self.emitted[id] = true;
        let graph = self.graph;
        let block = graph.get(id).ok_or_else(|| {
            DecompileError::malformed(self.method, 0, format!("dangling action A{id}"))
        })?;
        match &block.kind {
            ActionKind::Assign(expr) | ActionKind::Invoke(expr) => {
                out.push(Statement::Expression(expr.clone()));
                Ok(block.succs.first().copied())
            }
            ActionKind::Return(value) => {
                out.push(Statement::Return(value.clone()));
                Ok(None)
            }
            ActionKind::Throw(value) => {
                out.push(Statement::Throw(value.clone()));
                Ok(None)
            }
            ActionKind::EndHandler => Ok(None),
            ActionKind::Branch => Ok(block.succs.first().copied()),
            ActionKind::ConditionalBranch(_) => {
                if let Some(shape) = self.switch_chain(id) {
                    return self.structure_switch(shape, scope, out);
                }
                self.structure_if(id, scope, out)
            }
            ActionKind::Switch(value) => {
                let shape = self.switch_table(id, value.clone(), &block.succs);
                self.structure_switch(shape, scope, out)
            }
        }
    }

    // --- conditionals -----------------------------------------------------

    /// Merge chains of tests sharing one arm into a single `&&`/`||`
    /// condition. Returns `(condition, target, fallthrough, consumed)`.
    fn combine_condition(
        &self,
        id: ActionId,
        within: Option<&BTreeSet<ActionId>>,
    ) -> Option<(Expression, ActionId, ActionId, Vec<ActionId>)> {
        let block = self.graph.get(id)?;
        let mut condition = block.condition()?.clone();
        let &[mut target, mut fallthrough] = block.succs.as_slice() else {
            return None;
        };
        let mut consumed = Vec::new();
        loop {
            let Some(next) = self.graph.get(fallthrough) else {
                break;
            };
            let Some(inner) = next.condition() else {
                break;
            };
            let chainable = next.preds.len() == 1
                && fallthrough != id
                && !consumed.contains(&fallthrough)
                && !self.emitted[fallthrough]
                && !self.labels.contains(&fallthrough)
                && !self.flow.is_loop_header(fallthrough)
                && self.try_group_at(fallthrough).is_none()
                && within.is_none_or(|body| body.contains(&fallthrough));
            if !chainable {
                break;
            }
            let (inner_target, inner_fallthrough) = (next.succs[0], next.succs[1]);
            consumed.push(fallthrough);
            if inner_target == target {
                condition = Expression::or(condition, inner.clone());
                fallthrough = inner_fallthrough;
            } else if inner_fallthrough == target {
                condition = Expression::and(condition.negate(), inner.clone());
                fallthrough = target;
                target = inner_target;
            } else {
                consumed.pop();
                break;
            }
        }
        Some((condition, target, fallthrough, consumed))
    }

    fn structure_if(
        &mut self,
        id: ActionId,
        scope: &Scope,
        out: &mut Block,
    ) -> Result<Option<ActionId>> {
        let (condition, target, fallthrough, consumed) = self
            .combine_condition(id, None)
            .ok_or_else(|| DecompileError::malformed(self.method, self.offset(id), "bad branch"))?;
        for node in consumed {
            self.emitted[node] = true;
        }

        let join = self.find_join(target, fallthrough, scope);
        let arm_scope = match join {
            Some(_) => scope.nested(join),
            None => scope.clone(),
        };
        let fallthrough_arm = self.sequence(fallthrough, &arm_scope)?;
        let target_arm = self.sequence(target, &arm_scope)?;
        log::trace!(
            "{}: if at IL_{:04x}, join {:?}",
            self.method,
            self.offset(id),
            join.map(|j| self.offset(j))
        );
        push_if(out, condition, fallthrough_arm, target_arm);
        Ok(join)
    }

    /// Earliest node both arms reach within the scope, else the scope's
    /// exit, continue or break target when both arms end there.
    fn find_join(&self, a: ActionId, b: ActionId, scope: &Scope) -> Option<ActionId> {
        let (reach_a, stops_a) = self.reach_with_stops(a, scope);
        let (reach_b, stops_b) = self.reach_with_stops(b, scope);
        reach_a
            .intersection(&reach_b)
            .copied()
            .min_by_key(|&id| (self.offset(id), id))
            .or_else(|| {
                [scope.exit, scope.continue_target, scope.break_target]
                    .into_iter()
                    .flatten()
                    .find(|t| stops_a.contains(t) && stops_b.contains(t))
            })
    }

    fn reach(&self, start: ActionId, scope: &Scope) -> BTreeSet<ActionId> {
        self.reach_with_stops(start, scope).0
    }

    /// Walkable nodes from `start`, plus the stop nodes the walk ran into.
    fn reach_with_stops(
        &self,
        start: ActionId,
        scope: &Scope,
    ) -> (BTreeSet<ActionId>, BTreeSet<ActionId>) {
        let mut seen = BTreeSet::new();
        let mut stops = BTreeSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            if self.is_stop(id, scope) {
                stops.insert(id);
                continue;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(block) = self.graph.get(id) {
                queue.extend(block.succs.iter().copied());
            }
        }
        (seen, stops)
    }

    // --- loops ------------------------------------------------------------

    fn structure_loop(
        &mut self,
        header: ActionId,
        scope: &Scope,
        out: &mut Block,
    ) -> Result<Option<ActionId>> {
        let Some(lp) = self.flow.loop_at(header).cloned() else {
            return Ok(Some(header));
        };
        let graph = self.graph;
        let block = graph
            .get(header)
            .ok_or_else(|| DecompileError::malformed(self.method, 0, "dangling loop header"))?;

        // pre-tested: one arm stays in the loop, the other leaves it
        if block.condition().is_some() && self.try_group_at(header).is_none() {
            if let Some((condition, target, fallthrough, consumed)) =
                self.combine_condition(header, Some(&lp.body))
            {
                let target_inside = lp.body.contains(&target);
                if target_inside != lp.body.contains(&fallthrough) {
                    let (condition, body_start, follow) = if target_inside {
                        (condition, target, fallthrough)
                    } else {
                        (condition.negate(), fallthrough, target)
                    };
                    self.emitted[header] = true;
                    for node in consumed {
                        self.emitted[node] = true;
                    }
                    let mut inner = scope.nested(None);
                    inner.break_target = Some(follow);
                    inner.continue_target = Some(header);
                    let mut body = self.sequence(body_start, &inner)?;
                    strip_trailing_continue(&mut body);
                    log::trace!("{}: while loop at IL_{:04x}", self.method, block.offset);
                    out.push(Statement::While { condition, body });
                    return Ok(Some(follow));
                }
            }
        }

        // post-tested: a single latch tests and jumps back to the header
        if let [latch] = lp.latches.as_slice() {
            let latch = *latch;
            let tail = graph.get(latch);
            if let Some((condition, succs)) = tail
                .filter(|_| latch != header)
                .and_then(|b| b.condition().map(|c| (c.clone(), b.succs.clone())))
            {
                let (then_id, else_id) = (succs[0], succs[1]);
                let shape = if then_id == header && !lp.body.contains(&else_id) {
                    Some((condition, else_id))
                } else if else_id == header && !lp.body.contains(&then_id) {
                    Some((condition.negate(), then_id))
                } else {
                    None
                };
                if let Some((condition, follow)) = shape {
                    let mut inner = scope.nested(Some(latch));
                    inner.break_target = Some(follow);
                    inner.continue_target = Some(latch);
                    let body = self.sequence(header, &inner)?;
                    self.emitted[latch] = true;
                    log::trace!("{}: do-while loop at IL_{:04x}", self.method, block.offset);
                    out.push(Statement::DoWhile { condition, body });
                    return Ok(Some(follow));
                }
            }
        }

        // endless loop left by break/return
        let follow = self.loop_follow(&lp);
        let mut inner = scope.nested(None);
        inner.break_target = follow;
        inner.continue_target = Some(header);
        let mut body = Vec::new();
        let next = self.node(header, &inner, &mut body)?;
        self.walk(next, &inner, &mut body)?;
        strip_trailing_continue(&mut body);
        log::trace!("{}: endless loop at IL_{:04x}", self.method, block.offset);
        out.push(Statement::While {
            condition: Expression::boolean(true),
            body,
        });
        Ok(follow)
    }

    /// A not-yet-entered loop headed at a try block's first action that also
    /// runs code outside the protected range, such as its handlers.
    fn loop_encloses_try(&self, header: ActionId, group: usize) -> bool {
        if self.entered_loops.contains(&header) {
            return false;
        }
        let group = &self.groups[group];
        self.flow.loop_at(header).is_some_and(|lp| {
            lp.body.iter().any(|&id| {
                let offset = self.offset(id);
                offset < group.try_start || offset >= group.try_end
            })
        })
    }

    /// The exit of a loop without a controlling test: the first exit target
    /// laid out after the loop, else the last one.
    fn loop_follow(&self, lp: &Loop) -> Option<ActionId> {
        let exits: BTreeSet<ActionId> = lp
            .body
            .iter()
            .filter_map(|&id| self.graph.get(id))
            .flat_map(|b| b.succs.iter().copied())
            .filter(|s| !lp.body.contains(s))
            .collect();
        let end = lp.body.iter().map(|&id| self.offset(id)).max()?;
        exits
            .iter()
            .copied()
            .filter(|&id| self.offset(id) > end)
            .min_by_key(|&id| self.offset(id))
            .or_else(|| exits.iter().copied().max_by_key(|&id| self.offset(id)))
    }

    // --- switch -----------------------------------------------------------

    /// `switch` opcode; a `sub k` on the index shifts every case value.
    fn switch_table(&mut self, id: ActionId, value: Expression, succs: &[ActionId]) -> SwitchShape {
        let (discriminant, bias) = match value {
            Expression::Binary {
                op: BinaryOperator::Subtract,
                left,
                right,
            } if right.as_integer().is_some() => (*left, right.as_integer().unwrap_or(0)),
            value => (value, 0),
        };
        let (default, tables) = match succs.split_last() {
            Some((default, tables)) => (*default, tables),
            None => (id, succs),
        };
        let default = self.skip_trivial_branch(default);
        let cases = tables
            .iter()
            .enumerate()
            .map(|(i, &target)| (i as i64 + bias, target))
            .collect();
        SwitchShape {
            discriminant,
            cases,
            default,
        }
    }

    /// Three or more equality tests of one value against constants.
    fn switch_chain(&mut self, id: ActionId) -> Option<SwitchShape> {
        let mut node = id;
        let mut discriminant: Option<Expression> = None;
        let mut cases = Vec::new();
        let mut chain = Vec::new();
        let graph = self.graph;
        loop {
            let block = graph.get(node)?;
            let Some(Expression::Binary { op, left, right }) = block.condition() else {
                break;
            };
            if node != id
                && (block.preds.len() != 1
                    || self.emitted[node]
                    || self.labels.contains(&node)
                    || self.flow.is_loop_header(node)
                    || self.try_group_at(node).is_some())
            {
                break;
            }
            let Some(value) = right.as_integer() else {
                break;
            };
            let equal = match op {
                BinaryOperator::ValueEquality => true,
                BinaryOperator::ValueInequality => false,
                _ => break,
            };
            if discriminant.as_ref().is_some_and(|d| d != left.as_ref()) {
                break;
            }
            discriminant = Some((**left).clone());
            let (case, rest) = if equal {
                (block.succs[0], block.succs[1])
            } else {
                (block.succs[1], block.succs[0])
            };
            cases.push((value, case));
            chain.push(node);
            node = self.peek_trivial_branch(rest);
            if chain.contains(&node) {
                return None;
            }
        }
        if cases.len() < 3 {
            return None;
        }
        for &n in &chain {
            self.emitted[n] = true;
        }
        let default = self.skip_trivial_branch(node);
        Some(SwitchShape {
            discriminant: discriminant?,
            cases,
            default,
        })
    }

    /// Target of a single-use unconditional branch at `id`, else `id`.
    fn peek_trivial_branch(&self, id: ActionId) -> ActionId {
        match self.graph.get(id) {
            Some(block)
                if block.kind == ActionKind::Branch
                    && block.preds.len() == 1
                    && !self.emitted[id]
                    && !self.labels.contains(&id)
                    && !self.flow.is_loop_header(id)
                    && self.try_group_at(id).is_none() =>
            {
                block.succs[0]
            }
            _ => id,
        }
    }

    fn skip_trivial_branch(&mut self, id: ActionId) -> ActionId {
        let next = self.peek_trivial_branch(id);
        if next != id {
            self.emitted[id] = true;
        }
        next
    }

    fn structure_switch(
        &mut self,
        shape: SwitchShape,
        scope: &Scope,
        out: &mut Block,
    ) -> Result<Option<ActionId>> {
        let SwitchShape {
            discriminant,
            cases,
            default,
        } = shape;
        let follow = self.switch_follow(&cases, default, scope);

        let mut groups: BTreeMap<ActionId, Vec<i64>> = BTreeMap::new();
        for (value, target) in cases {
            if target != default {
                groups.entry(target).or_default().push(value);
            }
        }
        let mut ordered: Vec<(ActionId, Vec<i64>)> = groups.into_iter().collect();
        ordered.sort_by_key(|(target, _)| (self.offset(*target), *target));

        let mut case_scope = scope.nested(follow);
        case_scope.break_target = follow;

        let mut switch_cases = Vec::new();
        for (target, mut values) in ordered {
            values.sort_unstable();
            values.dedup();
            let body = self.case_body(target, &case_scope)?;
            let last = values.len() - 1;
            for (i, value) in values.into_iter().enumerate() {
                switch_cases.push(SwitchCase {
                    value: case_label(value),
                    body: if i == last { body.clone() } else { vec![] },
                    falls_through: i != last,
                });
            }
        }
        let default = if Some(default) == follow {
            None
        } else {
            Some(self.case_body(default, &case_scope)?)
        };
        out.push(Statement::Switch {
            discriminant,
            cases: switch_cases,
            default,
        });
        Ok(follow)
    }

    fn case_body(&mut self, target: ActionId, scope: &Scope) -> Result<Block> {
        let mut body = self.sequence(target, scope)?;
        if !ends_in_terminal(&body) {
            body.push(Statement::Break);
        }
        Ok(body)
    }

    /// Earliest node some arm leaves its dominance region for.
    fn switch_follow(
        &self,
        cases: &[(i64, ActionId)],
        default: ActionId,
        scope: &Scope,
    ) -> Option<ActionId> {
        let mut arms: BTreeSet<ActionId> = cases.iter().map(|&(_, t)| t).collect();
        arms.insert(default);
        let mut exits = BTreeSet::new();
        for &arm in &arms {
            let region: BTreeSet<ActionId> = self
                .reach(arm, scope)
                .into_iter()
                .filter(|&n| self.flow.dominates(arm, n))
                .collect();
            for &n in &region {
                let Some(block) = self.graph.get(n) else {
                    continue;
                };
                for &s in &block.succs {
                    if !region.contains(&s) && !self.is_stop(s, scope) {
                        exits.insert(s);
                    }
                }
            }
        }
        exits
            .into_iter()
            .filter(|s| *s == default || !arms.contains(s))
            .min_by_key(|&s| (self.offset(s), s))
    }

    // --- exception regions --------------------------------------------------

    /// Outermost not-yet-structured try block whose first action is `id`.
    fn try_group_at(&self, id: ActionId) -> Option<usize> {
        self.groups.iter().enumerate().find_map(|(i, group)| {
            (!self.entered_tries[i] && self.graph.action_at(group.try_start) == Some(id))
                .then_some(i)
        })
    }

    fn structure_try(
        &mut self,
        index: usize,
        id: ActionId,
        scope: &Scope,
        out: &mut Block,
    ) -> Result<Option<ActionId>> {
        self.entered_tries[index] = true;
        let groups = self.groups;
        let group = &groups[index];
        let has_filter = group
            .handlers
            .iter()
            .any(|h| matches!(h.kind, RegionKind::Filter { .. }));
        let has_finally = group
            .handlers
            .iter()
            .any(|h| matches!(h.kind, RegionKind::Finally | RegionKind::Fault));
        if has_filter && has_finally {
            return Err(DecompileError::unsupported(
                self.method,
                group.try_start,
                "filter and finally handlers on one protected block",
            ));
        }

        let follow = self.try_follow(group, scope);
        let mut body_scope = scope.nested(follow);
        body_scope.range = Some((group.try_start, group.try_end));
        let body = self.sequence(id, &body_scope)?;

        let mut catches = Vec::new();
        let mut finally = None;
        for handler in &group.handlers {
            let entry = self.graph.action_at(handler.handler_start).ok_or_else(|| {
                DecompileError::malformed(
                    self.method,
                    handler.handler_start,
                    "handler without code",
                )
            })?;
            let mut handler_scope = scope.nested(follow);
            handler_scope.range = Some((handler.handler_start, handler.handler_end));
            match &handler.kind {
                RegionKind::Catch(_) | RegionKind::Filter { .. } => {
                    let exception_type = match &handler.kind {
                        RegionKind::Catch(ty) => ty.clone(),
                        _ => TypeRef::object(),
                    };
                    let variable = self
                        .graph
                        .catch_variable(handler.handler_start)
                        .and_then(|index| self.variables.local(index).cloned());
                    let body = self.sequence(entry, &handler_scope)?;
                    catches.push(CatchClause {
                        exception_type,
                        variable,
                        body,
                    });
                }
                RegionKind::Finally | RegionKind::Fault => {
                    if matches!(handler.kind, RegionKind::Fault) {
                        log::warn!(
                            "{}: fault handler at IL_{:04x} rendered as finally",
                            self.method,
                            handler.handler_start
                        );
                    }
                    handler_scope.exit = None;
                    finally = Some(self.sequence(entry, &handler_scope)?);
                }
            }
        }

        out.push(merge_nested_try(Statement::Try {
            body,
            catches,
            finally,
        }));
        Ok(follow)
    }

    /// First target outside the try block and its handlers that control
    /// leaves them for.
    fn try_follow(&self, group: &TryGroup, scope: &Scope) -> Option<ActionId> {
        let inside = |offset: u32| {
            (offset >= group.try_start && offset < group.try_end)
                || group
                    .handlers
                    .iter()
                    .any(|h| offset >= h.handler_start && offset < h.handler_end)
        };
        self.graph
            .blocks()
            .filter(|b| inside(b.offset))
            .flat_map(|b| b.succs.iter().copied())
            .filter(|&s| {
                !inside(self.offset(s))
                    && scope.break_target != Some(s)
                    && scope.continue_target != Some(s)
            })
            .min_by_key(|&s| (self.offset(s), s))
    }
}

/// Emit `if (condition) target_arm else fallthrough_arm` in its most
/// readable orientation.
fn push_if(out: &mut Block, condition: Expression, fallthrough_arm: Block, target_arm: Block) {
    match (fallthrough_arm.is_empty(), target_arm.is_empty()) {
        (_, true) => out.push(Statement::If {
            condition: condition.negate(),
            then_block: fallthrough_arm,
            else_block: None,
        }),
        (true, false) => out.push(Statement::If {
            condition,
            then_block: target_arm,
            else_block: None,
        }),
        (false, false) => {
            let shorter_jump =
                ends_in_terminal(&target_arm) && target_arm.len() < fallthrough_arm.len();
            if ends_in_terminal(&fallthrough_arm) && !shorter_jump {
                out.push(Statement::If {
                    condition: condition.negate(),
                    then_block: fallthrough_arm,
                    else_block: None,
                });
                out.extend(target_arm);
            } else if ends_in_terminal(&target_arm) {
                out.push(Statement::If {
                    condition,
                    then_block: target_arm,
                    else_block: None,
                });
                out.extend(fallthrough_arm);
            } else {
                out.push(Statement::If {
                    condition: condition.negate(),
                    then_block: fallthrough_arm,
                    else_block: Some(target_arm),
                });
            }
        }
    }
}

/// Drop a `continue` that ends a loop body, also at the end of each arm of
/// a trailing try statement.
fn strip_trailing_continue(body: &mut Block) {
    match body.last_mut() {
        Some(Statement::Continue) => {
            body.pop();
        }
        Some(Statement::Try { body, catches, .. }) => {
            strip_trailing_continue(body);
            for catch in catches {
                strip_trailing_continue(&mut catch.body);
            }
        }
        _ => {}
    }
}

/// `try { try { .. } catch { .. } } finally { .. }` is one C# statement.
fn merge_nested_try(stmt: Statement) -> Statement {
    match stmt {
        Statement::Try {
            body,
            catches,
            finally: Some(finally),
        } if catches.is_empty() => match <[Statement; 1]>::try_from(body) {
            Ok([Statement::Try {
                body: inner,
                catches: inner_catches,
                finally: None,
            }]) if !inner_catches.is_empty() => Statement::Try {
                body: inner,
                catches: inner_catches,
                finally: Some(finally),
            },
            Ok([single]) => Statement::Try {
                body: vec![single],
                catches,
                finally: Some(finally),
            },
            Err(body) => Statement::Try {
                body,
                catches,
                finally: Some(finally),
            },
        },
        other => other,
    }
}

fn case_label(value: i64) -> Expression {
    match i32::try_from(value) {
        Ok(v) => Expression::int(v),
        Err(_) => Expression::Literal(Literal::Int64(value)),
    }
}

fn label_name(offset: u32) -> String {
    format!("IL_{offset:04x}")
}
