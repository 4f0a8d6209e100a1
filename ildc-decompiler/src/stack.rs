use std::rc::Rc;

use ildc_ir::expr::Expression;

/// Simulated evaluation stack of expression trees.
///
/// Entries are reference counted so `dup` can push the same tree twice
/// without copying it.
#[derive(Debug, Clone, Default)]
pub struct StackModel {
    items: Vec<Rc<Expression>>,
}

impl StackModel {
    pub fn new() -> Self {
        StackModel { items: Vec::new() }
    }

    pub fn push(&mut self, expr: Expression) {
        self.items.push(Rc::new(expr));
    }

    pub fn push_shared(&mut self, expr: Rc<Expression>) {
        self.items.push(expr);
    }

    pub fn pop(&mut self) -> Option<Expression> {
        self.items.pop().map(Rc::unwrap_or_clone)
    }

    pub fn pop_shared(&mut self) -> Option<Rc<Expression>> {
        self.items.pop()
    }

    /// Pop `n` entries, returned bottom-first.
    pub fn pop_many(&mut self, n: usize) -> Option<Vec<Expression>> {
        if self.items.len() < n {
            return None;
        }
        let tail = self.items.split_off(self.items.len() - n);
        Some(tail.into_iter().map(Rc::unwrap_or_clone).collect())
    }

    pub fn peek(&self) -> Option<&Rc<Expression>> {
        self.items.last()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
