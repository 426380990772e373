//! Legacy context: values a class component exposes to every descendant.
//!
//! Providers push their merged child context while their subtree is being
//! begun and pop it when they complete. Entries remember which fiber pushed
//! them, so a fiber that bails out without pushing never pops a parent's
//! entry.

use std::rc::Rc;

use crate::fiber::FiberId;
use crate::value::Record;

struct ContextEntry {
    fiber: FiberId,
    context: Rc<Record>,
    /// Context visible to the provider itself.
    parent: Rc<Record>,
    changed: bool,
}

pub(crate) struct ContextStack {
    entries: Vec<ContextEntry>,
    empty: Rc<Record>,
}

impl ContextStack {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            empty: Rc::new(Record::new()),
        }
    }

    pub(crate) fn empty(&self) -> Rc<Record> {
        Rc::clone(&self.empty)
    }

    pub(crate) fn current(&self) -> Rc<Record> {
        self.entries
            .last()
            .map(|entry| Rc::clone(&entry.context))
            .unwrap_or_else(|| self.empty())
    }

    /// Whether some provider above the current position re-rendered this
    /// pass. Descendants must not bail out when it did.
    pub(crate) fn has_changed(&self) -> bool {
        self.entries.last().is_some_and(|entry| entry.changed)
    }

    /// Context a fiber reads. A provider never sees its own child context.
    pub(crate) fn unmasked_for(&self, fiber: FiberId) -> Rc<Record> {
        match self.entries.last() {
            Some(entry) if entry.fiber == fiber => Rc::clone(&entry.parent),
            _ => self.current(),
        }
    }

    pub(crate) fn is_top(&self, fiber: FiberId) -> bool {
        self.entries.last().is_some_and(|entry| entry.fiber == fiber)
    }

    /// Pushes the provider's last merged context, or its parent's context
    /// if it never rendered.
    pub(crate) fn push_provider(&mut self, fiber: FiberId, memoized: Option<Rc<Record>>) {
        let parent = self.current();
        let changed = self.has_changed();
        let context = memoized.unwrap_or_else(|| Rc::clone(&parent));
        self.entries.push(ContextEntry {
            fiber,
            context,
            parent,
            changed,
        });
    }

    /// Replaces the provider's entry after it re-rendered and marks the
    /// context as changed for its descendants.
    pub(crate) fn invalidate_provider(&mut self, fiber: FiberId, merged: Rc<Record>) {
        if let Some(entry) = self.entries.last_mut() {
            if entry.fiber == fiber {
                entry.context = merged;
                entry.changed = true;
            }
        }
    }

    pub(crate) fn parent_of_top(&self) -> Rc<Record> {
        self.entries
            .last()
            .map(|entry| Rc::clone(&entry.parent))
            .unwrap_or_else(|| self.empty())
    }

    pub(crate) fn pop_provider(&mut self, fiber: FiberId) {
        if self.is_top(fiber) {
            self.entries.pop();
        }
    }

    pub(crate) fn reset(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.entries.len()
    }
}
