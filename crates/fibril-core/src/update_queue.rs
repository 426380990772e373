//! Per-fiber queue of pending state mutations, ordered by priority.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::element::Props;
use crate::error::{ComponentError, ReconcileError};
use crate::fiber::{FiberArena, FiberId};
use crate::host::HostConfig;
use crate::priority::Priority;
use crate::value::{Record, Value};

type StateFn = dyn Fn(Option<&Rc<Record>>, &Rc<Props>) -> Value;

/// The payload of a merge or replace update.
#[derive(Clone)]
pub enum PartialState {
    Value(Value),
    Function(Rc<StateFn>),
}

impl PartialState {
    fn resolve(&self, state: Option<&Rc<Record>>, props: &Rc<Props>) -> Value {
        match self {
            PartialState::Value(value) => value.clone(),
            PartialState::Function(f) => f(state, props),
        }
    }
}

#[derive(Clone)]
pub enum UpdateKind {
    Merge(PartialState),
    Replace(PartialState),
    Force,
}

type CallbackFn = Box<dyn FnOnce() -> Result<(), ComponentError>>;

/// A commit callback. Clones share the closure, which runs at most once.
#[derive(Clone)]
pub struct Callback(Rc<RefCell<Option<CallbackFn>>>);

impl Callback {
    pub fn new(f: impl FnOnce() -> Result<(), ComponentError> + 'static) -> Self {
        Callback(Rc::new(RefCell::new(Some(Box::new(f)))))
    }

    /// Runs the closure if no clone has run it yet.
    pub fn invoke(&self) -> Result<(), ComponentError> {
        let f = self.0.borrow_mut().take();
        match f {
            Some(f) => f(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

#[derive(Clone)]
pub struct Update {
    /// Insertion sequence number, unique per scheduler.
    pub seq: u64,
    pub priority: Priority,
    pub kind: UpdateKind,
    pub callback: Option<Callback>,
}

#[derive(Clone, Default)]
pub struct UpdateQueue {
    updates: VecDeque<Update>,
    has_force_update: bool,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts after every update of equal or greater urgency, so equal
    /// priorities keep insertion order.
    pub fn insert(&mut self, update: Update) {
        let position = self
            .updates
            .iter()
            .position(|existing| update.priority.is_more_urgent_than(existing.priority))
            .unwrap_or(self.updates.len());
        self.updates.insert(position, update);
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn has_force_update(&self) -> bool {
        self.has_force_update
    }

    /// Most urgent priority still waiting in the queue.
    pub fn pending_priority(&self) -> Priority {
        self.updates
            .front()
            .map(|update| update.priority)
            .unwrap_or(Priority::NoWork)
    }

    pub fn priorities(&self) -> impl Iterator<Item = Priority> + '_ {
        self.updates.iter().map(|update| update.priority)
    }
}

/// Outcome of folding a queue.
pub struct FoldedState {
    pub state: Option<Rc<Record>>,
    pub callbacks: Vec<Callback>,
}

/// Folds every update at least as urgent as `priority` into a new state.
///
/// Processed updates are removed from `queue`; `base_state` is never
/// mutated. When nothing applies, the returned state is the same `Rc` as
/// `base_state`.
pub fn begin_update_queue(
    queue: &mut UpdateQueue,
    component: &str,
    base_state: Option<&Rc<Record>>,
    props: &Rc<Props>,
    priority: Priority,
) -> Result<FoldedState, ReconcileError> {
    let mut state = base_state.cloned();
    let mut callbacks = Vec::new();
    queue.has_force_update = false;

    while queue
        .updates
        .front()
        .is_some_and(|update| update.priority.is_within(priority))
    {
        let Some(update) = queue.updates.pop_front() else {
            break;
        };
        match &update.kind {
            UpdateKind::Replace(partial) => {
                state = match partial.resolve(state.as_ref(), props) {
                    Value::Null => None,
                    Value::Map(record) => Some(record),
                    other => {
                        return Err(ReconcileError::InvalidState {
                            component: Rc::from(component),
                            found: other.kind(),
                        })
                    }
                };
            }
            UpdateKind::Merge(partial) => match partial.resolve(state.as_ref(), props) {
                Value::Null => {}
                Value::Map(patch) => {
                    let next = match &state {
                        Some(current) => current.merged(&patch),
                        None => (*patch).clone(),
                    };
                    state = Some(Rc::new(next));
                }
                other => {
                    return Err(ReconcileError::InvalidState {
                        component: Rc::from(component),
                        found: other.kind(),
                    })
                }
            },
            UpdateKind::Force => queue.has_force_update = true,
        }
        if let Some(callback) = update.callback {
            callbacks.push(callback);
        }
    }

    Ok(FoldedState { state, callbacks })
}

fn insert_update<H: HostConfig>(arena: &mut FiberArena<H>, fiber: FiberId, update: Update) {
    let alternate = arena.get(fiber).and_then(|f| f.alternate);
    if let Some(alternate) = alternate {
        if let Some(alt) = arena.get_mut(alternate) {
            alt.update_queue
                .get_or_insert_with(UpdateQueue::new)
                .insert(update.clone());
        }
    }
    if let Some(node) = arena.get_mut(fiber) {
        node.update_queue
            .get_or_insert_with(UpdateQueue::new)
            .insert(update);
    }
}

/// Queues a shallow-merge update on `fiber` and its alternate.
pub fn add_update<H: HostConfig>(
    arena: &mut FiberArena<H>,
    fiber: FiberId,
    seq: u64,
    partial: PartialState,
    callback: Option<Callback>,
    priority: Priority,
) {
    insert_update(
        arena,
        fiber,
        Update {
            seq,
            priority,
            kind: UpdateKind::Merge(partial),
            callback,
        },
    );
}

/// Queues an update that replaces the accumulated state.
pub fn add_replace_update<H: HostConfig>(
    arena: &mut FiberArena<H>,
    fiber: FiberId,
    seq: u64,
    state: PartialState,
    callback: Option<Callback>,
    priority: Priority,
) {
    insert_update(
        arena,
        fiber,
        Update {
            seq,
            priority,
            kind: UpdateKind::Replace(state),
            callback,
        },
    );
}

/// Queues an update that disables the bailout for one render.
pub fn add_force_update<H: HostConfig>(
    arena: &mut FiberArena<H>,
    fiber: FiberId,
    seq: u64,
    callback: Option<Callback>,
    priority: Priority,
) {
    insert_update(
        arena,
        fiber,
        Update {
            seq,
            priority,
            kind: UpdateKind::Force,
            callback,
        },
    );
}

/// Queues an already built update (used when draining the updater mailbox).
pub(crate) fn add_prepared_update<H: HostConfig>(
    arena: &mut FiberArena<H>,
    fiber: FiberId,
    update: Update,
) {
    insert_update(arena, fiber, update);
}

#[cfg(test)]
#[path = "tests/update_queue_tests.rs"]
mod tests;
