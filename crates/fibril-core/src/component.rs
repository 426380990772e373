//! Stateful components and the updater handle they use to request changes.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use bitflags::bitflags;
use slotmap::new_key_type;

use crate::element::{Child, Props};
use crate::error::{ComponentError, ReconcileError};
use crate::priority::Priority;
use crate::update_queue::{Callback, PartialState, Update, UpdateKind};
use crate::value::{Record, Value};

new_key_type! {
    /// Handle of a class component instance in the scheduler's instance arena.
    pub struct InstanceId;
}

bitflags! {
    /// Lifecycle hooks a component implements.
    ///
    /// The reconciler only calls hooks that are declared here, and some
    /// decisions depend on a hook merely existing (for example an `UPDATE`
    /// effect is scheduled on bailout only for `DID_UPDATE`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Lifecycle: u16 {
        const WILL_MOUNT = 1 << 0;
        const DID_MOUNT = 1 << 1;
        const WILL_RECEIVE_PROPS = 1 << 2;
        const SHOULD_UPDATE = 1 << 3;
        const WILL_UPDATE = 1 << 4;
        const DID_UPDATE = 1 << 5;
        const WILL_UNMOUNT = 1 << 6;
        const CHILD_CONTEXT = 1 << 7;
        /// The component is an error boundary.
        const HANDLE_ERROR = 1 << 8;
    }
}

/// Read access to an instance's current inputs plus its updater.
pub struct InstanceCx<'a> {
    pub props: &'a Rc<Props>,
    pub state: Option<&'a Rc<Record>>,
    pub context: &'a Rc<Record>,
    pub updater: &'a Updater,
}

impl InstanceCx<'_> {
    /// Convenience accessor for a state field.
    pub fn state_value(&self, key: &str) -> Option<&Value> {
        self.state.and_then(|state| state.get(key))
    }
}

/// A user-defined stateful component.
///
/// Every hook has a no-op default; [`Component::lifecycle`] declares which
/// ones the reconciler should call.
pub trait Component: 'static {
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::empty()
    }

    /// State the instance starts with, read once right after construction.
    fn initial_state(&self, _props: &Rc<Props>) -> Option<Record> {
        None
    }

    fn render(&mut self, cx: &InstanceCx<'_>) -> Result<Child, ComponentError>;

    fn component_will_mount(&mut self, _cx: &InstanceCx<'_>) -> Result<(), ComponentError> {
        Ok(())
    }

    fn component_did_mount(&mut self, _cx: &InstanceCx<'_>) -> Result<(), ComponentError> {
        Ok(())
    }

    fn component_will_receive_props(
        &mut self,
        _next_props: &Rc<Props>,
        _next_context: &Rc<Record>,
        _cx: &InstanceCx<'_>,
    ) -> Result<(), ComponentError> {
        Ok(())
    }

    fn should_component_update(
        &mut self,
        _next_props: &Rc<Props>,
        _next_state: Option<&Rc<Record>>,
        _next_context: &Rc<Record>,
        _cx: &InstanceCx<'_>,
    ) -> Result<bool, ComponentError> {
        Ok(true)
    }

    fn component_will_update(
        &mut self,
        _next_props: &Rc<Props>,
        _next_state: Option<&Rc<Record>>,
        _next_context: &Rc<Record>,
        _cx: &InstanceCx<'_>,
    ) -> Result<(), ComponentError> {
        Ok(())
    }

    fn component_did_update(
        &mut self,
        _prev_props: &Rc<Props>,
        _prev_state: Option<&Rc<Record>>,
        _cx: &InstanceCx<'_>,
    ) -> Result<(), ComponentError> {
        Ok(())
    }

    fn component_will_unmount(&mut self, _cx: &InstanceCx<'_>) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Context exposed to descendants. Keys must be declared on the class
    /// type's child context types.
    fn get_child_context(&self, _cx: &InstanceCx<'_>) -> Result<Option<Record>, ComponentError> {
        Ok(None)
    }

    /// Error boundary acknowledgment: record whatever state the fallback
    /// render needs, usually through `cx.updater`.
    fn handle_error(
        &mut self,
        _error: &ReconcileError,
        _cx: &InstanceCx<'_>,
    ) -> Result<(), ComponentError> {
        Ok(())
    }
}

pub(crate) struct PendingUpdate {
    pub(crate) instance: InstanceId,
    pub(crate) update: Update,
}

/// Mailbox shared between the scheduler and every [`Updater`].
///
/// Updaters cannot reach the fiber tree directly; they queue requests here
/// and the scheduler drains them at well-defined points.
pub(crate) struct UpdateDispatcher {
    pending: RefCell<Vec<PendingUpdate>>,
    default_priority: Cell<Priority>,
    next_seq: Cell<u64>,
}

impl UpdateDispatcher {
    pub(crate) fn new(default_priority: Priority) -> Self {
        Self {
            pending: RefCell::new(Vec::new()),
            default_priority: Cell::new(default_priority),
            next_seq: Cell::new(1),
        }
    }

    pub(crate) fn default_priority(&self) -> Priority {
        self.default_priority.get()
    }

    pub(crate) fn set_default_priority(&self, priority: Priority) -> Priority {
        self.default_priority.replace(priority)
    }

    pub(crate) fn next_seq(&self) -> u64 {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        seq
    }

    fn push(&self, instance: InstanceId, kind: UpdateKind, callback: Option<Callback>) {
        let update = Update {
            seq: self.next_seq(),
            priority: self.default_priority.get(),
            kind,
            callback,
        };
        self.pending.borrow_mut().push(PendingUpdate { instance, update });
    }

    pub(crate) fn take_pending(&self) -> Vec<PendingUpdate> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }

    /// Puts back updates that were taken but not consumed, ahead of
    /// anything queued since.
    pub(crate) fn requeue(&self, mut updates: Vec<PendingUpdate>) {
        if updates.is_empty() {
            return;
        }
        let mut pending = self.pending.borrow_mut();
        updates.append(&mut pending);
        *pending = updates;
    }
}

/// Handle through which an instance requests state changes.
///
/// Requests are queued and take effect when the scheduler next dispatches
/// updates; from inside `component_will_mount` they are folded into the
/// initial state of the same render.
#[derive(Clone)]
pub struct Updater {
    instance: InstanceId,
    dispatcher: Weak<UpdateDispatcher>,
}

impl Updater {
    pub(crate) fn new(instance: InstanceId, dispatcher: &Rc<UpdateDispatcher>) -> Self {
        Self {
            instance,
            dispatcher: Rc::downgrade(dispatcher),
        }
    }

    fn enqueue(&self, kind: UpdateKind, callback: Option<Callback>) {
        match self.dispatcher.upgrade() {
            Some(dispatcher) => dispatcher.push(self.instance, kind, callback),
            None => log::warn!("state update on an instance whose scheduler was dropped"),
        }
    }

    /// Shallow-merges `patch` into the state.
    pub fn set_state(&self, patch: impl Into<Value>) {
        self.enqueue(UpdateKind::Merge(PartialState::Value(patch.into())), None);
    }

    /// Shallow-merges the result of `f(state, props)` into the state.
    pub fn set_state_with(&self, f: impl Fn(Option<&Rc<Record>>, &Rc<Props>) -> Value + 'static) {
        self.enqueue(UpdateKind::Merge(PartialState::Function(Rc::new(f))), None);
    }

    /// Like [`Updater::set_state`], running `callback` once the update is
    /// committed.
    pub fn set_state_then(
        &self,
        patch: impl Into<Value>,
        callback: impl FnOnce() -> Result<(), ComponentError> + 'static,
    ) {
        self.enqueue(
            UpdateKind::Merge(PartialState::Value(patch.into())),
            Some(Callback::new(callback)),
        );
    }

    /// Discards the accumulated state and uses `state` instead.
    pub fn replace_state(&self, state: impl Into<Value>) {
        self.enqueue(UpdateKind::Replace(PartialState::Value(state.into())), None);
    }

    /// Re-renders even if inputs are unchanged.
    pub fn force_update(&self) {
        self.enqueue(UpdateKind::Force, None);
    }
}
