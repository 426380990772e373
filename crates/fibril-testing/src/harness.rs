use std::cell::RefCell;
use std::rc::Rc;

use fibril_core::{
    Child, FiberArena, FiberId, HostConfig, ReconcileError, RootId, Scheduler, SchedulerConfig,
    Unbounded,
};

use crate::recording_host::{HostOp, NodeId, RecordingHost};

/// Upper bound on deferred callbacks [`TestRoot::flush`] runs before it
/// decides the work loop is stuck.
const MAX_FLUSH_PASSES: usize = 1_000;

/// A scheduler over a [`RecordingHost`] with a single container mounted.
///
/// Host callbacks are not delivered on their own; tests drive them through
/// [`TestRoot::flush`] or by calling the scheduler directly.
pub struct TestRoot {
    scheduler: Scheduler<RecordingHost>,
    root: RootId,
    container: NodeId,
}

impl TestRoot {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        let mut host = RecordingHost::new();
        let container = host.create_container();
        let mut scheduler = Scheduler::with_config(host, config);
        let root = scheduler.create_container(container);
        Self {
            scheduler,
            root,
            container,
        }
    }

    pub fn scheduler(&self) -> &Scheduler<RecordingHost> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler<RecordingHost> {
        &mut self.scheduler
    }

    pub fn root(&self) -> RootId {
        self.root
    }

    pub fn container(&self) -> NodeId {
        self.container
    }

    pub fn host(&self) -> &RecordingHost {
        self.scheduler.host()
    }

    /// Renders `children` into the container and flushes until idle.
    pub fn render(&mut self, children: impl Into<Child>) -> Result<(), ReconcileError> {
        self.scheduler.update_container(self.root, children)?;
        self.flush()
    }

    /// Schedules `children` without performing any work.
    pub fn schedule(&mut self, children: impl Into<Child>) -> Result<(), ReconcileError> {
        self.scheduler.update_container(self.root, children)
    }

    /// Delivers deferred callbacks with an unbounded deadline until no root
    /// has work left.
    ///
    /// Panics if the work never settles.
    pub fn flush(&mut self) -> Result<(), ReconcileError> {
        self.scheduler.dispatch_updates()?;
        for _ in 0..MAX_FLUSH_PASSES {
            if !self.scheduler.has_pending_work() {
                return Ok(());
            }
            self.scheduler.perform_deferred_work(&Unbounded)?;
        }
        panic!("work did not settle after {MAX_FLUSH_PASSES} passes");
    }

    /// Current contents of the container, see [`RecordingHost::dump`].
    pub fn dump(&self) -> String {
        self.host().dump(self.container)
    }

    pub fn take_ops(&mut self) -> Vec<HostOp> {
        self.scheduler.host_mut().take_ops()
    }

    /// First committed fiber named `name`, in depth-first order.
    pub fn find(&self, name: &str) -> Option<FiberId> {
        let current = self.scheduler.root_current(self.root)?;
        find_fiber(self.scheduler.fibers(), current, name)
    }
}

impl Default for TestRoot {
    fn default() -> Self {
        Self::new()
    }
}

/// Depth-first search for a fiber whose type name is `name`, starting at
/// `from` and following committed child and sibling links.
pub fn find_fiber<H: HostConfig>(arena: &FiberArena<H>, from: FiberId, name: &str) -> Option<FiberId> {
    let mut stack = vec![from];
    while let Some(id) = stack.pop() {
        let fiber = arena.get(id)?;
        if fiber.type_name() == name {
            return Some(id);
        }
        if id != from {
            stack.extend(fiber.sibling());
        }
        stack.extend(fiber.child());
    }
    None
}

/// Shared list of strings that components append to as they run.
#[derive(Clone, Default)]
pub struct EventLog {
    entries: Rc<RefCell<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.entries.borrow_mut())
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries.borrow().iter().filter(|e| *e == entry).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}
