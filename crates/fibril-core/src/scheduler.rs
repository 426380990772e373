//! The work loop: picks the most urgent root, performs units of work within
//! a deadline, commits finished trees and recovers from errors.
//!
//! Deferred and animation work is driven by the host through
//! [`HostConfig::schedule_deferred_callback`] and
//! [`HostConfig::schedule_animation_callback`]; synchronous work is flushed
//! before the public call that scheduled it returns.

use std::mem;
use std::rc::Rc;

use slotmap::SlotMap;

use crate::class_instance::ClassInstance;
use crate::collections::map::HashSet;
use crate::component::{InstanceId, Lifecycle, UpdateDispatcher};
use crate::context::ContextStack;
use crate::element::{Child, Props};
use crate::error::{ReconcileError, TrappedError};
use crate::fiber::{Fiber, FiberArena, FiberId, Input, RootId, WorkTag};
use crate::host::{Deadline, HostConfig};
use crate::priority::Priority;
use crate::update_queue::{add_prepared_update, Callback};

/// Tuning knobs of a [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Priority given to updates requested outside [`Scheduler::perform_with_priority`].
    pub default_priority: Priority,
    /// Deferred work yields once the deadline has this many milliseconds
    /// or fewer left.
    pub time_heuristic_ms: f64,
    /// Nesting limit for error recovery passes that fail again.
    pub max_recovery_depth: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_priority: Priority::Low,
            time_heuristic_ms: 1.0,
            max_recovery_depth: 8,
        }
    }
}

/// A container plus the committed tree rendered into it.
pub struct FiberRoot<H: HostConfig> {
    pub(crate) container: H::Container,
    pub(crate) current: FiberId,
    /// Run after the next commit of this root.
    pub(crate) callbacks: Vec<Callback>,
    is_scheduled: bool,
    next_scheduled: Option<RootId>,
}

impl<H: HostConfig> FiberRoot<H> {
    pub fn container(&self) -> &H::Container {
        &self.container
    }

    pub fn current(&self) -> FiberId {
        self.current
    }
}

/// Why a unit of work stopped.
pub(crate) enum Failure {
    /// Thrown while rendering; trapped against the failing fiber.
    Render(ReconcileError),
    /// No boundary claimed it.
    Uncaught(ReconcileError),
}

impl From<ReconcileError> for Failure {
    fn from(error: ReconcileError) -> Self {
        Failure::Render(error)
    }
}

pub struct Scheduler<H: HostConfig> {
    pub(crate) host: H,
    pub(crate) config: SchedulerConfig,
    pub(crate) fibers: FiberArena<H>,
    pub(crate) instances: SlotMap<InstanceId, ClassInstance>,
    pub(crate) roots: SlotMap<RootId, FiberRoot<H>>,
    pub(crate) context: ContextStack,
    pub(crate) dispatcher: Rc<UpdateDispatcher>,
    next_scheduled_root: Option<RootId>,
    last_scheduled_root: Option<RootId>,
    next_unit_of_work: Option<FiberId>,
    next_priority_level: Priority,
    /// Fiber whose begin or complete step is running.
    in_flight: Option<FiberId>,
    is_performing_work: bool,
    sync_batch_depth: usize,
    deferred_callback_pending: bool,
    animation_callback_pending: bool,
    recovery_depth: usize,
    pub(crate) ignore_unmounting_errors: bool,
}

impl<H: HostConfig> Scheduler<H> {
    pub fn new(host: H) -> Self {
        Self::with_config(host, SchedulerConfig::default())
    }

    pub fn with_config(host: H, config: SchedulerConfig) -> Self {
        let dispatcher = Rc::new(UpdateDispatcher::new(config.default_priority));
        Self {
            host,
            config,
            fibers: FiberArena::new(),
            instances: SlotMap::with_key(),
            roots: SlotMap::with_key(),
            context: ContextStack::new(),
            dispatcher,
            next_scheduled_root: None,
            last_scheduled_root: None,
            next_unit_of_work: None,
            next_priority_level: Priority::NoWork,
            in_flight: None,
            is_performing_work: false,
            sync_batch_depth: 0,
            deferred_callback_pending: false,
            animation_callback_pending: false,
            recovery_depth: 0,
            ignore_unmounting_errors: false,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn fibers(&self) -> &FiberArena<H> {
        &self.fibers
    }

    pub fn fiber(&self, id: FiberId) -> Option<&Fiber<H>> {
        self.fibers.get(id)
    }

    pub fn root(&self, root: RootId) -> Option<&FiberRoot<H>> {
        self.roots.get(root)
    }

    /// Committed root fiber of `root`.
    pub fn root_current(&self, root: RootId) -> Option<FiberId> {
        self.roots.get(root).map(|r| r.current)
    }

    pub fn next_unit_of_work(&self) -> Option<FiberId> {
        self.next_unit_of_work
    }

    pub fn next_priority_level(&self) -> Priority {
        self.next_priority_level
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Whether any root still has work scheduled.
    pub fn has_pending_work(&self) -> bool {
        !self.scheduled_roots_priority().is_no_work()
    }

    // ---------------------------------------------------------------------
    // Containers
    // ---------------------------------------------------------------------

    pub fn create_container(&mut self, container: H::Container) -> RootId {
        let root = self.roots.insert(FiberRoot {
            container,
            current: FiberId::default(),
            callbacks: Vec::new(),
            is_scheduled: false,
            next_scheduled: None,
        });
        let current = self.fibers.create_host_root(root);
        if let Some(entry) = self.roots.get_mut(root) {
            entry.current = current;
        }
        log::debug!("created container root {root:?}");
        root
    }

    /// Renders `children` into `root` at the default priority.
    pub fn update_container(&mut self, root: RootId, children: impl Into<Child>) -> Result<(), ReconcileError> {
        self.set_root_children(root, children.into(), None)
    }

    /// Like [`Scheduler::update_container`], running `callback` after the
    /// root next commits.
    pub fn update_container_then(
        &mut self,
        root: RootId,
        children: impl Into<Child>,
        callback: impl FnOnce() -> Result<(), crate::ComponentError> + 'static,
    ) -> Result<(), ReconcileError> {
        self.set_root_children(root, children.into(), Some(Callback::new(callback)))
    }

    /// Removes everything rendered into `root`.
    pub fn unmount_container(&mut self, root: RootId) -> Result<(), ReconcileError> {
        self.set_root_children(root, Child::Empty, None)
    }

    fn set_root_children(
        &mut self,
        root: RootId,
        children: Child,
        callback: Option<Callback>,
    ) -> Result<(), ReconcileError> {
        let entry = self.roots.get_mut(root).ok_or(ReconcileError::InvalidRoot)?;
        entry.callbacks.extend(callback);
        let current = entry.current;
        let input = Input::Props(Rc::new(Props::new().with_children(children)));
        let alternate = self.fibers.get(current).and_then(|f| f.alternate);
        for id in std::iter::once(current).chain(alternate) {
            if let Some(fiber) = self.fibers.get_mut(id) {
                fiber.pending_props = Some(input.clone());
            }
        }
        // A pass already in flight may have consumed the old children.
        self.next_unit_of_work = None;
        self.schedule_work(root)
    }

    // ---------------------------------------------------------------------
    // Scheduling
    // ---------------------------------------------------------------------

    /// Schedules `root` at the default priority.
    pub fn schedule_work(&mut self, root: RootId) -> Result<(), ReconcileError> {
        let priority = self.dispatcher.default_priority();
        self.schedule_root(root, priority);
        self.flush_if_idle()
    }

    pub fn schedule_deferred_work(&mut self, root: RootId, priority: Priority) {
        self.invalidate_if_preempted(priority);
        self.raise_root_priority(root, priority);
        self.enqueue_root(root);
        self.request_deferred_callback();
    }

    pub fn schedule_animation_work(&mut self, root: RootId, priority: Priority) {
        self.invalidate_if_preempted(priority);
        self.raise_root_priority(root, priority);
        self.enqueue_root(root);
        self.request_animation_callback();
    }

    fn schedule_synchronous_work(&mut self, root: RootId) {
        self.invalidate_if_preempted(Priority::Synchronous);
        self.raise_root_priority(root, Priority::Synchronous);
        self.enqueue_root(root);
    }

    fn schedule_root(&mut self, root: RootId, priority: Priority) {
        match priority {
            Priority::NoWork => {}
            Priority::Synchronous => self.schedule_synchronous_work(root),
            Priority::Animation => self.schedule_animation_work(root, priority),
            _ => self.schedule_deferred_work(root, priority),
        }
    }

    /// Marks `fiber` and its ancestors as having work at `priority`, then
    /// schedules the owning root.
    pub fn schedule_update(&mut self, fiber: FiberId, priority: Priority) -> Result<(), ReconcileError> {
        self.schedule_update_internal(fiber, priority)?;
        self.flush_if_idle()
    }

    pub(crate) fn schedule_update_internal(&mut self, fiber: FiberId, priority: Priority) -> Result<(), ReconcileError> {
        let root = self.raise_path_priority(fiber, priority)?;
        self.schedule_root(root, priority);
        Ok(())
    }

    /// Lowers the pending priority along the parent chain (both buffers)
    /// and returns the root the chain ends at.
    fn raise_path_priority(&mut self, fiber: FiberId, priority: Priority) -> Result<RootId, ReconcileError> {
        let mut node = fiber;
        loop {
            let current = self.fibers.get_mut(node).ok_or(ReconcileError::StaleFiber { fiber: node })?;
            if current.pending_work_priority.is_no_work() || priority.is_more_urgent_than(current.pending_work_priority) {
                current.pending_work_priority = priority;
            }
            let (parent, alternate, tag) = (current.parent, current.alternate, current.tag);
            let root = current.state_node.root_id();
            if let Some(alt) = alternate.and_then(|alt| self.fibers.get_mut(alt)) {
                if alt.pending_work_priority.is_no_work() || priority.is_more_urgent_than(alt.pending_work_priority) {
                    alt.pending_work_priority = priority;
                }
            }
            match parent {
                Some(parent) => node = parent,
                None if tag == WorkTag::HostRoot => return root.ok_or(ReconcileError::InvalidRoot),
                None => return Err(ReconcileError::InvalidRoot),
            }
        }
    }

    fn invalidate_if_preempted(&mut self, priority: Priority) {
        if priority.is_within(self.next_priority_level) {
            self.next_unit_of_work = None;
        }
    }

    fn raise_root_priority(&mut self, root: RootId, priority: Priority) {
        let Some(current) = self.roots.get(root).map(|r| r.current) else {
            return;
        };
        if let Some(fiber) = self.fibers.get_mut(current) {
            if fiber.pending_work_priority.is_no_work() || priority.is_more_urgent_than(fiber.pending_work_priority) {
                fiber.pending_work_priority = priority;
            }
        }
    }

    fn enqueue_root(&mut self, root: RootId) {
        let Some(entry) = self.roots.get_mut(root) else {
            return;
        };
        if entry.is_scheduled {
            return;
        }
        entry.is_scheduled = true;
        match self.last_scheduled_root.and_then(|last| self.roots.get_mut(last)) {
            Some(last) => last.next_scheduled = Some(root),
            None => self.next_scheduled_root = Some(root),
        }
        self.last_scheduled_root = Some(root);
    }

    fn clear_root_queue(&mut self) {
        let mut next = self.next_scheduled_root.take();
        while let Some(root) = next {
            next = self.roots.get_mut(root).and_then(|entry| {
                entry.is_scheduled = false;
                entry.next_scheduled.take()
            });
        }
        self.last_scheduled_root = None;
        self.next_unit_of_work = None;
    }

    fn scheduled_roots_priority(&self) -> Priority {
        let mut level = Priority::NoWork;
        let mut next = self.next_scheduled_root;
        while let Some(root) = next {
            let Some(entry) = self.roots.get(root) else { break };
            if let Some(fiber) = self.fibers.get(entry.current) {
                level = level.most_urgent(fiber.pending_work_priority);
            }
            next = entry.next_scheduled;
        }
        level
    }

    fn request_deferred_callback(&mut self) {
        if !self.deferred_callback_pending {
            self.deferred_callback_pending = true;
            self.host.schedule_deferred_callback();
        }
    }

    fn request_animation_callback(&mut self) {
        if !self.animation_callback_pending {
            self.animation_callback_pending = true;
            self.host.schedule_animation_callback();
        }
    }

    /// Makes sure leftover work has a host callback to continue it.
    fn ensure_callbacks(&mut self) {
        match self.scheduled_roots_priority() {
            Priority::NoWork => {}
            Priority::Synchronous | Priority::Animation => self.request_animation_callback(),
            _ => self.request_deferred_callback(),
        }
    }

    /// Runs `f` with updates it requests tagged with `priority`.
    ///
    /// Synchronous regions batch: work is flushed when the outermost one
    /// ends.
    pub fn perform_with_priority<R>(
        &mut self,
        priority: Priority,
        f: impl FnOnce(&mut Self) -> R,
    ) -> Result<R, ReconcileError> {
        let previous = self.dispatcher.set_default_priority(priority);
        let batching = priority == Priority::Synchronous;
        if batching {
            self.sync_batch_depth += 1;
        }
        let value = f(self);
        self.dispatch_pending_updates();
        self.dispatcher.set_default_priority(previous);
        if batching {
            self.sync_batch_depth -= 1;
        }
        self.flush_if_idle()?;
        Ok(value)
    }

    /// Moves updates requested through updaters onto their fibers and
    /// schedules them.
    pub fn dispatch_updates(&mut self) -> Result<(), ReconcileError> {
        self.dispatch_pending_updates();
        self.flush_if_idle()
    }

    pub(crate) fn dispatch_pending_updates(&mut self) {
        for pending in self.dispatcher.take_pending() {
            let Some(fiber) = self.instances.get(pending.instance).map(|i| i.fiber) else {
                log::warn!("dropping state update for unmounted instance {:?}", pending.instance);
                continue;
            };
            let priority = pending.update.priority;
            add_prepared_update(&mut self.fibers, fiber, pending.update);
            if let Err(err) = self.schedule_update_internal(fiber, priority) {
                log::warn!("dropping state update for instance {:?}: {err}", pending.instance);
            }
        }
    }

    fn has_synchronous_work(&self) -> bool {
        self.scheduled_roots_priority() == Priority::Synchronous
    }

    fn flush_if_idle(&mut self) -> Result<(), ReconcileError> {
        if self.sync_batch_depth == 0 && !self.is_performing_work && self.has_synchronous_work() {
            self.perform_work(Self::synchronous_loop)
        } else {
            Ok(())
        }
    }

    // ---------------------------------------------------------------------
    // Performing work
    // ---------------------------------------------------------------------

    /// Host callback for deferred work: performs units until `deadline`
    /// runs low, then asks for another callback.
    pub fn perform_deferred_work(&mut self, deadline: &dyn Deadline) -> Result<(), ReconcileError> {
        self.deferred_callback_pending = false;
        self.perform_work(|scheduler| scheduler.deferred_loop(deadline))
    }

    /// Host callback for animation work. Always restarts from the root.
    pub fn perform_animation_work(&mut self) -> Result<(), ReconcileError> {
        self.animation_callback_pending = false;
        self.perform_work(Self::animation_loop)
    }

    fn perform_work(&mut self, work: impl FnOnce(&mut Self) -> Result<(), Failure>) -> Result<(), ReconcileError> {
        if self.is_performing_work {
            log::warn!("ignoring re-entrant request to perform work");
            return Ok(());
        }
        self.is_performing_work = true;
        self.dispatch_pending_updates();
        let mut result = match work(self) {
            Ok(()) => Ok(()),
            Err(failure) => self.recover(failure),
        };
        while result.is_ok() && self.has_synchronous_work() {
            result = match self.synchronous_loop() {
                Ok(()) => Ok(()),
                Err(failure) => self.recover(failure),
            };
        }
        self.is_performing_work = false;
        self.in_flight = None;
        self.ensure_callbacks();
        result
    }

    fn deferred_loop(&mut self, deadline: &dyn Deadline) -> Result<(), Failure> {
        loop {
            if self.next_unit_of_work.is_none() {
                self.next_unit_of_work = self.find_next_unit_of_work();
            }
            let Some(unit) = self.next_unit_of_work else {
                return Ok(());
            };
            if self.next_priority_level != Priority::Synchronous
                && deadline.time_remaining() <= self.config.time_heuristic_ms
            {
                log::trace!("deadline reached, yielding at {unit:?}");
                self.request_deferred_callback();
                return Ok(());
            }
            self.next_unit_of_work = self.perform_unit_of_work(unit)?;
        }
    }

    fn animation_loop(&mut self) -> Result<(), Failure> {
        self.next_unit_of_work = self.find_next_unit_of_work();
        while let Some(unit) = self.next_unit_of_work {
            if self.next_priority_level.is_no_work() {
                break;
            }
            if !self.next_priority_level.is_within(Priority::Animation) {
                self.request_deferred_callback();
                break;
            }
            self.next_unit_of_work = self.perform_unit_of_work(unit)?;
            if self.next_unit_of_work.is_none() {
                self.next_unit_of_work = self.find_next_unit_of_work();
            }
        }
        Ok(())
    }

    fn synchronous_loop(&mut self) -> Result<(), Failure> {
        self.next_unit_of_work = self.find_next_unit_of_work();
        while let Some(unit) = self.next_unit_of_work {
            if self.next_priority_level != Priority::Synchronous {
                break;
            }
            self.next_unit_of_work = self.perform_unit_of_work(unit)?;
            if self.next_unit_of_work.is_none() {
                self.next_unit_of_work = self.find_next_unit_of_work();
            }
        }
        Ok(())
    }

    /// Drops exhausted roots from the front of the queue and starts a fresh
    /// pass on the most urgent remaining one.
    fn find_next_unit_of_work(&mut self) -> Option<FiberId> {
        while let Some(root) = self.next_scheduled_root {
            let entry = self.roots.get(root)?;
            let idle = self
                .fibers
                .get(entry.current)
                .map_or(true, |f| f.pending_work_priority.is_no_work());
            if !idle {
                break;
            }
            let next = self.roots.get_mut(root).and_then(|entry| {
                entry.is_scheduled = false;
                entry.next_scheduled.take()
            });
            self.next_scheduled_root = next;
            if next.is_none() {
                self.last_scheduled_root = None;
            }
        }

        let mut highest: Option<(RootId, FiberId)> = None;
        let mut level = Priority::NoWork;
        let mut next = self.next_scheduled_root;
        while let Some(root) = next {
            let Some(entry) = self.roots.get(root) else { break };
            let priority = self
                .fibers
                .get(entry.current)
                .map_or(Priority::NoWork, |f| f.pending_work_priority);
            if priority.is_more_urgent_than(level) {
                level = priority;
                highest = Some((root, entry.current));
            }
            next = entry.next_scheduled;
        }

        self.next_priority_level = level;
        self.context.reset();
        let (root, current) = highest?;
        log::trace!("starting {level} pass on root {root:?}");
        Some(self.fibers.clone_fiber(current, level))
    }

    pub(crate) fn perform_unit_of_work(&mut self, unit: FiberId) -> Result<Option<FiberId>, Failure> {
        let current = self.fibers.get(unit).and_then(|f| f.alternate);
        self.in_flight = Some(unit);
        let next = self.begin_work(current, unit, self.next_priority_level)?;
        if next.is_some() {
            return Ok(next);
        }
        self.complete_unit_of_work(unit)
    }

    /// Completes `unit` and its ancestors until a sibling needs beginning.
    /// Reaching the root commits it.
    fn complete_unit_of_work(&mut self, unit: FiberId) -> Result<Option<FiberId>, Failure> {
        let mut work = unit;
        loop {
            self.in_flight = Some(work);
            let (current, deferred) = self
                .fibers
                .get(work)
                .map_or((None, false), |f| (f.alternate, f.deferred));
            // Skipped fibers keep their pending inputs for a later pass.
            if !deferred {
                self.complete_work(current, work)?;
                self.reset_work_priority(work);
            }

            let fiber = self
                .fibers
                .get_mut(work)
                .ok_or(ReconcileError::StaleFiber { fiber: work })?;
            if !deferred {
                fiber.pending_props = None;
                if fiber.update_queue.as_ref().is_some_and(|q| q.is_empty()) {
                    fiber.update_queue = None;
                }
            }
            let (parent, sibling) = (fiber.parent, fiber.sibling);

            if let Some(parent) = parent {
                self.link_effects_into_parent(work, parent);
            }
            if let Some(sibling) = sibling {
                return Ok(Some(sibling));
            }
            match parent {
                Some(parent) => work = parent,
                None => {
                    self.commit_root(work)?;
                    if self.recovery_depth > 0 {
                        return Ok(None);
                    }
                    return Ok(self.find_next_unit_of_work());
                }
            }
        }
    }

    /// Appends the child's effect list, then the child itself when it has
    /// effects. Safe to repeat.
    fn link_effects_into_parent(&mut self, child: FiberId, parent: FiberId) {
        let Some(fiber) = self.fibers.get_mut(child) else {
            return;
        };
        let mut moved = mem::take(&mut fiber.effects);
        if !fiber.effect_tag.is_empty() && !fiber.linked_into_parent {
            fiber.linked_into_parent = true;
            moved.push(child);
        }
        if let Some(parent) = self.fibers.get_mut(parent) {
            parent.effects.extend(moved);
        }
    }

    /// Recomputes pending priority from the progressed children and the
    /// fiber's own queued updates.
    fn reset_work_priority(&mut self, fiber: FiberId) {
        let Some(f) = self.fibers.get(fiber) else {
            return;
        };
        let mut priority = f
            .update_queue
            .as_ref()
            .map_or(Priority::NoWork, |queue| queue.pending_priority());
        for child in self.fibers.siblings(f.progressed_child) {
            if let Some(c) = self.fibers.get(child) {
                priority = priority.most_urgent(c.pending_work_priority);
            }
        }
        if let Some(f) = self.fibers.get_mut(fiber) {
            f.pending_work_priority = priority;
        }
    }

    fn commit_root(&mut self, finished: FiberId) -> Result<(), Failure> {
        let root = self
            .fibers
            .get(finished)
            .and_then(|f| f.state_node.root_id())
            .ok_or(Failure::Uncaught(ReconcileError::InvalidRoot))?;
        let entry = self
            .roots
            .get_mut(root)
            .ok_or(Failure::Uncaught(ReconcileError::InvalidRoot))?;
        if entry.current == finished {
            log::error!("root {root:?} asked to commit its committed tree");
            return Err(Failure::Uncaught(ReconcileError::InvalidRoot));
        }
        entry.current = finished;
        log::debug!("committing root {root:?}");

        let trapped = self.commit_all_work(finished, root);
        self.collect_garbage();
        self.dispatch_pending_updates();
        if trapped.is_empty() {
            return Ok(());
        }
        self.handle_errors(trapped).map_err(Failure::Uncaught)
    }

    // ---------------------------------------------------------------------
    // Errors
    // ---------------------------------------------------------------------

    fn recover(&mut self, failure: Failure) -> Result<(), ReconcileError> {
        match failure {
            Failure::Uncaught(error) => Err(error),
            Failure::Render(error) => {
                self.next_unit_of_work = None;
                let Some(failed) = self.in_flight.take() else {
                    return Err(error);
                };
                log::debug!("render of {failed:?} failed: {error}");
                let trapped = self.trap_error(failed, error);
                self.handle_errors(vec![trapped])
            }
        }
    }

    pub(crate) fn find_error_boundary(&self, fiber: FiberId) -> Option<FiberId> {
        let mut node = self.fibers.get(fiber)?.parent;
        while let Some(id) = node {
            let candidate = self.fibers.get(id)?;
            if candidate.tag == WorkTag::Class {
                let is_boundary = candidate
                    .state_node
                    .instance_id()
                    .and_then(|instance| self.instances.get(instance))
                    .is_some_and(|instance| instance.lifecycle.contains(Lifecycle::HANDLE_ERROR));
                if is_boundary {
                    return Some(id);
                }
            }
            node = candidate.parent;
        }
        None
    }

    pub(crate) fn trap_error(&self, failed: FiberId, error: ReconcileError) -> TrappedError {
        TrappedError {
            boundary: self.find_error_boundary(failed),
            error,
        }
    }

    /// Lets each boundary acknowledge its errors, then re-renders it
    /// synchronously. The first error nobody claims is returned.
    pub(crate) fn handle_errors(&mut self, trapped: Vec<TrappedError>) -> Result<(), ReconcileError> {
        if self.recovery_depth >= self.config.max_recovery_depth {
            log::error!("error recovery nested too deeply");
            self.clear_root_queue();
            return match trapped.into_iter().next() {
                Some(first) => Err(first.error),
                None => Ok(()),
            };
        }
        let priority = if self.next_priority_level.is_no_work() {
            Priority::Low
        } else {
            self.next_priority_level
        };
        let saved_level = self.next_priority_level;
        let saved_ignore = mem::replace(&mut self.ignore_unmounting_errors, true);
        self.recovery_depth += 1;
        let result = self.recover_from_errors(trapped, priority);
        self.recovery_depth -= 1;
        self.ignore_unmounting_errors = saved_ignore;
        self.next_priority_level = saved_level;
        self.next_unit_of_work = None;
        result
    }

    fn recover_from_errors(&mut self, trapped: Vec<TrappedError>, priority: Priority) -> Result<(), ReconcileError> {
        let mut pending = trapped;
        let mut first_uncaught: Option<ReconcileError> = None;
        let mut acknowledged: HashSet<InstanceId> = HashSet::default();

        while !pending.is_empty() {
            let mut affected: Vec<FiberId> = Vec::new();
            let mut this_round: HashSet<InstanceId> = HashSet::default();
            for error in mem::take(&mut pending) {
                let Some((boundary, instance)) = error
                    .boundary
                    .and_then(|boundary| Some((boundary, self.instance_of(boundary)?)))
                else {
                    log::debug!("uncaught error: {}", error.error);
                    first_uncaught.get_or_insert(error.error);
                    continue;
                };
                if this_round.contains(&instance) {
                    continue;
                }
                if acknowledged.contains(&instance) {
                    // The fallback failed as well.
                    pending.push(self.trap_error(boundary, error.error));
                    continue;
                }
                match self.acknowledge_error(boundary, instance, &error.error, priority) {
                    Ok(()) => {
                        this_round.insert(instance);
                        affected.push(boundary);
                    }
                    Err(failed) => pending.push(self.trap_error(boundary, failed)),
                }
            }
            acknowledged.extend(this_round);

            for boundary in affected {
                match self.rerender_boundary(boundary, priority) {
                    Ok(Some(error)) => pending.push(error),
                    Ok(None) => {}
                    Err(error) => {
                        first_uncaught.get_or_insert(error);
                    }
                }
            }
        }

        match first_uncaught {
            Some(error) => {
                self.clear_root_queue();
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn acknowledge_error(
        &mut self,
        boundary: FiberId,
        instance: InstanceId,
        error: &ReconcileError,
        priority: Priority,
    ) -> Result<(), ReconcileError> {
        let entry = self
            .instances
            .get_mut(instance)
            .ok_or(ReconcileError::StaleFiber { fiber: boundary })?;
        let name = Rc::clone(&entry.name);
        log::debug!("{name} handling error: {error}");
        entry
            .call(|component, cx| component.handle_error(error, cx))
            .map_err(|err| ReconcileError::component(&name, err))?;

        let (own, others): (Vec<_>, Vec<_>) = self
            .dispatcher
            .take_pending()
            .into_iter()
            .partition(|pending| pending.instance == instance);
        self.dispatcher.requeue(others);
        for mut pending in own {
            pending.update.priority = priority;
            add_prepared_update(&mut self.fibers, boundary, pending.update);
        }
        Ok(())
    }

    /// Re-renders the tree containing `boundary` right away. A render
    /// failure during the pass is returned as a trapped error.
    fn rerender_boundary(&mut self, boundary: FiberId, priority: Priority) -> Result<Option<TrappedError>, ReconcileError> {
        let root = self.raise_path_priority(boundary, priority)?;
        self.enqueue_root(root);
        let current = self.roots.get(root).ok_or(ReconcileError::InvalidRoot)?.current;
        self.next_priority_level = priority;
        self.context.reset();
        let mut unit = Some(self.fibers.clone_fiber(current, priority));
        while let Some(fiber) = unit {
            match self.perform_unit_of_work(fiber) {
                Ok(next) => unit = next,
                Err(Failure::Render(error)) => {
                    let failed = self.in_flight.take().unwrap_or(fiber);
                    return Ok(Some(self.trap_error(failed, error)));
                }
                Err(Failure::Uncaught(error)) => return Err(error),
            }
        }
        Ok(None)
    }

    // ---------------------------------------------------------------------
    // Arena upkeep
    // ---------------------------------------------------------------------

    /// Frees fibers and instances no root can reach anymore.
    ///
    /// Committed trees are walked in full. Their work-in-progress twins stay
    /// allocated for reuse, but links hanging off a twin are stale once the
    /// next pass clones over it, so only its progressed children are walked.
    fn collect_garbage(&mut self) {
        let mut live: HashSet<FiberId> = HashSet::default();
        let mut walked: HashSet<FiberId> = HashSet::default();
        let mut twins: Vec<FiberId> = Vec::new();
        let mut stack: Vec<FiberId> = self.roots.values().map(|root| root.current).collect();
        stack.extend(self.next_unit_of_work);
        loop {
            while let Some(id) = stack.pop() {
                if !walked.insert(id) {
                    continue;
                }
                live.insert(id);
                let Some(fiber) = self.fibers.get(id) else {
                    continue;
                };
                stack.extend(fiber.child);
                stack.extend(fiber.sibling);
                stack.extend(fiber.progressed_child);
                stack.extend(fiber.effects.iter().copied());
                twins.extend(fiber.alternate);
            }
            let Some(twin) = twins.pop() else { break };
            if live.insert(twin) {
                stack.extend(self.fibers.get(twin).and_then(|f| f.progressed_child));
            }
        }

        let dead: Vec<FiberId> = self.fibers.ids().filter(|id| !live.contains(id)).collect();
        for id in &dead {
            self.fibers.remove(*id);
        }
        let referenced: HashSet<InstanceId> = live
            .iter()
            .filter_map(|id| self.fibers.get(*id))
            .filter_map(|fiber| fiber.state_node.instance_id())
            .collect();
        self.instances.retain(|id, _| referenced.contains(&id));
        if !dead.is_empty() {
            log::trace!("collected {} fibers", dead.len());
        }
    }
}

#[cfg(test)]
#[path = "tests/scheduler_tests.rs"]
mod tests;
