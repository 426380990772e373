//! Begin phase: render a fiber and reconcile its children, or prove that
//! nothing changed and reuse the previous children.

use std::rc::Rc;

use crate::child_reconciler::ChildReconciler;
use crate::element::{Child, ElementType, Props, Rendered};
use crate::error::ReconcileError;
use crate::fiber::{EffectTag, FiberId, Input, WorkTag};
use crate::host::HostConfig;
use crate::priority::Priority;
use crate::scheduler::Scheduler;
use crate::value::Record;

impl<H: HostConfig> Scheduler<H> {
    /// Returns the next fiber to begin, or `None` when `wip` should be
    /// completed.
    pub(crate) fn begin_work(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        priority: Priority,
    ) -> Result<Option<FiberId>, ReconcileError> {
        let fiber = self.fibers.get_mut(wip).ok_or(ReconcileError::StaleFiber { fiber: wip })?;
        fiber.linked_into_parent = false;
        fiber.deferred = false;
        if !fiber.pending_work_priority.is_within(priority) {
            fiber.deferred = true;
            return Ok(None);
        }
        if fiber.progressed_priority == priority {
            // Resume children produced by an interrupted pass.
            fiber.child = fiber.progressed_child;
        }

        let props_unchanged = match (&fiber.pending_props, &fiber.memoized_props) {
            (None, _) => true,
            (Some(pending), Some(memoized)) => pending.same(memoized),
            (Some(_), None) => false,
        };
        if props_unchanged && fiber.update_queue.is_none() && !self.context.has_changed() {
            return self.bailout_on_already_finished_work(current, wip);
        }

        let tag = fiber.tag;
        log::trace!("begin {:?} {} at {priority}", tag, fiber.type_name());
        match tag {
            WorkTag::Indeterminate => self.mount_indeterminate_component(current, wip, priority),
            WorkTag::Function => self.update_functional_component(current, wip),
            WorkTag::Class => self.update_class_component(current, wip, priority),
            WorkTag::HostRoot => self.update_host_root(current, wip),
            WorkTag::HostComponent => self.update_host_component(current, wip),
            WorkTag::HostText => self.update_host_text(wip),
            // Coroutines reconcile their children like fragments.
            WorkTag::Fragment | WorkTag::Coroutine => self.update_fragment(current, wip),
        }
    }

    fn next_input(&self, wip: FiberId) -> Result<Input, ReconcileError> {
        let fiber = self.fibers.get(wip).ok_or(ReconcileError::StaleFiber { fiber: wip })?;
        fiber
            .pending_props
            .clone()
            .or_else(|| fiber.memoized_props.clone())
            .ok_or(ReconcileError::MissingProps { fiber: wip })
    }

    fn next_props(&self, wip: FiberId) -> Result<Rc<Props>, ReconcileError> {
        self.next_input(wip)?
            .props()
            .cloned()
            .ok_or(ReconcileError::MissingProps { fiber: wip })
    }

    fn memoize_props(&mut self, wip: FiberId, input: Input) {
        if let Some(fiber) = self.fibers.get_mut(wip) {
            fiber.memoized_props = Some(input);
        }
    }

    fn memoize_state(&mut self, wip: FiberId, state: Option<Rc<Record>>) {
        if let Some(fiber) = self.fibers.get_mut(wip) {
            fiber.memoized_state = state;
        }
    }

    fn child_of(&self, id: FiberId) -> Option<FiberId> {
        self.fibers.get(id).and_then(|f| f.child)
    }

    fn reconcile_children(&mut self, current: Option<FiberId>, wip: FiberId, children: &Child) {
        let priority = self
            .fibers
            .get(wip)
            .map_or(Priority::NoWork, |f| f.pending_work_priority);
        self.reconcile_children_at_priority(current, wip, children, priority);
    }

    pub(crate) fn reconcile_children_at_priority(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        children: &Child,
        priority: Priority,
    ) {
        let Some(fiber) = self.fibers.get_mut(wip) else {
            return;
        };
        // Unset until this pass memoizes again.
        fiber.memoized_props = None;
        let wip_child = fiber.child;

        let new_child = match current {
            None => ChildReconciler::mount(&mut self.fibers).reconcile(wip, wip_child, children, priority),
            Some(current) => {
                let reconciled = if self.child_of(current) == wip_child {
                    if let Some(fiber) = self.fibers.get_mut(wip) {
                        fiber.progressed_deletions.clear();
                    }
                    ChildReconciler::against_current(&mut self.fibers).reconcile(wip, wip_child, children, priority)
                } else {
                    // Deletions from the interrupted attempt are no longer
                    // among the progressed children, so they are kept.
                    ChildReconciler::in_place(&mut self.fibers).reconcile(wip, wip_child, children, priority)
                };
                // Deletions commit before any other effect of the subtree.
                if let Some(fiber) = self.fibers.get_mut(wip) {
                    fiber.effects = fiber.progressed_deletions.to_vec();
                }
                reconciled
            }
        };
        if let Some(fiber) = self.fibers.get_mut(wip) {
            fiber.child = new_child;
        }
        self.mark_child_as_progressed(current, wip, priority);
    }

    fn mark_child_as_progressed(&mut self, current: Option<FiberId>, wip: FiberId, priority: Priority) {
        let child = self.child_of(wip);
        for id in std::iter::once(wip).chain(current) {
            if let Some(fiber) = self.fibers.get_mut(id) {
                fiber.progressed_child = child;
                fiber.progressed_priority = priority;
            }
        }
    }

    fn update_host_root(&mut self, current: Option<FiberId>, wip: FiberId) -> Result<Option<FiberId>, ReconcileError> {
        let input = self.next_input(wip)?;
        self.reconcile_children(current, wip, &input.children());
        self.memoize_props(wip, input);
        Ok(self.child_of(wip))
    }

    fn update_host_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
    ) -> Result<Option<FiberId>, ReconcileError> {
        let props = self.next_props(wip)?;
        let children = if props.text_content().is_some() {
            Child::Empty
        } else {
            props.children().clone()
        };
        let (pending, progressed_priority) = self
            .fibers
            .get(wip)
            .map_or((Priority::NoWork, Priority::NoWork), |f| {
                (f.pending_work_priority, f.progressed_priority)
            });

        if props.is_hidden() && pending != Priority::Offscreen {
            // Hidden children are prepared at the lowest priority while the
            // visible tree keeps its committed children.
            if progressed_priority == Priority::Offscreen {
                if let Some(fiber) = self.fibers.get_mut(wip) {
                    fiber.child = fiber.progressed_child;
                }
            }
            self.reconcile_children_at_priority(current, wip, &children, Priority::Offscreen);
            self.memoize_props(wip, Input::Props(Rc::clone(&props)));
            let committed_child = current.and_then(|c| self.child_of(c));
            let progressed = self.fibers.get_mut(wip).map(|fiber| {
                fiber.child = committed_child;
                fiber.progressed_child
            });
            if current.is_none() {
                let hidden: Vec<FiberId> = self.fibers.siblings(progressed.flatten()).collect();
                for id in hidden {
                    if let Some(child) = self.fibers.get_mut(id) {
                        child.effect_tag |= EffectTag::PLACEMENT;
                    }
                }
            }
            return Ok(None);
        }

        self.reconcile_children(current, wip, &children);
        self.memoize_props(wip, Input::Props(props));
        Ok(self.child_of(wip))
    }

    fn update_host_text(&mut self, wip: FiberId) -> Result<Option<FiberId>, ReconcileError> {
        let input = self.next_input(wip)?;
        self.memoize_props(wip, input);
        Ok(None)
    }

    fn update_fragment(&mut self, current: Option<FiberId>, wip: FiberId) -> Result<Option<FiberId>, ReconcileError> {
        let input = self.next_input(wip)?;
        self.reconcile_children(current, wip, &input.children());
        self.memoize_props(wip, input);
        Ok(self.child_of(wip))
    }

    fn function_type(&self, wip: FiberId) -> Result<crate::element::FunctionType, ReconcileError> {
        match self.fibers.get(wip).and_then(|f| f.element_type.as_ref()) {
            Some(ElementType::Function(function)) => Ok(function.clone()),
            _ => Err(ReconcileError::StaleFiber { fiber: wip }),
        }
    }

    fn update_functional_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
    ) -> Result<Option<FiberId>, ReconcileError> {
        let function = self.function_type(wip)?;
        let props = self.next_props(wip)?;
        let memoized = self.fibers.get(wip).and_then(|f| f.props().cloned());
        if !self.context.has_changed() && memoized.is_some_and(|m| Rc::ptr_eq(&m, &props)) {
            return self.bailout_on_already_finished_work(current, wip);
        }
        let unmasked = self.context.unmasked_for(wip);
        let context = self.masked_context(wip, &unmasked);
        let children = match function
            .call(&props, &context)
            .map_err(|err| ReconcileError::component(function.name(), err))?
        {
            Rendered::Children(children) => children,
            Rendered::Instance(_) => {
                return Err(ReconcileError::ComponentKindChanged {
                    component: Rc::from(function.name()),
                })
            }
        };
        self.reconcile_children(current, wip, &children);
        self.memoize_props(wip, Input::Props(props));
        Ok(self.child_of(wip))
    }

    /// First call of a function decides whether it renders directly or
    /// hands back a component instance.
    fn mount_indeterminate_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        priority: Priority,
    ) -> Result<Option<FiberId>, ReconcileError> {
        let function = self.function_type(wip)?;
        let props = self.next_props(wip)?;
        let unmasked = self.context.unmasked_for(wip);
        let context = self.masked_context(wip, &unmasked);
        let rendered = function
            .call(&props, &context)
            .map_err(|err| ReconcileError::component(function.name(), err))?;

        match rendered {
            Rendered::Children(children) => {
                if let Some(fiber) = self.fibers.get_mut(wip) {
                    fiber.tag = WorkTag::Function;
                }
                self.reconcile_children(current, wip, &children);
                self.memoize_props(wip, Input::Props(props));
                Ok(self.child_of(wip))
            }
            Rendered::Instance(component) => {
                if let Some(fiber) = self.fibers.get_mut(wip) {
                    fiber.tag = WorkTag::Class;
                }
                self.adopt_instance(wip, component, None, props, context);
                let has_context = self.push_context_provider(wip);
                self.mount_class_instance(wip, priority)?;
                self.finish_class_component(current, wip, true, has_context)
            }
        }
    }

    fn push_context_provider(&mut self, wip: FiberId) -> bool {
        if !self.is_context_provider(wip) {
            return false;
        }
        let memoized = self
            .instance_of(wip)
            .and_then(|id| self.instances.get(id))
            .and_then(|instance| instance.child_context.clone());
        self.context.push_provider(wip, memoized);
        true
    }

    fn update_class_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        priority: Priority,
    ) -> Result<Option<FiberId>, ReconcileError> {
        let has_instance = self.instance_of(wip).is_some();
        let (should_update, has_context) = match current {
            None if !has_instance => {
                self.construct_class_instance(wip)?;
                let has_context = self.push_context_provider(wip);
                self.mount_class_instance(wip, priority)?;
                (true, has_context)
            }
            None => {
                let has_context = self.push_context_provider(wip);
                (self.resume_mount_class_instance(wip, priority)?, has_context)
            }
            Some(current) => {
                let has_context = self.push_context_provider(wip);
                (self.update_class_instance(current, wip, priority)?, has_context)
            }
        };
        self.finish_class_component(current, wip, should_update, has_context)
    }

    fn finish_class_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        should_update: bool,
        has_context: bool,
    ) -> Result<Option<FiberId>, ReconcileError> {
        if !should_update {
            return self.bailout_on_already_finished_work(current, wip);
        }
        let id = self.instance_of(wip).ok_or(ReconcileError::StaleFiber { fiber: wip })?;
        let instance = self.instances.get_mut(id).ok_or(ReconcileError::StaleFiber { fiber: wip })?;
        let name = Rc::clone(&instance.name);
        let children = instance
            .call(|component, cx| component.render(cx))
            .map_err(|err| ReconcileError::component(&name, err))?;
        let state = instance.state.clone();
        let props = Rc::clone(&instance.props);

        self.reconcile_children(current, wip, &children);
        self.memoize_state(wip, state);
        self.memoize_props(wip, Input::Props(props));
        if has_context {
            let parent = self.context.parent_of_top();
            let merged = self.process_child_context(wip, &parent)?;
            self.context.invalidate_provider(wip, merged);
        }
        Ok(self.child_of(wip))
    }

    pub(crate) fn bailout_on_already_finished_work(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
    ) -> Result<Option<FiberId>, ReconcileError> {
        let fiber = self.fibers.get(wip).ok_or(ReconcileError::StaleFiber { fiber: wip })?;
        let (tag, priority, progressed) = (fiber.tag, fiber.pending_work_priority, fiber.progressed_child);
        let hidden = fiber.props().is_some_and(|props| props.is_hidden());
        log::trace!("bailout {:?} {}", tag, fiber.type_name());

        if tag == WorkTag::Class && !self.context.is_top(wip) {
            self.push_context_provider(wip);
        }
        if tag == WorkTag::HostComponent && hidden && priority != Priority::Offscreen {
            let hidden_children: Vec<FiberId> = self.fibers.siblings(progressed).collect();
            for id in hidden_children {
                if let Some(child) = self.fibers.get_mut(id) {
                    child.pending_work_priority = Priority::Offscreen;
                }
            }
            return Ok(None);
        }

        self.clone_child_fibers(current, wip);
        self.mark_child_as_progressed(current, wip, priority);
        Ok(self.child_of(wip))
    }

    /// Points `wip` at work-in-progress copies of its committed children.
    fn clone_child_fibers(&mut self, current: Option<FiberId>, wip: FiberId) {
        let Some(first) = self.child_of(wip) else {
            return;
        };
        let from_current = current.is_some_and(|current| self.child_of(current) == Some(first));
        if !from_current {
            // Children already belong to this pass.
            let children: Vec<FiberId> = self.fibers.siblings(Some(first)).collect();
            for id in children {
                if let Some(child) = self.fibers.get_mut(id) {
                    child.parent = Some(wip);
                }
            }
            return;
        }

        let mut previous: Option<FiberId> = None;
        let mut next = Some(first);
        while let Some(committed) = next {
            let (priority, sibling) = self
                .fibers
                .get(committed)
                .map_or((Priority::NoWork, None), |f| (f.pending_work_priority, f.sibling));
            let clone = self.fibers.clone_fiber(committed, priority);
            if let Some(fiber) = self.fibers.get_mut(clone) {
                fiber.parent = Some(wip);
                fiber.sibling = None;
            }
            let slot = match previous {
                Some(prev) => self.fibers.get_mut(prev).map(|f| &mut f.sibling),
                None => self.fibers.get_mut(wip).map(|f| &mut f.child),
            };
            if let Some(slot) = slot {
                *slot = Some(clone);
            }
            previous = Some(clone);
            next = sibling;
        }
    }
}

#[cfg(test)]
#[path = "tests/begin_work_tests.rs"]
mod tests;
