//! Creating, mounting and updating class instances on behalf of begin work.

use std::rc::Rc;

use crate::component::{Component, InstanceCx, InstanceId, Lifecycle, Updater};
use crate::element::{shallow_equal_props, ClassFlags, ClassType, ElementType, Props};
use crate::error::ReconcileError;
use crate::fiber::{EffectTag, FiberId, Input, StateNode};
use crate::host::HostConfig;
use crate::priority::Priority;
use crate::scheduler::Scheduler;
use crate::update_queue::{add_prepared_update, begin_update_queue};
use crate::value::{shallow_equal, Record};

/// A live component instance plus the inputs it last saw.
pub(crate) struct ClassInstance {
    pub(crate) component: Box<dyn Component>,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) name: Rc<str>,
    /// `None` when the instance came from a factory function.
    pub(crate) class: Option<ClassType>,
    pub(crate) props: Rc<Props>,
    pub(crate) state: Option<Rc<Record>>,
    pub(crate) context: Rc<Record>,
    pub(crate) updater: Updater,
    /// Fiber that most recently rendered this instance.
    pub(crate) fiber: FiberId,
    /// Last (unmasked, masked) context pair, so an unchanged parent context
    /// yields the same masked record.
    pub(crate) masked_context: Option<(Rc<Record>, Rc<Record>)>,
    pub(crate) child_context: Option<Rc<Record>>,
}

impl ClassInstance {
    pub(crate) fn call<R>(&mut self, f: impl FnOnce(&mut dyn Component, &InstanceCx<'_>) -> R) -> R {
        let cx = InstanceCx {
            props: &self.props,
            state: self.state.as_ref(),
            context: &self.context,
            updater: &self.updater,
        };
        f(self.component.as_mut(), &cx)
    }

    fn flags(&self) -> ClassFlags {
        self.class.as_ref().map_or(ClassFlags::empty(), ClassType::flags)
    }

    pub(crate) fn is_context_provider(&self) -> bool {
        self.class
            .as_ref()
            .is_some_and(|class| class.child_context_types().is_some())
            || self.lifecycle.contains(Lifecycle::CHILD_CONTEXT)
    }
}

impl<H: HostConfig> Scheduler<H> {
    pub(crate) fn instance_of(&self, fiber: FiberId) -> Option<InstanceId> {
        self.fibers.get(fiber).and_then(|f| f.state_node.instance_id())
    }

    pub(crate) fn is_context_provider(&self, fiber: FiberId) -> bool {
        if let Some(instance) = self.instance_of(fiber).and_then(|id| self.instances.get(id)) {
            return instance.is_context_provider();
        }
        matches!(
            self.fibers.get(fiber).and_then(|f| f.element_type.as_ref()),
            Some(ElementType::Class(class)) if class.child_context_types().is_some()
        )
    }

    /// Picks the declared keys out of `unmasked`, reusing the instance's
    /// cached record when the parent context is unchanged.
    pub(crate) fn masked_context(&mut self, fiber: FiberId, unmasked: &Rc<Record>) -> Rc<Record> {
        let Some(types) = self
            .fibers
            .get(fiber)
            .and_then(|f| f.element_type.as_ref())
            .and_then(|ty| ty.context_types())
            .map(<[Rc<str>]>::to_vec)
        else {
            return self.context.empty();
        };
        let instance = self.instance_of(fiber);
        if let Some((cached_unmasked, cached_masked)) = instance
            .and_then(|id| self.instances.get(id))
            .and_then(|i| i.masked_context.as_ref())
        {
            if Rc::ptr_eq(cached_unmasked, unmasked) {
                return Rc::clone(cached_masked);
            }
        }
        let masked = Rc::new(unmasked.masked(&types));
        if let Some(instance) = instance.and_then(|id| self.instances.get_mut(id)) {
            instance.masked_context = Some((Rc::clone(unmasked), Rc::clone(&masked)));
        }
        masked
    }

    fn pending_or_memoized_props(&self, fiber: FiberId) -> Result<Rc<Props>, ReconcileError> {
        let f = self.fibers.get(fiber).ok_or(ReconcileError::StaleFiber { fiber })?;
        f.pending_props
            .as_ref()
            .or(f.memoized_props.as_ref())
            .and_then(Input::props)
            .cloned()
            .ok_or(ReconcileError::MissingProps { fiber })
    }

    /// Stores a new instance and attaches it to `fiber`.
    pub(crate) fn adopt_instance(
        &mut self,
        fiber: FiberId,
        component: Box<dyn Component>,
        class: Option<ClassType>,
        props: Rc<Props>,
        context: Rc<Record>,
    ) -> InstanceId {
        let name: Rc<str> = self
            .fibers
            .get(fiber)
            .map_or_else(|| Rc::from("Unknown"), |f| Rc::from(f.type_name()));
        let state = component.initial_state(&props).map(Rc::new);
        let lifecycle = component.lifecycle();
        let dispatcher = Rc::clone(&self.dispatcher);
        let id = self.instances.insert_with_key(|id| ClassInstance {
            component,
            lifecycle,
            name,
            class,
            props,
            state,
            context,
            updater: Updater::new(id, &dispatcher),
            fiber,
            masked_context: None,
            child_context: None,
        });
        if let Some(f) = self.fibers.get_mut(fiber) {
            f.state_node = StateNode::Instance(id);
        }
        log::trace!("created instance {id:?} for fiber {fiber:?}");
        id
    }

    pub(crate) fn construct_class_instance(&mut self, fiber: FiberId) -> Result<InstanceId, ReconcileError> {
        let Some(ElementType::Class(class)) = self.fibers.get(fiber).and_then(|f| f.element_type.clone()) else {
            return Err(ReconcileError::StaleFiber { fiber });
        };
        let props = self.pending_or_memoized_props(fiber)?;
        let unmasked = self.context.unmasked_for(fiber);
        let context = self.masked_context(fiber, &unmasked);
        let component = class
            .construct(&props, &context)
            .map_err(|err| ReconcileError::component(class.name(), err))?;
        let id = self.adopt_instance(fiber, component, Some(class), props, Rc::clone(&context));
        if let Some(instance) = self.instances.get_mut(id) {
            instance.masked_context = Some((unmasked, context));
        }
        Ok(id)
    }

    /// Folds the fiber's queue at `priority` on top of `base`.
    ///
    /// Returns the resulting state and whether a forced update was seen.
    /// Callbacks of applied updates move onto the fiber.
    fn fold_update_queue(
        &mut self,
        fiber: FiberId,
        name: &str,
        base: Option<&Rc<Record>>,
        props: &Rc<Props>,
        priority: Priority,
    ) -> Result<(Option<Rc<Record>>, bool), ReconcileError> {
        let f = self.fibers.get_mut(fiber).ok_or(ReconcileError::StaleFiber { fiber })?;
        let Some(queue) = f.update_queue.as_mut() else {
            return Ok((base.cloned(), false));
        };
        let folded = begin_update_queue(queue, name, base, props, priority)?;
        let forced = queue.has_force_update();
        f.callbacks.extend(folded.callbacks);
        Ok((folded.state, forced))
    }

    /// Moves updates queued for `instance` during `component_will_mount`
    /// onto its fiber at the render's own priority.
    fn adopt_will_mount_updates(&mut self, instance: InstanceId, fiber: FiberId, priority: Priority) {
        let (own, others): (Vec<_>, Vec<_>) = self
            .dispatcher
            .take_pending()
            .into_iter()
            .partition(|pending| pending.instance == instance);
        self.dispatcher.requeue(others);
        for mut pending in own {
            pending.update.priority = priority;
            add_prepared_update(&mut self.fibers, fiber, pending.update);
        }
    }

    /// First render of a fiber that has just been given an instance.
    pub(crate) fn mount_class_instance(&mut self, fiber: FiberId, priority: Priority) -> Result<(), ReconcileError> {
        let id = self.instance_of(fiber).ok_or(ReconcileError::StaleFiber { fiber })?;
        let props = self.pending_or_memoized_props(fiber)?;
        let instance = self.instances.get_mut(id).ok_or(ReconcileError::StaleFiber { fiber })?;
        instance.props = Rc::clone(&props);
        instance.fiber = fiber;
        let lifecycle = instance.lifecycle;
        let name = Rc::clone(&instance.name);

        if lifecycle.contains(Lifecycle::WILL_MOUNT) {
            instance
                .call(|component, cx| component.component_will_mount(cx))
                .map_err(|err| ReconcileError::component(&name, err))?;
            self.adopt_will_mount_updates(id, fiber, priority);
            let base = self.instances.get(id).and_then(|i| i.state.clone());
            let (state, _) = self.fold_update_queue(fiber, &name, base.as_ref(), &props, priority)?;
            if let Some(instance) = self.instances.get_mut(id) {
                instance.state = state;
            }
        }
        if lifecycle.contains(Lifecycle::DID_MOUNT) {
            if let Some(f) = self.fibers.get_mut(fiber) {
                f.effect_tag |= EffectTag::UPDATE;
            }
        }
        Ok(())
    }

    /// A mount that was interrupted is continued with the instance it
    /// already created. Returns whether to render again.
    pub(crate) fn resume_mount_class_instance(
        &mut self,
        fiber: FiberId,
        priority: Priority,
    ) -> Result<bool, ReconcileError> {
        let id = self.instance_of(fiber).ok_or(ReconcileError::StaleFiber { fiber })?;
        let new_props = self.pending_or_memoized_props(fiber)?;
        let old_props = self.fibers.get(fiber).and_then(|f| f.props().cloned());
        let base = self.fibers.get(fiber).and_then(|f| f.memoized_state.clone());
        let unmasked = self.context.unmasked_for(fiber);
        let new_context = self.masked_context(fiber, &unmasked);
        let name = self.instances.get(id).map(|i| Rc::clone(&i.name)).unwrap_or_else(|| Rc::from(""));

        let base = base.or_else(|| self.instances.get(id).and_then(|i| i.state.clone()));
        let (new_state, forced) = self.fold_update_queue(fiber, &name, base.as_ref(), &new_props, priority)?;
        let should_update = forced
            || self.check_should_update(
                fiber,
                id,
                (old_props.as_ref(), base.as_ref()),
                &new_props,
                new_state.as_ref(),
                &new_context,
            )?;

        let instance = self.instances.get_mut(id).ok_or(ReconcileError::StaleFiber { fiber })?;
        instance.fiber = fiber;
        instance.props = new_props;
        instance.state = new_state;
        instance.context = new_context;
        if instance.lifecycle.contains(Lifecycle::DID_MOUNT) {
            if let Some(f) = self.fibers.get_mut(fiber) {
                f.effect_tag |= EffectTag::UPDATE;
            }
        }
        Ok(should_update)
    }

    /// Re-render of a committed instance. Returns whether `render` must run.
    pub(crate) fn update_class_instance(
        &mut self,
        current: FiberId,
        fiber: FiberId,
        priority: Priority,
    ) -> Result<bool, ReconcileError> {
        let id = self.instance_of(fiber).ok_or(ReconcileError::StaleFiber { fiber })?;
        let old_props = self
            .fibers
            .get(fiber)
            .and_then(|f| f.props().cloned())
            .or_else(|| self.instances.get(id).map(|i| Rc::clone(&i.props)));
        let new_props = self.pending_or_memoized_props(fiber)?;
        let unmasked = self.context.unmasked_for(fiber);
        let new_context = self.masked_context(fiber, &unmasked);

        let instance = self.instances.get_mut(id).ok_or(ReconcileError::StaleFiber { fiber })?;
        instance.fiber = fiber;
        let name = Rc::clone(&instance.name);
        let lifecycle = instance.lifecycle;
        let old_context = Rc::clone(&instance.context);
        let props_changed = old_props.as_ref().map_or(true, |old| !Rc::ptr_eq(old, &new_props));

        if lifecycle.contains(Lifecycle::WILL_RECEIVE_PROPS)
            && (props_changed || !Rc::ptr_eq(&old_context, &new_context))
        {
            instance
                .call(|component, cx| component.component_will_receive_props(&new_props, &new_context, cx))
                .map_err(|err| ReconcileError::component(&name, err))?;
        }

        let old_state = self.fibers.get(fiber).and_then(|f| f.memoized_state.clone());
        let has_queue = self.fibers.get(fiber).is_some_and(|f| f.update_queue.is_some());
        let (new_state, forced) = self.fold_update_queue(fiber, &name, old_state.as_ref(), &new_props, priority)?;

        let state_unchanged = match (&old_state, &new_state) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if !props_changed && state_unchanged && Rc::ptr_eq(&old_context, &new_context) && !(has_queue && forced) {
            return Ok(false);
        }

        let should_update = forced
            || self.check_should_update(
                fiber,
                id,
                (old_props.as_ref(), old_state.as_ref()),
                &new_props,
                new_state.as_ref(),
                &new_context,
            )?;

        let instance = self.instances.get_mut(id).ok_or(ReconcileError::StaleFiber { fiber })?;
        if should_update {
            if lifecycle.contains(Lifecycle::WILL_UPDATE) {
                instance
                    .call(|component, cx| {
                        component.component_will_update(&new_props, new_state.as_ref(), &new_context, cx)
                    })
                    .map_err(|err| ReconcileError::component(&name, err))?;
            }
            if lifecycle.contains(Lifecycle::DID_UPDATE) {
                if let Some(f) = self.fibers.get_mut(fiber) {
                    f.effect_tag |= EffectTag::UPDATE;
                }
            }
        } else {
            // Skipping render still reports a changed commit to did_update.
            let committed = self.fibers.get(current);
            let differs_from_committed = committed.is_some_and(|c| {
                let props_differ = c.props().map_or(true, |p| !Rc::ptr_eq(p, &new_props));
                let state_differs = match (&c.memoized_state, &new_state) {
                    (Some(a), Some(b)) => !Rc::ptr_eq(a, b),
                    (None, None) => false,
                    _ => true,
                };
                props_differ || state_differs
            });
            if let Some(f) = self.fibers.get_mut(fiber) {
                if lifecycle.contains(Lifecycle::DID_UPDATE) && differs_from_committed {
                    f.effect_tag |= EffectTag::UPDATE;
                }
                f.memoized_props = Some(Input::Props(Rc::clone(&new_props)));
                f.memoized_state = new_state.clone();
            }
        }

        if let Some(instance) = self.instances.get_mut(id) {
            instance.props = new_props;
            instance.state = new_state;
            instance.context = new_context;
        }
        Ok(should_update)
    }

    /// `previous` is the props and state this fiber last rendered with.
    pub(crate) fn check_should_update(
        &mut self,
        fiber: FiberId,
        id: InstanceId,
        previous: (Option<&Rc<Props>>, Option<&Rc<Record>>),
        new_props: &Rc<Props>,
        new_state: Option<&Rc<Record>>,
        new_context: &Rc<Record>,
    ) -> Result<bool, ReconcileError> {
        let (old_props, old_state) = previous;
        let Some(old_props) = old_props else {
            return Ok(true);
        };
        let forced = self
            .fibers
            .get(fiber)
            .and_then(|f| f.update_queue.as_ref())
            .is_some_and(|queue| queue.has_force_update());
        if forced {
            return Ok(true);
        }
        let instance = self.instances.get_mut(id).ok_or(ReconcileError::StaleFiber { fiber })?;
        if instance.lifecycle.contains(Lifecycle::SHOULD_UPDATE) {
            let name = Rc::clone(&instance.name);
            return instance
                .call(|component, cx| component.should_component_update(new_props, new_state, new_context, cx))
                .map_err(|err| ReconcileError::component(&name, err));
        }
        if instance.flags().contains(ClassFlags::PURE) {
            let same = shallow_equal_props(old_props, new_props)
                && shallow_equal(old_state, new_state);
            return Ok(!same);
        }
        Ok(true)
    }

    /// Computes the context a provider exposes to its subtree.
    pub(crate) fn process_child_context(
        &mut self,
        fiber: FiberId,
        parent: &Rc<Record>,
    ) -> Result<Rc<Record>, ReconcileError> {
        let id = self.instance_of(fiber).ok_or(ReconcileError::StaleFiber { fiber })?;
        let instance = self.instances.get_mut(id).ok_or(ReconcileError::StaleFiber { fiber })?;
        let name = Rc::clone(&instance.name);
        let child = if instance.lifecycle.contains(Lifecycle::CHILD_CONTEXT) {
            instance
                .call(|component, cx| component.get_child_context(cx))
                .map_err(|err| ReconcileError::component(&name, err))?
        } else {
            None
        };
        let Some(child) = child else {
            instance.child_context = Some(Rc::clone(parent));
            return Ok(Rc::clone(parent));
        };
        let Some(declared) = instance.class.as_ref().and_then(ClassType::child_context_types) else {
            return Err(ReconcileError::MissingChildContextTypes { component: name });
        };
        if let Some(key) = child.keys().find(|key| !declared.iter().any(|d| &**d == *key)) {
            return Err(ReconcileError::UndeclaredChildContext {
                component: name,
                key: Rc::from(key),
            });
        }
        let merged = Rc::new(parent.merged(&child));
        instance.child_context = Some(Rc::clone(&merged));
        Ok(merged)
    }
}
