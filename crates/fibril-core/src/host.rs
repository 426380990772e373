//! Host abstraction traits.
//!
//! The reconciler never touches a concrete UI tree. Everything it needs
//! from the environment (creating and mutating host nodes, requesting
//! callbacks) goes through [`HostConfig`], and idle-time budgets come in
//! through [`Deadline`].

use crate::element::Props;

/// Where a host child is attached: the root container or a host instance.
pub enum HostParent<'a, H: HostConfig + ?Sized> {
    Container(&'a H::Container),
    Instance(&'a H::Instance),
}

/// A host node produced by the reconciler.
pub enum HostChild<'a, H: HostConfig + ?Sized> {
    Instance(&'a H::Instance),
    Text(&'a H::TextInstance),
}

/// Operations the reconciler consumes from a host renderer.
///
/// Instance handles are cloned freely between the two fiber buffers, so they
/// should be cheap handles (ids, `Rc`s) rather than owned trees.
pub trait HostConfig {
    type Instance: Clone + 'static;
    type TextInstance: Clone + 'static;
    type Container: Clone + 'static;

    fn create_instance(&mut self, ty: &str, props: &Props) -> Self::Instance;

    fn create_text_instance(&mut self, text: &str) -> Self::TextInstance;

    /// Attaches a child while the parent is still detached from the
    /// container.
    fn append_initial_child(&mut self, parent: &Self::Instance, child: HostChild<'_, Self>);

    fn finalize_initial_children(&mut self, _instance: &Self::Instance, _ty: &str, _props: &Props) {}

    /// Returns `true` if committing `new_props` requires work.
    fn prepare_update(
        &mut self,
        instance: &Self::Instance,
        ty: &str,
        old_props: &Props,
        new_props: &Props,
    ) -> bool;

    fn commit_update(
        &mut self,
        instance: &Self::Instance,
        ty: &str,
        old_props: &Props,
        new_props: &Props,
    );

    fn commit_text_update(&mut self, text: &Self::TextInstance, old_text: &str, new_text: &str);

    fn append_child(&mut self, parent: HostParent<'_, Self>, child: HostChild<'_, Self>);

    fn insert_before(
        &mut self,
        parent: HostParent<'_, Self>,
        child: HostChild<'_, Self>,
        before: HostChild<'_, Self>,
    );

    fn remove_child(&mut self, parent: HostParent<'_, Self>, child: HostChild<'_, Self>);

    /// Asks the host to call [`Scheduler::perform_deferred_work`] when it
    /// has idle time.
    ///
    /// [`Scheduler::perform_deferred_work`]: crate::Scheduler::perform_deferred_work
    fn schedule_deferred_callback(&mut self);

    /// Asks the host to call [`Scheduler::perform_animation_work`] on the
    /// next display refresh.
    ///
    /// [`Scheduler::perform_animation_work`]: crate::Scheduler::perform_animation_work
    fn schedule_animation_callback(&mut self);
}

/// Budget handed to a deferred work callback.
pub trait Deadline {
    /// Milliseconds left in the current idle period.
    fn time_remaining(&self) -> f64;
}

/// A deadline that never runs out. Useful for flushing all deferred work.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

impl Deadline for Unbounded {
    fn time_remaining(&self) -> f64 {
        f64::INFINITY
    }
}
