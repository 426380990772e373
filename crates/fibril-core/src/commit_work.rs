//! Commit phase: apply a finished tree's effect list to the host, then run
//! lifecycles and callbacks.

use std::mem;
use std::rc::Rc;

use crate::component::Lifecycle;
use crate::error::{ReconcileError, TrappedError};
use crate::fiber::{EffectTag, FiberId, RootId, StateNode, WorkTag};
use crate::host::{HostChild, HostConfig, HostParent};
use crate::scheduler::Scheduler;

/// Owned handle of a host node, so the host can be borrowed mutably while
/// it is used.
enum HostNode<H: HostConfig> {
    Instance(H::Instance),
    Text(H::TextInstance),
}

impl<H: HostConfig> HostNode<H> {
    fn as_child(&self) -> HostChild<'_, H> {
        match self {
            HostNode::Instance(instance) => HostChild::Instance(instance),
            HostNode::Text(text) => HostChild::Text(text),
        }
    }
}

enum HostTarget<H: HostConfig> {
    Container(H::Container),
    Instance(H::Instance),
}

impl<H: HostConfig> HostTarget<H> {
    fn as_parent(&self) -> HostParent<'_, H> {
        match self {
            HostTarget::Container(container) => HostParent::Container(container),
            HostTarget::Instance(instance) => HostParent::Instance(instance),
        }
    }
}

impl<H: HostConfig> Scheduler<H> {
    /// Applies the effects collected on `finished` and returns the errors
    /// user code raised along the way.
    pub(crate) fn commit_all_work(&mut self, finished: FiberId, root: RootId) -> Vec<TrappedError> {
        let effects = self
            .fibers
            .get_mut(finished)
            .map(|f| mem::take(&mut f.effects))
            .unwrap_or_default();
        let mut trapped = Vec::new();

        // Host mutations, deletions first as they were recorded first.
        for &id in &effects {
            let Some((tag, current)) = self.fibers.get(id).map(|f| (f.effect_tag, f.alternate)) else {
                continue;
            };
            if tag.contains(EffectTag::DELETION) {
                self.forget_committed_deletions(id);
                let errors = self.commit_deletion(id);
                if !self.ignore_unmounting_errors {
                    trapped.extend(errors);
                }
                continue;
            }
            if tag.contains(EffectTag::PLACEMENT) {
                self.commit_placement(id);
                if let Some(fiber) = self.fibers.get_mut(id) {
                    fiber.effect_tag.remove(EffectTag::PLACEMENT);
                }
            }
            if tag.contains(EffectTag::UPDATE) {
                self.commit_work(current, id);
            }
        }

        for &id in &effects {
            let Some((tag, current)) = self.fibers.get(id).map(|f| (f.effect_tag, f.alternate)) else {
                continue;
            };
            if tag.contains(EffectTag::UPDATE) {
                trapped.extend(self.commit_lifecycles(current, id));
            }
            if let Some(fiber) = self.fibers.get_mut(id) {
                fiber.effect_tag = EffectTag::empty();
            }
        }

        let root_tag = self.fibers.get(finished).map_or(EffectTag::empty(), |f| f.effect_tag);
        if !root_tag.is_empty() {
            trapped.extend(self.commit_root_callbacks(root));
            if let Some(fiber) = self.fibers.get_mut(finished) {
                fiber.effect_tag = EffectTag::empty();
            }
        }
        log::debug!("committed {} effects, {} errors", effects.len(), trapped.len());
        trapped
    }

    fn host_node(&self, id: FiberId) -> Option<HostNode<H>> {
        let fiber = self.fibers.get(id)?;
        match (&fiber.state_node, fiber.tag) {
            (StateNode::Host(instance), WorkTag::HostComponent) => Some(HostNode::Instance(instance.clone())),
            (StateNode::Text(text), WorkTag::HostText) => Some(HostNode::Text(text.clone())),
            _ => None,
        }
    }

    fn host_parent(&self, id: FiberId) -> Option<HostTarget<H>> {
        let mut node = self.fibers.get(id)?.parent;
        while let Some(parent) = node {
            let fiber = self.fibers.get(parent)?;
            match (&fiber.state_node, fiber.tag) {
                (StateNode::Host(instance), WorkTag::HostComponent) => {
                    return Some(HostTarget::Instance(instance.clone()));
                }
                (StateNode::Root(root), WorkTag::HostRoot) => {
                    return self
                        .roots
                        .get(*root)
                        .map(|root| HostTarget::Container(root.container.clone()));
                }
                _ => node = fiber.parent,
            }
        }
        None
    }

    /// First host node after `id` that is already in the host tree.
    fn host_sibling(&self, id: FiberId) -> Option<HostNode<H>> {
        let mut node = id;
        'siblings: loop {
            loop {
                let fiber = self.fibers.get(node)?;
                if fiber.sibling.is_some() {
                    break;
                }
                let parent = fiber.parent?;
                if self.fibers.get(parent)?.is_host_parent() {
                    return None;
                }
                node = parent;
            }
            node = self.fibers.get(node)?.sibling?;
            loop {
                let fiber = self.fibers.get(node)?;
                if fiber.is_host() {
                    break;
                }
                // Unplaced subtrees and leaves cannot anchor an insertion.
                if fiber.effect_tag.contains(EffectTag::PLACEMENT) {
                    continue 'siblings;
                }
                match fiber.child {
                    Some(child) => node = child,
                    None => continue 'siblings,
                }
            }
            if !self.fibers.get(node)?.effect_tag.contains(EffectTag::PLACEMENT) {
                return self.host_node(node);
            }
        }
    }

    fn commit_placement(&mut self, id: FiberId) {
        let Some(parent) = self.host_parent(id) else {
            log::warn!("placed fiber {id:?} has no host parent");
            return;
        };
        let before = self.host_sibling(id);
        let mut node = id;
        loop {
            let Some(fiber) = self.fibers.get(node) else {
                return;
            };
            if fiber.is_host() {
                if let Some(host) = self.host_node(node) {
                    match &before {
                        Some(before) => {
                            self.host
                                .insert_before(parent.as_parent(), host.as_child(), before.as_child())
                        }
                        None => self.host.append_child(parent.as_parent(), host.as_child()),
                    }
                }
            } else if let Some(child) = fiber.child {
                node = child;
                continue;
            }
            match self.next_in_subtree(node, id) {
                Some(next) => node = next,
                None => return,
            }
        }
    }

    fn commit_work(&mut self, current: Option<FiberId>, id: FiberId) {
        let Some(fiber) = self.fibers.get(id) else {
            return;
        };
        match (&fiber.state_node, fiber.tag) {
            (StateNode::Host(instance), WorkTag::HostComponent) => {
                let instance = instance.clone();
                let ty: Rc<str> = Rc::from(fiber.host_tag());
                let Some(new_props) = fiber.props().cloned() else {
                    return;
                };
                let old_props = current
                    .and_then(|c| self.fibers.get(c))
                    .and_then(|c| c.props().cloned())
                    .unwrap_or_else(|| Rc::clone(&new_props));
                self.host.commit_update(&instance, &ty, &old_props, &new_props);
            }
            (StateNode::Text(text), WorkTag::HostText) => {
                let text = text.clone();
                let Some(new_text) = fiber.memoized_props.as_ref().and_then(|p| p.text()).cloned() else {
                    return;
                };
                let old_text = current
                    .and_then(|c| self.fibers.get(c))
                    .and_then(|c| c.memoized_props.as_ref())
                    .and_then(|p| p.text())
                    .cloned()
                    .unwrap_or_else(|| Rc::clone(&new_text));
                self.host.commit_text_update(&text, &old_text, &new_text);
            }
            _ => {}
        }
    }

    /// Drops the pending deletion lists of the parent that recorded `id`,
    /// on both twins, so a later in-place pass cannot replay them.
    fn forget_committed_deletions(&mut self, id: FiberId) {
        let parent = self.fibers.get(id).and_then(|f| f.parent);
        let twin = parent.and_then(|p| self.fibers.get(p)).and_then(|f| f.alternate);
        for recorder in parent.into_iter().chain(twin) {
            if let Some(fiber) = self.fibers.get_mut(recorder) {
                fiber.progressed_deletions.clear();
            }
        }
    }

    /// Unmounts the subtree at `id`, removes its host nodes and detaches it.
    fn commit_deletion(&mut self, id: FiberId) -> Vec<TrappedError> {
        let mut errors = Vec::new();
        let parent = self.host_parent(id);
        let mut node = id;
        loop {
            let Some((is_host, child)) = self.fibers.get(node).map(|f| (f.is_host(), f.child)) else {
                break;
            };
            if is_host {
                // Host children go away with their parent node.
                self.commit_nested_unmounts(node, &mut errors);
                if let (Some(parent), Some(host)) = (&parent, self.host_node(node)) {
                    self.host.remove_child(parent.as_parent(), host.as_child());
                }
            } else {
                self.commit_unmount(node, &mut errors);
                if let Some(child) = child {
                    node = child;
                    continue;
                }
            }
            match self.next_in_subtree(node, id) {
                Some(next) => node = next,
                None => break,
            }
        }

        let alternate = self.fibers.get(id).and_then(|f| f.alternate);
        for detached in std::iter::once(id).chain(alternate) {
            if let Some(fiber) = self.fibers.get_mut(detached) {
                fiber.parent = None;
                fiber.child = None;
            }
        }
        errors
    }

    fn commit_nested_unmounts(&mut self, root: FiberId, errors: &mut Vec<TrappedError>) {
        let mut node = root;
        loop {
            self.commit_unmount(node, errors);
            if let Some(child) = self.fibers.get(node).and_then(|f| f.child) {
                node = child;
                continue;
            }
            match self.next_in_subtree(node, root) {
                Some(next) => node = next,
                None => return,
            }
        }
    }

    fn commit_unmount(&mut self, id: FiberId, errors: &mut Vec<TrappedError>) {
        let is_class = self.fibers.get(id).is_some_and(|f| f.tag == WorkTag::Class);
        let Some(instance) = self.instance_of(id).filter(|_| is_class) else {
            return;
        };
        let Some(entry) = self.instances.get_mut(instance) else {
            return;
        };
        if !entry.lifecycle.contains(Lifecycle::WILL_UNMOUNT) {
            return;
        }
        let name = Rc::clone(&entry.name);
        if let Err(err) = entry.call(|component, cx| component.component_will_unmount(cx)) {
            log::debug!("{name} failed to unmount: {err}");
            errors.push(self.trap_error(id, ReconcileError::component(&name, err)));
        }
    }

    fn commit_lifecycles(&mut self, current: Option<FiberId>, id: FiberId) -> Vec<TrappedError> {
        let mut errors = Vec::new();
        let is_class = self.fibers.get(id).is_some_and(|f| f.tag == WorkTag::Class);
        let Some(instance) = self.instance_of(id).filter(|_| is_class) else {
            return errors;
        };
        let previous = current.and_then(|c| self.fibers.get(c)).map(|c| (c.props().cloned(), c.memoized_state.clone()));

        if let Some(entry) = self.instances.get_mut(instance) {
            let name = Rc::clone(&entry.name);
            let result = match previous {
                None if entry.lifecycle.contains(Lifecycle::DID_MOUNT) => {
                    entry.call(|component, cx| component.component_did_mount(cx))
                }
                Some((prev_props, prev_state)) if entry.lifecycle.contains(Lifecycle::DID_UPDATE) => {
                    let prev_props = prev_props.unwrap_or_else(|| Rc::clone(&entry.props));
                    entry.call(|component, cx| component.component_did_update(&prev_props, prev_state.as_ref(), cx))
                }
                _ => Ok(()),
            };
            if let Err(err) = result {
                errors.push(self.trap_error(id, ReconcileError::component(&name, err)));
            }
        }

        let callbacks = self
            .fibers
            .get_mut(id)
            .map(|f| mem::take(&mut f.callbacks))
            .unwrap_or_default();
        let name = self.fibers.get(id).map(|f| Rc::<str>::from(f.type_name())).unwrap_or_else(|| Rc::from(""));
        for callback in callbacks {
            if let Err(err) = callback.invoke() {
                errors.push(self.trap_error(id, ReconcileError::component(&name, err)));
            }
        }
        errors
    }

    fn commit_root_callbacks(&mut self, root: RootId) -> Vec<TrappedError> {
        let callbacks = self
            .roots
            .get_mut(root)
            .map(|entry| mem::take(&mut entry.callbacks))
            .unwrap_or_default();
        callbacks
            .into_iter()
            .filter_map(|callback| callback.invoke().err())
            .map(|err| TrappedError {
                boundary: None,
                error: ReconcileError::component("root", err),
            })
            .collect()
    }
}
