//! Complete phase: create or diff host nodes once a fiber's children are
//! done, and flag what the commit has to do.

use std::rc::Rc;

use crate::error::ReconcileError;
use crate::fiber::{EffectTag, FiberId, StateNode, WorkTag};
use crate::host::{HostChild, HostConfig};
use crate::scheduler::Scheduler;

impl<H: HostConfig> Scheduler<H> {
    pub(crate) fn complete_work(&mut self, current: Option<FiberId>, wip: FiberId) -> Result<(), ReconcileError> {
        let fiber = self.fibers.get(wip).ok_or(ReconcileError::StaleFiber { fiber: wip })?;
        let (tag, root) = (fiber.tag, fiber.state_node.root_id());
        match tag {
            WorkTag::Indeterminate | WorkTag::Function | WorkTag::Fragment | WorkTag::Coroutine => Ok(()),
            WorkTag::Class => {
                self.context.pop_provider(wip);
                if let Some(fiber) = self.fibers.get_mut(wip) {
                    if !fiber.callbacks.is_empty() {
                        fiber.effect_tag |= EffectTag::UPDATE;
                    }
                }
                Ok(())
            }
            WorkTag::HostRoot => {
                let has_callbacks = root
                    .and_then(|root| self.roots.get(root))
                    .is_some_and(|root| !root.callbacks.is_empty());
                if has_callbacks {
                    if let Some(fiber) = self.fibers.get_mut(wip) {
                        fiber.effect_tag |= EffectTag::UPDATE;
                    }
                }
                Ok(())
            }
            WorkTag::HostComponent => self.complete_host_component(current, wip),
            WorkTag::HostText => self.complete_host_text(current, wip),
        }
    }

    fn complete_host_component(&mut self, current: Option<FiberId>, wip: FiberId) -> Result<(), ReconcileError> {
        let fiber = self.fibers.get(wip).ok_or(ReconcileError::StaleFiber { fiber: wip })?;
        let ty: Rc<str> = Rc::from(fiber.host_tag());
        let new_props = fiber.props().cloned();
        let existing = match &fiber.state_node {
            StateNode::Host(instance) => Some(instance.clone()),
            _ => None,
        };

        if let (Some(current), Some(instance)) = (current, existing.as_ref()) {
            let old_props = self.fibers.get(current).and_then(|c| c.props().cloned());
            if let (Some(old), Some(new)) = (old_props, new_props) {
                if !Rc::ptr_eq(&old, &new) && self.host.prepare_update(instance, &ty, &old, &new) {
                    if let Some(fiber) = self.fibers.get_mut(wip) {
                        fiber.effect_tag |= EffectTag::UPDATE;
                    }
                }
            }
            return Ok(());
        }

        let Some(props) = new_props else {
            return match existing {
                Some(_) => Ok(()),
                None => Err(ReconcileError::MissingProps { fiber: wip }),
            };
        };
        let instance = self.host.create_instance(&ty, &props);
        self.append_all_children(&instance, wip);
        self.host.finalize_initial_children(&instance, &ty, &props);
        if let Some(fiber) = self.fibers.get_mut(wip) {
            fiber.state_node = StateNode::Host(instance);
        }
        Ok(())
    }

    fn complete_host_text(&mut self, current: Option<FiberId>, wip: FiberId) -> Result<(), ReconcileError> {
        let fiber = self.fibers.get(wip).ok_or(ReconcileError::StaleFiber { fiber: wip })?;
        let new_text = fiber.memoized_props.as_ref().and_then(|input| input.text()).cloned();
        let has_instance = matches!(fiber.state_node, StateNode::Text(_));

        if let (Some(current), true) = (current, has_instance) {
            let old_text = self
                .fibers
                .get(current)
                .and_then(|c| c.memoized_props.as_ref())
                .and_then(|input| input.text())
                .cloned();
            if old_text != new_text {
                if let Some(fiber) = self.fibers.get_mut(wip) {
                    fiber.effect_tag |= EffectTag::UPDATE;
                }
            }
            return Ok(());
        }

        let Some(text) = new_text else {
            return if has_instance {
                Ok(())
            } else {
                Err(ReconcileError::MissingProps { fiber: wip })
            };
        };
        let instance = self.host.create_text_instance(&text);
        if let Some(fiber) = self.fibers.get_mut(wip) {
            fiber.state_node = StateNode::Text(instance);
        }
        Ok(())
    }

    /// Attaches the nearest host descendants of `wip` to a freshly created
    /// instance.
    fn append_all_children(&mut self, parent: &H::Instance, wip: FiberId) {
        let mut node = self.fibers.get(wip).and_then(|f| f.child);
        while let Some(id) = node {
            let Some(fiber) = self.fibers.get(id) else {
                return;
            };
            match fiber.state_node.clone() {
                StateNode::Host(instance) if fiber.tag == WorkTag::HostComponent => {
                    self.host.append_initial_child(parent, HostChild::Instance(&instance));
                }
                StateNode::Text(text) => {
                    self.host.append_initial_child(parent, HostChild::Text(&text));
                }
                _ => {
                    if let Some(child) = fiber.child.filter(|_| !fiber.is_host()) {
                        node = Some(child);
                        continue;
                    }
                }
            }
            node = self.next_in_subtree(id, wip);
        }
    }

    /// Next sibling of `id` or of its nearest ancestor below `root`.
    pub(crate) fn next_in_subtree(&self, id: FiberId, root: FiberId) -> Option<FiberId> {
        let mut node = id;
        loop {
            if node == root {
                return None;
            }
            let fiber = self.fibers.get(node)?;
            if let Some(sibling) = fiber.sibling {
                return Some(sibling);
            }
            match fiber.parent {
                Some(parent) if parent != root => node = parent,
                _ => return None,
            }
        }
    }
}
