//! Diffs the previous children of a fiber against newly rendered ones.
//!
//! Three flavours share this code: mounting (no side effects tracked),
//! reconciling in place (work-in-progress children are reused) and
//! reconciling against the committed children (which get cloned).

use std::rc::Rc;

use crate::collections::map::HashMap;
use crate::element::{Child, Element};
use crate::fiber::{EffectTag, FiberArena, FiberId, Input, WorkTag};
use crate::host::HostConfig;
use crate::priority::Priority;

#[derive(Clone, PartialEq, Eq, Hash)]
enum ChildKey {
    Key(Rc<str>),
    Index(usize),
}

pub(crate) struct ChildReconciler<'a, H: HostConfig> {
    arena: &'a mut FiberArena<H>,
    should_clone: bool,
    track_side_effects: bool,
}

impl<'a, H: HostConfig> ChildReconciler<'a, H> {
    /// Clones committed children and records placements and deletions.
    pub(crate) fn against_current(arena: &'a mut FiberArena<H>) -> Self {
        Self {
            arena,
            should_clone: true,
            track_side_effects: true,
        }
    }

    /// Reuses work-in-progress children and records side effects.
    pub(crate) fn in_place(arena: &'a mut FiberArena<H>) -> Self {
        Self {
            arena,
            should_clone: false,
            track_side_effects: true,
        }
    }

    /// First render of a subtree: the parent's placement covers everything.
    pub(crate) fn mount(arena: &'a mut FiberArena<H>) -> Self {
        Self {
            arena,
            should_clone: false,
            track_side_effects: false,
        }
    }

    /// Returns the new first child of `return_fiber`.
    pub(crate) fn reconcile(
        &mut self,
        return_fiber: FiberId,
        current_first: Option<FiberId>,
        new_child: &Child,
        priority: Priority,
    ) -> Option<FiberId> {
        match new_child {
            Child::Element(element) => {
                let fiber = self.reconcile_single_element(return_fiber, current_first, element, priority);
                Some(self.place_single_child(fiber))
            }
            Child::Text(text) => {
                let fiber = self.reconcile_single_text(return_fiber, current_first, text, priority);
                Some(self.place_single_child(fiber))
            }
            Child::List(children) => self.reconcile_children_array(return_fiber, current_first, children, priority),
            Child::Empty => {
                self.delete_remaining_children(return_fiber, current_first);
                None
            }
        }
    }

    fn sibling_of(&self, id: FiberId) -> Option<FiberId> {
        self.arena.get(id).and_then(|fiber| fiber.sibling)
    }

    fn alternate_of(&self, id: FiberId) -> Option<FiberId> {
        self.arena.get(id).and_then(|fiber| fiber.alternate)
    }

    fn set_parent(&mut self, id: FiberId, parent: FiberId) {
        if let Some(fiber) = self.arena.get_mut(id) {
            fiber.parent = Some(parent);
        }
    }

    fn delete_child(&mut self, return_fiber: FiberId, child: FiberId) {
        if !self.track_side_effects {
            return;
        }
        // Deletions always target the committed fiber.
        let target = if self.should_clone {
            child
        } else {
            match self.alternate_of(child) {
                Some(alternate) => alternate,
                None => return,
            }
        };
        if let Some(fiber) = self.arena.get_mut(target) {
            fiber.effect_tag = EffectTag::DELETION;
        }
        if let Some(parent) = self.arena.get_mut(return_fiber) {
            parent.progressed_deletions.push(target);
        }
    }

    fn delete_remaining_children(&mut self, return_fiber: FiberId, first: Option<FiberId>) {
        if !self.track_side_effects {
            return;
        }
        let mut next = first;
        while let Some(child) = next {
            next = self.sibling_of(child);
            self.delete_child(return_fiber, child);
        }
    }

    fn map_remaining_children(&self, first: Option<FiberId>) -> HashMap<ChildKey, FiberId> {
        let mut map = HashMap::default();
        for id in self.arena.siblings(first) {
            if let Some(fiber) = self.arena.get(id) {
                let key = match &fiber.key {
                    Some(key) => ChildKey::Key(Rc::clone(key)),
                    None => ChildKey::Index(fiber.index),
                };
                map.insert(key, id);
            }
        }
        map
    }

    fn use_fiber(&mut self, fiber: FiberId, priority: Priority) -> FiberId {
        let id = if self.should_clone {
            self.arena.clone_fiber(fiber, priority)
        } else {
            fiber
        };
        if let Some(reused) = self.arena.get_mut(id) {
            if !self.should_clone {
                reused.pending_work_priority = priority;
                reused.effect_tag = EffectTag::empty();
            }
            reused.index = 0;
            reused.sibling = None;
        }
        id
    }

    fn place_child(&mut self, id: FiberId, last_placed_index: usize, new_index: usize) -> usize {
        let Some(fiber) = self.arena.get_mut(id) else {
            return last_placed_index;
        };
        fiber.index = new_index;
        if !self.track_side_effects {
            return last_placed_index;
        }
        let Some(current) = fiber.alternate else {
            fiber.effect_tag |= EffectTag::PLACEMENT;
            return last_placed_index;
        };
        let old_index = self.arena.get(current).map_or(new_index, |c| c.index);
        if old_index < last_placed_index {
            if let Some(fiber) = self.arena.get_mut(id) {
                fiber.effect_tag |= EffectTag::PLACEMENT;
            }
            last_placed_index
        } else {
            old_index
        }
    }

    fn place_single_child(&mut self, id: FiberId) -> FiberId {
        if self.track_side_effects {
            if let Some(fiber) = self.arena.get_mut(id) {
                if fiber.alternate.is_none() {
                    fiber.effect_tag |= EffectTag::PLACEMENT;
                }
            }
        }
        id
    }

    fn update_text_node(
        &mut self,
        return_fiber: FiberId,
        current: Option<FiberId>,
        text: &Rc<str>,
        priority: Priority,
    ) -> FiberId {
        let reusable = current.filter(|id| self.arena.get(*id).is_some_and(|f| f.tag == WorkTag::HostText));
        let id = match reusable {
            Some(existing) => {
                let id = self.use_fiber(existing, priority);
                if let Some(fiber) = self.arena.get_mut(id) {
                    fiber.pending_props = Some(Input::Text(Rc::clone(text)));
                }
                id
            }
            None => self.arena.create_from_text(text, priority),
        };
        self.set_parent(id, return_fiber);
        id
    }

    fn update_element(
        &mut self,
        return_fiber: FiberId,
        current: Option<FiberId>,
        element: &Element,
        priority: Priority,
    ) -> FiberId {
        let reusable = current.filter(|id| {
            self.arena
                .get(*id)
                .and_then(|f| f.element_type.as_ref())
                .is_some_and(|ty| ty.same_type(&element.ty))
        });
        let id = match reusable {
            Some(existing) => {
                let id = self.use_fiber(existing, priority);
                if let Some(fiber) = self.arena.get_mut(id) {
                    fiber.pending_props = Some(Input::Props(Rc::clone(&element.props)));
                }
                id
            }
            None => self.arena.create_from_element(element, priority),
        };
        self.set_parent(id, return_fiber);
        id
    }

    fn update_fragment(
        &mut self,
        return_fiber: FiberId,
        current: Option<FiberId>,
        list: &Rc<[Child]>,
        priority: Priority,
    ) -> FiberId {
        let reusable = current.filter(|id| self.arena.get(*id).is_some_and(|f| f.tag == WorkTag::Fragment));
        let id = match reusable {
            Some(existing) => {
                let id = self.use_fiber(existing, priority);
                if let Some(fiber) = self.arena.get_mut(id) {
                    fiber.pending_props = Some(Input::Fragment(Rc::clone(list)));
                }
                id
            }
            None => self.arena.create_from_fragment(list, priority),
        };
        self.set_parent(id, return_fiber);
        id
    }

    fn create_child(&mut self, return_fiber: FiberId, child: &Child, priority: Priority) -> Option<FiberId> {
        let id = match child {
            Child::Text(text) => self.arena.create_from_text(text, priority),
            Child::Element(element) => self.arena.create_from_element(element, priority),
            Child::List(list) => self.arena.create_from_fragment(list, priority),
            Child::Empty => return None,
        };
        self.set_parent(id, return_fiber);
        Some(id)
    }

    /// Reuses `old` only when its key matches the new child's key.
    fn update_slot(
        &mut self,
        return_fiber: FiberId,
        old: Option<FiberId>,
        child: &Child,
        priority: Priority,
    ) -> Option<FiberId> {
        let old_key = old.and_then(|id| self.arena.get(id)).and_then(|f| f.key.clone());
        match child {
            Child::Text(text) => {
                if old_key.is_some() {
                    return None;
                }
                Some(self.update_text_node(return_fiber, old, text, priority))
            }
            Child::Element(element) => {
                if element.key != old_key {
                    return None;
                }
                Some(self.update_element(return_fiber, old, element, priority))
            }
            Child::List(list) => {
                if old_key.is_some() {
                    return None;
                }
                Some(self.update_fragment(return_fiber, old, list, priority))
            }
            Child::Empty => None,
        }
    }

    fn update_from_map(
        &mut self,
        existing: &HashMap<ChildKey, FiberId>,
        return_fiber: FiberId,
        new_index: usize,
        child: &Child,
        priority: Priority,
    ) -> Option<FiberId> {
        match child {
            Child::Text(text) => {
                let matched = existing.get(&ChildKey::Index(new_index)).copied();
                Some(self.update_text_node(return_fiber, matched, text, priority))
            }
            Child::Element(element) => {
                let key = match &element.key {
                    Some(key) => ChildKey::Key(Rc::clone(key)),
                    None => ChildKey::Index(new_index),
                };
                let matched = existing.get(&key).copied();
                Some(self.update_element(return_fiber, matched, element, priority))
            }
            Child::List(list) => {
                let matched = existing.get(&ChildKey::Index(new_index)).copied();
                Some(self.update_fragment(return_fiber, matched, list, priority))
            }
            Child::Empty => None,
        }
    }

    fn link(&mut self, previous: Option<FiberId>, next: FiberId, first: &mut Option<FiberId>) {
        match previous {
            Some(prev) => {
                if let Some(fiber) = self.arena.get_mut(prev) {
                    fiber.sibling = Some(next);
                }
            }
            None => *first = Some(next),
        }
    }

    fn reconcile_children_array(
        &mut self,
        return_fiber: FiberId,
        current_first: Option<FiberId>,
        children: &Rc<[Child]>,
        priority: Priority,
    ) -> Option<FiberId> {
        let mut result: Option<FiberId> = None;
        let mut previous: Option<FiberId> = None;
        let mut old_fiber = current_first;
        let mut last_placed_index = 0;
        let mut new_index = 0;
        let mut next_old_fiber: Option<FiberId> = None;

        // Walk both lists while keys line up.
        while let Some(old) = old_fiber {
            if new_index >= children.len() {
                break;
            }
            let old_index = self.arena.get(old).map_or(0, |f| f.index);
            let slot_old = if old_index > new_index {
                next_old_fiber = Some(old);
                None
            } else {
                next_old_fiber = self.sibling_of(old);
                Some(old)
            };
            let Some(new_fiber) = self.update_slot(return_fiber, slot_old, &children[new_index], priority) else {
                if slot_old.is_none() {
                    old_fiber = next_old_fiber;
                }
                break;
            };
            if self.track_side_effects {
                if let Some(old) = slot_old {
                    if self.alternate_of(new_fiber).is_none() {
                        // Matched the slot but not the type.
                        self.delete_child(return_fiber, old);
                    }
                }
            }
            last_placed_index = self.place_child(new_fiber, last_placed_index, new_index);
            self.link(previous, new_fiber, &mut result);
            previous = Some(new_fiber);
            old_fiber = next_old_fiber;
            new_index += 1;
        }

        if new_index == children.len() {
            self.delete_remaining_children(return_fiber, old_fiber);
            return result;
        }

        if old_fiber.is_none() {
            // Only insertions left.
            while new_index < children.len() {
                if let Some(new_fiber) = self.create_child(return_fiber, &children[new_index], priority) {
                    last_placed_index = self.place_child(new_fiber, last_placed_index, new_index);
                    self.link(previous, new_fiber, &mut result);
                    previous = Some(new_fiber);
                }
                new_index += 1;
            }
            return result;
        }

        let mut existing = self.map_remaining_children(old_fiber);
        while new_index < children.len() {
            if let Some(new_fiber) =
                self.update_from_map(&existing, return_fiber, new_index, &children[new_index], priority)
            {
                if self.track_side_effects && self.alternate_of(new_fiber).is_some() {
                    let key = match self.arena.get(new_fiber).and_then(|f| f.key.clone()) {
                        Some(key) => ChildKey::Key(key),
                        None => ChildKey::Index(new_index),
                    };
                    existing.remove(&key);
                }
                last_placed_index = self.place_child(new_fiber, last_placed_index, new_index);
                self.link(previous, new_fiber, &mut result);
                previous = Some(new_fiber);
            }
            new_index += 1;
        }

        if self.track_side_effects {
            let leftovers: Vec<FiberId> = existing.into_values().collect();
            for child in leftovers {
                self.delete_child(return_fiber, child);
            }
        }
        result
    }

    fn reconcile_single_element(
        &mut self,
        return_fiber: FiberId,
        current_first: Option<FiberId>,
        element: &Element,
        priority: Priority,
    ) -> FiberId {
        let mut next = current_first;
        while let Some(child) = next {
            let sibling = self.sibling_of(child);
            let (key, same_type) = match self.arena.get(child) {
                Some(fiber) => (
                    fiber.key.clone(),
                    fiber.element_type.as_ref().is_some_and(|ty| ty.same_type(&element.ty)),
                ),
                None => break,
            };
            if key == element.key {
                if same_type {
                    self.delete_remaining_children(return_fiber, sibling);
                    let existing = self.use_fiber(child, priority);
                    if let Some(fiber) = self.arena.get_mut(existing) {
                        fiber.pending_props = Some(Input::Props(Rc::clone(&element.props)));
                        fiber.parent = Some(return_fiber);
                    }
                    return existing;
                }
                self.delete_remaining_children(return_fiber, Some(child));
                break;
            }
            self.delete_child(return_fiber, child);
            next = sibling;
        }
        let created = self.arena.create_from_element(element, priority);
        self.set_parent(created, return_fiber);
        created
    }

    fn reconcile_single_text(
        &mut self,
        return_fiber: FiberId,
        current_first: Option<FiberId>,
        text: &Rc<str>,
        priority: Priority,
    ) -> FiberId {
        if let Some(first) = current_first {
            if self.arena.get(first).is_some_and(|f| f.tag == WorkTag::HostText) {
                let rest = self.sibling_of(first);
                self.delete_remaining_children(return_fiber, rest);
                let existing = self.use_fiber(first, priority);
                if let Some(fiber) = self.arena.get_mut(existing) {
                    fiber.pending_props = Some(Input::Text(Rc::clone(text)));
                    fiber.parent = Some(return_fiber);
                }
                return existing;
            }
        }
        self.delete_remaining_children(return_fiber, current_first);
        let created = self.arena.create_from_text(text, priority);
        self.set_parent(created, return_fiber);
        created
    }
}

#[cfg(test)]
#[path = "tests/child_reconciler_tests.rs"]
mod tests;
