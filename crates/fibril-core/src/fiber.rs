//! Work nodes ("fibers") and the arena that owns both tree buffers.
//!
//! Each logical tree position owns up to two fibers, the committed one and
//! its work-in-progress twin, linked through `alternate`. Links between
//! fibers are arena ids, so swapping buffers is an id reassignment.

use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;

use crate::component::InstanceId;
use crate::element::{Child, Element, ElementType, Props};
use crate::host::HostConfig;
use crate::priority::Priority;
use crate::update_queue::{Callback, UpdateQueue};
use crate::value::Record;

new_key_type! {
    pub struct FiberId;
    /// Handle of a mounted container tree.
    pub struct RootId;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WorkTag {
    /// A function whose kind is decided on its first call.
    Indeterminate,
    Function,
    Class,
    HostRoot,
    HostComponent,
    HostText,
    Fragment,
    Coroutine,
}

bitflags! {
    /// Host-visible side effects a fiber carries into the commit phase.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EffectTag: u8 {
        const PLACEMENT = 1 << 0;
        const UPDATE = 1 << 1;
        const DELETION = 1 << 2;
        const PLACEMENT_AND_UPDATE = Self::PLACEMENT.bits() | Self::UPDATE.bits();
    }
}

/// Pending or memoized inputs of a fiber. Compared by reference.
#[derive(Clone)]
pub enum Input {
    Props(Rc<Props>),
    Text(Rc<str>),
    Fragment(Rc<[Child]>),
}

impl Input {
    pub fn same(&self, other: &Input) -> bool {
        match (self, other) {
            (Input::Props(a), Input::Props(b)) => Rc::ptr_eq(a, b),
            (Input::Text(a), Input::Text(b)) => Rc::ptr_eq(a, b),
            (Input::Fragment(a), Input::Fragment(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn props(&self) -> Option<&Rc<Props>> {
        match self {
            Input::Props(props) => Some(props),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&Rc<str>> {
        match self {
            Input::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The children a fragment-like fiber should reconcile.
    pub(crate) fn children(&self) -> Child {
        match self {
            Input::Props(props) => props.children().clone(),
            Input::Text(text) => Child::Text(Rc::clone(text)),
            Input::Fragment(list) => Child::List(Rc::clone(list)),
        }
    }
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Props(props) => write!(f, "{props:?}"),
            Input::Text(text) => write!(f, "Text({text:?})"),
            Input::Fragment(list) => f.debug_list().entries(list.iter()).finish(),
        }
    }
}

/// Whatever instance backs a fiber. Shared by both buffers.
pub enum StateNode<H: HostConfig> {
    None,
    Root(RootId),
    Host(H::Instance),
    Text(H::TextInstance),
    Instance(InstanceId),
}

impl<H: HostConfig> Clone for StateNode<H> {
    fn clone(&self) -> Self {
        match self {
            StateNode::None => StateNode::None,
            StateNode::Root(root) => StateNode::Root(*root),
            StateNode::Host(instance) => StateNode::Host(instance.clone()),
            StateNode::Text(text) => StateNode::Text(text.clone()),
            StateNode::Instance(id) => StateNode::Instance(*id),
        }
    }
}

impl<H: HostConfig> StateNode<H> {
    pub fn is_none(&self) -> bool {
        matches!(self, StateNode::None)
    }

    pub fn instance_id(&self) -> Option<InstanceId> {
        match self {
            StateNode::Instance(id) => Some(*id),
            _ => None,
        }
    }

    pub fn root_id(&self) -> Option<RootId> {
        match self {
            StateNode::Root(id) => Some(*id),
            _ => None,
        }
    }
}

pub struct Fiber<H: HostConfig> {
    pub(crate) tag: WorkTag,
    pub(crate) element_type: Option<ElementType>,
    pub(crate) key: Option<Rc<str>>,
    pub(crate) index: usize,

    // -- Topology --
    pub(crate) parent: Option<FiberId>,
    pub(crate) child: Option<FiberId>,
    pub(crate) sibling: Option<FiberId>,
    pub(crate) alternate: Option<FiberId>,

    // -- Inputs --
    pub(crate) pending_props: Option<Input>,
    pub(crate) memoized_props: Option<Input>,
    pub(crate) memoized_state: Option<Rc<Record>>,
    pub(crate) update_queue: Option<UpdateQueue>,
    pub(crate) state_node: StateNode<H>,

    // -- Scheduling --
    pub(crate) pending_work_priority: Priority,
    pub(crate) progressed_child: Option<FiberId>,
    pub(crate) progressed_priority: Priority,
    pub(crate) progressed_deletions: SmallVec<[FiberId; 2]>,

    // -- Effects --
    pub(crate) effect_tag: EffectTag,
    pub(crate) effects: Vec<FiberId>,
    pub(crate) callbacks: SmallVec<[Callback; 1]>,
    /// Set once the fiber has been appended to its parent's effect list in
    /// the current pass; cleared whenever the fiber is (re)cloned.
    pub(crate) linked_into_parent: bool,
    /// Set when begin skipped this fiber because its work is less urgent
    /// than the current pass.
    pub(crate) deferred: bool,
}

impl<H: HostConfig> Fiber<H> {
    pub(crate) fn new(tag: WorkTag, key: Option<Rc<str>>) -> Self {
        Self {
            tag,
            element_type: None,
            key,
            index: 0,
            parent: None,
            child: None,
            sibling: None,
            alternate: None,
            pending_props: None,
            memoized_props: None,
            memoized_state: None,
            update_queue: None,
            state_node: StateNode::None,
            pending_work_priority: Priority::NoWork,
            progressed_child: None,
            progressed_priority: Priority::NoWork,
            progressed_deletions: SmallVec::new(),
            effect_tag: EffectTag::empty(),
            effects: Vec::new(),
            callbacks: SmallVec::new(),
            linked_into_parent: false,
            deferred: false,
        }
    }

    pub fn tag(&self) -> WorkTag {
        self.tag
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn type_name(&self) -> &str {
        match self.tag {
            WorkTag::HostRoot => "#root",
            WorkTag::HostText => "#text",
            _ => self
                .element_type
                .as_ref()
                .map(ElementType::name)
                .unwrap_or("#unknown"),
        }
    }

    pub fn parent(&self) -> Option<FiberId> {
        self.parent
    }

    pub fn child(&self) -> Option<FiberId> {
        self.child
    }

    pub fn sibling(&self) -> Option<FiberId> {
        self.sibling
    }

    pub fn alternate(&self) -> Option<FiberId> {
        self.alternate
    }

    pub fn pending_props(&self) -> Option<&Input> {
        self.pending_props.as_ref()
    }

    pub fn memoized_props(&self) -> Option<&Input> {
        self.memoized_props.as_ref()
    }

    pub fn memoized_state(&self) -> Option<&Rc<Record>> {
        self.memoized_state.as_ref()
    }

    pub fn update_queue(&self) -> Option<&UpdateQueue> {
        self.update_queue.as_ref()
    }

    pub fn state_node(&self) -> &StateNode<H> {
        &self.state_node
    }

    pub fn pending_work_priority(&self) -> Priority {
        self.pending_work_priority
    }

    pub fn progressed_child(&self) -> Option<FiberId> {
        self.progressed_child
    }

    pub fn progressed_priority(&self) -> Priority {
        self.progressed_priority
    }

    pub fn effect_tag(&self) -> EffectTag {
        self.effect_tag
    }

    /// Descendants with side effects, in commit order.
    pub fn effects(&self) -> &[FiberId] {
        &self.effects
    }

    pub(crate) fn props(&self) -> Option<&Rc<Props>> {
        self.memoized_props.as_ref().and_then(Input::props)
    }

    pub(crate) fn is_host(&self) -> bool {
        matches!(self.tag, WorkTag::HostComponent | WorkTag::HostText)
    }

    pub(crate) fn is_host_parent(&self) -> bool {
        matches!(self.tag, WorkTag::HostComponent | WorkTag::HostRoot)
    }

    pub(crate) fn host_tag(&self) -> &str {
        match &self.element_type {
            Some(ElementType::Host(tag)) => tag,
            _ => "",
        }
    }
}

impl<H: HostConfig> fmt::Debug for Fiber<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("tag", &self.tag)
            .field("type", &self.type_name())
            .field("key", &self.key)
            .field("index", &self.index)
            .field("pending_work_priority", &self.pending_work_priority)
            .field("effect_tag", &self.effect_tag)
            .finish()
    }
}

/// Arena holding every fiber of every tree managed by a scheduler.
pub struct FiberArena<H: HostConfig> {
    fibers: SlotMap<FiberId, Fiber<H>>,
}

impl<H: HostConfig> Default for FiberArena<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: HostConfig> FiberArena<H> {
    pub fn new() -> Self {
        Self {
            fibers: SlotMap::with_key(),
        }
    }

    pub fn len(&self) -> usize {
        self.fibers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fibers.is_empty()
    }

    pub fn contains(&self, id: FiberId) -> bool {
        self.fibers.contains_key(id)
    }

    pub fn get(&self, id: FiberId) -> Option<&Fiber<H>> {
        self.fibers.get(id)
    }

    pub fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber<H>> {
        self.fibers.get_mut(id)
    }

    pub(crate) fn insert(&mut self, fiber: Fiber<H>) -> FiberId {
        self.fibers.insert(fiber)
    }

    pub(crate) fn remove(&mut self, id: FiberId) -> Option<Fiber<H>> {
        self.fibers.remove(id)
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = FiberId> + '_ {
        self.fibers.keys()
    }

    /// Iterates `first` and its siblings.
    pub fn siblings(&self, first: Option<FiberId>) -> Siblings<'_, H> {
        Siblings {
            arena: self,
            next: first,
        }
    }

    /// Iterates the children of `id`.
    pub fn children(&self, id: FiberId) -> Siblings<'_, H> {
        self.siblings(self.get(id).and_then(|fiber| fiber.child))
    }

    pub(crate) fn create_host_root(&mut self, root: RootId) -> FiberId {
        let mut fiber = Fiber::new(WorkTag::HostRoot, None);
        fiber.state_node = StateNode::Root(root);
        self.insert(fiber)
    }

    pub(crate) fn create_from_element(&mut self, element: &Element, priority: Priority) -> FiberId {
        let tag = match &element.ty {
            ElementType::Host(_) => WorkTag::HostComponent,
            ElementType::Function(_) => WorkTag::Indeterminate,
            ElementType::Class(_) => WorkTag::Class,
            ElementType::Fragment => WorkTag::Fragment,
            ElementType::Coroutine => WorkTag::Coroutine,
        };
        let mut fiber = Fiber::new(tag, element.key.clone());
        fiber.element_type = Some(element.ty.clone());
        fiber.pending_props = Some(Input::Props(Rc::clone(&element.props)));
        fiber.pending_work_priority = priority;
        self.insert(fiber)
    }

    pub(crate) fn create_from_text(&mut self, text: &Rc<str>, priority: Priority) -> FiberId {
        let mut fiber = Fiber::new(WorkTag::HostText, None);
        fiber.pending_props = Some(Input::Text(Rc::clone(text)));
        fiber.pending_work_priority = priority;
        self.insert(fiber)
    }

    pub(crate) fn create_from_fragment(&mut self, list: &Rc<[Child]>, priority: Priority) -> FiberId {
        let mut fiber = Fiber::new(WorkTag::Fragment, None);
        fiber.element_type = Some(ElementType::Fragment);
        fiber.pending_props = Some(Input::Fragment(Rc::clone(list)));
        fiber.pending_work_priority = priority;
        self.insert(fiber)
    }

    /// Returns the work-in-progress twin of `current`, reusing the
    /// alternate when one exists.
    ///
    /// The clone starts with no effects and mirrors the committed fiber's
    /// children, inputs and update queue.
    pub(crate) fn clone_fiber(&mut self, current: FiberId, priority: Priority) -> FiberId {
        let Some(source) = self.fibers.get(current) else {
            return current;
        };
        let existing = source.alternate.filter(|alt| self.fibers.contains_key(*alt));

        let tag = source.tag;
        let element_type = source.element_type.clone();
        let key = source.key.clone();
        let state_node = source.state_node.clone();
        let child = source.child;
        let sibling = source.sibling;
        let index = source.index;
        let pending_props = source.pending_props.clone();
        let memoized_props = source.memoized_props.clone();
        let memoized_state = source.memoized_state.clone();
        let update_queue = source.update_queue.clone();
        let progressed_child = source.progressed_child;
        let progressed_priority = source.progressed_priority;

        let alt = match existing {
            Some(alt) => alt,
            None => {
                let mut fresh = Fiber::new(tag, key);
                fresh.progressed_child = progressed_child;
                fresh.progressed_priority = progressed_priority;
                fresh.alternate = Some(current);
                let alt = self.insert(fresh);
                if let Some(source) = self.fibers.get_mut(current) {
                    source.alternate = Some(alt);
                }
                alt
            }
        };

        if let Some(fiber) = self.fibers.get_mut(alt) {
            fiber.tag = tag;
            fiber.element_type = element_type;
            fiber.state_node = state_node;
            fiber.child = child;
            fiber.sibling = sibling;
            fiber.index = index;
            fiber.pending_props = pending_props;
            fiber.memoized_props = memoized_props;
            fiber.memoized_state = memoized_state;
            fiber.update_queue = update_queue;
            fiber.pending_work_priority = priority;
            fiber.effect_tag = EffectTag::empty();
            fiber.effects.clear();
            fiber.callbacks.clear();
            fiber.linked_into_parent = false;
            fiber.deferred = false;
        }
        alt
    }
}

/// Iterator over a sibling chain.
pub struct Siblings<'a, H: HostConfig> {
    arena: &'a FiberArena<H>,
    next: Option<FiberId>,
}

impl<H: HostConfig> Iterator for Siblings<'_, H> {
    type Item = FiberId;

    fn next(&mut self) -> Option<FiberId> {
        let id = self.next?;
        self.next = self.arena.get(id).and_then(|fiber| fiber.sibling);
        Some(id)
    }
}
