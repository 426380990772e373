//! In-memory host that keeps a node tree and a log of every mutation.

use fibril_core::{HostChild, HostConfig, HostParent, Props, Record};

pub type NodeId = usize;

/// One host mutation, in the order the reconciler issued it.
#[derive(Debug, Clone, PartialEq)]
pub enum HostOp {
    Create { id: NodeId, tag: String },
    CreateText { id: NodeId, text: String },
    AppendInitial { parent: NodeId, child: NodeId },
    Append { parent: NodeId, child: NodeId },
    InsertBefore { parent: NodeId, child: NodeId, before: NodeId },
    Remove { parent: NodeId, child: NodeId },
    Update { id: NodeId, tag: String },
    UpdateText { id: NodeId, text: String },
}

#[derive(Debug, Clone)]
enum NodeKind {
    Container,
    Element {
        tag: String,
        attributes: Record,
        text: Option<String>,
        hidden: bool,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct HostNode {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Default)]
pub struct RecordingHost {
    nodes: Vec<HostNode>,
    ops: Vec<HostOp>,
    deferred_requests: usize,
    animation_requests: usize,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(HostNode {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    pub fn create_container(&mut self) -> NodeId {
        self.push(NodeKind::Container)
    }

    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn deferred_requests(&self) -> usize {
        self.deferred_requests
    }

    pub fn animation_requests(&self) -> usize {
        self.animation_requests
    }

    /// Number of nodes ever created, containers included.
    pub fn created(&self) -> usize {
        self.nodes.len()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id).map_or(&[], |node| &node.children)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|node| node.parent)
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.nodes.get(id)?.kind {
            NodeKind::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn attribute(&self, id: NodeId, key: &str) -> Option<&fibril_core::Value> {
        match &self.nodes.get(id)?.kind {
            NodeKind::Element { attributes, .. } => attributes.get(key),
            _ => None,
        }
    }

    /// Compact rendering of everything under `id`: `tag[child, ...]` for
    /// elements, quoted strings for text.
    pub fn dump(&self, id: NodeId) -> String {
        let Some(node) = self.nodes.get(id) else {
            return String::from("(missing)");
        };
        let children: Vec<String> = node.children.iter().map(|child| self.dump(*child)).collect();
        match &node.kind {
            NodeKind::Container => children.join(", "),
            NodeKind::Text(text) => format!("{text:?}"),
            NodeKind::Element { tag, text, hidden, .. } => {
                let mut out = tag.clone();
                if *hidden {
                    out.push('?');
                }
                if let Some(text) = text {
                    out.push_str(&format!("[{text:?}]"));
                } else if !children.is_empty() {
                    out.push('[');
                    out.push_str(&children.join(", "));
                    out.push(']');
                }
                out
            }
        }
    }

    fn child_id(child: &HostChild<'_, Self>) -> NodeId {
        match child {
            HostChild::Instance(id) | HostChild::Text(id) => **id,
        }
    }

    fn parent_id(parent: &HostParent<'_, Self>) -> NodeId {
        match parent {
            HostParent::Container(id) | HostParent::Instance(id) => **id,
        }
    }

    fn detach(&mut self, child: NodeId) {
        if let Some(old) = self.nodes.get(child).and_then(|node| node.parent) {
            if let Some(parent) = self.nodes.get_mut(old) {
                parent.children.retain(|id| *id != child);
            }
        }
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = None;
        }
    }

    fn attach(&mut self, parent: NodeId, child: NodeId, before: Option<NodeId>) {
        self.detach(child);
        if let Some(node) = self.nodes.get_mut(parent) {
            let index = before
                .and_then(|before| node.children.iter().position(|id| *id == before))
                .unwrap_or(node.children.len());
            node.children.insert(index, child);
        }
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = Some(parent);
        }
    }
}

impl HostConfig for RecordingHost {
    type Instance = NodeId;
    type TextInstance = NodeId;
    type Container = NodeId;

    fn create_instance(&mut self, ty: &str, props: &Props) -> NodeId {
        let id = self.push(NodeKind::Element {
            tag: ty.to_owned(),
            attributes: props.attributes().clone(),
            text: props.text_content().map(str::to_owned),
            hidden: props.is_hidden(),
        });
        log::trace!("create {ty} as {id}");
        self.ops.push(HostOp::Create {
            id,
            tag: ty.to_owned(),
        });
        id
    }

    fn create_text_instance(&mut self, text: &str) -> NodeId {
        let id = self.push(NodeKind::Text(text.to_owned()));
        self.ops.push(HostOp::CreateText {
            id,
            text: text.to_owned(),
        });
        id
    }

    fn append_initial_child(&mut self, parent: &NodeId, child: HostChild<'_, Self>) {
        let child = Self::child_id(&child);
        self.attach(*parent, child, None);
        self.ops.push(HostOp::AppendInitial {
            parent: *parent,
            child,
        });
    }

    fn prepare_update(&mut self, _instance: &NodeId, _ty: &str, old: &Props, new: &Props) -> bool {
        old.attributes() != new.attributes()
            || old.text_content() != new.text_content()
            || old.is_hidden() != new.is_hidden()
    }

    fn commit_update(&mut self, instance: &NodeId, ty: &str, _old: &Props, new: &Props) {
        if let Some(HostNode {
            kind: NodeKind::Element {
                attributes,
                text,
                hidden,
                ..
            },
            ..
        }) = self.nodes.get_mut(*instance)
        {
            *attributes = new.attributes().clone();
            *text = new.text_content().map(str::to_owned);
            *hidden = new.is_hidden();
        }
        self.ops.push(HostOp::Update {
            id: *instance,
            tag: ty.to_owned(),
        });
    }

    fn commit_text_update(&mut self, text: &NodeId, _old: &str, new: &str) {
        if let Some(HostNode {
            kind: NodeKind::Text(content),
            ..
        }) = self.nodes.get_mut(*text)
        {
            *content = new.to_owned();
        }
        self.ops.push(HostOp::UpdateText {
            id: *text,
            text: new.to_owned(),
        });
    }

    fn append_child(&mut self, parent: HostParent<'_, Self>, child: HostChild<'_, Self>) {
        let (parent, child) = (Self::parent_id(&parent), Self::child_id(&child));
        self.attach(parent, child, None);
        self.ops.push(HostOp::Append { parent, child });
    }

    fn insert_before(
        &mut self,
        parent: HostParent<'_, Self>,
        child: HostChild<'_, Self>,
        before: HostChild<'_, Self>,
    ) {
        let parent = Self::parent_id(&parent);
        let (child, before) = (Self::child_id(&child), Self::child_id(&before));
        self.attach(parent, child, Some(before));
        self.ops.push(HostOp::InsertBefore {
            parent,
            child,
            before,
        });
    }

    fn remove_child(&mut self, parent: HostParent<'_, Self>, child: HostChild<'_, Self>) {
        let (parent, child) = (Self::parent_id(&parent), Self::child_id(&child));
        self.detach(child);
        self.ops.push(HostOp::Remove { parent, child });
    }

    fn schedule_deferred_callback(&mut self) {
        self.deferred_requests += 1;
    }

    fn schedule_animation_callback(&mut self) {
        self.animation_requests += 1;
    }
}
