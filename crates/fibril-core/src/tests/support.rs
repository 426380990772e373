//! Minimal host for unit tests: numbered nodes and a readable op log.

use crate::collections::map::HashMap;
use crate::element::Props;
use crate::host::{HostChild, HostConfig, HostParent};

#[derive(Default)]
pub(crate) struct TestHost {
    next_id: usize,
    pub(crate) ops: Vec<String>,
    pub(crate) children: HashMap<usize, Vec<usize>>,
    pub(crate) deferred_requests: usize,
    pub(crate) animation_requests: usize,
}

impl TestHost {
    pub(crate) fn new() -> Self {
        // Node 0 is the container.
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    pub(crate) fn take_ops(&mut self) -> Vec<String> {
        std::mem::take(&mut self.ops)
    }

    pub(crate) fn children_of(&self, id: usize) -> Vec<usize> {
        self.children.get(&id).cloned().unwrap_or_default()
    }

    fn alloc(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn child_id(child: &HostChild<'_, Self>) -> usize {
        match child {
            HostChild::Instance(id) | HostChild::Text(id) => **id,
        }
    }

    fn parent_id(parent: &HostParent<'_, Self>) -> usize {
        match parent {
            HostParent::Container(id) | HostParent::Instance(id) => **id,
        }
    }

    fn detach(&mut self, child: usize) {
        for list in self.children.values_mut() {
            list.retain(|id| *id != child);
        }
    }
}

impl HostConfig for TestHost {
    type Instance = usize;
    type TextInstance = usize;
    type Container = usize;

    fn create_instance(&mut self, ty: &str, _props: &Props) -> usize {
        let id = self.alloc();
        self.ops.push(format!("create {ty}#{id}"));
        id
    }

    fn create_text_instance(&mut self, text: &str) -> usize {
        let id = self.alloc();
        self.ops.push(format!("text {text:?}#{id}"));
        id
    }

    fn append_initial_child(&mut self, parent: &usize, child: HostChild<'_, Self>) {
        let child = Self::child_id(&child);
        self.children.entry(*parent).or_default().push(child);
    }

    fn prepare_update(&mut self, _instance: &usize, _ty: &str, old: &Props, new: &Props) -> bool {
        old.attributes() != new.attributes() || old.text_content() != new.text_content()
    }

    fn commit_update(&mut self, instance: &usize, ty: &str, _old: &Props, _new: &Props) {
        self.ops.push(format!("update {ty}#{instance}"));
    }

    fn commit_text_update(&mut self, text: &usize, _old: &str, new: &str) {
        self.ops.push(format!("set #{text} {new:?}"));
    }

    fn append_child(&mut self, parent: HostParent<'_, Self>, child: HostChild<'_, Self>) {
        let (parent, child) = (Self::parent_id(&parent), Self::child_id(&child));
        self.detach(child);
        self.children.entry(parent).or_default().push(child);
        self.ops.push(format!("append #{child} to #{parent}"));
    }

    fn insert_before(
        &mut self,
        parent: HostParent<'_, Self>,
        child: HostChild<'_, Self>,
        before: HostChild<'_, Self>,
    ) {
        let parent = Self::parent_id(&parent);
        let (child, before) = (Self::child_id(&child), Self::child_id(&before));
        self.detach(child);
        let list = self.children.entry(parent).or_default();
        let index = list.iter().position(|id| *id == before).unwrap_or(list.len());
        list.insert(index, child);
        self.ops.push(format!("insert #{child} before #{before}"));
    }

    fn remove_child(&mut self, parent: HostParent<'_, Self>, child: HostChild<'_, Self>) {
        let (parent, child) = (Self::parent_id(&parent), Self::child_id(&child));
        self.detach(child);
        self.ops.push(format!("remove #{child} from #{parent}"));
    }

    fn schedule_deferred_callback(&mut self) {
        self.deferred_requests += 1;
    }

    fn schedule_animation_callback(&mut self) {
        self.animation_requests += 1;
    }
}
