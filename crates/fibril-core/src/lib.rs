#![doc = r"Cooperative fiber reconciler: incremental, prioritized tree diffing with a two-phase render/commit split."]

pub extern crate self as fibril_core;

mod begin_work;
mod child_reconciler;
mod class_instance;
pub mod collections;
mod commit_work;
mod complete_work;
pub mod component;
mod context;
pub mod element;
pub mod error;
pub mod fiber;
pub mod host;
pub mod priority;
pub mod scheduler;
pub mod update_queue;
pub mod value;

pub use component::{Component, InstanceCx, InstanceId, Lifecycle, Updater};
pub use element::{
    shallow_equal_props, Child, ClassFlags, ClassType, ClassTypeBuilder, Element, ElementType,
    FunctionType, Props, Rendered,
};
pub use error::{ComponentError, ReconcileError, TrappedError};
pub use fiber::{EffectTag, Fiber, FiberArena, FiberId, Input, RootId, StateNode, WorkTag};
pub use host::{Deadline, HostChild, HostConfig, HostParent, Unbounded};
pub use priority::Priority;
pub use scheduler::{FiberRoot, Scheduler, SchedulerConfig};
pub use update_queue::{Callback, PartialState, Update, UpdateKind, UpdateQueue};
pub use value::{shallow_equal, Record, Value};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
