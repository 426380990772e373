#![doc = r"Test support for fibril: a recording in-memory host, deadlines and a small harness."]

mod deadline;
mod harness;
mod recording_host;

pub use deadline::{Expired, UnitBudget};
pub use harness::{find_fiber, EventLog, TestRoot};
pub use recording_host::{HostOp, NodeId, RecordingHost};

#[cfg(test)]
#[path = "tests/recording_host_tests.rs"]
mod tests;
