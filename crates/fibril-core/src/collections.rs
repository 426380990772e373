//! Map aliases used by the reconciler.
//!
//! Keyed child matching builds a short-lived map per reconciled list, so the
//! default build uses the Fx hasher. The `std-hash` feature swaps in the
//! standard library maps for hosts that want SipHash.

#[cfg(feature = "std-hash")]
pub mod map {
    pub use std::collections::{HashMap, HashSet};
}

#[cfg(not(feature = "std-hash"))]
pub mod map {
    pub use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
}
