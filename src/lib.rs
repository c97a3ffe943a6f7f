//! Placement of thread-interference checks for speculatively specialized code.
//!
//! A specializer that evaluates a program ahead of time reads memory that other
//! threads may write concurrently. Each value it relied on is a *tentative
//! load* unless nothing could have changed it since it was last verified by
//! the current thread. This crate walks the specializer's context tree (see
//! [`ir::SpecTree`]), tracks which bytes of which abstract objects are known
//! good at every program point, and decides which instructions need a run-time
//! check when the specialized code is committed.
//!
//! The entry point is [`TentativeLoads`]:
//!
//! ```ignore
//! let mut analysis = TentativeLoads::new(&tree);
//! analysis.run(&tree, &Config::new())?;
//! if analysis.requires_runtime_check(&tree, &config, inst) { /* emit a check */ }
//! ```

#![deny(missing_docs)]

pub use crate::checkpoint::FailedPaths;
pub use crate::config::{Config, ConfigError};
pub use crate::result::{TentativeError, TentativeResult};
pub use crate::stats::{CheckCounts, TentativeStats};
pub use crate::verifier::verify_tree;
pub use crate::walker::TentativeLoads;

pub use cranelift_entity as entity;

pub mod config;
pub mod frames;
pub mod ir;
pub mod store;
pub mod timing;
pub mod verifier;

mod checkpoint;
mod propagate;
mod result;
mod stats;
mod verdict;
mod walker;

/// Even when trace logging is disabled, the trace macro has a significant performance cost so we
/// disable it by default.
#[macro_export]
macro_rules! trace {
    ($($tt:tt)*) => {
        if cfg!(any(feature = "trace-log", debug_assertions)) {
            ::log::trace!($($tt)*);
        }
    };
}
