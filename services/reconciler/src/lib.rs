//! prefixd Reconciler Library
//!
//! The reconciler watches a hierarchical config store for prefix-request
//! mutations and converges the IPAM backend to match: requested prefixes
//! get allocated, attribute edits get pushed, deleted requests get their
//! prefixes returned to the pool. Outcomes land in the store's operational
//! response region, where downstream consumers read them.
//!
//! ## Architecture
//!
//! - **Classifier**: pure diff classification - mutation batch in, change
//!   requests out
//! - **Processor**: executes one change request against the backend and
//!   writes the response record
//! - **Engine**: the batch loop - read, classify, connect, process, ack
//! - **Redeploy**: bounded background trigger for dependent service nodes
//! - **Store**: the collaborating config store's contract plus an
//!   in-memory implementation for tests and development
//!
//! The loop is single-tasked on purpose: one batch fully drains before the
//! next is read, so no locking is needed over request state. Redeploy tasks
//! are the only concurrency, and they share nothing with the loop beyond
//! read-only path values.

pub mod classifier;
pub mod config;
pub mod engine;
pub mod keypath;
pub mod processor;
pub mod redeploy;
pub mod schema;
pub mod store;

// Re-export commonly used types
pub use classifier::{classify, ChangeOp, ChangeRequest, RequestKind};
pub use engine::Engine;
pub use keypath::KeyPath;
pub use processor::RequestProcessor;
pub use redeploy::RedeployScheduler;
