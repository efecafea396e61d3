//! prefixd IPAM backend client
//!
//! The IPAM backend is the source of truth for address space: it owns pools,
//! performs the actual prefix assignment and hands back opaque numeric
//! identifiers. This crate wraps its RPC surface in a narrow async trait:
//!
//! - Pool lookup by name
//! - Prefix allocation from a pool or from an already-allocated parent prefix
//! - Attribute updates on existing prefixes
//! - Deallocation and lookup by identifier
//!
//! Every call is a network round trip; nothing is cached client-side. The
//! backend is always treated as authoritative and callers re-fetch after
//! mutation when they need canonical fields.
//!
//! Remote failures are surfaced as a single tagged [`IpamError`] carrying an
//! [`ErrorKind`], the remote fault code (when one was returned) and the
//! human-readable message. Callers match on the kind, never on type identity.
//!
//! A mock implementation is provided for testing and development.

pub mod client;
pub mod error;
pub mod mock;
pub mod model;

// Re-export commonly used types
pub use client::{AllocatorClient, AllocatorConnector, BackendConfig, HttpAllocatorClient, HttpConnector};
pub use error::{ErrorKind, IpamError};
pub use mock::{MockAllocator, MockConnector};
pub use model::{AllocatedPrefix, AllocationOptions, Pool, PrefixAttributes};
