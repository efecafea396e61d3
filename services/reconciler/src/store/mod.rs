//! Config store interfaces.
//!
//! The versioned config store is an external collaborator; the engine only
//! requires a narrow contract from it:
//!
//! - a mutation subscription yielding batches of tree-mutation records,
//!   with a batch acknowledgement primitive for flow control
//! - read access to the running configuration (`exists`, `get_elem`,
//!   list-entry enumeration)
//! - read/write access to the operational response region the engine
//!   exclusively owns
//! - management sessions able to invoke a named action at a path, opened
//!   independently per background task
//!
//! An in-memory implementation lives in [`memory`] and is used by tests and
//! the development binary.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::keypath::KeyPath;

/// Errors from config store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The addressed node does not exist.
    #[error("path not found: {0}")]
    NotFound(KeyPath),

    /// The mutation subscription was closed by the host.
    #[error("subscription closed")]
    Closed,

    /// Transport-level failure talking to the store.
    #[error("store i/o error: {0}")]
    Io(String),
}

/// What happened to a tree node in one committed diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    Created,
    Deleted,
    ValueSet,
}

/// One tree-mutation record out of a diff batch.
///
/// Records arrive in schema order with ancestor-delete semantics: deleting a
/// container yields a single record for the container, not one per child.
#[derive(Debug, Clone)]
pub struct MutationRecord {
    pub path: KeyPath,
    pub op: MutationOp,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

impl MutationRecord {
    pub fn created(path: KeyPath) -> Self {
        Self {
            path,
            op: MutationOp::Created,
            old_value: None,
            new_value: None,
        }
    }

    pub fn deleted(path: KeyPath) -> Self {
        Self {
            path,
            op: MutationOp::Deleted,
            old_value: None,
            new_value: None,
        }
    }

    pub fn value_set(path: KeyPath, old_value: Option<Value>, new_value: Value) -> Self {
        Self {
            path,
            op: MutationOp::ValueSet,
            old_value,
            new_value: Some(new_value),
        }
    }
}

/// Read access to the running configuration datastore.
#[async_trait]
pub trait ConfigReader: Send + Sync {
    /// Returns true when the node (or anything under it) exists.
    async fn exists(&self, path: &KeyPath) -> Result<bool, StoreError>;

    /// Read a leaf value; `None` when the leaf is absent.
    async fn get_elem(&self, path: &KeyPath) -> Result<Option<Value>, StoreError>;

    /// Enumerate the keys of a list node, in schema order.
    ///
    /// `path` addresses the list itself, e.g.
    /// `/services/ipam/from-pool{p}/request{r}/from-prefix-request`.
    async fn list_entries(&self, path: &KeyPath) -> Result<Vec<String>, StoreError>;
}

/// Read/write access to the operational response region.
///
/// The engine is the sole writer for the paths it manages.
#[async_trait]
pub trait OperStore: Send + Sync {
    async fn get_elem(&self, path: &KeyPath) -> Result<Option<Value>, StoreError>;

    /// Enumerate the keys of a list node that has response data.
    async fn list_entries(&self, path: &KeyPath) -> Result<Vec<String>, StoreError>;

    async fn set_elem(&self, path: &KeyPath, value: Value) -> Result<(), StoreError>;

    /// Select `case` for the choice `choice` at `path`.
    async fn set_case(&self, path: &KeyPath, choice: &str, case: &str) -> Result<(), StoreError>;

    /// Delete a leaf. Fails with [`StoreError::NotFound`] when absent.
    async fn delete(&self, path: &KeyPath) -> Result<(), StoreError>;
}

/// A subscription to config mutations.
///
/// `read` blocks until the next committed batch; `ack` signals the batch was
/// fully handled so the store can release buffered mutations.
#[async_trait]
pub trait MutationSubscription: Send {
    /// Block for the next mutation batch.
    ///
    /// Fails with [`StoreError::Closed`] when the host shuts the
    /// subscription down; the reconciliation loop treats that as a clean
    /// exit signal.
    async fn read(&mut self) -> Result<Vec<MutationRecord>, StoreError>;

    /// Acknowledge the batch most recently returned by `read`.
    async fn ack(&mut self) -> Result<(), StoreError>;
}

/// A management session, able to inspect the tree and invoke actions.
#[async_trait]
pub trait ManagementSession: Send {
    async fn exists(&mut self, path: &KeyPath) -> Result<bool, StoreError>;

    /// Invoke the named action on the node at `path`.
    async fn request_action(&mut self, path: &KeyPath, action: &str) -> Result<(), StoreError>;
}

/// Opens management sessions.
///
/// Background tasks must open their own session instead of sharing the
/// loop's, so concurrent tasks never contend on one session handle.
pub trait ManagementAccess: Send + Sync {
    fn open_session(&self) -> Result<Box<dyn ManagementSession>, StoreError>;
}
