//! Mock IPAM backend for testing and development.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::client::{AllocatorClient, AllocatorConnector, BackendConfig};
use crate::error::{ErrorKind, IpamError};
use crate::model::{AllocatedPrefix, AllocationOptions, Pool, PrefixAttributes};

/// In-memory allocator mock.
///
/// Pools are registered up front; allocations hand out deterministic
/// prefixes so tests can assert on exact values.
pub struct MockAllocator {
    pools: Mutex<Vec<Pool>>,

    /// Pools that reject every allocation (simulates exhaustion).
    exhausted: Mutex<HashSet<String>>,

    allocated: Mutex<HashMap<i64, AllocatedPrefix>>,

    /// Record of deallocated identifiers, in call order.
    deallocated: Mutex<Vec<i64>>,

    next_id: AtomicI64,
    next_pool_id: AtomicI64,
    value_seq: AtomicI64,
}

impl MockAllocator {
    /// Create a new mock allocator with no pools.
    pub fn new() -> Self {
        Self {
            pools: Mutex::new(Vec::new()),
            exhausted: Mutex::new(HashSet::new()),
            allocated: Mutex::new(HashMap::new()),
            deallocated: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            next_pool_id: AtomicI64::new(1),
            value_seq: AtomicI64::new(0),
        }
    }

    /// Start prefix identifiers at `id` instead of 1.
    pub fn with_next_id(self, id: i64) -> Self {
        self.next_id.store(id, Ordering::SeqCst);
        self
    }

    /// Register a pool and return it.
    pub fn add_pool(&self, name: &str) -> Pool {
        let pool = Pool {
            id: self.next_pool_id.fetch_add(1, Ordering::SeqCst),
            name: name.to_string(),
            description: None,
        };
        self.pools.lock().unwrap().push(pool.clone());
        pool
    }

    /// Mark a pool as exhausted; allocations from it are rejected.
    pub fn mark_exhausted(&self, name: &str) {
        self.exhausted.lock().unwrap().insert(name.to_string());
    }

    /// Identifiers deallocated so far, in call order.
    pub fn deallocated(&self) -> Vec<i64> {
        self.deallocated.lock().unwrap().clone()
    }

    /// Number of live allocations.
    pub fn allocation_count(&self) -> usize {
        self.allocated.lock().unwrap().len()
    }

    /// Fetch a live allocation, if any.
    pub fn allocation(&self, id: i64) -> Option<AllocatedPrefix> {
        self.allocated.lock().unwrap().get(&id).cloned()
    }

    fn mint(
        &self,
        prefix: String,
        family: i64,
        attributes: &PrefixAttributes,
    ) -> AllocatedPrefix {
        let allocated = AllocatedPrefix {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            prefix: prefix.clone(),
            family,
            display_prefix: Some(prefix),
            description: attributes.description.clone(),
            node: attributes.node.clone(),
            order_id: attributes.order_id.clone(),
            customer_id: attributes.customer_id.clone(),
            prefix_type: attributes.prefix_type.clone(),
        };
        self.allocated
            .lock()
            .unwrap()
            .insert(allocated.id, allocated.clone());
        allocated
    }
}

impl Default for MockAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AllocatorClient for MockAllocator {
    async fn find_pool(&self, name: &str) -> Result<Pool, IpamError> {
        let pools = self.pools.lock().unwrap();
        let matches: Vec<&Pool> = pools.iter().filter(|p| p.name == name).collect();
        match matches.len() {
            0 => Err(IpamError::new(
                ErrorKind::NotFound,
                format!("no pool named {name:?}"),
            )),
            1 => Ok(matches[0].clone()),
            n => Err(IpamError::new(
                ErrorKind::InvalidInput,
                format!("pool name {name:?} is ambiguous ({n} matches)"),
            )),
        }
    }

    async fn allocate_from_pool(
        &self,
        pool: &Pool,
        attributes: &PrefixAttributes,
        options: &AllocationOptions,
    ) -> Result<AllocatedPrefix, IpamError> {
        if self.exhausted.lock().unwrap().contains(&pool.name) {
            return Err(IpamError {
                kind: ErrorKind::Generic,
                code: Some(1000),
                message: format!("pool {:?} exhausted", pool.name),
            });
        }

        let seq = self.value_seq.fetch_add(1, Ordering::SeqCst);
        let family = options.family.unwrap_or(4);
        let prefix = match family {
            6 => format!("2001:db8:{seq:x}::/64"),
            _ => format!("10.0.{seq}.0/24"),
        };

        info!(pool = %pool.name, prefix = %prefix, "[MOCK] Allocated prefix from pool");
        Ok(self.mint(prefix, family, attributes))
    }

    async fn allocate_from_prefix(
        &self,
        parent: &AllocatedPrefix,
        attributes: &PrefixAttributes,
        options: &AllocationOptions,
    ) -> Result<AllocatedPrefix, IpamError> {
        if self.allocation(parent.id).is_none() {
            return Err(IpamError {
                kind: ErrorKind::NotFound,
                code: Some(1300),
                message: format!("parent prefix {} not found", parent.id),
            });
        }

        let seq = self.value_seq.fetch_add(1, Ordering::SeqCst);
        let length = options.prefix_length.unwrap_or(32);
        let prefix = match parent.family {
            6 => format!("2001:db8::{seq:x}/{length}"),
            _ => format!("192.0.2.{seq}/{length}"),
        };

        info!(parent = %parent.prefix, prefix = %prefix, "[MOCK] Allocated prefix from prefix");
        Ok(self.mint(prefix, parent.family, attributes))
    }

    async fn update_attributes(
        &self,
        id: i64,
        attributes: &PrefixAttributes,
    ) -> Result<AllocatedPrefix, IpamError> {
        let mut allocated = self.allocated.lock().unwrap();
        let entry = allocated.get_mut(&id).ok_or(IpamError {
            kind: ErrorKind::NotFound,
            code: Some(1300),
            message: format!("no prefix with id {id}"),
        })?;

        entry.description = attributes.description.clone();
        entry.node = attributes.node.clone();
        entry.order_id = attributes.order_id.clone();
        entry.customer_id = attributes.customer_id.clone();

        debug!(id, "[MOCK] Updated prefix attributes");
        Ok(entry.clone())
    }

    async fn deallocate(&self, id: i64) -> Result<(), IpamError> {
        self.deallocated.lock().unwrap().push(id);
        let removed = self.allocated.lock().unwrap().remove(&id);
        if removed.is_none() {
            return Err(IpamError {
                kind: ErrorKind::NotFound,
                code: Some(1300),
                message: format!("no prefix with id {id}"),
            });
        }
        debug!(id, "[MOCK] Deallocated prefix");
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<AllocatedPrefix, IpamError> {
        self.allocation(id).ok_or(IpamError {
            kind: ErrorKind::NotFound,
            code: Some(1300),
            message: format!("no prefix with id {id}"),
        })
    }
}

/// Connector that always hands out the same mock allocator.
pub struct MockConnector {
    allocator: Arc<MockAllocator>,

    /// Backend configurations seen by `connect`, in call order.
    connections: Mutex<Vec<BackendConfig>>,
}

impl MockConnector {
    pub fn new(allocator: Arc<MockAllocator>) -> Self {
        Self {
            allocator,
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Backend configurations the engine connected with.
    pub fn connections(&self) -> Vec<BackendConfig> {
        self.connections.lock().unwrap().clone()
    }
}

impl AllocatorConnector for MockConnector {
    fn connect(&self, config: &BackendConfig) -> Result<Arc<dyn AllocatorClient>, IpamError> {
        self.connections.lock().unwrap().push(config.clone());
        Ok(self.allocator.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_lookup() {
        let mock = MockAllocator::new();
        mock.add_pool("edge");
        mock.add_pool("dup");
        mock.add_pool("dup");

        assert_eq!(mock.find_pool("edge").await.unwrap().name, "edge");
        assert_eq!(
            mock.find_pool("missing").await.unwrap_err().kind,
            ErrorKind::NotFound
        );
        assert_eq!(
            mock.find_pool("dup").await.unwrap_err().kind,
            ErrorKind::InvalidInput
        );
    }

    #[tokio::test]
    async fn test_allocate_and_deallocate() {
        let mock = MockAllocator::new().with_next_id(42);
        let pool = mock.add_pool("edge");

        let attrs = PrefixAttributes {
            description: Some("test".to_string()),
            ..Default::default()
        };
        let opts = AllocationOptions {
            family: Some(4),
            ..Default::default()
        };

        let prefix = mock.allocate_from_pool(&pool, &attrs, &opts).await.unwrap();
        assert_eq!(prefix.id, 42);
        assert_eq!(prefix.prefix, "10.0.0.0/24");
        assert_eq!(mock.allocation_count(), 1);

        mock.deallocate(42).await.unwrap();
        assert_eq!(mock.allocation_count(), 0);
        assert_eq!(
            mock.deallocate(42).await.unwrap_err().kind,
            ErrorKind::NotFound
        );
        assert_eq!(mock.deallocated(), vec![42, 42]);
    }

    #[tokio::test]
    async fn test_exhausted_pool_rejects() {
        let mock = MockAllocator::new();
        let pool = mock.add_pool("edge");
        mock.mark_exhausted("edge");

        let err = mock
            .allocate_from_pool(&pool, &PrefixAttributes::default(), &AllocationOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Generic);
        assert_eq!(err.code, Some(1000));
    }
}
