//! In-memory config store.
//!
//! Backs the integration tests and the development binary the same way a
//! CDB-style store would back a production deployment: a running datastore
//! seeded by the host, an operational datastore owned by the engine, a
//! single mutation subscription and management sessions that record invoked
//! actions.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use prefixd_ipam::BackendConfig;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::keypath::KeyPath;
use crate::schema;
use crate::store::{
    ConfigReader, ManagementAccess, ManagementSession, MutationRecord, MutationSubscription,
    OperStore, StoreError,
};

struct Inner {
    running: Mutex<BTreeMap<KeyPath, Value>>,
    oper: Mutex<BTreeMap<KeyPath, Value>>,

    /// Selected case per choice container path.
    cases: Mutex<BTreeMap<KeyPath, (String, String)>>,

    /// Actions invoked through management sessions, in call order.
    actions: Mutex<Vec<(KeyPath, String)>>,

    batch_tx: Mutex<Option<mpsc::UnboundedSender<Vec<MutationRecord>>>>,
    acked_tx: watch::Sender<u64>,
}

/// In-memory store handle. Cheap to clone.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
    subscription_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Vec<MutationRecord>>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let (acked_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                running: Mutex::new(BTreeMap::new()),
                oper: Mutex::new(BTreeMap::new()),
                cases: Mutex::new(BTreeMap::new()),
                actions: Mutex::new(Vec::new()),
                batch_tx: Mutex::new(Some(batch_tx)),
                acked_tx,
            }),
            subscription_rx: Arc::new(Mutex::new(Some(batch_rx))),
        }
    }

    /// Take the store's single mutation subscription.
    pub fn subscribe(&self) -> Result<MemorySubscription, StoreError> {
        let rx = self
            .subscription_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| StoreError::Io("subscription already taken".to_string()))?;
        Ok(MemorySubscription {
            rx,
            inner: self.inner.clone(),
        })
    }

    /// Publish a mutation batch to the subscriber.
    ///
    /// Dropped silently after `close`, like a store flushing buffers during
    /// shutdown.
    pub fn publish(&self, records: Vec<MutationRecord>) {
        if let Some(tx) = self.inner.batch_tx.lock().unwrap().as_ref() {
            let _ = tx.send(records);
        }
    }

    /// Close the mutation subscription; the subscriber's next `read` fails
    /// with [`StoreError::Closed`].
    pub fn close(&self) {
        self.inner.batch_tx.lock().unwrap().take();
    }

    /// Wait until at least `n` batches have been acknowledged.
    pub async fn wait_for_acks(&self, n: u64) {
        let mut rx = self.inner.acked_tx.subscribe();
        let _ = rx.wait_for(|acked| *acked >= n).await;
    }

    /// Number of acknowledged batches.
    pub fn acked(&self) -> u64 {
        *self.inner.acked_tx.borrow()
    }

    /// Seed a running-datastore leaf.
    pub fn set_running(&self, path: KeyPath, value: Value) {
        self.inner.running.lock().unwrap().insert(path, value);
    }

    /// Remove a running-datastore subtree (host-side delete).
    pub fn remove_running(&self, path: &KeyPath) {
        self.inner
            .running
            .lock()
            .unwrap()
            .retain(|p, _| !p.starts_with(path));
    }

    /// Seed a backend entry under `/services/ipam/backend{name}`.
    pub fn seed_backend(&self, name: &str, config: &BackendConfig) {
        let base = schema::backend_path(name);
        self.set_running(base.child(schema::HOST), Value::from(config.host.clone()));
        self.set_running(base.child(schema::PORT), Value::from(config.port));
        self.set_running(
            base.child(schema::USERNAME),
            Value::from(config.username.clone()),
        );
        self.set_running(
            base.child(schema::PASSWORD),
            Value::from(config.password.clone()),
        );
    }

    /// Read an operational leaf (test helper).
    pub fn oper_value(&self, path: &KeyPath) -> Option<Value> {
        self.inner.oper.lock().unwrap().get(path).cloned()
    }

    /// Selected case of the choice at `path` (test helper).
    pub fn selected_case(&self, path: &KeyPath) -> Option<String> {
        self.inner
            .cases
            .lock()
            .unwrap()
            .get(path)
            .map(|(_, case)| case.clone())
    }

    /// Actions invoked through management sessions, in call order.
    pub fn actions(&self) -> Vec<(KeyPath, String)> {
        self.inner.actions.lock().unwrap().clone()
    }

    fn list_keys(map: &BTreeMap<KeyPath, Value>, list: &KeyPath) -> Vec<String> {
        let Some(list_name) = list.last().map(|s| s.name.clone()) else {
            return Vec::new();
        };
        let Some(parent) = list.parent() else {
            return Vec::new();
        };

        let mut keys: Vec<String> = Vec::new();
        for path in map.keys() {
            if path.len() <= list.len() || !path.starts_with(&parent) {
                continue;
            }
            let entry = &path.segments()[list.len() - 1];
            if entry.name != list_name {
                continue;
            }
            if let Some(key) = &entry.key {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }
        keys
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigReader for MemoryStore {
    async fn exists(&self, path: &KeyPath) -> Result<bool, StoreError> {
        let running = self.inner.running.lock().unwrap();
        Ok(running.keys().any(|p| p.starts_with(path)))
    }

    async fn get_elem(&self, path: &KeyPath) -> Result<Option<Value>, StoreError> {
        Ok(self.inner.running.lock().unwrap().get(path).cloned())
    }

    async fn list_entries(&self, path: &KeyPath) -> Result<Vec<String>, StoreError> {
        let running = self.inner.running.lock().unwrap();
        Ok(Self::list_keys(&running, path))
    }
}

#[async_trait]
impl OperStore for MemoryStore {
    async fn get_elem(&self, path: &KeyPath) -> Result<Option<Value>, StoreError> {
        Ok(self.inner.oper.lock().unwrap().get(path).cloned())
    }

    async fn list_entries(&self, path: &KeyPath) -> Result<Vec<String>, StoreError> {
        let oper = self.inner.oper.lock().unwrap();
        Ok(Self::list_keys(&oper, path))
    }

    async fn set_elem(&self, path: &KeyPath, value: Value) -> Result<(), StoreError> {
        self.inner.oper.lock().unwrap().insert(path.clone(), value);
        Ok(())
    }

    async fn set_case(&self, path: &KeyPath, choice: &str, case: &str) -> Result<(), StoreError> {
        self.inner
            .cases
            .lock()
            .unwrap()
            .insert(path.clone(), (choice.to_string(), case.to_string()));
        Ok(())
    }

    async fn delete(&self, path: &KeyPath) -> Result<(), StoreError> {
        let removed = self.inner.oper.lock().unwrap().remove(path);
        self.inner
            .cases
            .lock()
            .unwrap()
            .retain(|p, _| !p.starts_with(path));
        match removed {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(path.clone())),
        }
    }
}

/// The store's single mutation subscription.
pub struct MemorySubscription {
    rx: mpsc::UnboundedReceiver<Vec<MutationRecord>>,
    inner: Arc<Inner>,
}

#[async_trait]
impl MutationSubscription for MemorySubscription {
    async fn read(&mut self) -> Result<Vec<MutationRecord>, StoreError> {
        self.rx.recv().await.ok_or(StoreError::Closed)
    }

    async fn ack(&mut self) -> Result<(), StoreError> {
        self.inner.acked_tx.send_modify(|acked| *acked += 1);
        Ok(())
    }
}

struct MemoryManagementSession {
    inner: Arc<Inner>,
}

#[async_trait]
impl ManagementSession for MemoryManagementSession {
    async fn exists(&mut self, path: &KeyPath) -> Result<bool, StoreError> {
        let running = self.inner.running.lock().unwrap();
        Ok(running.keys().any(|p| p.starts_with(path)))
    }

    async fn request_action(&mut self, path: &KeyPath, action: &str) -> Result<(), StoreError> {
        self.inner
            .actions
            .lock()
            .unwrap()
            .push((path.clone(), action.to_string()));
        Ok(())
    }
}

impl ManagementAccess for MemoryStore {
    fn open_session(&self) -> Result<Box<dyn ManagementSession>, StoreError> {
        Ok(Box::new(MemoryManagementSession {
            inner: self.inner.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_running_reads() {
        let store = MemoryStore::new();
        let leaf = schema::request_path("edge", "r1")
            .child(schema::ATTRIBUTES)
            .child(schema::DESCRIPTION);
        store.set_running(leaf.clone(), json!("test"));

        assert_eq!(
            ConfigReader::get_elem(&store, &leaf).await.unwrap(),
            Some(json!("test"))
        );
        // containers exist implicitly through their leaves
        assert!(ConfigReader::exists(&store, &schema::request_path("edge", "r1"))
            .await
            .unwrap());
        assert!(!ConfigReader::exists(&store, &schema::request_path("edge", "r2"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_list_entries_collects_keys_once() {
        let store = MemoryStore::new();
        let request = schema::request_path("edge", "r1");
        for (child, leaf) in [("a", "description"), ("a", "node"), ("b", "description")] {
            store.set_running(
                request
                    .entry(schema::FROM_PREFIX_REQUEST, child)
                    .child(schema::ATTRIBUTES)
                    .child(leaf),
                json!("x"),
            );
        }

        let list = request.child(schema::FROM_PREFIX_REQUEST);
        let keys = ConfigReader::list_entries(&store, &list).await.unwrap();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_oper_roundtrip_and_delete() {
        let store = MemoryStore::new();
        let response = schema::request_path("edge", "r1").child(schema::RESPONSE);
        let leaf = response.child(schema::PREFIX_ID);

        store.set_elem(&leaf, json!(42)).await.unwrap();
        store
            .set_case(&response, schema::RESPONSE_CHOICE, schema::CASE_OK)
            .await
            .unwrap();

        assert_eq!(OperStore::get_elem(&store, &leaf).await.unwrap(), Some(json!(42)));
        assert_eq!(store.selected_case(&response).as_deref(), Some("ok"));

        store.delete(&leaf).await.unwrap();
        assert!(matches!(
            store.delete(&leaf).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_subscription_close_unblocks_reader() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe().unwrap();
        assert!(store.subscribe().is_err());

        store.publish(vec![MutationRecord::created(schema::request_path(
            "edge", "r1",
        ))]);
        let batch = sub.read().await.unwrap();
        assert_eq!(batch.len(), 1);
        sub.ack().await.unwrap();
        assert_eq!(store.acked(), 1);

        store.close();
        assert!(matches!(sub.read().await, Err(StoreError::Closed)));
    }
}
