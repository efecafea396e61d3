//! Reconciliation loop.
//!
//! The engine blocks for mutation batches, classifies them, and drives each
//! resulting change request through the processor. One batch is fully
//! drained before the next is read, so ordering within a batch is the
//! classifier's ordering and batches never interleave.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use prefixd_ipam::{AllocatorConnector, BackendConfig};
use serde_json::Value;

use crate::classifier::classify;
use crate::keypath::KeyPath;
use crate::processor::RequestProcessor;
use crate::redeploy::RedeployScheduler;
use crate::schema;
use crate::store::{
    ConfigReader, ManagementAccess, MutationRecord, MutationSubscription, OperStore, StoreError,
};

/// The reconciliation engine.
pub struct Engine {
    reader: Arc<dyn ConfigReader>,
    oper: Arc<dyn OperStore>,
    connector: Arc<dyn AllocatorConnector>,
    redeploy: RedeployScheduler,

    /// Name of the backend entry to read connection settings from.
    backend: String,
}

impl Engine {
    pub fn new(
        reader: Arc<dyn ConfigReader>,
        oper: Arc<dyn OperStore>,
        management: Arc<dyn ManagementAccess>,
        connector: Arc<dyn AllocatorConnector>,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            reader,
            oper,
            connector,
            redeploy: RedeployScheduler::new(management),
            backend: backend.into(),
        }
    }

    /// Run until the host closes the subscription.
    pub async fn run(&self, mut subscription: Box<dyn MutationSubscription>) {
        info!(backend = %self.backend, "Starting reconciliation loop");

        loop {
            let records = match subscription.read().await {
                Ok(records) => records,
                Err(StoreError::Closed) => {
                    info!("Mutation subscription closed, stopping reconciliation loop");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Mutation subscription failed, stopping reconciliation loop");
                    return;
                }
            };

            self.process_batch(&records).await;

            // acknowledgement is flow control toward the store, not a
            // success signal; it runs even for batches that were skipped
            if let Err(e) = subscription.ack().await {
                warn!(error = %e, "Failed to acknowledge mutation batch");
            }
        }
    }

    /// Classify and process one mutation batch.
    pub async fn process_batch(&self, records: &[MutationRecord]) {
        let requests = classify(records);
        debug!(
            mutations = records.len(),
            requests = requests.len(),
            "Classified mutation batch"
        );
        if requests.is_empty() {
            return;
        }

        // backend settings are re-read every batch so credential rotation
        // takes effect without a restart
        let config = match self.backend_config().await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    backend = %self.backend,
                    error = %e,
                    "Backend configuration unreadable, skipping batch"
                );
                return;
            }
        };

        let allocator = match self.connector.connect(&config) {
            Ok(allocator) => allocator,
            Err(e) => {
                error!(
                    host = %config.host,
                    port = config.port,
                    error = %e,
                    "Could not connect to backend, skipping batch"
                );
                return;
            }
        };

        let processor = RequestProcessor::new(
            self.reader.clone(),
            self.oper.clone(),
            allocator,
            self.redeploy.clone(),
        );
        for request in &requests {
            processor.process(request).await;
        }
    }

    async fn backend_config(&self) -> anyhow::Result<BackendConfig> {
        let base = schema::backend_path(&self.backend);

        let host = self.leaf_string(&base.child(schema::HOST)).await?;
        let username = self.leaf_string(&base.child(schema::USERNAME)).await?;
        let password = self.leaf_string(&base.child(schema::PASSWORD)).await?;

        let port_path = base.child(schema::PORT);
        let port_value = self
            .reader
            .get_elem(&port_path)
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing backend leaf {port_path}"))?;
        let port = port_value
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| anyhow::anyhow!("invalid backend port {port_value}"))?;

        Ok(BackendConfig {
            host,
            port,
            username,
            password,
        })
    }

    async fn leaf_string(&self, path: &KeyPath) -> anyhow::Result<String> {
        match self.reader.get_elem(path).await? {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Ok(other.to_string()),
            None => anyhow::bail!("missing backend leaf {path}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use prefixd_ipam::{MockAllocator, MockConnector};

    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::MutationRecord;

    fn engine_over(store: &MemoryStore, connector: Arc<MockConnector>) -> Engine {
        Engine::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            connector,
            "default",
        )
    }

    #[tokio::test]
    async fn test_empty_classification_skips_backend_connect() {
        let store = MemoryStore::new();
        let connector = Arc::new(MockConnector::new(Arc::new(MockAllocator::new())));
        let engine = engine_over(&store, connector.clone());

        let records = vec![MutationRecord::value_set(
            crate::keypath::KeyPath::root().child("services").child("dns"),
            None,
            json!(1),
        )];
        engine.process_batch(&records).await;

        assert!(connector.connections().is_empty());
    }

    #[tokio::test]
    async fn test_missing_backend_config_skips_batch() {
        let store = MemoryStore::new();
        let connector = Arc::new(MockConnector::new(Arc::new(MockAllocator::new())));
        let engine = engine_over(&store, connector.clone());

        // a real request, but no backend entry seeded
        let records = vec![MutationRecord::created(schema::request_path("edge", "r1"))];
        engine.process_batch(&records).await;

        assert!(connector.connections().is_empty());
        // nothing written for the request either - the whole batch was skipped
        let response = schema::request_path("edge", "r1").child(schema::RESPONSE);
        assert!(store.selected_case(&response).is_none());
    }
}
