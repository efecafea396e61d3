//! IPAM backend client interface and JSON-RPC implementation.
//!
//! The backend exposes five operations the engine needs:
//! pool lookup, allocation from a pool, allocation from a parent prefix,
//! attribute updates and deallocation (plus lookup by identifier).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{ErrorKind, IpamError};
use crate::model::{AllocatedPrefix, AllocationOptions, Pool, PrefixAttributes};

/// Tag recorded on the backend for every mutation made through this client.
pub const AUTHORITATIVE_SOURCE: &str = "prefixd";

/// Connection parameters for the backend, read from the config store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// IPAM backend interface.
#[async_trait]
pub trait AllocatorClient: Send + Sync {
    /// Look up a pool by name.
    ///
    /// Fails with [`ErrorKind::NotFound`] when no pool matches and
    /// [`ErrorKind::InvalidInput`] when the name is ambiguous.
    async fn find_pool(&self, name: &str) -> Result<Pool, IpamError>;

    /// Allocate a new prefix out of a pool.
    async fn allocate_from_pool(
        &self,
        pool: &Pool,
        attributes: &PrefixAttributes,
        options: &AllocationOptions,
    ) -> Result<AllocatedPrefix, IpamError>;

    /// Allocate a new prefix out of an already-allocated parent prefix.
    async fn allocate_from_prefix(
        &self,
        parent: &AllocatedPrefix,
        attributes: &PrefixAttributes,
        options: &AllocationOptions,
    ) -> Result<AllocatedPrefix, IpamError>;

    /// Replace the client attributes of an existing prefix.
    async fn update_attributes(
        &self,
        id: i64,
        attributes: &PrefixAttributes,
    ) -> Result<AllocatedPrefix, IpamError>;

    /// Return a prefix to its pool.
    async fn deallocate(&self, id: i64) -> Result<(), IpamError>;

    /// Fetch a prefix by identifier.
    async fn get(&self, id: i64) -> Result<AllocatedPrefix, IpamError>;
}

/// Builds an [`AllocatorClient`] for a backend configuration.
///
/// The engine connects once per mutation batch with freshly-read credentials,
/// so credential rotation takes effect without a restart. Tests inject a
/// connector that hands out a mock client instead.
pub trait AllocatorConnector: Send + Sync {
    fn connect(&self, config: &BackendConfig) -> Result<Arc<dyn AllocatorClient>, IpamError>;
}

/// Connector for the JSON-RPC backend.
pub struct HttpConnector;

impl AllocatorConnector for HttpConnector {
    fn connect(&self, config: &BackendConfig) -> Result<Arc<dyn AllocatorClient>, IpamError> {
        Ok(Arc::new(HttpAllocatorClient::new(config)))
    }
}

/// JSON-RPC 2.0 client for the IPAM backend.
pub struct HttpAllocatorClient {
    client: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    code: i64,
    message: String,
}

impl HttpAllocatorClient {
    /// Create a new backend client.
    pub fn new(config: &BackendConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            endpoint: format!("http://{}:{}/RPC2", config.host, config.port),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    fn auth(&self) -> Value {
        json!({
            "username": self.username,
            "password": self.password,
            "authoritative_source": AUTHORITATIVE_SOURCE,
        })
    }

    /// Perform one JSON-RPC call against the backend.
    async fn call(&self, method: &str, params: Value) -> Result<Value, IpamError> {
        debug!(endpoint = %self.endpoint, method, "Calling IPAM backend");

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": [params],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| IpamError::transport(format!("{method} request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(IpamError::new(
                ErrorKind::AuthFailed,
                format!("backend rejected credentials ({status})"),
            ));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(IpamError::transport(format!(
                "backend returned {status}: {text}"
            )));
        }

        let envelope: RpcEnvelope = response
            .json()
            .await
            .map_err(|e| IpamError::transport(format!("{method} response unreadable: {e}")))?;

        if let Some(fault) = envelope.error {
            return Err(IpamError::from_fault(fault.code, fault.message));
        }

        envelope
            .result
            .ok_or_else(|| IpamError::transport(format!("{method} response missing result")))
    }

    fn parse<T: serde::de::DeserializeOwned>(method: &str, value: Value) -> Result<T, IpamError> {
        serde_json::from_value(value)
            .map_err(|e| IpamError::transport(format!("{method} result malformed: {e}")))
    }
}

#[async_trait]
impl AllocatorClient for HttpAllocatorClient {
    async fn find_pool(&self, name: &str) -> Result<Pool, IpamError> {
        let result = self
            .call("list_pool", json!({ "auth": self.auth(), "pool": { "name": name } }))
            .await?;

        let mut pools: Vec<Pool> = Self::parse("list_pool", result)?;
        match pools.len() {
            0 => Err(IpamError::new(
                ErrorKind::NotFound,
                format!("no pool named {name:?}"),
            )),
            1 => Ok(pools.remove(0)),
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
        let mut args = options.as_json();
        args.insert("from-pool".to_string(), json!({ "id": pool.id }));

        let result = self
            .call(
                "add_prefix",
                json!({ "auth": self.auth(), "attr": attributes.as_json(), "args": args }),
            )
            .await?;

        Self::parse("add_prefix", result)
    }

    async fn allocate_from_prefix(
        &self,
        parent: &AllocatedPrefix,
        attributes: &PrefixAttributes,
        options: &AllocationOptions,
    ) -> Result<AllocatedPrefix, IpamError> {
        let mut args = options.as_json();
        args.insert("from-prefix".to_string(), json!([parent.prefix]));

        let result = self
            .call(
                "add_prefix",
                json!({ "auth": self.auth(), "attr": attributes.as_json(), "args": args }),
            )
            .await?;

        Self::parse("add_prefix", result)
    }

    async fn update_attributes(
        &self,
        id: i64,
        attributes: &PrefixAttributes,
    ) -> Result<AllocatedPrefix, IpamError> {
        let result = self
            .call(
                "edit_prefix",
                json!({ "auth": self.auth(), "prefix": { "id": id }, "attr": attributes.as_json() }),
            )
            .await?;

        Self::parse("edit_prefix", result)
    }

    async fn deallocate(&self, id: i64) -> Result<(), IpamError> {
        self.call(
            "remove_prefix",
            json!({ "auth": self.auth(), "prefix": { "id": id } }),
        )
        .await?;
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<AllocatedPrefix, IpamError> {
        let result = self
            .call(
                "list_prefix",
                json!({ "auth": self.auth(), "prefix": { "id": id } }),
            )
            .await?;

        let mut prefixes: Vec<AllocatedPrefix> = Self::parse("list_prefix", result)?;
        if prefixes.is_empty() {
            return Err(IpamError::new(
                ErrorKind::NotFound,
                format!("no prefix with id {id}"),
            ));
        }
        Ok(prefixes.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_from_config() {
        let client = HttpAllocatorClient::new(&BackendConfig {
            host: "ipam.example.net".to_string(),
            port: 1337,
            username: "svc".to_string(),
            password: "secret".to_string(),
        });
        assert_eq!(client.endpoint, "http://ipam.example.net:1337/RPC2");
    }

    #[test]
    fn test_rpc_envelope_fault() {
        let json = r#"{"jsonrpc": "2.0", "id": 1, "error": {"code": 1300, "message": "no such pool"}}"#;
        let envelope: RpcEnvelope = serde_json::from_str(json).unwrap();
        let fault = envelope.error.unwrap();
        assert_eq!(fault.code, 1300);
        assert_eq!(fault.message, "no such pool");
    }
}
