//! Request processing.
//!
//! Executes one change request end to end: fetch attribute data from the
//! running config, drive the allocator, and write the outcome into the
//! operational response region. Failures are contained per request - a
//! request that cannot be satisfied gets an error response and the rest of
//! the batch still drains.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use prefixd_ipam::{
    AllocatedPrefix, AllocationOptions, AllocatorClient, IpamError, PrefixAttributes,
};

use crate::classifier::{ChangeOp, ChangeRequest, RequestKind};
use crate::keypath::KeyPath;
use crate::redeploy::RedeployScheduler;
use crate::schema;
use crate::store::{ConfigReader, OperStore, StoreError};

/// Derived allocations out of a parent prefix are single-host assignments.
const REFERENCE_PREFIX_LENGTH: i64 = 32;
const REFERENCE_PREFIX_TYPE: &str = "host";

/// A change request that could not be satisfied.
///
/// Converted into an error response record; never propagated out of
/// [`RequestProcessor::process`].
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("backend pool {0:?} not found")]
    PoolNotFound(String),

    #[error("missing {0} argument under {1}")]
    MissingArgument(&'static str, KeyPath),

    #[error("no allocation recorded at {0}")]
    MissingAllocation(KeyPath),

    #[error(transparent)]
    Allocator(#[from] IpamError),

    #[error("config store: {0}")]
    Store(#[from] StoreError),
}

/// Executes change requests against one allocator connection.
///
/// Built fresh per mutation batch; holds no state across batches.
pub struct RequestProcessor {
    reader: Arc<dyn ConfigReader>,
    oper: Arc<dyn OperStore>,
    allocator: Arc<dyn AllocatorClient>,
    redeploy: RedeployScheduler,
}

impl RequestProcessor {
    pub fn new(
        reader: Arc<dyn ConfigReader>,
        oper: Arc<dyn OperStore>,
        allocator: Arc<dyn AllocatorClient>,
        redeploy: RedeployScheduler,
    ) -> Self {
        Self {
            reader,
            oper,
            allocator,
            redeploy,
        }
    }

    /// Process one change request, writing the outcome to the response
    /// region. Never fails; errors become error response records.
    pub async fn process(&self, request: &ChangeRequest) {
        debug!(
            op = ?request.op,
            kind = ?request.kind,
            path = %request.path,
            "Processing change request"
        );

        let outcome = match (request.op, request.kind) {
            (ChangeOp::Allocate, RequestKind::Direct) => self.allocate_direct(request).await,
            (ChangeOp::Allocate, RequestKind::FromReference) => {
                self.allocate_from_reference(request).await
            }
            (ChangeOp::Update, _) => self.update(request).await,
            (ChangeOp::Deallocate, RequestKind::Direct) => self.deallocate_direct(request).await,
            (ChangeOp::Deallocate, RequestKind::FromReference) => {
                // nested requests are released by their parent's cascade
                debug!(path = %request.path, "Nothing to do for nested deallocate");
                Ok(())
            }
        };

        if let Err(e) = outcome {
            error!(path = %request.path, error = %e, "Change request failed");
            self.write_error(&request.path, &e.to_string()).await;
        }
    }

    /// Allocate a new prefix out of a pool, then satisfy any nested
    /// from-prefix requests against it and trigger the downstream redeploy.
    async fn allocate_direct(&self, request: &ChangeRequest) -> Result<(), ProcessError> {
        info!(pool = %request.pool, request = %request.request, "Allocating prefix from pool");

        let pool = self
            .allocator
            .find_pool(&request.pool)
            .await
            .map_err(|e| match e {
                e if e.is_not_found() => ProcessError::PoolNotFound(request.pool.clone()),
                e => ProcessError::Allocator(e),
            })?;

        let options = self
            .read_options(&request.path.child(schema::ARGUMENTS))
            .await?;
        let attributes = self
            .read_attributes(&request.path.child(schema::ATTRIBUTES))
            .await?;

        let allocated = self
            .allocator
            .allocate_from_pool(&pool, &attributes, &options)
            .await?;

        self.write_ok_response(&request.path.child(schema::RESPONSE), &allocated)
            .await?;

        // nested requests present right now; ones created later arrive as
        // their own mutations
        let child_list = request.path.child(schema::FROM_PREFIX_REQUEST);
        if self.reader.exists(&child_list).await? {
            for key in self.reader.list_entries(&child_list).await? {
                let child_path = request.path.entry(schema::FROM_PREFIX_REQUEST, &key);
                self.allocate_child(&child_path, &allocated).await;
            }
        }

        self.trigger_redeploy(&request.path).await;
        Ok(())
    }

    /// Allocate a nested request whose parent was allocated in an earlier
    /// batch.
    async fn allocate_from_reference(&self, request: &ChangeRequest) -> Result<(), ProcessError> {
        let parent_path = schema::request_path(&request.pool, &request.request);
        let parent_id = self.response_id(&parent_path).await?;
        let parent = self.allocator.get(parent_id).await?;

        self.try_allocate_child(&request.path, &parent).await
    }

    /// Allocate a nested request against its parent, containing failures to
    /// the child's own response record.
    async fn allocate_child(&self, child_path: &KeyPath, parent: &AllocatedPrefix) {
        if let Err(e) = self.try_allocate_child(child_path, parent).await {
            error!(path = %child_path, error = %e, "Failed to allocate prefix from parent prefix");
            self.write_error(child_path, &e.to_string()).await;
        }
    }

    async fn try_allocate_child(
        &self,
        child_path: &KeyPath,
        parent: &AllocatedPrefix,
    ) -> Result<(), ProcessError> {
        info!(path = %child_path, parent = %parent.prefix, "Allocating prefix from parent prefix");

        let mut attributes = self
            .read_attributes(&child_path.child(schema::ATTRIBUTES))
            .await?;
        attributes.prefix_type = Some(REFERENCE_PREFIX_TYPE.to_string());

        let options = AllocationOptions {
            family: None,
            prefix_length: Some(REFERENCE_PREFIX_LENGTH),
        };

        let allocated = self
            .allocator
            .allocate_from_prefix(parent, &attributes, &options)
            .await?;

        self.write_ok_response(&child_path.child(schema::RESPONSE), &allocated)
            .await
    }

    /// Push current config attributes to the backend and refresh the
    /// response record.
    async fn update(&self, request: &ChangeRequest) -> Result<(), ProcessError> {
        info!(path = %request.path, "Updating prefix attributes");

        let id = self.response_id(&request.path).await?;
        let attributes = self
            .read_attributes(&request.path.child(schema::ATTRIBUTES))
            .await?;

        let updated = self.allocator.update_attributes(id, &attributes).await?;
        self.write_ok_response(&request.path.child(schema::RESPONSE), &updated)
            .await
    }

    /// Deallocate a direct request: children first, then the parent, then
    /// every response record. A child failure never aborts the cascade.
    async fn deallocate_direct(&self, request: &ChangeRequest) -> Result<(), ProcessError> {
        info!(pool = %request.pool, request = %request.request, "Deallocating prefix");

        // the config subtree is already gone from the running datastore, so
        // children are enumerated from their response entries
        let child_list = request.path.child(schema::FROM_PREFIX_REQUEST);
        for key in self.oper.list_entries(&child_list).await? {
            let child_response = request
                .path
                .entry(schema::FROM_PREFIX_REQUEST, &key)
                .child(schema::RESPONSE);
            self.deallocate_response(&child_response).await;
            self.remove_response(&child_response).await;
        }

        let response = request.path.child(schema::RESPONSE);
        self.deallocate_response(&response).await;
        self.remove_response(&response).await;
        Ok(())
    }

    /// Return the prefix recorded at `response` to the backend. An
    /// already-gone prefix is a non-fatal outcome.
    async fn deallocate_response(&self, response: &KeyPath) {
        let leaf = response.child(schema::PREFIX_ID);
        let id = match self.oper.get_elem(&leaf).await {
            Ok(Some(value)) => match value.as_i64() {
                Some(id) => id,
                None => {
                    warn!(path = %leaf, "Recorded identifier is not numeric, skipping deallocate");
                    return;
                }
            },
            Ok(None) => {
                debug!(path = %response, "No allocation recorded, nothing to deallocate");
                return;
            }
            Err(e) => {
                error!(path = %leaf, error = %e, "Could not read recorded identifier");
                return;
            }
        };

        match self.allocator.deallocate(id).await {
            Ok(()) => info!(id, path = %response, "Deallocated prefix"),
            Err(e) if e.is_not_found() => {
                debug!(id, path = %response, "Prefix already gone from backend");
            }
            Err(e) => {
                error!(id, path = %response, error = %e, "Failed to deallocate prefix");
            }
        }
    }

    async fn response_id(&self, request_path: &KeyPath) -> Result<i64, ProcessError> {
        let leaf = request_path
            .child(schema::RESPONSE)
            .child(schema::PREFIX_ID);
        self.oper
            .get_elem(&leaf)
            .await?
            .and_then(|value| value.as_i64())
            .ok_or(ProcessError::MissingAllocation(leaf))
    }

    async fn read_attributes(&self, attr_path: &KeyPath) -> Result<PrefixAttributes, ProcessError> {
        Ok(PrefixAttributes {
            description: self.read_string(&attr_path.child(schema::DESCRIPTION)).await?,
            node: self.read_string(&attr_path.child(schema::NODE)).await?,
            order_id: self.read_string(&attr_path.child(schema::ORDER_ID)).await?,
            customer_id: self.read_string(&attr_path.child(schema::CUSTOMER_ID)).await?,
            prefix_type: None,
        })
    }

    async fn read_string(&self, path: &KeyPath) -> Result<Option<String>, StoreError> {
        Ok(self.reader.get_elem(path).await?.map(|value| match value {
            Value::String(s) => s,
            other => other.to_string(),
        }))
    }

    async fn read_options(&self, args_path: &KeyPath) -> Result<AllocationOptions, ProcessError> {
        let family = self
            .reader
            .get_elem(&args_path.child(schema::FAMILY))
            .await?
            .and_then(|value| value.as_i64())
            .ok_or_else(|| ProcessError::MissingArgument("family", args_path.clone()))?;

        let prefix_length = self
            .reader
            .get_elem(&args_path.child(schema::PREFIX_LENGTH))
            .await?
            .and_then(|value| value.as_i64());

        Ok(AllocationOptions {
            family: Some(family),
            prefix_length,
        })
    }

    async fn write_ok_response(
        &self,
        response: &KeyPath,
        allocated: &AllocatedPrefix,
    ) -> Result<(), ProcessError> {
        info!(
            path = %response,
            prefix = %allocated.prefix,
            id = allocated.id,
            "Writing allocation response"
        );

        self.oper
            .set_elem(&response.child(schema::PREFIX), Value::from(allocated.prefix.clone()))
            .await?;
        self.oper
            .set_elem(&response.child(schema::PREFIX_ID), Value::from(allocated.id))
            .await?;

        let attrs = [
            (schema::CUSTOMER_ID, &allocated.customer_id),
            (schema::DESCRIPTION, &allocated.description),
            (schema::NODE, &allocated.node),
            (schema::ORDER_ID, &allocated.order_id),
        ];
        for (leaf, value) in attrs {
            if let Some(value) = value {
                self.oper
                    .set_elem(&response.child(leaf), Value::from(value.clone()))
                    .await?;
            }
        }

        self.oper
            .set_case(response, schema::RESPONSE_CHOICE, schema::CASE_OK)
            .await?;
        Ok(())
    }

    /// Write an error response record for the request at `request_path`.
    async fn write_error(&self, request_path: &KeyPath, message: &str) {
        let response = request_path.child(schema::RESPONSE);
        if let Err(e) = self
            .oper
            .set_elem(&response.child(schema::ERROR), Value::from(message))
            .await
        {
            error!(path = %response, error = %e, "Failed to write error response");
            return;
        }
        if let Err(e) = self
            .oper
            .set_case(&response, schema::RESPONSE_CHOICE, schema::CASE_ERROR)
            .await
        {
            error!(path = %response, error = %e, "Failed to select error case");
        }
    }

    /// Delete every leaf of a response record, tolerating absent leaves.
    async fn remove_response(&self, response: &KeyPath) {
        debug!(path = %response, "Removing response record");
        let leaves = [
            schema::PREFIX,
            schema::PREFIX_ID,
            schema::CUSTOMER_ID,
            schema::DESCRIPTION,
            schema::NODE,
            schema::ORDER_ID,
            schema::ERROR,
        ];
        for leaf in leaves {
            match self.oper.delete(&response.child(leaf)).await {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(e) => {
                    warn!(path = %response, leaf, error = %e, "Failed to delete response leaf");
                }
            }
        }
    }

    /// Kick off the downstream redeploy for a request, when configured.
    /// Unreadable or missing `redeploy-service` just skips the redeploy.
    async fn trigger_redeploy(&self, request_path: &KeyPath) {
        let leaf = request_path.child(schema::REDEPLOY_SERVICE);
        let target = match self.reader.get_elem(&leaf).await {
            Ok(Some(Value::String(target))) => target,
            Ok(Some(other)) => {
                warn!(path = %leaf, value = %other, "redeploy-service is not a path string, skipping redeploy");
                return;
            }
            Ok(None) => {
                debug!(path = %request_path, "No redeploy-service configured");
                return;
            }
            Err(e) => {
                warn!(path = %leaf, error = %e, "Could not read redeploy-service, skipping redeploy");
                return;
            }
        };

        match target.parse::<KeyPath>() {
            Ok(path) => {
                info!(request = %request_path, target = %path, "Scheduling redeploy");
                self.redeploy.schedule(path);
            }
            Err(e) => {
                warn!(path = %leaf, error = %e, "Invalid redeploy-service path, skipping redeploy");
            }
        }
    }
}
