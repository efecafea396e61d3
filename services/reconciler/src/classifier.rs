//! Diff classification.
//!
//! Turns a raw mutation batch into the deduplicated list of change requests
//! the processor executes. Pure function over materialised records, so the
//! classification rules are testable without a live store.

use tracing::{debug, warn};

use crate::keypath::KeyPath;
use crate::schema;
use crate::store::{MutationOp, MutationRecord};

/// What to do against the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Allocate,
    Deallocate,
    Update,
}

/// Whether the request allocates directly from a pool or derives from an
/// already-allocated parent prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Direct,
    FromReference,
}

/// One unit of reconciliation work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequest {
    pub op: ChangeOp,
    pub kind: RequestKind,

    /// Path of the request node (direct) or nested request node
    /// (from-reference).
    pub path: KeyPath,

    pub pool: String,
    pub request: String,

    /// Key of the nested request; `None` for direct requests.
    pub child: Option<String>,
}

impl ChangeRequest {
    fn direct(op: ChangeOp, req: schema::RequestRef) -> Self {
        Self {
            op,
            kind: RequestKind::Direct,
            path: req.path(),
            pool: req.pool,
            request: req.request,
            child: None,
        }
    }

    fn from_reference(op: ChangeOp, child: schema::ChildRef) -> Self {
        Self {
            op,
            kind: RequestKind::FromReference,
            path: child.path(),
            pool: child.pool,
            request: child.request,
            child: Some(child.child),
        }
    }

    /// Composite-key equality: kind plus (pool, request [, child]).
    fn same_target(&self, other: &ChangeRequest) -> bool {
        self.kind == other.kind
            && self.pool == other.pool
            && self.request == other.request
            && self.child == other.child
    }
}

/// Classify a mutation batch into change requests.
///
/// Iteration preserves delivery order. A `Created` or `Deleted` at a request
/// shape consumes its whole subtree: one higher-level action already handles
/// everything underneath, and reprocessing children would race the allocator.
/// `ValueSet` mutations under an attribute container collapse into at most
/// one `Update` per request, and produce none at all when the same request
/// is already queued for allocation or deallocation in this batch.
pub fn classify(records: &[MutationRecord]) -> Vec<ChangeRequest> {
    let mut requests: Vec<ChangeRequest> = Vec::new();
    let mut consumed: Vec<KeyPath> = Vec::new();

    for record in records {
        if consumed.iter().any(|root| record.path.is_descendant_of(root)) {
            continue;
        }

        match record.op {
            MutationOp::Created => {
                if let Some(req) = schema::as_request(&record.path) {
                    requests.push(ChangeRequest::direct(ChangeOp::Allocate, req));
                    consumed.push(record.path.clone());
                } else if let Some(child) = schema::as_child_request(&record.path) {
                    requests.push(ChangeRequest::from_reference(ChangeOp::Allocate, child));
                    consumed.push(record.path.clone());
                } else if schema::looks_like_request(&record.path) {
                    warn!(path = %record.path, "Ignoring malformed create mutation");
                }
            }
            MutationOp::Deleted => {
                if let Some(req) = schema::as_request(&record.path) {
                    requests.push(ChangeRequest::direct(ChangeOp::Deallocate, req));
                    consumed.push(record.path.clone());
                } else if schema::looks_like_request(&record.path) {
                    warn!(path = %record.path, "Ignoring malformed delete mutation");
                }
                // a deleted nested request is handled by its parent's
                // deallocation cascade
            }
            MutationOp::ValueSet => {
                let update = if let Some(req) = schema::as_request_attr_leaf(&record.path) {
                    Some(ChangeRequest::direct(ChangeOp::Update, req))
                } else {
                    schema::as_child_attr_leaf(&record.path)
                        .map(|child| ChangeRequest::from_reference(ChangeOp::Update, child))
                };

                if let Some(update) = update {
                    if requests.iter().any(|queued| queued.same_target(&update)) {
                        debug!(path = %record.path, "Dropping duplicate update");
                    } else {
                        requests.push(update);
                    }
                }
            }
        }
    }

    requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{request_path, ATTRIBUTES, DESCRIPTION, FROM_PREFIX_REQUEST, NODE, REQUEST};
    use crate::store::MutationRecord;
    use serde_json::json;

    fn attr_set(pool: &str, request: &str, leaf: &str) -> MutationRecord {
        MutationRecord::value_set(
            request_path(pool, request).child(ATTRIBUTES).child(leaf),
            None,
            json!("v"),
        )
    }

    #[test]
    fn test_created_request_yields_allocate() {
        let records = vec![MutationRecord::created(request_path("edge", "r1"))];
        let requests = classify(&records);

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].op, ChangeOp::Allocate);
        assert_eq!(requests[0].kind, RequestKind::Direct);
        assert_eq!(requests[0].pool, "edge");
        assert_eq!(requests[0].request, "r1");
    }

    #[test]
    fn test_create_consumes_subtree() {
        // a freshly created request arrives with its whole subtree, nested
        // children included; only the top-level allocate may come out
        let request = request_path("edge", "r1");
        let records = vec![
            MutationRecord::created(request.clone()),
            MutationRecord::value_set(
                request.child(ATTRIBUTES).child(DESCRIPTION),
                None,
                json!("test"),
            ),
            MutationRecord::created(request.entry(FROM_PREFIX_REQUEST, "loopback")),
            MutationRecord::value_set(
                request
                    .entry(FROM_PREFIX_REQUEST, "loopback")
                    .child(ATTRIBUTES)
                    .child(NODE),
                None,
                json!("pe1"),
            ),
        ];

        let requests = classify(&records);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].op, ChangeOp::Allocate);
    }

    #[test]
    fn test_value_sets_collapse_into_one_update() {
        let records = vec![
            attr_set("edge", "r1", DESCRIPTION),
            attr_set("edge", "r1", NODE),
            attr_set("edge", "r1", "customer-id"),
        ];

        let requests = classify(&records);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].op, ChangeOp::Update);
        assert_eq!(requests[0].kind, RequestKind::Direct);
    }

    #[test]
    fn test_update_dedup_is_scoped_per_request() {
        let records = vec![
            attr_set("edge", "r1", DESCRIPTION),
            attr_set("edge", "r2", DESCRIPTION),
            attr_set("edge", "r1", NODE),
        ];

        let requests = classify(&records);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].request, "r1");
        assert_eq!(requests[1].request, "r2");
    }

    #[test]
    fn test_nested_updates_dedup_by_child() {
        let child_a = request_path("edge", "r1").entry(FROM_PREFIX_REQUEST, "a");
        let child_b = request_path("edge", "r1").entry(FROM_PREFIX_REQUEST, "b");
        let records = vec![
            MutationRecord::value_set(child_a.child(ATTRIBUTES).child(NODE), None, json!("pe1")),
            MutationRecord::value_set(
                child_a.child(ATTRIBUTES).child(DESCRIPTION),
                None,
                json!("x"),
            ),
            MutationRecord::value_set(child_b.child(ATTRIBUTES).child(NODE), None, json!("pe2")),
        ];

        let requests = classify(&records);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].child.as_deref(), Some("a"));
        assert_eq!(requests[1].child.as_deref(), Some("b"));
        assert!(requests
            .iter()
            .all(|r| r.kind == RequestKind::FromReference && r.op == ChangeOp::Update));
    }

    #[test]
    fn test_batch_order_preserved() {
        let records = vec![
            MutationRecord::created(request_path("edge", "r1")),
            MutationRecord::deleted(request_path("core", "r9")),
        ];

        let requests = classify(&records);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].op, ChangeOp::Allocate);
        assert_eq!(requests[1].op, ChangeOp::Deallocate);
    }

    #[test]
    fn test_allocate_suppresses_attribute_update() {
        let request = request_path("edge", "r1");
        let records = vec![
            MutationRecord::created(request.clone()),
            // arrives inside the created subtree; must not become an Update
            attr_set("edge", "r1", DESCRIPTION),
        ];

        let requests = classify(&records);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].op, ChangeOp::Allocate);
    }

    #[test]
    fn test_unrelated_and_malformed_paths_ignored() {
        let records = vec![
            MutationRecord::value_set(
                KeyPath::root().child("services").child("dns").child("ttl"),
                None,
                json!(300),
            ),
            // request entry without a key
            MutationRecord::created(
                KeyPath::root()
                    .child("services")
                    .child("ipam")
                    .entry("from-pool", "edge")
                    .child(REQUEST),
            ),
        ];

        assert!(classify(&records).is_empty());
    }

    #[test]
    fn test_deleted_nested_request_is_ignored() {
        let records = vec![MutationRecord::deleted(
            request_path("edge", "r1").entry(FROM_PREFIX_REQUEST, "loopback"),
        )];

        assert!(classify(&records).is_empty());
    }
}
