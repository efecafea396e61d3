//! Config tree shapes the engine cares about.
//!
//! The service subtree looks like:
//!
//! ```text
//! /services/ipam/backend{<name>}/host | port | username | password
//! /services/ipam/from-pool{<pool>}/request{<request>}/
//!     arguments/family | prefix-length
//!     attributes/description | node | order-id | customer-id
//!     redeploy-service
//!     from-prefix-request{<name>}/attributes/...
//! ```
//!
//! and each request (direct or nested) owns a `response` container in the
//! operational datastore. This module centralises the segment names plus the
//! shape matchers that turn raw mutation paths into typed references.

use crate::keypath::KeyPath;

pub const SERVICES: &str = "services";
pub const IPAM: &str = "ipam";
pub const BACKEND: &str = "backend";
pub const FROM_POOL: &str = "from-pool";
pub const REQUEST: &str = "request";
pub const FROM_PREFIX_REQUEST: &str = "from-prefix-request";
pub const ATTRIBUTES: &str = "attributes";
pub const ARGUMENTS: &str = "arguments";
pub const RESPONSE: &str = "response";
pub const REDEPLOY_SERVICE: &str = "redeploy-service";

// attributes/ leaves
pub const DESCRIPTION: &str = "description";
pub const NODE: &str = "node";
pub const ORDER_ID: &str = "order-id";
pub const CUSTOMER_ID: &str = "customer-id";

// arguments/ leaves
pub const FAMILY: &str = "family";
pub const PREFIX_LENGTH: &str = "prefix-length";

// response/ leaves and choice
pub const PREFIX: &str = "prefix";
pub const PREFIX_ID: &str = "prefix-id";
pub const ERROR: &str = "error";
pub const RESPONSE_CHOICE: &str = "response-choice";
pub const CASE_OK: &str = "ok";
pub const CASE_ERROR: &str = "error";

// backend{<name>}/ leaves
pub const HOST: &str = "host";
pub const PORT: &str = "port";
pub const USERNAME: &str = "username";
pub const PASSWORD: &str = "password";

/// A direct request, keyed by pool and request name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRef {
    pub pool: String,
    pub request: String,
}

impl RequestRef {
    pub fn path(&self) -> KeyPath {
        request_path(&self.pool, &self.request)
    }
}

/// A from-prefix request nested under a direct request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRef {
    pub pool: String,
    pub request: String,
    pub child: String,
}

impl ChildRef {
    pub fn path(&self) -> KeyPath {
        self.parent()
            .path()
            .entry(FROM_PREFIX_REQUEST, &self.child)
    }

    pub fn parent(&self) -> RequestRef {
        RequestRef {
            pool: self.pool.clone(),
            request: self.request.clone(),
        }
    }
}

/// Path to the service root.
pub fn service_root() -> KeyPath {
    KeyPath::root().child(SERVICES).child(IPAM)
}

/// Path to a direct request node.
pub fn request_path(pool: &str, request: &str) -> KeyPath {
    service_root()
        .entry(FROM_POOL, pool)
        .entry(REQUEST, request)
}

/// Path to a backend entry.
pub fn backend_path(name: &str) -> KeyPath {
    service_root().entry(BACKEND, name)
}

fn segment_key(path: &KeyPath, index: usize, name: &str) -> Option<String> {
    let segment = path.segments().get(index)?;
    if segment.name != name {
        return None;
    }
    segment.key.clone()
}

fn has_service_root(path: &KeyPath) -> bool {
    let segments = path.segments();
    segments.len() >= 2 && segments[0].name == SERVICES && segments[1].name == IPAM
        && segments[0].key.is_none()
        && segments[1].key.is_none()
}

/// Match `/services/ipam/from-pool{P}/request{R}`.
pub fn as_request(path: &KeyPath) -> Option<RequestRef> {
    if path.len() != 4 || !has_service_root(path) {
        return None;
    }
    Some(RequestRef {
        pool: segment_key(path, 2, FROM_POOL)?,
        request: segment_key(path, 3, REQUEST)?,
    })
}

/// Match `/services/ipam/from-pool{P}/request{R}/from-prefix-request{C}`.
pub fn as_child_request(path: &KeyPath) -> Option<ChildRef> {
    if path.len() != 5 || !has_service_root(path) {
        return None;
    }
    Some(ChildRef {
        pool: segment_key(path, 2, FROM_POOL)?,
        request: segment_key(path, 3, REQUEST)?,
        child: segment_key(path, 4, FROM_PREFIX_REQUEST)?,
    })
}

/// Match a leaf directly under a direct request's `attributes` container.
pub fn as_request_attr_leaf(path: &KeyPath) -> Option<RequestRef> {
    if path.len() != 6 {
        return None;
    }
    let segments = path.segments();
    if segments[4].name != ATTRIBUTES || segments[4].key.is_some() || segments[5].key.is_some() {
        return None;
    }
    as_request(&path.parent()?.parent()?)
}

/// Match a leaf directly under a nested request's `attributes` container.
pub fn as_child_attr_leaf(path: &KeyPath) -> Option<ChildRef> {
    if path.len() != 7 {
        return None;
    }
    let segments = path.segments();
    if segments[5].name != ATTRIBUTES || segments[5].key.is_some() || segments[6].key.is_some() {
        return None;
    }
    as_child_request(&path.parent()?.parent()?)
}

/// Returns true for paths that sit where a request or nested request should,
/// but failed to match (e.g. a list entry with no key). Used to warn about
/// malformed mutations instead of silently ignoring them.
pub fn looks_like_request(path: &KeyPath) -> bool {
    matches!(path.last(), Some(last)
        if (last.name == REQUEST && path.len() == 4)
            || (last.name == FROM_PREFIX_REQUEST && path.len() == 5))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let path = request_path("edge", "r1");
        let req = as_request(&path).unwrap();
        assert_eq!(req.pool, "edge");
        assert_eq!(req.request, "r1");
        assert_eq!(req.path(), path);

        // wrong depth and wrong names do not match
        assert!(as_request(&path.child(ATTRIBUTES)).is_none());
        assert!(as_request(&service_root().entry(BACKEND, "b").entry(REQUEST, "r")).is_none());
    }

    #[test]
    fn test_child_request_shape() {
        let path = request_path("edge", "r1").entry(FROM_PREFIX_REQUEST, "loopback");
        let child = as_child_request(&path).unwrap();
        assert_eq!(child.pool, "edge");
        assert_eq!(child.request, "r1");
        assert_eq!(child.child, "loopback");
        assert_eq!(child.path(), path);
        assert_eq!(child.parent().path(), request_path("edge", "r1"));
    }

    #[test]
    fn test_attr_leaf_shapes() {
        let direct = request_path("edge", "r1").child(ATTRIBUTES).child(DESCRIPTION);
        assert_eq!(as_request_attr_leaf(&direct).unwrap().request, "r1");

        let nested = request_path("edge", "r1")
            .entry(FROM_PREFIX_REQUEST, "loopback")
            .child(ATTRIBUTES)
            .child(NODE);
        assert_eq!(as_child_attr_leaf(&nested).unwrap().child, "loopback");

        // a leaf below arguments is not an attribute leaf
        let args = request_path("edge", "r1").child(ARGUMENTS).child(FAMILY);
        assert!(as_request_attr_leaf(&args).is_none());

        // a deeper leaf under attributes does not match either
        let deep = request_path("edge", "r1")
            .child(ATTRIBUTES)
            .child("extra")
            .child("leaf");
        assert!(as_request_attr_leaf(&deep).is_none());
    }

    #[test]
    fn test_looks_like_request() {
        let unkeyed = service_root().entry(FROM_POOL, "edge").child(REQUEST);
        assert!(looks_like_request(&unkeyed));
        assert!(as_request(&unkeyed).is_none());

        let fine = request_path("edge", "r1");
        assert!(looks_like_request(&fine));
        assert!(!looks_like_request(&fine.child(ATTRIBUTES)));
    }
}
