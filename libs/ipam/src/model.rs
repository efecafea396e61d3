//! Data model for IPAM backend objects.

use serde::Deserialize;
use serde_json::{Map, Value};

/// A pool of address space on the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct Pool {
    /// Backend identifier.
    pub id: i64,

    /// Pool name, unique per backend in practice but not enforced.
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,
}

/// A prefix as allocated on the backend.
///
/// The backend owns this object; the engine only holds a copy for write-back.
#[derive(Debug, Clone, Deserialize)]
pub struct AllocatedPrefix {
    /// Backend identifier.
    pub id: i64,

    /// The assigned prefix, e.g. `10.0.0.0/24`.
    pub prefix: String,

    /// Address family, 4 or 6.
    pub family: i64,

    /// Display form of the prefix, when the backend provides one.
    #[serde(default)]
    pub display_prefix: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub node: Option<String>,

    #[serde(default)]
    pub order_id: Option<String>,

    #[serde(default)]
    pub customer_id: Option<String>,

    /// Prefix type (`reservation`, `assignment` or `host`).
    #[serde(default, rename = "type")]
    pub prefix_type: Option<String>,
}

/// Free-form client attributes attached to a prefix.
///
/// Absent fields are omitted from the request payload entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixAttributes {
    pub description: Option<String>,
    pub node: Option<String>,
    pub order_id: Option<String>,
    pub customer_id: Option<String>,

    /// Prefix type, set by the caller for derived host allocations.
    pub prefix_type: Option<String>,
}

impl PrefixAttributes {
    /// Build the `attr` map for a backend call.
    pub(crate) fn as_json(&self) -> Value {
        let mut map = Map::new();
        if let Some(v) = &self.description {
            map.insert("description".to_string(), Value::String(v.clone()));
        }
        if let Some(v) = &self.node {
            map.insert("node".to_string(), Value::String(v.clone()));
        }
        if let Some(v) = &self.order_id {
            map.insert("order_id".to_string(), Value::String(v.clone()));
        }
        if let Some(v) = &self.customer_id {
            map.insert("customer_id".to_string(), Value::String(v.clone()));
        }
        if let Some(v) = &self.prefix_type {
            map.insert("type".to_string(), Value::String(v.clone()));
        }
        Value::Object(map)
    }
}

/// Options for a single allocation call.
///
/// Constructed fresh per call and never reused; the client does not mutate it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationOptions {
    /// Address family to allocate from (4 or 6).
    pub family: Option<i64>,

    /// Requested prefix length.
    pub prefix_length: Option<i64>,
}

impl AllocationOptions {
    /// Build the `args` map for a backend call.
    pub(crate) fn as_json(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(v) = self.family {
            map.insert("family".to_string(), Value::from(v));
        }
        if let Some(v) = self.prefix_length {
            map.insert("prefix_length".to_string(), Value::from(v));
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_skip_absent_fields() {
        let attrs = PrefixAttributes {
            description: Some("core uplink".to_string()),
            node: None,
            order_id: None,
            customer_id: Some("cust-7".to_string()),
            prefix_type: None,
        };

        let json = attrs.as_json();
        let map = json.as_object().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["description"], "core uplink");
        assert_eq!(map["customer_id"], "cust-7");
        assert!(!map.contains_key("node"));
    }

    #[test]
    fn test_options_as_json() {
        let opts = AllocationOptions {
            family: Some(4),
            prefix_length: None,
        };
        let map = opts.as_json();
        assert_eq!(map.len(), 1);
        assert_eq!(map["family"], 4);
    }

    #[test]
    fn test_allocated_prefix_deserialization() {
        let json = r#"{
            "id": 42,
            "prefix": "10.0.0.0/24",
            "family": 4,
            "display_prefix": "10.0.0.0/24",
            "description": "test",
            "type": "assignment"
        }"#;

        let prefix: AllocatedPrefix = serde_json::from_str(json).unwrap();
        assert_eq!(prefix.id, 42);
        assert_eq!(prefix.prefix, "10.0.0.0/24");
        assert_eq!(prefix.family, 4);
        assert_eq!(prefix.prefix_type.as_deref(), Some("assignment"));
        assert_eq!(prefix.node, None);
    }
}
