//! Edge upsert statements.

use super::schema::{EdgeType, NodeLabel};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Pattern selecting edge endpoints: every node with `label` whose `property` equals the
/// given value, or every node with `label` when no property is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMatch {
    pub label: NodeLabel,
    pub property: Option<(String, Value)>,
}

impl NodeMatch {
    /// Match a single node by its key.
    pub fn by_id(label: NodeLabel, id: impl Into<String>) -> Self {
        Self {
            label,
            property: Some(("id".to_string(), Value::String(id.into()))),
        }
    }

    /// Match nodes by a property value (e.g. `Team{slug: "core"}`).
    pub fn by(label: NodeLabel, property: &str, value: impl Into<Value>) -> Self {
        Self {
            label,
            property: Some((property.to_string(), value.into())),
        }
    }

    /// Match every node of a label.
    pub fn all(label: NodeLabel) -> Self {
        Self {
            label,
            property: None,
        }
    }
}

/// A MERGE write of one relationship type between matched endpoints.
///
/// The edge is identified by its type, both endpoints and the `key` properties; `properties`
/// are set on create and on every later match. When either endpoint pattern matches nothing
/// the write is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeUpsert {
    pub source: NodeMatch,
    pub edge_type: EdgeType,
    pub target: NodeMatch,
    pub key: Map<String, Value>,
    pub properties: Map<String, Value>,
}

impl EdgeUpsert {
    /// Create an edge upsert `(source)-[edge_type]->(target)`.
    pub fn new(source: NodeMatch, edge_type: EdgeType, target: NodeMatch) -> Self {
        Self {
            source,
            edge_type,
            target,
            key: Map::new(),
            properties: Map::new(),
        }
    }

    /// Add a property that is part of the edge identity (`MERGE (a)-[:T{k: v}]->(b)`).
    pub fn keyed(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.key.insert(key.to_string(), value.into());
        self
    }

    /// Add a property that is overwritten on every match.
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Canonical identity string for the key properties.
    ///
    /// `serde_json::Map` keeps keys sorted, so equal key sets serialize identically.
    pub fn edge_key(&self) -> String {
        Value::Object(self.key.clone()).to_string()
    }

    /// Properties as stored: key properties plus set properties.
    pub fn stored_properties(&self) -> Map<String, Value> {
        let mut merged = self.key.clone();
        for (k, v) in &self.properties {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_key_is_order_independent() {
        let a = EdgeUpsert::new(
            NodeMatch::by(NodeLabel::Team, "slug", "core"),
            EdgeType::HasPermissionOn,
            NodeMatch::by_id(NodeLabel::Repository, "https://github.com/acme/api"),
        )
        .keyed("permission", "WRITE")
        .keyed("via", "team");
        let b = EdgeUpsert::new(a.source.clone(), a.edge_type, a.target.clone())
            .keyed("via", "team")
            .keyed("permission", "WRITE");
        assert_eq!(a.edge_key(), b.edge_key());
    }

    #[test]
    fn test_stored_properties_include_key() {
        let edge = EdgeUpsert::new(
            NodeMatch::all(NodeLabel::Repository),
            EdgeType::HasStatusCheck,
            NodeMatch::by_id(NodeLabel::StatusCheck, "abc"),
        )
        .keyed("pullRequest", true)
        .set("note", "x");
        let stored = edge.stored_properties();
        assert_eq!(stored["pullRequest"], Value::Bool(true));
        assert_eq!(stored["note"], Value::String("x".into()));
    }

    #[test]
    fn test_match_all_has_no_property() {
        assert!(NodeMatch::all(NodeLabel::User).property.is_none());
    }
}
