//! Node upsert statements.

use super::schema::NodeLabel;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A MERGE-by-key write of one node.
///
/// The node is matched on `(label, id)`. Every property named here overwrites the stored
/// value; properties not named keep whatever an earlier write left behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUpsert {
    pub label: NodeLabel,
    /// Natural key (platform URL, numeric id, or content hash)
    pub id: String,
    pub properties: Map<String, Value>,
}

impl NodeUpsert {
    /// Create an upsert for the node `label{id}`.
    ///
    /// The id is also stored as the `id` property so it can be read back with the rest.
    pub fn new(label: NodeLabel, id: impl Into<String>) -> Self {
        let id = id.into();
        let mut properties = Map::new();
        properties.insert("id".to_string(), Value::String(id.clone()));
        Self {
            label,
            id,
            properties,
        }
    }

    /// Set a property.
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }
}
