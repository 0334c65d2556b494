//! GraphDb - DuckDB-based storage for the attack-surface graph.

use anyhow::{Context, Result};
use duckdb::types::Value as SqlValue;
use duckdb::{params, params_from_iter, Config, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::edges::{EdgeUpsert, NodeMatch};
use super::nodes::NodeUpsert;
use super::schema::{NodeLabel, SCHEMA_SQL, SCHEMA_VERSION};

/// Database access mode for concurrent access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Read-write mode (exclusive lock, for crawls)
    #[default]
    ReadWrite,
    /// Read-only mode (shared access, for stats and queries)
    ReadOnly,
}

/// A single graph write produced by an ingestor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    MergeNode(NodeUpsert),
    MergeEdge(EdgeUpsert),
}

impl From<NodeUpsert> for Statement {
    fn from(node: NodeUpsert) -> Self {
        Statement::MergeNode(node)
    }
}

impl From<EdgeUpsert> for Statement {
    fn from(edge: EdgeUpsert) -> Self {
        Statement::MergeEdge(edge)
    }
}

/// A node as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNode {
    pub label: NodeLabel,
    pub id: String,
    pub properties: Map<String, Value>,
    pub session: Option<String>,
}

impl StoredNode {
    /// String property, if present.
    pub fn str_prop(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

/// GraphDb - DuckDB-based property graph.
///
/// Cloning is cheap and shares the underlying connection, so one store can be handed to
/// every concurrently running ingestor.
#[derive(Clone)]
pub struct GraphDb {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl GraphDb {
    /// Open or create a graph database in read-write mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_mode(path, AccessMode::ReadWrite)
    }

    /// Open a graph database in read-only mode.
    ///
    /// Multiple read-only connections can coexist without blocking.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_mode(path, AccessMode::ReadOnly)
    }

    /// Open a graph database with the specified access mode.
    pub fn open_with_mode(path: impl AsRef<Path>, mode: AccessMode) -> Result<Self> {
        let path = path.as_ref();

        if mode == AccessMode::ReadWrite {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {:?}", parent))?;
            }
        }

        let conn = match mode {
            AccessMode::ReadWrite => Connection::open(path)
                .with_context(|| format!("Failed to open database: {:?}", path))?,
            AccessMode::ReadOnly => {
                let config = Config::default()
                    .access_mode(duckdb::AccessMode::ReadOnly)
                    .map_err(|e| anyhow::anyhow!("Failed to set read-only mode: {}", e))?;
                Connection::open_with_flags(path, config).with_context(|| {
                    format!("Failed to open database in read-only mode: {:?}", path)
                })?
            }
        };

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        };

        // Only initialize schema in read-write mode
        if mode == AccessMode::ReadWrite {
            db.init_schema()?;
        }

        Ok(db)
    }

    /// Open a throwaway in-memory graph.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Path of the database file, `None` for in-memory graphs.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Acquire the database connection lock, handling PoisonError gracefully.
    /// If the mutex is poisoned (previous holder panicked), we still acquire
    /// the lock and continue - the database connection itself is likely fine.
    fn acquire_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        match self.conn.lock() {
            Ok(guard) => Ok(guard),
            Err(poisoned) => {
                tracing::warn!("Recovering from poisoned database mutex");
                Ok(poisoned.into_inner())
            }
        }
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> Result<()> {
        let conn = self.acquire_conn()?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize schema")?;

        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?)",
            params![SCHEMA_VERSION],
        )
        .context("Failed to set schema version")?;

        Ok(())
    }

    /// Apply one statement, tagging every node or edge it touches with `session`.
    ///
    /// Returns the number of rows created or updated. An edge whose endpoint patterns
    /// match nothing affects zero rows.
    pub fn upsert(&self, statement: &Statement, session: &str) -> Result<usize> {
        match statement {
            Statement::MergeNode(node) => self.merge_node(node, session),
            Statement::MergeEdge(edge) => self.merge_edge(edge, session),
        }
    }

    /// Apply a batch of statements in order.
    pub fn upsert_all<'a>(
        &self,
        statements: impl IntoIterator<Item = &'a Statement>,
        session: &str,
    ) -> Result<usize> {
        let mut affected = 0;
        for statement in statements {
            affected += self.upsert(statement, session)?;
        }
        Ok(affected)
    }

    fn merge_node(&self, node: &NodeUpsert, session: &str) -> Result<usize> {
        let properties_json = serde_json::to_string(&node.properties)
            .context("Failed to serialize node properties")?;

        let conn = self.acquire_conn()?;
        conn.execute(
            r#"INSERT INTO nodes (label, id, properties, session)
               VALUES (?, ?, CAST(? AS JSON), ?)
               ON CONFLICT (label, id) DO UPDATE SET
                   properties = json_merge_patch(properties, excluded.properties),
                   session = excluded.session"#,
            params![node.label.as_str(), node.id, properties_json, session],
        )
        .with_context(|| format!("Failed to merge node: {}{{id: {}}}", node.label, node.id))
    }

    fn merge_edge(&self, edge: &EdgeUpsert, session: &str) -> Result<usize> {
        let properties_json = serde_json::to_string(&edge.stored_properties())
            .context("Failed to serialize edge properties")?;

        let mut bindings = vec![
            SqlValue::Text(edge.edge_type.as_str().to_string()),
            SqlValue::Text(edge.edge_key()),
            SqlValue::Text(properties_json),
            SqlValue::Text(session.to_string()),
        ];
        let source_clause = match_clause("s", &edge.source, &mut bindings)?;
        let target_clause = match_clause("t", &edge.target, &mut bindings)?;

        let sql = format!(
            r#"INSERT INTO edges
                   (edge_type, source_label, source_id, target_label, target_id, edge_key, properties, session)
               SELECT ?, s.label, s.id, t.label, t.id, ?, CAST(? AS JSON), ?
               FROM nodes s, nodes t
               WHERE {source_clause} AND {target_clause}
               ON CONFLICT (edge_type, source_label, source_id, target_label, target_id, edge_key)
               DO UPDATE SET
                   properties = json_merge_patch(properties, excluded.properties),
                   session = excluded.session"#
        );

        let conn = self.acquire_conn()?;
        conn.execute(&sql, params_from_iter(bindings))
            .with_context(|| format!("Failed to merge edge: {}", edge.edge_type))
    }

    /// Overwrite properties of an existing node without touching its session.
    ///
    /// Returns `false` when no such node exists.
    pub fn set_properties(
        &self,
        label: NodeLabel,
        id: &str,
        properties: &Map<String, Value>,
    ) -> Result<bool> {
        let properties_json =
            serde_json::to_string(properties).context("Failed to serialize properties")?;

        let conn = self.acquire_conn()?;
        let updated = conn
            .execute(
                "UPDATE nodes SET properties = json_merge_patch(properties, CAST(? AS JSON))
                 WHERE label = ? AND id = ?",
                params![properties_json, label.as_str(), id],
            )
            .with_context(|| format!("Failed to update node: {}{{id: {}}}", label, id))?;
        Ok(updated > 0)
    }

    /// Get a node by label and id.
    pub fn get_node(&self, label: NodeLabel, id: &str) -> Result<Option<StoredNode>> {
        let conn = self.acquire_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, CAST(properties AS VARCHAR), session FROM nodes WHERE label = ? AND id = ?",
        )?;

        let mut rows = stmt.query(params![label.as_str(), id])?;

        if let Some(row) = rows.next()? {
            Ok(Some(stored_node(label, row)?))
        } else {
            Ok(None)
        }
    }

    /// Get all nodes with a label.
    pub fn get_nodes_by_label(&self, label: NodeLabel) -> Result<Vec<StoredNode>> {
        let conn = self.acquire_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, CAST(properties AS VARCHAR), session FROM nodes WHERE label = ? ORDER BY id",
        )?;

        let mut rows = stmt.query(params![label.as_str()])?;
        let mut nodes = Vec::new();

        while let Some(row) = rows.next()? {
            nodes.push(stored_node(label, row)?);
        }

        Ok(nodes)
    }

    /// Record the most recent crawl of a platform in the metadata table.
    pub fn record_session(&self, platform: &str, session: &str) -> Result<()> {
        let conn = self.acquire_conn()?;
        let finished_at = chrono::Utc::now().to_rfc3339();
        for (key, value) in [
            (format!("last_session.{platform}"), session),
            (format!("last_run_at.{platform}"), finished_at.as_str()),
        ] {
            conn.execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
                params![key, value],
            )
            .context("Failed to record crawl session")?;
        }
        Ok(())
    }

    /// Read a metadata value.
    pub fn metadata(&self, key: &str) -> Result<Option<String>> {
        let conn = self.acquire_conn()?;
        let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = ?")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(None),
        }
    }

    /// Execute a SQL query with parameters and return results.
    ///
    /// Parameters use `?` placeholders in the SQL string. JSON arrays and objects are
    /// bound as their serialized text.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let conn = self.acquire_conn()?;
        let mut stmt = conn
            .prepare(sql)
            .with_context(|| format!("Failed to prepare query: {}", sql))?;

        let bindings: Vec<SqlValue> = params.iter().map(to_sql_value).collect();
        let mut rows = stmt
            .query(params_from_iter(bindings))
            .context("Failed to execute query")?;

        let mut rows_data: Vec<Vec<Value>> = Vec::new();
        let mut columns: Vec<String> = Vec::new();
        let mut column_count = 0;

        while let Some(row) = rows.next()? {
            // Column names are only reachable through a row in duckdb-rs
            if columns.is_empty() {
                columns = row
                    .as_ref()
                    .column_names()
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                column_count = columns.len();
            }

            let mut row_data = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value = if let Ok(v) = row.get::<_, String>(i) {
                    Value::String(v)
                } else if let Ok(v) = row.get::<_, i64>(i) {
                    Value::Number(v.into())
                } else if let Ok(v) = row.get::<_, f64>(i) {
                    serde_json::json!(v)
                } else if let Ok(v) = row.get::<_, bool>(i) {
                    Value::Bool(v)
                } else {
                    Value::Null
                };
                row_data.push(value);
            }
            rows_data.push(row_data);
        }

        Ok(QueryResult {
            columns,
            rows: rows_data,
        })
    }

    /// Get graph statistics.
    pub fn stats(&self) -> Result<GraphStats> {
        let conn = self.acquire_conn()?;

        let node_count: usize =
            conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        let edge_count: usize =
            conn.query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?;

        let mut label_counts = HashMap::new();
        let mut stmt = conn.prepare("SELECT label, COUNT(*) FROM nodes GROUP BY label")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let label: String = row.get(0)?;
            let count: usize = row.get(1)?;
            label_counts.insert(label, count);
        }

        let mut edge_type_counts = HashMap::new();
        let mut stmt = conn.prepare("SELECT edge_type, COUNT(*) FROM edges GROUP BY edge_type")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let edge_type: String = row.get(0)?;
            let count: usize = row.get(1)?;
            edge_type_counts.insert(edge_type, count);
        }

        let mut session_counts = HashMap::new();
        let mut stmt = conn.prepare(
            "SELECT COALESCE(session, ''), COUNT(*) FROM nodes GROUP BY COALESCE(session, '')",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let session: String = row.get(0)?;
            let count: usize = row.get(1)?;
            session_counts.insert(session, count);
        }

        Ok(GraphStats {
            node_count,
            edge_count,
            label_counts,
            edge_type_counts,
            session_counts,
        })
    }
}

/// Build the WHERE fragment selecting one edge endpoint, appending its bindings.
fn match_clause(alias: &str, pattern: &NodeMatch, bindings: &mut Vec<SqlValue>) -> Result<String> {
    let mut clause = format!("{alias}.label = ?");
    bindings.push(SqlValue::Text(pattern.label.as_str().to_string()));

    match &pattern.property {
        None => {}
        Some((key, value)) if key == "id" => {
            clause.push_str(&format!(" AND {alias}.id = ?"));
            bindings.push(SqlValue::Text(match_text(value)));
        }
        Some((key, value)) => {
            if !is_property_name(key) {
                anyhow::bail!("Invalid property name in node pattern: {:?}", key);
            }
            clause.push_str(&format!(
                " AND json_extract_string({alias}.properties, '$.{key}') = ?"
            ));
            bindings.push(SqlValue::Text(match_text(value)));
        }
    }

    Ok(clause)
}

/// Text form of a pattern value as `json_extract_string` renders it.
fn match_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_property_name(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::BigInt(i),
            None => SqlValue::Double(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn stored_node(label: NodeLabel, row: &duckdb::Row<'_>) -> Result<StoredNode> {
    let properties_str: Option<String> = row.get(1)?;
    let properties = properties_str
        .and_then(|s| serde_json::from_str::<Map<String, Value>>(&s).ok())
        .unwrap_or_default();
    Ok(StoredNode {
        label,
        id: row.get(0)?,
        properties,
        session: row.get(2)?,
    })
}

/// Query result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Get the number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Convert to a list of dictionaries.
    pub fn as_dicts(&self) -> Vec<HashMap<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row.iter())
                    .map(|(col, val)| (col.clone(), val.clone()))
                    .collect()
            })
            .collect()
    }

    /// First column of every row as a string, skipping nulls.
    pub fn first_column_strings(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| match row.first() {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Null) | None => None,
                Some(other) => Some(other.to_string()),
            })
            .collect()
    }
}

/// Graph statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub label_counts: HashMap<String, usize>,
    pub edge_type_counts: HashMap<String, usize>,
    /// Nodes per session tag
    pub session_counts: HashMap<String, usize>,
}
