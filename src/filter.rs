//! Relation and column filtering.
//!
//! Filtering happens at two points of the pipeline: the transaction buffer
//! drops entries for filtered relations before they are ever buffered, and
//! the populator drops filtered columns while attaching field values.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::pg::schema::SchemaReader;

/// Decides whether a table or column is removed from the output set.
#[async_trait]
pub trait MessageFilter: Send + Sync {
    /// Whether all entries for this relation should be dropped.
    async fn filter_rel_id(&self, relation_id: u32) -> bool;

    /// Whether a column of `db.ns.table` should be dropped during
    /// population.
    fn filter_column(&self, rel_full_name: &str, column: &str) -> bool;
}

/// Lets all tables and columns through.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilterNone;

#[async_trait]
impl MessageFilter for FilterNone {
    async fn filter_rel_id(&self, _relation_id: u32) -> bool {
        false
    }

    fn filter_column(&self, _rel_full_name: &str, _column: &str) -> bool {
        false
    }
}

/// How often the relation-name to id map is refreshed, at most.
const ID_MAP_REFRESH: Duration = Duration::from_secs(1);

/// Filters on a `db.ns.table -> [column]` map.
///
/// A column list of `["*"]` stands for the whole table. Relation ids churn
/// as tables are rewritten, so the name→id map is re-resolved through the
/// schema reader at most once per second, on demand.
pub struct ColumnMapFilter {
    reader: Arc<dyn SchemaReader>,
    relations: HashMap<String, Vec<String>>,
    relation_names: Vec<String>,
    exclusive: bool,
    id_map: RwLock<HashMap<u32, String>>,
    last_refresh: Mutex<Instant>,
}

impl ColumnMapFilter {
    /// A filter that excludes the provided relations from the output set.
    pub async fn exclusive(
        reader: Arc<dyn SchemaReader>,
        relations: HashMap<String, Vec<String>>,
    ) -> ColumnMapFilter {
        Self::new(reader, relations, true).await
    }

    /// A filter that only includes the provided relations in the output
    /// set.
    pub async fn inclusive(
        reader: Arc<dyn SchemaReader>,
        relations: HashMap<String, Vec<String>>,
    ) -> ColumnMapFilter {
        Self::new(reader, relations, false).await
    }

    async fn new(
        reader: Arc<dyn SchemaReader>,
        relations: HashMap<String, Vec<String>>,
        exclusive: bool,
    ) -> ColumnMapFilter {
        let relation_names: Vec<String> = relations.keys().cloned().collect();
        let id_map = reader.convert_rel_names_to_ids(&relation_names).await;

        ColumnMapFilter {
            reader,
            relations,
            relation_names,
            exclusive,
            id_map: RwLock::new(id_map),
            last_refresh: Mutex::new(Instant::now()),
        }
    }

    async fn refresh_id_map_if_due(&self) {
        {
            let mut last_refresh = self.last_refresh.lock();
            if last_refresh.elapsed() < ID_MAP_REFRESH {
                return;
            }
            *last_refresh = Instant::now();
        }

        let id_map = self.reader.convert_rel_names_to_ids(&self.relation_names).await;
        *self.id_map.write() = id_map;
    }
}

#[async_trait]
impl MessageFilter for ColumnMapFilter {
    async fn filter_rel_id(&self, relation_id: u32) -> bool {
        self.refresh_id_map_if_due().await;

        let id_map = self.id_map.read();
        let rel = id_map.get(&relation_id).map(String::as_str).unwrap_or("");
        let columns = self.relations.get(rel);

        if self.exclusive {
            matches!(columns, Some(cols) if cols.len() == 1 && cols[0] == "*")
        } else {
            columns.is_none()
        }
    }

    fn filter_column(&self, rel_full_name: &str, column: &str) -> bool {
        if let Some(columns) = self.relations.get(rel_full_name) {
            for listed in columns {
                if listed == column || listed == "*" {
                    return self.exclusive;
                }
            }
        }

        !self.exclusive
    }
}
