//! Database - a named set of tables

use super::DataTable;
use crate::{Oid, Result, TileLogError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A single database
pub struct Database {
    oid: Oid,
    tables: RwLock<HashMap<Oid, Arc<DataTable>>>,
}

impl Database {
    /// Create an empty database
    pub fn new(oid: Oid) -> Self {
        Self {
            oid,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Database oid
    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// Attach a table
    pub fn add_table(&self, table: DataTable) -> Result<Arc<DataTable>> {
        let mut tables = self.tables.write();
        if tables.contains_key(&table.table_id()) {
            return Err(TileLogError::Config(format!(
                "Table {} already exists in database {}",
                table.table_id(),
                self.oid
            )));
        }

        let table = Arc::new(table);
        tables.insert(table.table_id(), table.clone());
        info!("Created table {} ({}) in database {}", table.table_id(), table.name(), self.oid);
        Ok(table)
    }

    /// Get a table by oid
    pub fn get_table(&self, table_id: Oid) -> Result<Arc<DataTable>> {
        self.tables
            .read()
            .get(&table_id)
            .cloned()
            .ok_or(TileLogError::TableNotFound {
                database_id: self.oid,
                table_id,
            })
    }

    /// Drop a table
    pub fn drop_table(&self, table_id: Oid) -> Result<()> {
        if self.tables.write().remove(&table_id).is_none() {
            return Err(TileLogError::TableNotFound {
                database_id: self.oid,
                table_id,
            });
        }
        info!("Dropped table {} from database {}", table_id, self.oid);
        Ok(())
    }

    /// Number of tables
    pub fn table_count(&self) -> usize {
        self.tables.read().len()
    }
}
