//! Catalog - top-level lookup of databases and tables by oid

use super::{DataTable, Database, TupleStore};
use crate::{Oid, Result, Schema, TileLogError, Tuple, TupleLocation};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Allocator for tile-group oids
#[derive(Debug, Default)]
pub struct OidAllocator {
    next: AtomicU64,
}

impl OidAllocator {
    /// Start at oid 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next oid
    pub fn next(&self) -> Oid {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Make sure `oid` is never handed out again
    pub fn observe(&self, oid: Oid) {
        self.next.fetch_max(oid.saturating_add(1), Ordering::SeqCst);
    }

    /// Next oid that would be handed out
    pub fn peek(&self) -> Oid {
        self.next.load(Ordering::SeqCst)
    }

    /// Restart allocation at `oid`
    pub fn reset(&self, oid: Oid) {
        self.next.store(oid, Ordering::SeqCst);
    }
}

/// Catalog of databases
pub struct Catalog {
    databases: RwLock<HashMap<Oid, Arc<Database>>>,
    oids: Arc<OidAllocator>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self {
            databases: RwLock::new(HashMap::new()),
            oids: Arc::new(OidAllocator::new()),
        }
    }

    /// Create a new database
    pub fn create_database(&self, oid: Oid) -> Result<Arc<Database>> {
        let mut databases = self.databases.write();

        if databases.contains_key(&oid) {
            return Err(TileLogError::Config(format!("Database {} already exists", oid)));
        }

        let db = Arc::new(Database::new(oid));
        databases.insert(oid, db.clone());

        info!("Created database: {}", oid);

        Ok(db)
    }

    /// Get or create a database
    pub fn get_or_create_database(&self, oid: Oid) -> Arc<Database> {
        self.databases
            .write()
            .entry(oid)
            .or_insert_with(|| Arc::new(Database::new(oid)))
            .clone()
    }

    /// Get a database by oid
    pub fn get_database(&self, oid: Oid) -> Option<Arc<Database>> {
        self.databases.read().get(&oid).cloned()
    }

    /// Drop a database along with whatever tables it still holds
    pub fn drop_database(&self, oid: Oid) -> Result<()> {
        let db = self
            .databases
            .write()
            .remove(&oid)
            .ok_or(TileLogError::DatabaseNotFound(oid))?;

        info!("Dropped database {} ({} tables left)", db.oid(), db.table_count());

        Ok(())
    }

    /// Create a table inside an existing database
    pub fn create_table(
        &self,
        database_id: Oid,
        table_id: Oid,
        name: &str,
        schema: Schema,
        tuples_per_tile_group: u32,
    ) -> Result<Arc<DataTable>> {
        let db = self
            .get_database(database_id)
            .ok_or(TileLogError::DatabaseNotFound(database_id))?;
        let table = DataTable::new(
            database_id,
            table_id,
            name,
            schema,
            tuples_per_tile_group,
            self.oids.clone(),
        );
        db.add_table(table)
    }

    /// Look up a table by (database, table)
    pub fn get_table(&self, database_id: Oid, table_id: Oid) -> Result<Arc<DataTable>> {
        self.get_database(database_id)
            .ok_or(TileLogError::DatabaseNotFound(database_id))?
            .get_table(table_id)
    }

    /// Next tile-group oid
    pub fn next_oid(&self) -> Oid {
        self.oids.peek()
    }

    /// Drop every database and restart oid allocation, as after a restart
    pub fn reset(&self) {
        self.databases.write().clear();
        self.oids.reset(0);
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl TupleStore for Catalog {
    fn schema_of(&self, database_id: Oid, table_id: Oid) -> Result<Schema> {
        Ok(self.get_table(database_id, table_id)?.schema().clone())
    }

    fn insert_tuple_at(
        &self,
        database_id: Oid,
        table_id: Oid,
        location: TupleLocation,
        tuple: Tuple,
    ) -> Result<()> {
        self.get_table(database_id, table_id)?
            .insert_tuple_at(location, tuple)
    }

    fn delete_tuple_at(
        &self,
        database_id: Oid,
        table_id: Oid,
        location: TupleLocation,
    ) -> Result<bool> {
        Ok(self.get_table(database_id, table_id)?.delete_tuple_at(location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Column, Value, ValueType};

    fn schema() -> Schema {
        Schema::new(vec![Column::new("id", ValueType::Integer, 8)])
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = Catalog::new();
        catalog.create_database(20000).unwrap();
        let table = catalog.create_table(20000, 10000, "USERTABLE", schema(), 10).unwrap();

        assert_eq!(table.name(), "USERTABLE");
        assert!(catalog.get_table(20000, 10000).is_ok());
        assert!(matches!(
            catalog.get_table(20000, 1),
            Err(TileLogError::TableNotFound { .. })
        ));
        assert!(matches!(
            catalog.get_table(1, 10000),
            Err(TileLogError::DatabaseNotFound(1))
        ));
        assert!(catalog.create_database(20000).is_err());
    }

    #[test]
    fn test_drop_table_and_database() {
        let catalog = Catalog::new();
        let db = catalog.create_database(3).unwrap();
        assert_eq!(db.oid(), 3);
        catalog.create_table(3, 1, "a", schema(), 4).unwrap();
        catalog.create_table(3, 2, "b", schema(), 4).unwrap();
        assert_eq!(db.table_count(), 2);

        db.drop_table(1).unwrap();
        assert_eq!(db.table_count(), 1);
        assert!(matches!(
            db.drop_table(1),
            Err(TileLogError::TableNotFound { table_id: 1, .. })
        ));

        catalog.drop_database(3).unwrap();
        assert!(catalog.get_database(3).is_none());
        assert!(matches!(
            catalog.drop_database(3),
            Err(TileLogError::DatabaseNotFound(3))
        ));
    }

    #[test]
    fn test_tile_group_oids_are_shared() {
        let catalog = Catalog::new();
        catalog.create_database(1).unwrap();
        let a = catalog.create_table(1, 1, "a", schema(), 1).unwrap();
        let b = catalog.create_table(1, 2, "b", schema(), 1).unwrap();

        let la = a.insert_tuple(Tuple::new(vec![Value::Integer(1)])).unwrap();
        let lb = b.insert_tuple(Tuple::new(vec![Value::Integer(2)])).unwrap();
        assert_ne!(la.block, lb.block);
        assert_eq!(catalog.next_oid(), 2);

        catalog.reset();
        assert_eq!(catalog.next_oid(), 0);
        assert!(catalog.get_database(1).is_none());
    }

    #[test]
    fn test_tuple_store_update() {
        let catalog = Catalog::new();
        catalog.create_database(1).unwrap();
        let table = catalog.create_table(1, 1, "t", schema(), 4).unwrap();

        let old = TupleLocation::new(0, 0);
        let new = TupleLocation::new(0, 1);
        catalog.insert_tuple_at(1, 1, old, Tuple::new(vec![Value::Integer(1)])).unwrap();
        catalog
            .update_tuple_at(1, 1, old, new, Tuple::new(vec![Value::Integer(2)]))
            .unwrap();

        assert_eq!(table.get_tuple(old), None);
        assert_eq!(table.get_tuple(new), Some(Tuple::new(vec![Value::Integer(2)])));
        assert_eq!(table.active_tuple_count(), 1);
    }
}
