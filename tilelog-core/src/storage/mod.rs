//! In-memory tuple storage that the log is replayed against
//!
//! Tables are split into fixed-capacity tile groups addressed by
//! [`TupleLocation`]. Slots are handed out append-only and never reused, so
//! a location recorded in the log always names the same logical tuple.

mod catalog;
mod database;
mod table;

pub use catalog::{Catalog, OidAllocator};
pub use database::Database;
pub use table::{DataTable, TileGroup};

use crate::{Oid, Result, Schema, Tuple, TupleLocation};

/// Storage operations used by recovery replay
pub trait TupleStore: Send + Sync {
    /// Schema of a table, used to validate record payloads
    fn schema_of(&self, database_id: Oid, table_id: Oid) -> Result<Schema>;

    /// Place `tuple` at `location`, overwriting whatever the slot holds
    fn insert_tuple_at(
        &self,
        database_id: Oid,
        table_id: Oid,
        location: TupleLocation,
        tuple: Tuple,
    ) -> Result<()>;

    /// Empty the slot at `location`; returns whether it held a tuple
    fn delete_tuple_at(&self, database_id: Oid, table_id: Oid, location: TupleLocation)
        -> Result<bool>;

    /// Move a tuple: empty `old` and place `tuple` at `new`
    fn update_tuple_at(
        &self,
        database_id: Oid,
        table_id: Oid,
        old: TupleLocation,
        new: TupleLocation,
        tuple: Tuple,
    ) -> Result<()> {
        self.delete_tuple_at(database_id, table_id, old)?;
        self.insert_tuple_at(database_id, table_id, new, tuple)
    }
}
