//! Tile-group table

use super::OidAllocator;
use crate::{Oid, Result, Schema, TileLogError, Tuple, TupleLocation};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Fixed-capacity block of tuple slots
#[derive(Debug)]
pub struct TileGroup {
    id: Oid,
    slots: Vec<Option<Tuple>>,
    next_slot: u32,
    active: usize,
}

impl TileGroup {
    fn new(id: Oid, capacity: u32) -> Self {
        Self {
            id,
            slots: vec![None; capacity as usize],
            next_slot: 0,
            active: 0,
        }
    }

    /// Tile group id
    pub fn id(&self) -> Oid {
        self.id
    }

    /// Number of occupied slots
    pub fn active_tuple_count(&self) -> usize {
        self.active
    }

    fn is_full(&self) -> bool {
        self.next_slot as usize >= self.slots.len()
    }

    fn put(&mut self, offset: u32, tuple: Tuple) -> Option<Tuple> {
        let previous = self.slots[offset as usize].replace(tuple);
        if previous.is_none() {
            self.active += 1;
        }
        self.next_slot = self.next_slot.max(offset + 1);
        previous
    }

    fn take(&mut self, offset: u32) -> Option<Tuple> {
        let previous = self.slots.get_mut(offset as usize)?.take();
        if previous.is_some() {
            self.active -= 1;
        }
        previous
    }
}

/// A table made of tile groups
pub struct DataTable {
    database_id: Oid,
    table_id: Oid,
    name: String,
    schema: Schema,
    tuples_per_tile_group: u32,
    tile_groups: RwLock<TableInner>,
    oids: Arc<OidAllocator>,
}

struct TableInner {
    groups: BTreeMap<Oid, TileGroup>,
    /// Tile group that receives new inserts
    tail: Option<Oid>,
}

impl DataTable {
    /// Create an empty table
    pub fn new(
        database_id: Oid,
        table_id: Oid,
        name: impl Into<String>,
        schema: Schema,
        tuples_per_tile_group: u32,
        oids: Arc<OidAllocator>,
    ) -> Self {
        Self {
            database_id,
            table_id,
            name: name.into(),
            schema,
            tuples_per_tile_group: tuples_per_tile_group.max(1),
            tile_groups: RwLock::new(TableInner {
                groups: BTreeMap::new(),
                tail: None,
            }),
            oids,
        }
    }

    /// Owning database
    pub fn database_id(&self) -> Oid {
        self.database_id
    }

    /// Table id
    pub fn table_id(&self) -> Oid {
        self.table_id
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Insert into the next free slot
    pub fn insert_tuple(&self, tuple: Tuple) -> Result<TupleLocation> {
        self.check_schema(&tuple)?;

        let mut inner = self.tile_groups.write();
        let block = match inner.tail {
            Some(block) if !inner.groups[&block].is_full() => block,
            _ => {
                let block = self.oids.next();
                inner
                    .groups
                    .insert(block, TileGroup::new(block, self.tuples_per_tile_group));
                inner.tail = Some(block);
                block
            }
        };

        let group = inner
            .groups
            .get_mut(&block)
            .ok_or(TileLogError::TupleNotFound(TupleLocation::new(block, 0)))?;
        let offset = group.next_slot;
        group.put(offset, tuple);
        Ok(TupleLocation::new(block, offset))
    }

    /// Remove the tuple at `location`
    pub fn delete_tuple(&self, location: TupleLocation) -> Result<Tuple> {
        self.tile_groups
            .write()
            .groups
            .get_mut(&location.block)
            .and_then(|group| group.take(location.offset))
            .ok_or(TileLogError::TupleNotFound(location))
    }

    /// Read the tuple at `location`
    pub fn get_tuple(&self, location: TupleLocation) -> Option<Tuple> {
        let inner = self.tile_groups.read();
        inner
            .groups
            .get(&location.block)?
            .slots
            .get(location.offset as usize)?
            .clone()
    }

    /// Place a tuple at an explicit location, creating its tile group if needed
    pub fn insert_tuple_at(&self, location: TupleLocation, tuple: Tuple) -> Result<()> {
        self.check_schema(&tuple)?;
        if !location.is_valid() || location.offset >= self.tuples_per_tile_group {
            return Err(TileLogError::TupleNotFound(location));
        }

        self.oids.observe(location.block);

        let mut inner = self.tile_groups.write();
        let capacity = self.tuples_per_tile_group;
        inner
            .groups
            .entry(location.block)
            .or_insert_with(|| TileGroup::new(location.block, capacity))
            .put(location.offset, tuple);

        if inner.tail.map_or(true, |tail| location.block > tail) {
            inner.tail = Some(location.block);
        }
        Ok(())
    }

    /// Empty the slot at `location`; returns whether it held a tuple
    pub fn delete_tuple_at(&self, location: TupleLocation) -> bool {
        self.tile_groups
            .write()
            .groups
            .get_mut(&location.block)
            .and_then(|group| group.take(location.offset))
            .is_some()
    }

    /// Number of live tuples across all tile groups
    pub fn active_tuple_count(&self) -> usize {
        self.tile_groups
            .read()
            .groups
            .values()
            .map(TileGroup::active_tuple_count)
            .sum()
    }

    /// Number of tile groups
    pub fn tile_group_count(&self) -> usize {
        self.tile_groups.read().groups.len()
    }

    /// Snapshot of all live tuples in location order
    pub fn scan(&self) -> Vec<(TupleLocation, Tuple)> {
        let inner = self.tile_groups.read();
        inner
            .groups
            .values()
            .flat_map(|group| {
                group.slots.iter().enumerate().filter_map(move |(offset, slot)| {
                    slot.as_ref()
                        .map(|tuple| (TupleLocation::new(group.id, offset as u32), tuple.clone()))
                })
            })
            .collect()
    }

    fn check_schema(&self, tuple: &Tuple) -> Result<()> {
        self.schema.validate(tuple).map_err(|reason| {
            TileLogError::SchemaMismatch(format!("table {}: {}", self.table_id, reason))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Column, Value, ValueType};

    fn table(capacity: u32) -> DataTable {
        let schema = Schema::new(vec![Column::new("id", ValueType::Integer, 8)]);
        DataTable::new(1, 2, "t", schema, capacity, Arc::new(OidAllocator::new()))
    }

    fn row(id: i64) -> Tuple {
        Tuple::new(vec![Value::Integer(id)])
    }

    #[test]
    fn test_insert_fills_tile_groups() {
        let table = table(3);
        let locations: Vec<_> = (0..7).map(|i| table.insert_tuple(row(i)).unwrap()).collect();

        assert_eq!(table.active_tuple_count(), 7);
        assert_eq!(table.tile_group_count(), 3);
        assert_eq!(locations[0], TupleLocation::new(0, 0));
        assert_eq!(locations[3], TupleLocation::new(1, 0));
        assert_eq!(table.get_tuple(locations[4]), Some(row(4)));
    }

    #[test]
    fn test_slots_are_not_reused() {
        let table = table(4);
        let first = table.insert_tuple(row(1)).unwrap();
        table.delete_tuple(first).unwrap();
        let second = table.insert_tuple(row(2)).unwrap();

        assert_ne!(first, second);
        assert_eq!(table.active_tuple_count(), 1);
        assert!(matches!(
            table.delete_tuple(first),
            Err(TileLogError::TupleNotFound(_))
        ));
    }

    #[test]
    fn test_insert_at_is_idempotent() {
        let table = table(4);
        let location = TupleLocation::new(5, 2);
        table.insert_tuple_at(location, row(1)).unwrap();
        table.insert_tuple_at(location, row(1)).unwrap();
        assert_eq!(table.active_tuple_count(), 1);

        assert!(table.delete_tuple_at(location));
        assert!(!table.delete_tuple_at(location));
        assert_eq!(table.active_tuple_count(), 0);

        // Normal inserts continue past the replayed block
        let next = table.insert_tuple(row(2)).unwrap();
        assert_eq!(next, TupleLocation::new(5, 3));
        let after = table.insert_tuple(row(3)).unwrap();
        assert_eq!(after.block, 6);
    }

    #[test]
    fn test_insert_at_rejects_bad_location() {
        let table = table(4);
        assert!(table.insert_tuple_at(TupleLocation::new(0, 4), row(1)).is_err());
        assert!(table.insert_tuple_at(TupleLocation::INVALID, row(1)).is_err());
    }

    #[test]
    fn test_schema_checked() {
        let table = table(4);
        let bad = Tuple::new(vec!["x".into()]);
        assert!(matches!(
            table.insert_tuple(bad),
            Err(TileLogError::SchemaMismatch(_))
        ));
    }
}
