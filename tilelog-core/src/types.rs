//! Core types for tilelog

use serde::{Deserialize, Serialize};
use std::fmt;

/// Object identifier for databases, tables and tile groups
pub type Oid = u64;

/// Sentinel for "no object"
pub const INVALID_OID: Oid = u64::MAX;

/// Transaction identifier, unique per transaction attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Create a transaction id
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn#{}", self.0)
    }
}

/// Physical tuple slot: tile group (block) plus offset within it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TupleLocation {
    /// Tile group id
    pub block: Oid,
    /// Slot offset inside the tile group
    pub offset: u32,
}

impl TupleLocation {
    /// The "no location" sentinel (INSERT's old location, DELETE's new location)
    pub const INVALID: TupleLocation = TupleLocation {
        block: INVALID_OID,
        offset: u32::MAX,
    };

    /// Create a tuple location
    pub fn new(block: Oid, offset: u32) -> Self {
        Self { block, offset }
    }

    /// Whether this is a real slot rather than the sentinel
    pub fn is_valid(&self) -> bool {
        self.block != INVALID_OID
    }
}

impl fmt::Display for TupleLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "({}, {})", self.block, self.offset)
        } else {
            write!(f, "(invalid)")
        }
    }
}

/// Logging session mode.
///
/// Variants are declared in lifecycle order, so a session's observed modes
/// only ever compare as increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LoggingMode {
    Invalid,
    Standby,
    Recovery,
    Logging,
    Terminate,
    Sleep,
}

impl fmt::Display for LoggingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoggingMode::Invalid => "INVALID",
            LoggingMode::Standby => "STANDBY",
            LoggingMode::Recovery => "RECOVERY",
            LoggingMode::Logging => "LOGGING",
            LoggingMode::Terminate => "TERMINATE",
            LoggingMode::Sleep => "SLEEP",
        };
        f.write_str(name)
    }
}

/// Logging protocol variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingType {
    /// Force-at-commit: commit is acknowledged only after its records are durable
    Aries,
    /// Write-behind: commit may be acknowledged before durability
    Alternative,
}

impl LoggingType {
    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "aries" => Some(LoggingType::Aries),
            "alternative" | "peloton" => Some(LoggingType::Alternative),
            _ => None,
        }
    }

    /// File name of this type's sink when none is set explicitly
    pub fn default_log_file_name(&self) -> &'static str {
        match self {
            LoggingType::Aries => "aries.log",
            LoggingType::Alternative => "alternative.log",
        }
    }
}

impl fmt::Display for LoggingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggingType::Aries => f.write_str("ARIES"),
            LoggingType::Alternative => f.write_str("ALTERNATIVE"),
        }
    }
}

/// Column value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Integer,
    Double,
    Boolean,
    Varchar,
}

/// A single column value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Varchar(String),
}

impl Value {
    /// Type of a non-null value
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(ValueType::Integer),
            Value::Double(_) => Some(ValueType::Double),
            Value::Boolean(_) => Some(ValueType::Boolean),
            Value::Varchar(_) => Some(ValueType::Varchar),
        }
    }

    /// Get as i64 if possible
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Varchar(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Varchar(v)
    }
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Value type
    pub value_type: ValueType,
    /// Maximum length in bytes (varchar only)
    pub length: usize,
    /// Whether NULL is accepted
    pub nullable: bool,
}

impl Column {
    /// Create a non-nullable column
    pub fn new(name: impl Into<String>, value_type: ValueType, length: usize) -> Self {
        Self {
            name: name.into(),
            value_type,
            length,
            nullable: false,
        }
    }

    /// Allow NULL in this column
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Table schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    /// Create a schema from columns
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Check that a tuple fits this schema
    pub fn validate(&self, tuple: &Tuple) -> std::result::Result<(), String> {
        if tuple.values.len() != self.columns.len() {
            return Err(format!(
                "expected {} columns, got {}",
                self.columns.len(),
                tuple.values.len()
            ));
        }

        for (column, value) in self.columns.iter().zip(&tuple.values) {
            match value.value_type() {
                None if column.nullable => {}
                None => return Err(format!("column {} is not nullable", column.name)),
                Some(ty) if ty != column.value_type => {
                    return Err(format!(
                        "column {} expects {:?}, got {:?}",
                        column.name, column.value_type, ty
                    ));
                }
                Some(_) => {}
            }

            if let Value::Varchar(s) = value {
                if s.len() > column.length {
                    return Err(format!(
                        "column {} holds at most {} bytes, got {}",
                        column.name,
                        column.length,
                        s.len()
                    ));
                }
            }
        }

        Ok(())
    }
}

/// A row of values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
    pub values: Vec<Value>,
}

impl Tuple {
    /// Create a tuple
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Get a column value
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_schema() -> Schema {
        Schema::new(vec![
            Column::new("YCSB_KEY", ValueType::Integer, 8),
            Column::new("FIELD0", ValueType::Varchar, 4),
            Column::new("NOTE", ValueType::Varchar, 16).nullable(),
        ])
    }

    #[test]
    fn test_mode_ordering() {
        assert!(LoggingMode::Invalid < LoggingMode::Standby);
        assert!(LoggingMode::Recovery < LoggingMode::Logging);
        assert!(LoggingMode::Terminate < LoggingMode::Sleep);
    }

    #[test]
    fn test_tuple_location_sentinel() {
        assert!(!TupleLocation::INVALID.is_valid());
        assert!(TupleLocation::new(0, 0).is_valid());
        assert_eq!(TupleLocation::new(3, 7).to_string(), "(3, 7)");
    }

    #[test]
    fn test_schema_validation() {
        let schema = user_schema();

        let ok = Tuple::new(vec![Value::Integer(1), "abc".into(), Value::Null]);
        assert!(schema.validate(&ok).is_ok());

        let short = Tuple::new(vec![Value::Integer(1)]);
        assert!(schema.validate(&short).is_err());

        let wrong_type = Tuple::new(vec!["1".into(), "abc".into(), Value::Null]);
        assert!(schema.validate(&wrong_type).is_err());

        let too_long = Tuple::new(vec![Value::Integer(1), "abcdef".into(), Value::Null]);
        assert!(schema.validate(&too_long).is_err());

        let null_key = Tuple::new(vec![Value::Null, "a".into(), Value::Null]);
        assert!(schema.validate(&null_key).is_err());
    }

    #[test]
    fn test_logging_type_parse() {
        assert_eq!(LoggingType::parse("ARIES"), Some(LoggingType::Aries));
        assert_eq!(LoggingType::parse("peloton"), Some(LoggingType::Alternative));
        assert_eq!(LoggingType::parse("nope"), None);
    }
}
