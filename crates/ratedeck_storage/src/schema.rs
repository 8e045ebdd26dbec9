//! Store definitions and index specification strings.
//!
//! A specification string lists the primary key first, then secondary
//! indexes, separated by commas:
//!
//! - `"++id, npa, state"` - auto-incremented `id`, indexes on `npa`, `state`
//! - `"npa, state"` - explicit `npa` primary key, index on `state`
//! - `"++"` - hidden auto-incremented surrogate key, no indexes

use crate::error::{StorageError, StorageResult};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Store name → store definition for one database version.
pub type SchemaMap = BTreeMap<String, StoreSchema>;

/// How a store derives primary keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryKey {
    /// Engine-generated integer key, optionally written into `field`.
    AutoIncrement {
        /// Field that receives the key, or `None` for a hidden key.
        field: Option<String>,
    },
    /// Key read from a record field.
    Field(String),
}

impl PrimaryKey {
    /// Returns the key field, if the key is visible in records.
    pub fn field(&self) -> Option<&str> {
        match self {
            PrimaryKey::AutoIncrement { field } => field.as_deref(),
            PrimaryKey::Field(f) => Some(f),
        }
    }
}

/// Definition of a single store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSchema {
    /// Primary key definition.
    pub primary_key: PrimaryKey,
    /// Secondary index fields.
    pub indexes: Vec<String>,
}

impl StoreSchema {
    /// A store with a hidden auto-incremented key and no indexes.
    pub fn auto_increment() -> Self {
        Self {
            primary_key: PrimaryKey::AutoIncrement { field: None },
            indexes: Vec::new(),
        }
    }

    /// Parses an index specification string.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidSchema`] for empty or duplicate
    /// field names and for unsupported syntax.
    pub fn parse(spec: &str) -> StorageResult<Self> {
        let mut parts = spec.split(',').map(str::trim);
        let primary = parts.next().unwrap_or("");

        let primary_key = if primary.is_empty() || primary == "++" {
            PrimaryKey::AutoIncrement { field: None }
        } else if let Some(field) = primary.strip_prefix("++") {
            PrimaryKey::AutoIncrement {
                field: Some(validate_field(field, spec)?),
            }
        } else {
            PrimaryKey::Field(validate_field(primary, spec)?)
        };

        let mut indexes: Vec<String> = Vec::new();
        for part in parts {
            let field = validate_field(part, spec)?;
            if indexes.contains(&field) || primary_key.field() == Some(field.as_str()) {
                return Err(StorageError::InvalidSchema(format!(
                    "duplicate index '{field}' in '{spec}'"
                )));
            }
            indexes.push(field);
        }

        Ok(Self {
            primary_key,
            indexes,
        })
    }

    /// Returns true if scans can be ordered by `field`.
    pub fn has_index(&self, field: &str) -> bool {
        self.primary_key.field() == Some(field) || self.indexes.iter().any(|i| i == field)
    }
}

fn validate_field(field: &str, spec: &str) -> StorageResult<String> {
    if field.is_empty() {
        return Err(StorageError::InvalidSchema(format!(
            "empty field name in '{spec}'"
        )));
    }
    if field.starts_with('[') || field.starts_with('&') || field.starts_with('*') {
        return Err(StorageError::InvalidSchema(format!(
            "unsupported index syntax '{field}' in '{spec}'"
        )));
    }
    if field.chars().any(char::is_whitespace) {
        return Err(StorageError::InvalidSchema(format!(
            "field name '{field}' contains whitespace"
        )));
    }
    Ok(field.to_string())
}

impl FromStr for StoreSchema {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for StoreSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.primary_key {
            PrimaryKey::AutoIncrement { field: None } => write!(f, "++")?,
            PrimaryKey::AutoIncrement { field: Some(k) } => write!(f, "++{k}")?,
            PrimaryKey::Field(k) => write!(f, "{k}")?,
        }
        for index in &self.indexes {
            write!(f, ", {index}")?;
        }
        Ok(())
    }
}
