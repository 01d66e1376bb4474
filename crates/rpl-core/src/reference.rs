//! Reference data sets maintained outside the ledger.
//!
//! A reference set is a YAML file naming a table, the key columns and a list
//! of rows. Applying it inserts missing rows and updates the others, so it can
//! be run any number of times.

use crate::error::{ApplyError, CoreError, CoreResult};
use crate::loader::{read_file, yaml_files};
use crate::names::{ColumnName, TableName};
use crate::state::{ApplyContext, SchemaState};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One reference data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReferenceSet {
    pub table: TableName,

    /// Columns identifying a row (primary key or a unique index)
    pub key: Vec<ColumnName>,

    pub columns: Vec<ColumnName>,

    pub rows: Vec<Vec<Value>>,
}

impl ReferenceSet {
    /// Parse a reference set from YAML. `origin` is only used in error messages.
    pub fn parse(content: &str, origin: &str) -> CoreResult<Self> {
        let set: ReferenceSet = serde_yaml::from_str(content).map_err(|e| CoreError::ReferenceParseError {
            path: origin.to_string(),
            details: e.to_string(),
        })?;
        if let Some(k) = set.key.iter().find(|k| !set.columns.contains(k)) {
            return Err(CoreError::ReferenceParseError {
                path: origin.to_string(),
                details: format!("key column '{k}' is not listed in columns"),
            });
        }
        Ok(set)
    }

    /// Upsert the rows into `state`. Returns `(inserted, updated)`.
    pub fn apply_to(&self, state: &mut SchemaState, ctx: &ApplyContext) -> Result<(usize, usize), ApplyError> {
        state.upsert(&self.table, &self.key, &self.columns, &self.rows, ctx)
    }
}

/// Load every reference set of a directory, in file name order.
///
/// A missing directory means there is no reference data.
pub fn load_reference_dir(dir: &Path) -> CoreResult<Vec<ReferenceSet>> {
    if !dir.is_dir() {
        log::debug!("No reference data directory at {}", dir.display());
        return Ok(Vec::new());
    }
    yaml_files(dir)?
        .iter()
        .map(|path| ReferenceSet::parse(&read_file(path)?, &path.display().to_string()))
        .collect()
}
