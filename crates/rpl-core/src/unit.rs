//! Migration units: an identified, reversible pair of operation lists.

use crate::checksum::compute_checksum;
use crate::names::{ColumnName, TableName};
use crate::operation::Operation;
use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

static ID_RE: OnceLock<Regex> = OnceLock::new();

fn id_regex() -> &'static Regex {
    ID_RE.get_or_init(|| {
        Regex::new(r"^(\d{14})_([A-Za-z][A-Za-z0-9]*)$").expect("valid regex literal")
    })
}

const ID_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Identifier of a migration unit: `<YYYYMMDDHHMMSS>_<Name>`.
///
/// Ids order by their timestamp prefix, so the lexical order of valid ids
/// is the order in which units must be applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MigrationId(String);

impl MigrationId {
    /// Parse and validate an id.
    pub fn parse(s: &str) -> Option<Self> {
        let caps = id_regex().captures(s)?;
        NaiveDateTime::parse_from_str(&caps[1], ID_TIMESTAMP_FORMAT).ok()?;
        Some(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The authoring time encoded in the id.
    pub fn timestamp(&self) -> NaiveDateTime {
        // Validated in `parse`
        NaiveDateTime::parse_from_str(&self.0[..14], ID_TIMESTAMP_FORMAT)
            .unwrap_or_default()
    }

    /// The descriptive part of the id (e.g. `InitialCreate`).
    pub fn name(&self) -> &str {
        &self.0[15..]
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MigrationId {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        MigrationId::parse(&s)
            .ok_or_else(|| format!("invalid migration id '{s}': expected <YYYYMMDDHHMMSS>_<Name>"))
    }
}

impl From<MigrationId> for String {
    fn from(id: MigrationId) -> Self {
        id.0
    }
}

impl PartialEq<str> for MigrationId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for MigrationId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Which operation list of a unit is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// A column whose Down does not restore the exact pre-Up shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossyColumn {
    pub table: TableName,
    pub column: ColumnName,
}

/// One entry of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationUnit {
    pub id: MigrationId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub up: Vec<Operation>,

    pub down: Vec<Operation>,

    /// Columns the Down list knowingly restores with a different shape
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lossy_down: Vec<LossyColumn>,
}

impl MigrationUnit {
    pub fn new(id: MigrationId, up: Vec<Operation>, down: Vec<Operation>) -> Self {
        Self {
            id,
            description: None,
            up,
            down,
            lossy_down: Vec::new(),
        }
    }

    /// Operations for the given direction.
    pub fn operations(&self, direction: Direction) -> &[Operation] {
        match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }

    /// Content checksum recorded in the history table when the unit is
    /// applied. Any edit to the operations changes it.
    pub fn checksum(&self) -> String {
        // Serializing plain data structures cannot fail
        let body = serde_json::to_string(&(&self.id, &self.up, &self.down)).unwrap_or_default();
        compute_checksum(&body)
    }

    /// Returns `true` if the Down list is declared lossy for this column.
    pub fn is_lossy(&self, table: &str, column: &str) -> bool {
        self.lossy_down
            .iter()
            .any(|l| l.table == table && l.column == column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_id_parts() {
        let id = MigrationId::parse("20240115093012_InitialCreate").unwrap();
        assert_eq!(id.name(), "InitialCreate");
        assert_eq!(
            id.timestamp().format("%Y-%m-%d %H:%M:%S").to_string(),
            "2024-01-15 09:30:12"
        );
    }

    #[test]
    fn test_migration_id_rejects_bad_forms() {
        assert!(MigrationId::parse("InitialCreate").is_none());
        assert!(MigrationId::parse("2024011509301_Short").is_none());
        assert!(MigrationId::parse("20241315093012_BadMonth").is_none());
        assert!(MigrationId::parse("20240115093012_").is_none());
        assert!(MigrationId::parse("20240115093012_Has Space").is_none());
    }

    #[test]
    fn test_migration_ids_order_by_time() {
        let a = MigrationId::parse("20240115093012_InitialCreate").unwrap();
        let b = MigrationId::parse("20240220141530_AddRolesAndPermissions").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let id = MigrationId::parse("20240115093012_InitialCreate").unwrap();
        let a = MigrationUnit::new(id.clone(), vec![], vec![]);
        let mut b = a.clone();
        assert_eq!(a.checksum(), b.checksum());
        b.up.push(Operation::DropTable {
            table: TableName::new("Brokers"),
        });
        assert_ne!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_description_does_not_affect_checksum() {
        let id = MigrationId::parse("20240115093012_InitialCreate").unwrap();
        let a = MigrationUnit::new(id, vec![], vec![]);
        let mut b = a.clone();
        b.description = Some("Initial schema".to_string());
        assert_eq!(a.checksum(), b.checksum());
    }
}
