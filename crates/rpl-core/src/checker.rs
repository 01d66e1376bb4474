//! Ledger consistency checks.
//!
//! The checker replays the ledger in memory and reports every problem it
//! finds; it never corrects anything and never touches a database.

use crate::error::{CoreError, CoreResult};
use crate::ledger::Ledger;
use crate::names::TableName;
use crate::state::SchemaState;
use crate::table::TableSchema;
use crate::unit::{Direction, MigrationId, MigrationUnit};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// How serious a validation finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Category of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    /// Duplicate or non-increasing ids
    Ordering,
    /// An Up operation failed during replay
    UpFailed,
    /// A Down operation failed
    DownFailed,
    /// Down does not restore the state before Up
    NotInverse,
    /// Down differs only on a column declared in `lossy_down`
    LossyDown,
    /// A foreign key column's type differs from its target column
    TypeAmbiguity,
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationKind::Ordering => "ordering",
            ValidationKind::UpFailed => "up-failed",
            ValidationKind::DownFailed => "down-failed",
            ValidationKind::NotInverse => "not-inverse",
            ValidationKind::LossyDown => "lossy-down",
            ValidationKind::TypeAmbiguity => "type-ambiguity",
        };
        f.write_str(s)
    }
}

/// One finding of [`validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub severity: Severity,
    /// Unit the finding is attributed to (`None` for whole-ledger findings)
    pub unit: Option<MigrationId>,
    pub kind: ValidationKind,
    pub message: String,
}

impl ValidationError {
    fn new(severity: Severity, unit: Option<&MigrationId>, kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            severity,
            unit: unit.cloned(),
            kind,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.unit {
            Some(unit) => write!(f, "{} [{}] {}: {}", self.severity, self.kind, unit, self.message),
            None => write!(f, "{} [{}] {}", self.severity, self.kind, self.message),
        }
    }
}

/// Validate a ledger: ordering, Up replay, foreign key type agreement, the
/// round trip of every unit and a full teardown to an empty schema.
pub fn validate(ledger: &Ledger) -> Vec<ValidationError> {
    let mut issues = Vec::new();
    check_ordering(ledger.units(), &mut issues);

    let mut state = SchemaState::new();
    let mut reported = HashSet::new();
    for unit in ledger.units() {
        let mut after = state.clone();
        if let Err(e) = after.apply_unit(unit, Direction::Up) {
            issues.push(ValidationError::new(
                Severity::Error,
                Some(&unit.id),
                ValidationKind::UpFailed,
                e.source.to_string(),
            ));
            // Later units assume this one applied; replaying them is noise.
            return issues;
        }
        check_type_ambiguity(unit, &after, &mut reported, &mut issues);
        check_round_trip(unit, &state, &after, &mut issues);
        state = after;
    }

    for unit in ledger.units().iter().rev() {
        if let Err(e) = state.apply_unit(unit, Direction::Down) {
            issues.push(ValidationError::new(
                Severity::Error,
                Some(&unit.id),
                ValidationKind::DownFailed,
                format!("full teardown: {}", e.source),
            ));
            return issues;
        }
    }
    if !state.is_empty() {
        issues.push(ValidationError::new(
            Severity::Error,
            None,
            ValidationKind::NotInverse,
            format!(
                "tables left after rolling back every unit: {}",
                state.table_names().join(", ")
            ),
        ));
    }
    issues
}

fn check_ordering(units: &[MigrationUnit], issues: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for unit in units {
        if !seen.insert(unit.id.as_str()) {
            issues.push(ValidationError::new(
                Severity::Error,
                Some(&unit.id),
                ValidationKind::Ordering,
                "duplicate unit id",
            ));
        }
    }
    for pair in units.windows(2) {
        if pair[1].id < pair[0].id {
            issues.push(ValidationError::new(
                Severity::Error,
                Some(&pair[1].id),
                ValidationKind::Ordering,
                format!("listed after the later unit '{}'", pair[0].id),
            ));
        }
    }
}

fn check_type_ambiguity(
    unit: &MigrationUnit,
    state: &SchemaState,
    reported: &mut HashSet<(String, String)>,
    issues: &mut Vec<ValidationError>,
) {
    for table in state.tables() {
        for fk in &table.schema.foreign_keys {
            let Some(target) = state.table(&fk.references_table) else {
                continue;
            };
            for (c, t) in fk.columns.iter().zip(&fk.references_columns) {
                let (Some(col), Some(target_col)) = (table.schema.column(c), target.schema.column(t)) else {
                    continue;
                };
                if col.ty != target_col.ty
                    && reported.insert((fk.name.clone(), c.to_string()))
                {
                    issues.push(ValidationError::new(
                        Severity::Error,
                        Some(&unit.id),
                        ValidationKind::TypeAmbiguity,
                        format!(
                            "{}.{} is {} but foreign key '{}' targets {}.{} of type {}",
                            table.name(),
                            c,
                            col.ty,
                            fk.name,
                            fk.references_table,
                            t,
                            target_col.ty
                        ),
                    ));
                }
            }
        }
    }
}

fn check_round_trip(unit: &MigrationUnit, before: &SchemaState, after: &SchemaState, issues: &mut Vec<ValidationError>) {
    let mut reverted = after.clone();
    if let Err(e) = reverted.apply_unit(unit, Direction::Down) {
        issues.push(ValidationError::new(
            Severity::Error,
            Some(&unit.id),
            ValidationKind::DownFailed,
            e.source.to_string(),
        ));
        return;
    }

    let mut lossy_seen = HashSet::new();
    for diff in before.differences(&reverted) {
        let lossy = diff
            .column
            .as_ref()
            .is_some_and(|c| unit.is_lossy(&diff.table, c));
        if lossy {
            if let Some(c) = &diff.column {
                lossy_seen.insert((diff.table.to_string(), c.to_string()));
            }
            log::debug!("{}: declared lossy difference {}", unit.id, diff);
            issues.push(ValidationError::new(
                Severity::Warning,
                Some(&unit.id),
                ValidationKind::LossyDown,
                diff.to_string(),
            ));
        } else {
            issues.push(ValidationError::new(
                Severity::Error,
                Some(&unit.id),
                ValidationKind::NotInverse,
                diff.to_string(),
            ));
        }
    }

    for lossy in &unit.lossy_down {
        if !lossy_seen.contains(&(lossy.table.to_string(), lossy.column.to_string())) {
            issues.push(ValidationError::new(
                Severity::Warning,
                Some(&unit.id),
                ValidationKind::LossyDown,
                format!(
                    "{}.{} is declared lossy but its Down restores it exactly",
                    lossy.table, lossy.column
                ),
            ));
        }
    }
}

/// Table declarations after applying units `0..=unit_index`.
pub fn compute_schema_at(ledger: &Ledger, unit_index: usize) -> CoreResult<BTreeMap<TableName, TableSchema>> {
    if unit_index >= ledger.len() {
        return Err(CoreError::UnitIndexOutOfRange {
            index: unit_index,
            len: ledger.len(),
        });
    }
    Ok(ledger.replay(unit_index + 1)?.schemas())
}

#[cfg(test)]
#[path = "checker_test.rs"]
mod tests;
