//! The ordered list of migration units.

use crate::error::{CoreError, CoreResult, UnitError};
use crate::state::SchemaState;
use crate::unit::{Direction, MigrationId, MigrationUnit};
use std::collections::HashSet;

/// An ordered ledger of migration units.
///
/// Construction does not validate ordering so that the checker can report
/// every problem of a broken ledger; call [`Ledger::ensure_ordered`] before
/// applying anything.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    units: Vec<MigrationUnit>,
}

impl Ledger {
    pub fn new(units: Vec<MigrationUnit>) -> Self {
        Self { units }
    }

    pub fn units(&self) -> &[MigrationUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Find a unit by id.
    pub fn get(&self, id: &str) -> Option<&MigrationUnit> {
        self.units.iter().find(|u| u.id == id)
    }

    /// Position of a unit in the ledger.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.units.iter().position(|u| u.id == id)
    }

    /// Resolve an id to its position, failing if it is not in the ledger.
    pub fn require_position(&self, id: &str) -> CoreResult<usize> {
        self.position(id).ok_or_else(|| CoreError::UnknownUnit { id: id.to_string() })
    }

    /// Ids in ledger order.
    pub fn ids(&self) -> impl Iterator<Item = &MigrationId> {
        self.units.iter().map(|u| &u.id)
    }

    /// Check that ids are unique and strictly increasing.
    pub fn ensure_ordered(&self) -> CoreResult<()> {
        let mut seen = HashSet::new();
        for unit in &self.units {
            if !seen.insert(unit.id.as_str()) {
                return Err(CoreError::DuplicateUnit {
                    id: unit.id.to_string(),
                });
            }
        }
        for pair in self.units.windows(2) {
            if pair[1].id <= pair[0].id {
                return Err(CoreError::LedgerOutOfOrder {
                    earlier: pair[0].id.to_string(),
                    later: pair[1].id.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Replay the Up lists of the first `count` units onto an empty schema.
    pub fn replay(&self, count: usize) -> Result<SchemaState, UnitError> {
        let mut state = SchemaState::new();
        for unit in self.units.iter().take(count) {
            state.apply_unit(unit, Direction::Up)?;
        }
        Ok(state)
    }

    /// Replay every unit up to and including `id`.
    pub fn replay_through(&self, id: &str) -> CoreResult<SchemaState> {
        let index = self.require_position(id)?;
        Ok(self.replay(index + 1)?)
    }
}
