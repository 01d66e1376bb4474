//! rpl-migrate - Applies the schema migration ledger to a live database
//!
//! The [`Migrator`] keeps a history table of applied units, serializes runs
//! through a lock table, checks the live data before each operation and runs
//! every unit in its own transaction.

pub mod builtin;
mod checks;
pub mod error;
pub mod history;
pub mod lock;
pub mod migrator;

pub use builtin::polizas_ledger;
pub use error::{MigrateError, MigrateResult};
pub use history::AppliedUnit;
pub use lock::LockHolder;
pub use migrator::{
    Migrator, MigratorSettings, RollbackTarget, SeedReport, StatusReport, UnitState, UnitStatus,
};
