//! Reading and writing ledger directories

use crate::error::{CoreError, CoreResult};
use crate::ledger::Ledger;
use crate::unit::{MigrationId, MigrationUnit};
use std::path::{Path, PathBuf};

/// List the `.yml` / `.yaml` files directly inside `dir`, sorted by file name.
pub(crate) fn yaml_files(dir: &Path) -> CoreResult<Vec<PathBuf>> {
    let io_err = |e| CoreError::IoWithPath {
        path: dir.display().to_string(),
        source: e,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "yml" || e == "yaml") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub(crate) fn read_file(path: &Path) -> CoreResult<String> {
    std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
        path: path.display().to_string(),
        source: e,
    })
}

/// Parse a unit from YAML. `origin` is only used in error messages.
pub fn parse_unit(content: &str, origin: &str) -> CoreResult<MigrationUnit> {
    serde_yaml::from_str(content).map_err(|e| CoreError::UnitParseError {
        path: origin.to_string(),
        details: e.to_string(),
    })
}

/// Load one unit file, checking that its name matches the declared id.
pub fn load_unit(path: &Path) -> CoreResult<MigrationUnit> {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    if MigrationId::parse(stem).is_none() {
        return Err(CoreError::InvalidMigrationId { id: stem.to_string() });
    }
    let content = read_file(path)?;
    let unit = parse_unit(&content, &path.display().to_string())?;
    if unit.id != stem {
        return Err(CoreError::UnitIdMismatch {
            path: path.display().to_string(),
            id: unit.id.to_string(),
        });
    }
    Ok(unit)
}

/// Load every unit of a ledger directory, ordered by id.
///
/// Ordering problems (duplicates) are left in place for the checker to
/// report; callers that apply units should call [`Ledger::ensure_ordered`].
pub fn load_ledger_dir(dir: &Path) -> CoreResult<Ledger> {
    if !dir.is_dir() {
        return Err(CoreError::LedgerNotFound {
            path: dir.display().to_string(),
        });
    }
    let mut units = yaml_files(dir)?
        .iter()
        .map(|path| load_unit(path))
        .collect::<CoreResult<Vec<_>>>()?;
    units.sort_by(|a, b| a.id.cmp(&b.id));
    log::debug!("Loaded {} units from {}", units.len(), dir.display());
    Ok(Ledger::new(units))
}

/// Write a unit to `<dir>/<id>.yml`, refusing to overwrite an existing file.
pub fn write_unit(dir: &Path, unit: &MigrationUnit) -> CoreResult<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| CoreError::IoWithPath {
        path: dir.display().to_string(),
        source: e,
    })?;
    let path = dir.join(format!("{}.yml", unit.id));
    if path.exists() {
        return Err(CoreError::DuplicateUnit {
            id: unit.id.to_string(),
        });
    }
    let content = serde_yaml::to_string(unit)?;
    std::fs::write(&path, content).map_err(|e| CoreError::IoWithPath {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(path)
}

#[cfg(test)]
#[path = "loader_test.rs"]
mod tests;
