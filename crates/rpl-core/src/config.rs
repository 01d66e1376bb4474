//! Configuration types and parsing for rpl.yml

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Project configuration from rpl.yml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Project name
    pub name: String,

    /// Directory holding one `<id>.yml` file per migration unit
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,

    /// Directory holding reference data sets applied by `rpl seed`
    #[serde(default = "default_reference_path")]
    pub reference_path: String,

    /// Database connection configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Dialect used when rendering SQL without a connection
    #[serde(default)]
    pub dialect: Dialect,

    /// Table recording applied units
    #[serde(default = "default_history_table")]
    pub history_table: String,

    /// Single-row table used as the migration lock
    #[serde(default = "default_lock_table")]
    pub lock_table: String,

    /// Upper bound for applying one unit; exceeding it rolls the unit back
    #[serde(default)]
    pub unit_timeout_secs: Option<u64>,

    /// Named target configurations (e.g. dev, staging, prod)
    #[serde(default)]
    pub targets: HashMap<String, TargetConfig>,
}

/// Target-specific configuration overrides
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    /// Database configuration override
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Unit timeout override
    #[serde(default)]
    pub unit_timeout_secs: Option<u64>,
}

/// Database type selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    /// DuckDB (default)
    #[default]
    DuckDb,
}

impl std::fmt::Display for DbType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbType::DuckDb => write!(f, "duckdb"),
        }
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(rename = "type", default)]
    pub db_type: DbType,

    /// Database path (file-based or :memory:)
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: DbType::default(),
            path: default_db_path(),
        }
    }
}

/// SQL dialect used to render operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    DuckDb,
    Postgres,
    MySql,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::DuckDb => write!(f, "duckdb"),
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::MySql => write!(f, "mysql"),
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "duckdb" => Ok(Dialect::DuckDb),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::MySql),
            other => Err(format!(
                "unknown dialect '{other}' (expected duckdb, postgres or mysql)"
            )),
        }
    }
}

fn default_ledger_path() -> String {
    "migrations".to_string()
}

fn default_reference_path() -> String {
    "reference".to_string()
}

fn default_history_table() -> String {
    "__rpl_history".to_string()
}

fn default_lock_table() -> String {
    "__rpl_lock".to_string()
}

const DEFAULT_DB_PATH: &str = ":memory:";

fn default_db_path() -> String {
    DEFAULT_DB_PATH.to_string()
}

impl Config {
    /// Configuration used when no rpl.yml exists (e.g. with `--builtin`)
    pub fn builtin() -> Self {
        Self {
            name: "regularizador_polizas".to_string(),
            ledger_path: default_ledger_path(),
            reference_path: default_reference_path(),
            database: DatabaseConfig::default(),
            dialect: Dialect::default(),
            history_table: default_history_table(),
            lock_table: default_lock_table(),
            unit_timeout_secs: None,
            targets: HashMap::new(),
        }
    }

    /// Load configuration from a file path
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a project directory
    /// Looks for rpl.yml or rpl.yaml
    pub fn load_from_dir(dir: &Path) -> CoreResult<Self> {
        let yml_path = dir.join("rpl.yml");
        let yaml_path = dir.join("rpl.yaml");

        if yml_path.exists() {
            Self::load(&yml_path)
        } else if yaml_path.exists() {
            Self::load(&yaml_path)
        } else {
            Err(CoreError::ConfigNotFound {
                path: yml_path.display().to_string(),
            })
        }
    }

    fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::ConfigInvalid {
                message: "Project name cannot be empty".to_string(),
            });
        }
        for (key, value) in [
            ("history_table", &self.history_table),
            ("lock_table", &self.lock_table),
        ] {
            if value.is_empty() {
                return Err(CoreError::ConfigInvalid {
                    message: format!("{key} cannot be empty"),
                });
            }
        }
        if self.history_table == self.lock_table {
            return Err(CoreError::ConfigInvalid {
                message: format!(
                    "history_table and lock_table must differ (both are '{}')",
                    self.history_table
                ),
            });
        }
        if self.unit_timeout_secs == Some(0) {
            return Err(CoreError::ConfigInvalid {
                message: "unit_timeout_secs must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Get absolute ledger path relative to a project root
    pub fn ledger_path_absolute(&self, root: &Path) -> PathBuf {
        root.join(&self.ledger_path)
    }

    /// Get absolute reference data path relative to a project root
    pub fn reference_path_absolute(&self, root: &Path) -> PathBuf {
        root.join(&self.reference_path)
    }

    /// Get the list of available target names
    pub fn available_targets(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.targets.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    fn target(&self, name: &str) -> CoreResult<&TargetConfig> {
        self.targets.get(name).ok_or_else(|| CoreError::ConfigInvalid {
            message: format!(
                "Target '{}' not found. Available targets: {}",
                name,
                self.available_targets().join(", ")
            ),
        })
    }

    /// Get database configuration, optionally applying target overrides
    pub fn get_database_config(&self, target: Option<&str>) -> CoreResult<DatabaseConfig> {
        match target {
            Some(name) => Ok(self
                .target(name)?
                .database
                .clone()
                .unwrap_or_else(|| self.database.clone())),
            None => Ok(self.database.clone()),
        }
    }

    /// Get the unit timeout, optionally applying target overrides
    pub fn get_unit_timeout(&self, target: Option<&str>) -> CoreResult<Option<u64>> {
        match target {
            Some(name) => Ok(self.target(name)?.unit_timeout_secs.or(self.unit_timeout_secs)),
            None => Ok(self.unit_timeout_secs),
        }
    }

    /// Resolve target from CLI flag or RPL_TARGET environment variable
    ///
    /// Priority: CLI flag > RPL_TARGET env var > None
    pub fn resolve_target(cli_target: Option<&str>) -> Option<String> {
        cli_target
            .map(String::from)
            .or_else(|| std::env::var("RPL_TARGET").ok())
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
