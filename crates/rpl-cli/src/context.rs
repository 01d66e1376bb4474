//! Runtime context for CLI commands

use anyhow::{Context, Result};
use rpl_core::{load_ledger_dir, load_reference_dir, Config, Ledger, ReferenceSet};
use rpl_db::{Database, DuckDbBackend};
use rpl_migrate::{polizas_ledger, Migrator, MigratorSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::GlobalArgs;

/// Loaded configuration and ledger, shared by every command
pub struct RuntimeContext {
    /// Project root
    pub root: PathBuf,

    pub config: Config,

    /// Resolved target name (CLI flag or RPL_TARGET)
    pub target: Option<String>,

    pub ledger: Ledger,

    /// `--database` override
    database: Option<String>,
}

impl RuntimeContext {
    /// Create a new runtime context from global arguments
    pub fn new(args: &GlobalArgs) -> Result<Self> {
        let root = PathBuf::from(&args.project_dir);
        let config = load_config(args, &root)?;

        let ledger = if args.builtin {
            polizas_ledger().context("Failed to load the builtin ledger")?
        } else {
            let dir = config.ledger_path_absolute(&root);
            load_ledger_dir(&dir).with_context(|| format!("Failed to load ledger from {}", dir.display()))?
        };
        log::debug!("Ledger has {} units", ledger.len());

        Ok(Self {
            root,
            config,
            target: Config::resolve_target(args.target.as_deref()),
            ledger,
            database: args.database.clone(),
        })
    }

    /// Database path after target and `--database` overrides
    pub fn database_path(&self) -> Result<String> {
        if let Some(path) = &self.database {
            return Ok(path.clone());
        }
        let db_config = self
            .config
            .get_database_config(self.target.as_deref())
            .context("Failed to get database configuration")?;
        Ok(db_config.path)
    }

    pub fn connect(&self) -> Result<Arc<dyn Database>> {
        let path = self.database_path()?;
        log::debug!("Connecting to {path}");
        let db: Arc<dyn Database> = Arc::new(DuckDbBackend::new(&path).context("Failed to connect to database")?);
        Ok(db)
    }

    /// A migrator over the loaded ledger and the target database
    pub fn migrator(&self) -> Result<Migrator> {
        self.ledger
            .ensure_ordered()
            .context("Ledger is not in order; run `rpl validate`")?;
        let settings = MigratorSettings::from_config(&self.config, self.target.as_deref())
            .context("Failed to resolve migrator settings")?;
        Ok(Migrator::new(self.connect()?, self.ledger.clone(), settings))
    }

    /// Reference data sets from the configured directory; none when it does
    /// not exist
    pub fn references(&self) -> Result<Vec<ReferenceSet>> {
        let dir = self.config.reference_path_absolute(&self.root);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        load_reference_dir(&dir).with_context(|| format!("Failed to load reference data from {}", dir.display()))
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.config.ledger_path_absolute(&self.root)
    }
}

/// `--config`, then rpl.yml in the project directory. With `--builtin` a
/// missing project config falls back to the builtin defaults.
fn load_config(args: &GlobalArgs, root: &Path) -> Result<Config> {
    if let Some(path) = &args.config {
        return Config::load(Path::new(path)).context("Failed to load configuration file");
    }
    let has_project_config = root.join("rpl.yml").exists() || root.join("rpl.yaml").exists();
    if args.builtin && !has_project_config {
        return Ok(Config::builtin());
    }
    Config::load_from_dir(root).context("Failed to load project configuration")
}
