//! Loader configuration.
//!
//! Read from TOML, looked up in this order:
//!
//! 1. the path given with `--config`
//! 2. `./snowload.toml`
//! 3. `<config dir>/snowload/config.toml`
//!
//! ```toml
//! [warehouse]
//! account = "xy12345"
//! database = "MIGRATION"
//! schema = "PUBLIC"
//! warehouse = "COMPUTE_WH"
//!
//! [loader]
//! csv_dir = "output_csv"
//! sql_dir = "output_sql"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::catalog::ScanOptions;
use crate::creator::PatternRule;
use crate::ddl::{SchemaOverride, SchemaOverrides};
use crate::error::{LoadError, LoadResult};

/// File name looked up in the working directory.
pub const LOCAL_CONFIG: &str = "snowload.toml";

/// Warehouse connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// sqlx URL (`postgres://...`, `sqlite://...`). Takes precedence over
    /// the Snowflake account settings.
    pub url: Option<String>,
    pub account: Option<String>,
    /// Login name, shown when describing the connection.
    pub user: Option<String>,
    /// Bearer token for the SQL API.
    pub token: Option<String>,
    pub token_type: String,
    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub role: Option<String>,
    /// Overrides `https://<account>.snowflakecomputing.com`.
    pub host: Option<String>,
    /// Per-statement timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            url: None,
            account: None,
            user: None,
            token: None,
            token_type: "KEYPAIR_JWT".to_string(),
            warehouse: None,
            database: None,
            schema: None,
            role: None,
            host: None,
            timeout_secs: 60,
        }
    }
}

/// Loader behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    pub csv_dir: PathBuf,
    pub sql_dir: PathBuf,
    pub has_header: bool,
    pub max_rows_per_batch: usize,
    pub max_attempts: usize,
    /// Rows sampled per CSV for type inference.
    pub infer_rows: usize,
    /// Create tables from the exported `<sql_dir>/<TARGET>.sql` statement
    /// instead of generating one, when the file exists.
    pub use_exported_ddl: bool,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            csv_dir: PathBuf::from("output_csv"),
            sql_dir: PathBuf::from("output_sql"),
            has_header: true,
            max_rows_per_batch: 500,
            max_attempts: 3,
            infer_rows: 1000,
            use_exported_ddl: false,
        }
    }
}

impl LoaderSettings {
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            has_header: self.has_header,
            infer_rows: self.infer_rows,
        }
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub warehouse: WarehouseConfig,
    pub loader: LoaderSettings,
    pub overrides: Vec<SchemaOverride>,
    pub error_patterns: Vec<PatternRule>,
}

impl LoaderConfig {
    /// Create a new configuration builder
    pub fn builder() -> LoaderConfigBuilder {
        LoaderConfigBuilder::default()
    }

    /// Builder starting from this configuration, for layering overrides.
    pub fn into_builder(self) -> LoaderConfigBuilder {
        LoaderConfigBuilder { config: self }
    }

    pub fn from_toml(content: &str) -> LoadResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| LoadError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> LoadResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| LoadError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Load from the explicit path, else the first config file found, else
    /// defaults.
    pub fn load(explicit: Option<&Path>) -> LoadResult<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::discover() {
            Some(path) => {
                tracing::debug!(path = %path.display(), "using config file");
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(LOCAL_CONFIG);
        if local.is_file() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("snowload").join("config.toml"))
            .filter(|p| p.is_file())
    }

    pub fn validate(&self) -> LoadResult<()> {
        if self.loader.max_rows_per_batch == 0 {
            return Err(LoadError::Config("loader.max_rows_per_batch must be at least 1".into()));
        }
        if self.loader.max_attempts == 0 {
            return Err(LoadError::Config("loader.max_attempts must be at least 1".into()));
        }
        if self.warehouse.timeout_secs == 0 {
            return Err(LoadError::Config("warehouse.timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Built-in overrides extended with the configured ones.
    pub fn schema_overrides(&self) -> SchemaOverrides {
        let mut overrides = SchemaOverrides::builtin();
        overrides.extend(self.overrides.iter().cloned());
        overrides
    }
}

/// Builder for LoaderConfig
#[derive(Debug, Default)]
pub struct LoaderConfigBuilder {
    config: LoaderConfig,
}

impl LoaderConfigBuilder {
    /// Set the sqlx database URL
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.warehouse.url = Some(url.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.warehouse.token = Some(token.into());
        self
    }

    pub fn csv_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.loader.csv_dir = dir.into();
        self
    }

    pub fn sql_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.loader.sql_dir = dir.into();
        self
    }

    pub fn has_header(mut self, has_header: bool) -> Self {
        self.config.loader.has_header = has_header;
        self
    }

    pub fn batch_size(mut self, rows: usize) -> Self {
        self.config.loader.max_rows_per_batch = rows;
        self
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.config.loader.max_attempts = attempts;
        self
    }

    pub fn use_exported_ddl(mut self, enabled: bool) -> Self {
        self.config.loader.use_exported_ddl = enabled;
        self
    }

    pub fn schema_override(mut self, entry: SchemaOverride) -> Self {
        self.config.overrides.push(entry);
        self
    }

    pub fn error_pattern(mut self, rule: PatternRule) -> Self {
        self.config.error_patterns.push(rule);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> LoadResult<LoaderConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
