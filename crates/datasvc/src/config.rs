use std::path::{Path, PathBuf};
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;

use crate::errors::Result;

const PREFIX: &str = "DATAPLAY";
const SEPARATOR: &str = "__";

/// Default number of rows processed between cancellation and deadline
/// checks.
pub const DEFAULT_CHECK_INTERVAL_ROWS: usize = 1024;

/// Configuration for the dataset service.
///
/// Values from an optional TOML file can be overridden with environment
/// variables prefixed with `DATAPLAY__`, e.g. `DATAPLAY__STORAGE__KIND=local`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatasvcConfig {
    pub storage: StorageConfig,
    /// Default query timeout in milliseconds. No timeout if unset.
    #[serde(default)]
    pub query_timeout_ms: Option<u64>,
    pub check_interval_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Keep everything in memory, nothing survives a restart.
    Memory,
    /// Persist datasets under a directory on the local filesystem.
    Local { data_dir: PathBuf },
}

impl Default for DatasvcConfig {
    fn default() -> Self {
        DatasvcConfig {
            storage: StorageConfig::Memory,
            query_timeout_ms: None,
            check_interval_rows: DEFAULT_CHECK_INTERVAL_ROWS,
        }
    }
}

impl DatasvcConfig {
    /// Load the config from defaults, an optional file, and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = Self::base(path)?
            .add_source(Self::environment())
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load the config from a TOML string layered over the defaults.
    ///
    /// Environment variables are not consulted.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config = Self::defaults()?
            .add_source(File::from_str(s, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Defaults plus the optional config file, environment not yet applied.
    pub fn base(path: Option<&Path>) -> Result<ConfigBuilder<DefaultState>> {
        let mut builder = Self::defaults()?;
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        Ok(builder)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        let builder = Config::builder()
            .set_default("storage.kind", "memory")?
            .set_default("check_interval_rows", DEFAULT_CHECK_INTERVAL_ROWS as i64)?;
        Ok(builder)
    }

    fn environment() -> Environment {
        Environment::with_prefix(PREFIX)
            .separator(SEPARATOR)
            .ignore_empty(true)
            .try_parsing(true)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        let config = DatasvcConfig::from_toml_str("").unwrap();
        assert_eq!(DatasvcConfig::default(), config);
        assert_eq!(None, config.query_timeout());
    }

    #[test]
    fn local_storage() {
        let config = DatasvcConfig::from_toml_str(
            r#"
            query_timeout_ms = 250

            [storage]
            kind = "local"
            data_dir = "/tmp/dataplay"
            "#,
        )
        .unwrap();

        assert_eq!(
            StorageConfig::Local {
                data_dir: PathBuf::from("/tmp/dataplay")
            },
            config.storage
        );
        assert_eq!(Some(Duration::from_millis(250)), config.query_timeout());
        assert_eq!(DEFAULT_CHECK_INTERVAL_ROWS, config.check_interval_rows);
    }

    #[test]
    fn from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "check_interval_rows = 16").unwrap();

        let config = DatasvcConfig::base(Some(file.path()))
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize::<DatasvcConfig>()
            .unwrap();
        assert_eq!(16, config.check_interval_rows);
        assert_eq!(StorageConfig::Memory, config.storage);
    }

    #[test]
    fn missing_file_errors() {
        DatasvcConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
    }

    #[test]
    fn unknown_storage_kind() {
        DatasvcConfig::from_toml_str("[storage]\nkind = \"s3\"").unwrap_err();
    }
}
