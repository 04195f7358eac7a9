use std::path::{Path, PathBuf};

use ::config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::types::Result;

/// Builder for layered configuration.
///
/// Later sources override earlier ones: the file is read first, then
/// environment variables such as `SWITCHBOARD__QUEUES__MAX_QUEUE_LENGTH=50`
/// (prefix and nesting separator `__`).
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    file_required: bool,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Create an empty loader; with no sources `load` yields the type's serde defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Read configuration from a file that must exist
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self.file_required = true;
        self
    }

    /// Read configuration from a file if it exists
    pub fn with_optional_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self.file_required = false;
        self
    }

    /// Override values from environment variables with the given prefix
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Merge every source and deserialize into `T`
    pub fn load<T: DeserializeOwned>(&self) -> Result<T> {
        let mut builder = Config::builder();

        if let Some(path) = &self.file {
            debug!("Loading configuration file {}", path.display());
            builder = builder.add_source(File::from(path.as_path()).required(self.file_required));
        }

        if let Some(prefix) = &self.env_prefix {
            builder = builder.add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let merged = builder.build()?;
        Ok(merged.try_deserialize::<T>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Limits {
        #[serde(default)]
        max_items: usize,
        #[serde(default)]
        name: String,
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("switchboard-loader-{}.toml", std::process::id()));
        std::fs::write(&path, "max_items = 12\nname = \"general\"\n").unwrap();

        let limits: Limits = ConfigLoader::new().with_file(&path).load().unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(limits, Limits { max_items: 12, name: "general".to_string() });
    }

    #[test]
    fn test_missing_required_file_fails() {
        let result: Result<Limits> = ConfigLoader::new()
            .with_file("/definitely/not/here/switchboard.toml")
            .load();
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_optional_file_uses_defaults() {
        let limits: Limits = ConfigLoader::new()
            .with_optional_file("/definitely/not/here/switchboard.toml")
            .load()
            .unwrap();
        assert_eq!(limits.max_items, 0);
    }
}
