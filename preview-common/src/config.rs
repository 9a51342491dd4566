//! Configuration file resolution and TOML loading
//!
//! Configuration sources, highest priority first:
//! 1. Explicit path (command-line argument)
//! 2. Environment variable naming a file
//! 3. Platform config file (`<config_dir>/<app>/config.toml`), if present
//! 4. Built-in defaults (`T::default()`)
//!
//! Individual values given on the command line are applied by the caller on
//! top of whatever this module loads.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where a loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Path passed explicitly by the caller
    Explicit(PathBuf),
    /// Path taken from an environment variable
    Environment(PathBuf),
    /// Platform default location
    PlatformDefault(PathBuf),
    /// No file found; built-in defaults
    BuiltIn,
}

impl ConfigSource {
    /// Path of the file backing this source, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::Explicit(p)
            | ConfigSource::Environment(p)
            | ConfigSource::PlatformDefault(p) => Some(p),
            ConfigSource::BuiltIn => None,
        }
    }
}

/// Resolve which configuration file to read.
///
/// An explicit path or an environment path must exist; a missing platform
/// default silently falls through to built-in defaults.
pub fn resolve_config_source(
    cli_path: Option<&Path>,
    env_var_name: &str,
    app_name: &str,
) -> Result<ConfigSource> {
    // Priority 1: command-line argument
    if let Some(path) = cli_path {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return Ok(ConfigSource::Explicit(path.to_path_buf()));
    }

    // Priority 2: environment variable
    if let Ok(value) = std::env::var(env_var_name) {
        if !value.is_empty() {
            let path = PathBuf::from(value);
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file from {} not found: {}",
                    env_var_name,
                    path.display()
                )));
            }
            return Ok(ConfigSource::Environment(path));
        }
    }

    // Priority 3: platform default
    if let Some(path) = default_config_path(app_name) {
        if path.exists() {
            return Ok(ConfigSource::PlatformDefault(path));
        }
        debug!("No config file at {}", path.display());
    }

    // Priority 4: built-in defaults
    Ok(ConfigSource::BuiltIn)
}

/// Platform config file location for `app_name`
pub fn default_config_path(app_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(app_name).join("config.toml"))
}

/// Parse a TOML document into `T`
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T> {
    Ok(toml::from_str(content)?)
}

/// Load configuration of type `T` from the resolved source
pub fn load<T>(source: &ConfigSource) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match source.path() {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            let config = parse_toml(&content)?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => {
            info!("No configuration file, using built-in defaults");
            Ok(T::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize, Default, PartialEq)]
    #[serde(default)]
    struct Sample {
        name: String,
        level: u32,
    }

    #[test]
    fn test_explicit_path_wins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"explicit\"\nlevel = 3").unwrap();

        let source = resolve_config_source(Some(file.path()), "PREVIEW_TEST_UNSET_VAR", "preview-test")
            .unwrap();
        assert_eq!(source, ConfigSource::Explicit(file.path().to_path_buf()));

        let sample: Sample = load(&source).unwrap();
        assert_eq!(sample.name, "explicit");
        assert_eq!(sample.level, 3);
    }

    #[test]
    fn test_missing_explicit_path_is_error() {
        let result = resolve_config_source(
            Some(Path::new("/definitely/not/here.toml")),
            "PREVIEW_TEST_UNSET_VAR",
            "preview-test",
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_environment_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "level = 7").unwrap();
        std::env::set_var("PREVIEW_TEST_CONFIG_ENV", file.path());

        let source = resolve_config_source(None, "PREVIEW_TEST_CONFIG_ENV", "preview-test").unwrap();
        std::env::remove_var("PREVIEW_TEST_CONFIG_ENV");

        assert_eq!(source, ConfigSource::Environment(file.path().to_path_buf()));
        let sample: Sample = load(&source).unwrap();
        assert_eq!(sample, Sample { name: String::new(), level: 7 });
    }

    #[test]
    fn test_builtin_defaults() {
        let sample: Sample = load(&ConfigSource::BuiltIn).unwrap();
        assert_eq!(sample, Sample::default());
    }

    #[test]
    fn test_malformed_toml() {
        let result: Result<Sample> = parse_toml("level = \"not a number\"");
        assert!(matches!(result, Err(Error::TomlParse(_))));
    }
}
