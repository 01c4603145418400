//! Configuration schema (protofilter.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::rules::RulePrecedence;

/// Default config file name looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "protofilter.toml";

fn default_output_dir() -> PathBuf {
    PathBuf::from("out")
}

fn default_true() -> bool {
    true
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Binary FileDescriptorSet to filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor_set: Option<PathBuf>,

    /// YAML include/exclude rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<PathBuf>,

    /// Directory the filtered .proto files are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Which side wins when a path is a leaf in both forests
    #[serde(default)]
    pub precedence: RulePrecedence,

    /// Where to save the JSON run report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<PathBuf>,

    /// Warn about rules that never matched a schema element
    #[serde(default = "default_true")]
    pub warn_unmatched_rules: bool,

    /// Project root path (for resolving relative paths)
    #[serde(skip)]
    pub project_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            descriptor_set: None,
            rules: None,
            output_dir: default_output_dir(),
            precedence: RulePrecedence::default(),
            report: None,
            warn_unmatched_rules: true,
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut config = Self::from_toml(&contents)?;

        // Relative paths resolve against the config file's directory
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let mut config: Config =
            toml::from_str(toml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.project_root = std::env::current_dir().unwrap_or_default();
        Ok(config)
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Resolve a possibly relative path against the project root
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.precedence, RulePrecedence::Include);
        assert!(config.warn_unmatched_rules);
        assert!(config.descriptor_set.is_none());
    }

    #[test]
    fn parse_all_keys() {
        let config = Config::from_toml(
            r#"
descriptor_set = "build/api.pb"
rules = "filter.yml"
output_dir = "gen"
precedence = "exclude"
report = "report.json"
warn_unmatched_rules = false
"#,
        )
        .unwrap();

        assert_eq!(config.descriptor_set, Some(PathBuf::from("build/api.pb")));
        assert_eq!(config.rules, Some(PathBuf::from("filter.yml")));
        assert_eq!(config.output_dir, PathBuf::from("gen"));
        assert_eq!(config.precedence, RulePrecedence::Exclude);
        assert_eq!(config.report, Some(PathBuf::from("report.json")));
        assert!(!config.warn_unmatched_rules);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert!(config.warn_unmatched_rules);
    }

    #[test]
    fn reject_bad_precedence() {
        let result = Config::from_toml("precedence = \"both\"");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn config_toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let config = Config {
            rules: Some(PathBuf::from("rules.yml")),
            precedence: RulePrecedence::Exclude,
            ..Config::default()
        };
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.rules, config.rules);
        assert_eq!(loaded.precedence, RulePrecedence::Exclude);
        assert_eq!(loaded.project_root, dir.path());
    }

    #[test]
    fn resolve_relative_paths() {
        let config = Config {
            project_root: PathBuf::from("/work/api"),
            ..Config::default()
        };

        assert_eq!(
            config.resolve_path(Path::new("rules.yml")),
            PathBuf::from("/work/api/rules.yml")
        );
        assert_eq!(
            config.resolve_path(Path::new("/abs/rules.yml")),
            PathBuf::from("/abs/rules.yml")
        );
    }
}
