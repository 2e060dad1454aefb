use crate::{codec::directive::DEFAULT_MAX_DEPTH, error::VeraError};
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::Path,
};

/// Name of the optional configuration file at a build root.
pub const CONFIG_FILE: &str = "vera.toml";

fn default_max_nesting_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_guarantee_confidence_threshold() -> f64 {
    0.5
}

fn default_extensions() -> Vec<String> {
    vec!["md".to_string()]
}

fn default_true() -> bool {
    true
}

/// Build settings. Every field has a default, so an empty or partial `vera.toml` is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Directives opened deeper than this are reported and folded into their parent.
    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: usize,
    /// Guarantees with a confidence below this raise a `low-confidence` warning.
    #[serde(default = "default_guarantee_confidence_threshold")]
    pub guarantee_confidence_threshold: f64,
    /// File extensions picked up when compiling a directory.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_true")]
    pub unknown_attributes_warn: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            max_nesting_depth: default_max_nesting_depth(),
            guarantee_confidence_threshold: default_guarantee_confidence_threshold(),
            extensions: default_extensions(),
            unknown_attributes_warn: true,
        }
    }
}

impl BuildConfig {
    pub fn from_toml(content: &str) -> Result<BuildConfig, VeraError> {
        let config: BuildConfig = toml::from_str(content)?;
        if !(0.0..=1.0).contains(&config.guarantee_confidence_threshold) {
            return Err(VeraError::Config(format!(
                "guarantee_confidence_threshold must be within [0, 1], got {}",
                config.guarantee_confidence_threshold
            )));
        }
        if config.max_nesting_depth == 0 {
            return Err(VeraError::Config(
                "max_nesting_depth must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    /// Read `vera.toml` from `root` (or its parent directory when `root` is a file), falling back
    /// to defaults when the file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(root: P) -> Result<BuildConfig, VeraError> {
        let root = root.as_ref();
        let dir = match root.is_file() {
            true => root.parent().unwrap_or(root),
            false => root,
        };
        let path = dir.join(CONFIG_FILE);
        tracing::debug!("Attempting to read build config from: {:?}", &path);
        if !path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(BuildConfig::default());
        }
        let content = read_to_string(&path)?;
        BuildConfig::from_toml(&content)
    }

    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<(), VeraError> {
        let toml_string = toml::to_string(self)?;
        write(dir.as_ref().join(CONFIG_FILE), toml_string)?;
        Ok(())
    }

    /// Whether `path` has one of the configured extensions.
    pub fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|wanted| wanted == ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = BuildConfig::from_toml("max_nesting_depth = 8\n").unwrap();
        assert_eq!(config.max_nesting_depth, 8);
        assert_eq!(config.guarantee_confidence_threshold, 0.5);
        assert_eq!(config.extensions, vec!["md".to_string()]);
        assert!(config.unknown_attributes_warn);
    }

    #[test]
    fn test_invalid_threshold_is_rejected() {
        let result = BuildConfig::from_toml("guarantee_confidence_threshold = 1.5\n");
        assert!(matches!(result, Err(VeraError::Config(_))));
    }

    #[test]
    fn test_load_or_default_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            BuildConfig::load_or_default(dir.path()).unwrap(),
            BuildConfig::default()
        );
        let config = BuildConfig {
            extensions: vec!["md".into(), "markdown".into()],
            ..BuildConfig::default()
        };
        config.save(dir.path()).unwrap();
        let loaded = BuildConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.accepts(Path::new("notes/a.markdown")));
        assert!(!loaded.accepts(Path::new("notes/a.txt")));
    }
}
