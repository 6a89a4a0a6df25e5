//! Bridge configuration types and defaults.
//!
//! This module defines the configuration options for the bridge and the
//! process-wide guest engine flag store.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default name of the flat function table object in guest globals
pub const DEFAULT_BINDING_NAME: &str = "__native";

/// Default upper bound on collect/finalize rounds in a forced collection
pub const DEFAULT_MAX_GC_PASSES: usize = 8;

/// Configuration for the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Tag imported guest objects with a hidden back-reference to their
    /// wrapper (default: true)
    #[serde(default = "default_true")]
    pub identity_cache: bool,

    /// Install the flat function table into new context globals (default: true)
    #[serde(default = "default_true")]
    pub install_binding: bool,

    /// Property name of the flat function table object
    #[serde(default = "default_binding_name")]
    pub binding_name: String,

    /// Guest engine flags applied when the bridge opens
    #[serde(default)]
    pub engine_flags: Vec<String>,

    /// Maximum collect/finalize rounds per forced collection
    #[serde(default = "default_max_gc_passes")]
    pub max_gc_passes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            identity_cache: true,
            install_binding: true,
            binding_name: DEFAULT_BINDING_NAME.to_string(),
            engine_flags: Vec::new(),
            max_gc_passes: DEFAULT_MAX_GC_PASSES,
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: BridgeConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Enable or disable the identity tag cache
    pub fn with_identity_cache(mut self, enable: bool) -> Self {
        self.identity_cache = enable;
        self
    }

    /// Enable or disable the flat function table
    pub fn with_binding(mut self, enable: bool) -> Self {
        self.install_binding = enable;
        self
    }

    /// Set the flat function table property name
    pub fn with_binding_name(mut self, name: impl Into<String>) -> Self {
        self.binding_name = name.into();
        self
    }

    /// Add an engine flag string (e.g. `"--harmony --use_strict"`)
    pub fn with_engine_flags(mut self, flags: impl Into<String>) -> Self {
        self.engine_flags.push(flags.into());
        self
    }

    /// Set the forced collection round limit
    pub fn with_max_gc_passes(mut self, passes: usize) -> Self {
        self.max_gc_passes = passes;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_gc_passes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_gc_passes".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.install_binding && self.binding_name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "binding_name".into(),
                reason: "must not be empty when the binding is installed".into(),
            });
        }

        for flags in &self.engine_flags {
            EngineFlags::parse(flags)?;
        }

        Ok(())
    }
}

/// Value of a single engine flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    /// `--flag` / `--no-flag`
    Bool(bool),
    /// `--flag=value`
    Text(String),
}

/// Parsed guest engine flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineFlags {
    flags: BTreeMap<String, FlagValue>,
}

impl EngineFlags {
    /// Parse a whitespace separated flag string.
    ///
    /// Dashes and underscores are interchangeable in flag names.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let mut parsed = EngineFlags::default();
        parsed.merge_str(input)?;
        Ok(parsed)
    }

    fn merge_str(&mut self, input: &str) -> Result<(), ConfigError> {
        for token in input.split_whitespace() {
            let Some(body) = token.strip_prefix("--") else {
                return Err(ConfigError::InvalidFlag(token.to_string()));
            };
            let (name, value) = match body.split_once('=') {
                Some((name, value)) => (name, FlagValue::Text(value.to_string())),
                None => match body.strip_prefix("no") {
                    Some(rest) if rest.starts_with(['-', '_']) => {
                        (&rest[1..], FlagValue::Bool(false))
                    }
                    _ => (body, FlagValue::Bool(true)),
                },
            };
            if name.is_empty() {
                return Err(ConfigError::InvalidFlag(token.to_string()));
            }
            self.flags.insert(name.replace('-', "_"), value);
        }
        Ok(())
    }

    /// Look up a flag
    pub fn get(&self, name: &str) -> Option<&FlagValue> {
        self.flags.get(&name.replace('-', "_"))
    }

    /// Whether a boolean flag is set
    pub fn is_enabled(&self, name: &str) -> bool {
        matches!(self.get(name), Some(FlagValue::Bool(true)))
    }

    /// Number of flags set
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// Whether no flags are set
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

static ENGINE_FLAGS: Lazy<RwLock<EngineFlags>> = Lazy::new(|| RwLock::new(EngineFlags::default()));

/// Merge flags into the process-wide engine flag set.
///
/// Like the engine's own flag API this is global state shared by every
/// bridge in the process.
pub fn set_engine_flags(input: &str) -> Result<(), ConfigError> {
    let parsed = EngineFlags::parse(input)?;
    let mut flags = ENGINE_FLAGS.write();
    flags.flags.extend(parsed.flags);
    tracing::debug!(flags = input, "engine flags updated");
    Ok(())
}

/// Snapshot of the process-wide engine flags
pub fn engine_flags() -> EngineFlags {
    ENGINE_FLAGS.read().clone()
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field name
        field: String,
        /// The reason it's invalid
        reason: String,
    },

    /// Malformed engine flag
    #[error("Invalid engine flag: {0}")]
    InvalidFlag(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_binding_name() -> String {
    DEFAULT_BINDING_NAME.to_string()
}

fn default_max_gc_passes() -> usize {
    DEFAULT_MAX_GC_PASSES
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert!(config.identity_cache);
        assert!(config.install_binding);
        assert_eq!(config.binding_name, DEFAULT_BINDING_NAME);
        assert_eq!(config.max_gc_passes, DEFAULT_MAX_GC_PASSES);
    }

    #[test]
    fn test_config_builder() {
        let config = BridgeConfig::new()
            .with_identity_cache(false)
            .with_binding_name("sys")
            .with_engine_flags("--harmony")
            .with_max_gc_passes(3);

        assert!(!config.identity_cache);
        assert_eq!(config.binding_name, "sys");
        assert_eq!(config.engine_flags, vec!["--harmony".to_string()]);
        assert_eq!(config.max_gc_passes, 3);
    }

    #[test]
    fn test_config_validation() {
        assert!(BridgeConfig::new().with_max_gc_passes(0).validate().is_err());
        assert!(BridgeConfig::new().with_binding_name("").validate().is_err());
        assert!(BridgeConfig::new()
            .with_binding(false)
            .with_binding_name("")
            .validate()
            .is_ok());
        assert!(BridgeConfig::new().with_engine_flags("harmony").validate().is_err());
        assert!(BridgeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = BridgeConfig::default().with_engine_flags("--use_strict");
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("identityCache"));
        let parsed: BridgeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"identityCache": false, "maxGcPasses": 2}}"#).unwrap();

        let config = BridgeConfig::from_file(file.path()).unwrap();
        assert!(!config.identity_cache);
        assert_eq!(config.max_gc_passes, 2);
        assert_eq!(config.binding_name, DEFAULT_BINDING_NAME);
    }

    #[test]
    fn test_config_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = BridgeConfig::from_file(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_engine_flag_parsing() {
        let flags = EngineFlags::parse("--harmony --no-lazy --stack_size=984").unwrap();
        assert!(flags.is_enabled("harmony"));
        assert_eq!(flags.get("lazy"), Some(&FlagValue::Bool(false)));
        assert_eq!(flags.get("stack-size"), Some(&FlagValue::Text("984".into())));
        assert_eq!(flags.len(), 3);

        assert!(EngineFlags::parse("harmony").is_err());
        assert!(EngineFlags::parse("--").is_err());
        assert!(EngineFlags::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_flag_named_like_negation() {
        let flags = EngineFlags::parse("--nolazy --notify").unwrap();
        assert!(flags.is_enabled("nolazy"));
        assert!(flags.is_enabled("notify"));
    }

    #[test]
    fn test_process_wide_flags() {
        set_engine_flags("--expose_gc_for_config_test").unwrap();
        assert!(engine_flags().is_enabled("expose_gc_for_config_test"));
        assert!(set_engine_flags("bogus").is_err());
    }
}
