//! Configuration management
//!
//! Optional TOML configuration for embedders and end users: history
//! retention, completion display, and keybinding overrides in the same
//! key-spec syntax the keymaps use.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::completion::DEFAULT_DELIMITERS;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// History settings
    pub history: HistoryConfig,
    /// Completion settings
    pub completion: CompletionConfig,
    /// Keybinding overrides (key-spec -> command)
    #[serde(default)]
    pub keys: KeyBindings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Entries kept across accepts; -1 keeps everything
    pub max_entries: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig { max_entries: -1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Characters that end a completion stem
    pub delimiters: String,
    /// Lay the candidate menu out column-major
    pub sort_in_column: bool,
    /// Append a space after a unique completion
    pub append_space: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        CompletionConfig {
            delimiters: DEFAULT_DELIMITERS.to_string(),
            sort_in_column: true,
            append_space: false,
        }
    }
}

/// Keybinding overrides, e.g. `"\C-x\C-r" = "refresh"`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KeyBindings {
    #[serde(flatten)]
    pub bindings: HashMap<String, String>,
}

/// Get the config directory, respecting XDG_CONFIG_HOME
fn config_dir() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME")
        && !xdg.is_empty()
    {
        return Some(PathBuf::from(xdg).join("relish"));
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".config").join("relish"))
}

pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Default config file content with comments
fn default_config() -> &'static str {
    r##"# relish configuration
# This file is auto-generated. Edit as needed.

[history]
# Number of history entries kept across accepts (-1 = unlimited)
max_entries = -1

[completion]
# Lay the completion menu out column-major
sort_in_column = true

# Append a space after a unique completion
append_space = false

# Keybinding overrides: key-spec -> command name, for example
# [keys]
# "\\C-x\\C-r" = "refresh"
# "\\M-u" = "universal-argument"
"##
}

impl Config {
    /// Load configuration from file, creating a default one if it doesn't
    /// exist. Any problem falls back to the built-in defaults with a
    /// warning, never an error.
    pub fn load() -> Self {
        let Some(config_path) = config_file() else {
            return Config::default();
        };

        if let Some(dir) = config_path.parent()
            && !dir.exists()
            && fs::create_dir_all(dir).is_err()
        {
            return Config::default();
        }

        if !config_path.exists()
            && let Err(e) = fs::write(&config_path, default_config())
        {
            log::warn!("could not create config file: {e}");
            return Config::default();
        }

        match fs::read_to_string(&config_path) {
            Ok(content) => match toml_edit::de::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("could not parse config file: {e}; using defaults");
                    Config::default()
                }
            },
            Err(e) => {
                log::warn!("could not read config file: {e}");
                Config::default()
            }
        }
    }

    /// Serialise the current settings.
    pub fn to_toml(&self) -> Result<String, crate::errors::Error> {
        toml_edit::ser::to_string_pretty(self)
            .map_err(|e| crate::errors::Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.history.max_entries, -1);
        assert!(c.completion.sort_in_column);
        assert!(!c.completion.append_space);
        assert!(c.keys.bindings.is_empty());
        assert_eq!(c.completion.delimiters, DEFAULT_DELIMITERS);
    }

    #[test]
    fn test_parse_overrides() {
        let toml = r#"
[history]
max_entries = 500

[completion]
sort_in_column = false

[keys]
"\\C-x\\C-r" = "refresh"
"#;
        let c: Config = toml_edit::de::from_str(toml).unwrap();
        assert_eq!(c.history.max_entries, 500);
        assert!(!c.completion.sort_in_column);
        assert_eq!(
            c.keys.bindings.get("\\C-x\\C-r").map(String::as_str),
            Some("refresh")
        );
    }

    #[test]
    fn test_default_template_parses() {
        let c: Config = toml_edit::de::from_str(default_config()).unwrap();
        assert_eq!(c.history.max_entries, -1);
    }

    #[test]
    fn test_roundtrip() {
        let mut c = Config::default();
        c.history.max_entries = 100;
        let s = c.to_toml().unwrap();
        let back: Config = toml_edit::de::from_str(&s).unwrap();
        assert_eq!(back.history.max_entries, 100);
    }
}
