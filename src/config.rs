// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Configuration persistence for kmux
//!
//! Stores log-colouring preferences that would be tedious to repeat on
//! every invocation. The `log` command's flags fall back to these values.
//! Config location: ~/.config/kmux/config.toml (XDG) or ~/.kmux/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// kmux configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Severity threshold for `log` (drop lines more severe than this)
    #[serde(default)]
    pub grep_color: Option<String>,

    /// JSON property names probed for a severity level
    #[serde(default = "default_level_keys")]
    pub level_keys: Vec<String>,

    /// JSON property names probed for an HTTP status code
    #[serde(default = "default_status_code_keys")]
    pub status_code_keys: Vec<String>,
}

fn default_level_keys() -> Vec<String> {
    vec!["level".to_string(), "severity".to_string()]
}

fn default_status_code_keys() -> Vec<String> {
    vec![
        "status".to_string(),
        "statusCode".to_string(),
        "response_code".to_string(),
        "http_status".to_string(),
        "OriginStatus".to_string(),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grep_color: None,
            level_keys: default_level_keys(),
            status_code_keys: default_status_code_keys(),
        }
    }
}

impl Config {
    /// Load config from disk, or return defaults if not found
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Get the config file path
    /// Uses XDG config directory (~/.config/kmux/) or falls back to ~/.kmux/
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .map(|p| p.join("kmux"))
            .or_else(|| dirs::home_dir().map(|p| p.join(".kmux")))
            .context("Could not determine config directory")?;

        Ok(config_dir.join("config.toml"))
    }
}
