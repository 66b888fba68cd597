//! Key-value run settings.
//!
//! Values arrive as `key=value` strings (command line overrides) and are
//! parsed on access. Unset keys read as their default.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use tessera_store::{BackendKind, StoreConfig, StoreError};
use thiserror::Error;

use crate::explorer::{CheckerKind, ExploreConfig};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("malformed setting '{0}', expected key=value")]
    Malformed(String),

    #[error("unknown setting '{0}'")]
    UnknownKey(String),

    #[error("setting '{key}': cannot parse '{value}' as {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("unknown checker '{0}'")]
    UnknownChecker(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Recognized keys and their defaults.
pub const DEFAULTS: &[(&str, &str)] = &[
    ("threads", "0"),
    ("storage", "cchm"),
    ("checker", "multicore_bitbetter"),
    ("root_log2", "20"),
    ("data_log2", "21"),
    ("arena_log2", "24"),
    ("chunk_len", "4"),
    ("header_len", "0"),
    ("publish_every", "32"),
    ("pin_cpus", "false"),
    ("stats", "true"),
    ("histogram", "false"),
    ("max_states", "0"),
];

fn default_of(key: &str) -> Option<&'static str> {
    DEFAULTS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split `key=value`. Whitespace around either side is ignored.
    pub fn parse_override(s: &str) -> ConfigResult<(String, String)> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| ConfigError::Malformed(s.to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::Malformed(s.to_string()));
        }
        Ok((key.to_string(), value.trim().to_string()))
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> ConfigResult<()> {
        if default_of(key).is_none() {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }
        self.values.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Apply a `key=value` override.
    pub fn apply(&mut self, s: &str) -> ConfigResult<()> {
        let (key, value) = Self::parse_override(s)?;
        self.set(&key, value)
    }

    /// Raw value of `key`, falling back to its default.
    pub fn get_str(&self, key: &str) -> ConfigResult<&str> {
        match self.values.get(key) {
            Some(v) => Ok(v),
            None => default_of(key).ok_or_else(|| ConfigError::UnknownKey(key.to_string())),
        }
    }

    fn parse<T: FromStr>(&self, key: &str, expected: &'static str) -> ConfigResult<T> {
        let raw = self.get_str(key)?;
        raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            expected,
        })
    }

    pub fn get_usize(&self, key: &str) -> ConfigResult<usize> {
        self.parse(key, "a non-negative integer")
    }

    pub fn get_u32(&self, key: &str) -> ConfigResult<u32> {
        self.parse(key, "a non-negative integer")
    }

    pub fn get_bool(&self, key: &str) -> ConfigResult<bool> {
        let raw = self.get_str(key)?;
        match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
                expected: "a boolean",
            }),
        }
    }

    pub fn storage(&self) -> ConfigResult<BackendKind> {
        Ok(self.get_str("storage")?.parse()?)
    }

    pub fn checker(&self) -> ConfigResult<CheckerKind> {
        self.get_str("checker")?.parse()
    }

    pub fn store_config(&self) -> ConfigResult<StoreConfig> {
        let config = StoreConfig {
            root_log2: self.get_u32("root_log2")?,
            data_log2: self.get_u32("data_log2")?,
            arena_log2: self.get_u32("arena_log2")?,
            header_len: self.get_usize("header_len")?,
            chunk_len: self.get_usize("chunk_len")?,
            fixed_length: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Assemble the explorer configuration.
    pub fn explore_config(&self) -> ConfigResult<ExploreConfig> {
        Ok(ExploreConfig {
            threads: self.get_usize("threads")?,
            checker: self.checker()?,
            storage: self.storage()?,
            store: self.store_config()?,
            publish_every: self.get_usize("publish_every")?,
            pin_cpus: self.get_bool("pin_cpus")?,
            collect_stats: self.get_bool("stats")?,
            collect_histogram: self.get_bool("histogram")?,
            max_states: self.get_usize("max_states")?,
            progress: None,
        })
    }

    /// Keys set explicitly, in order.
    pub fn overrides(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, default) in DEFAULTS {
            let value = self.values.get(*key).map_or(*default, String::as_str);
            writeln!(f, "{key} = {value}")?;
        }
        Ok(())
    }
}
