//! Built-in models: small transition systems with known state counts.

pub mod bakery;
pub mod counters;
pub mod ring;

use std::collections::BTreeMap;

use tessera_mc::Model;
use thiserror::Error;
use tracing::debug;

pub use bakery::Bakery;
pub use counters::Counters;
pub use ring::Ring;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("malformed model argument '{0}', expected key=value")]
    MalformedArg(String),

    #[error("model '{model}' has no parameter '{key}'")]
    UnknownParam { model: &'static str, key: String },

    #[error("parameter '{key}': {reason}")]
    InvalidParam { key: String, reason: String },
}

pub type ModelResult<T> = Result<T, ModelError>;

/// Name and one-line description of every built-in model.
pub const MODELS: &[(&str, &str)] = &[
    (
        bakery::NAME,
        "Lamport's bakery mutual exclusion with bounded tickets (procs, max_ticket)",
    ),
    (
        counters::NAME,
        "independent bounded counters, a full grid (n, max)",
    ),
    (ring::NAME, "token ring of modular counters (nodes, values)"),
];

/// Parameters passed to a model as `key=value` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelArgs {
    values: BTreeMap<String, String>,
}

impl ModelArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a list of `key=value` strings.
    pub fn parse<S: AsRef<str>>(items: &[S]) -> ModelResult<Self> {
        let mut args = Self::new();
        for item in items {
            let item = item.as_ref();
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| ModelError::MalformedArg(item.to_string()))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(ModelError::MalformedArg(item.to_string()));
            }
            args.values.insert(key.to_string(), value.trim().to_string());
        }
        Ok(args)
    }

    pub fn set(mut self, key: &str, value: impl ToString) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    /// Fail on any key outside `known`.
    fn check_known(&self, model: &'static str, known: &[&str]) -> ModelResult<()> {
        match self.values.keys().find(|k| !known.contains(&k.as_str())) {
            Some(key) => Err(ModelError::UnknownParam {
                model,
                key: key.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Integer parameter in `min..=max`, or `default` when unset.
    fn get_u32(&self, key: &str, default: u32, min: u32, max: u32) -> ModelResult<u32> {
        let Some(raw) = self.values.get(key) else {
            return Ok(default);
        };
        let value: u32 = raw.parse().map_err(|_| ModelError::InvalidParam {
            key: key.to_string(),
            reason: format!("'{raw}' is not a non-negative integer"),
        })?;
        if value < min || value > max {
            return Err(ModelError::InvalidParam {
                key: key.to_string(),
                reason: format!("{value} is outside {min}..={max}"),
            });
        }
        Ok(value)
    }
}

/// Look up a built-in model by name.
pub fn by_name(name: &str, args: &ModelArgs) -> ModelResult<Box<dyn Model>> {
    let model: Box<dyn Model> = match name {
        bakery::NAME => Box::new(Bakery::from_args(args)?),
        counters::NAME => Box::new(Counters::from_args(args)?),
        ring::NAME => Box::new(Ring::from_args(args)?),
        _ => return Err(ModelError::UnknownModel(name.to_string())),
    };
    debug!(model = name, ?args, "built model");
    Ok(model)
}
