use std::env;

use crate::error::ConfigError;

pub(crate) const DEVICE: &str = "SYMGRAPH_DEVICE";
pub(crate) const FLOATX: &str = "SYMGRAPH_FLOATX";
pub(crate) const OPTIMIZER: &str = "SYMGRAPH_OPTIMIZER";
pub(crate) const MAX_PASSES: &str = "SYMGRAPH_OPTIMIZER_MAX_PASSES";

/// Reads a non-empty environment variable.
pub(crate) fn var(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

pub(crate) fn parse_usize(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
}
