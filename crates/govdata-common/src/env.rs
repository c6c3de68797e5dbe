//! Environment variable helpers
//!
//! Blank values are treated the same as unset ones, so `DB_PASSWORD=` in a
//! `.env` file means "no password" rather than "empty password".

use std::str::FromStr;

/// Value of `key` if it is set and not blank.
pub fn var_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Value of `key`, or `default` when unset or blank.
pub fn var_or(key: &str, default: &str) -> String {
    var_opt(key).unwrap_or_else(|| default.to_string())
}

/// Parsed value of `key`, or `default` when unset, blank or unparsable.
pub fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    var_opt(key)
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// First of `keys` that is set and not blank.
pub fn first_var(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| var_opt(key))
}
