//! Shared configuration file loader for Tether binaries.
//!
//! Reads `/etc/tether/tether.conf` (or the path in the `TETHER_CONFIG`
//! env var) and sets environment variables for any keys not already
//! present. File format: `KEY=VALUE` lines; comments (`#`) and blank
//! lines are ignored. Environment variables always win over file values.

/// Default config file path.
const DEFAULT_CONFIG_PATH: &str = "/etc/tether/tether.conf";

/// Load configuration from the Tether config file.
///
/// Search order:
/// 1. `TETHER_CONFIG` env var (explicit path override)
/// 2. `/etc/tether/tether.conf`
///
/// Sets each `KEY=VALUE` as an environment variable only if the key is
/// not already set. Silently returns if the file doesn't exist.
pub fn load_config() {
    let path = std::env::var("TETHER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        // Split on the first '=' only; values may contain '='
        if let Some((key, value)) = trimmed.split_once('=') {
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() {
                continue;
            }
            if std::env::var(key).is_err() {
                std::env::set_var(key, value);
            }
        }
    }
}
