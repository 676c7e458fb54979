//! Hostname detection for log records.

use std::env;

/// Resolve the hostname stamped on every log line.
///
/// Order: `CAPTURE_HOSTNAME`, `HOSTNAME`, the system hostname, then `"unknown"`.
pub fn detect_hostname() -> String {
    for var in ["CAPTURE_HOSTNAME", "HOSTNAME"] {
        if let Ok(value) = env::var(var) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }

    system_hostname().unwrap_or_else(|| "unknown".to_string())
}

#[cfg(unix)]
fn system_hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
}

#[cfg(not(unix))]
fn system_hostname() -> Option<String> {
    env::var("COMPUTERNAME").ok().filter(|name| !name.is_empty())
}
