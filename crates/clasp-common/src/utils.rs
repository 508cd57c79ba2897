//! Utility functions for Clasp
//!
//! Common helper functions used across the codebase.

use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use if_addrs::IfAddr;

/// Regex pattern for validating identifiers (node names, service names, etc.)
static VALID_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new("^[a-zA-Z0-9_.:-]*$").expect("Invalid regex pattern"));

/// Validate a string contains only allowed characters
///
/// Allowed characters: alphanumeric, underscore, dot, colon, hyphen
///
/// # Examples
///
/// ```
/// use clasp_common::is_valid;
///
/// assert!(is_valid("node-1"));
/// assert!(is_valid("10.0.0.7:7800"));
/// assert!(!is_valid("invalid/path"));
/// assert!(!is_valid("with spaces"));
/// ```
pub fn is_valid(str: &str) -> bool {
    VALID_PATTERN.is_match(str)
}

/// Get the local IP address
///
/// Returns the first non-loopback IPv4 address found,
/// or "127.0.0.1" as fallback.
pub fn local_ip() -> String {
    if_addrs::get_if_addrs()
        .ok()
        .and_then(|addrs| {
            addrs
                .into_iter()
                .find(|iface| !iface.is_loopback() && matches!(iface.addr, IfAddr::V4(_)))
                .and_then(|iface| match iface.addr {
                    IfAddr::V4(addr) => Some(addr.ip.to_string()),
                    _ => None,
                })
        })
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

/// Current wall-clock time in Unix millis
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_is_valid_identifiers() {
        assert!(is_valid("abc123"));
        assert!(is_valid("test_value"));
        assert!(is_valid("test-value"));
        assert!(is_valid("test.value"));
        assert!(is_valid("test:value"));
        assert!(is_valid(""));
    }

    #[test]
    fn test_is_valid_invalid_chars() {
        assert!(!is_valid("test value"));
        assert!(!is_valid("test/value"));
        assert!(!is_valid("test@value"));
    }

    #[test]
    fn test_local_ip_not_empty() {
        assert!(!local_ip().is_empty());
    }

    proptest! {
        #[test]
        fn prop_whitespace_is_never_valid(prefix in "[a-z]{0,8}", suffix in "[a-z]{0,8}") {
            let value = format!("{} {}", prefix, suffix);
            prop_assert!(!is_valid(&value));
        }
    }
}
