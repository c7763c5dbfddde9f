//! Shared primitives for plugins
//!
//! Every backend that asks the network rarely and serves the last answer
//! often goes through [`Cached`] (pull) or [`Monitor`] (push).

pub mod cache;
pub mod duration;
pub mod monitor;
pub mod scalar;
pub mod template;

pub use cache::Cached;
pub use monitor::Monitor;

use std::time::Duration;

/// Default network request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Interpret common truthy tokens
pub fn truish(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "on" | "yes" | "y" | "t" | "enabled" | "active"
    )
}

/// Prepend `scheme://` when the uri has none
pub fn default_scheme(uri: &str, scheme: &str) -> String {
    if uri.contains("://") {
        uri.to_string()
    } else {
        format!("{}://{}", scheme, uri)
    }
}

/// Append `:port` when the address has none
pub fn default_port(addr: &str, port: u16) -> String {
    let host = addr.rsplit_once("://").map_or(addr, |(_, h)| h);
    let has_port = match host.rsplit_once(':') {
        // bracketed IPv6 literal without port
        Some((h, _)) if host.starts_with('[') && !h.ends_with(']') => false,
        Some((_, p)) => p.parse::<u16>().is_ok(),
        None => false,
    };
    if has_port {
        addr.to_string()
    } else {
        format!("{}:{}", addr, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truish() {
        for s in ["1", "true", "On", " yes ", "TRUE"] {
            assert!(truish(s), "{}", s);
        }
        for s in ["0", "false", "off", "", "2"] {
            assert!(!truish(s), "{}", s);
        }
    }

    #[test]
    fn test_default_scheme() {
        assert_eq!(default_scheme("host/path", "http"), "http://host/path");
        assert_eq!(default_scheme("https://host", "http"), "https://host");
    }

    #[test]
    fn test_default_port() {
        assert_eq!(default_port("192.168.1.2", 502), "192.168.1.2:502");
        assert_eq!(default_port("192.168.1.2:1502", 502), "192.168.1.2:1502");
        assert_eq!(default_port("tls://broker", 8883), "tls://broker:8883");
        assert_eq!(default_port("[::1]", 502), "[::1]:502");
        assert_eq!(default_port("[::1]:503", 502), "[::1]:503");
    }
}
