//! Configuration inputs for a [`Session`](crate::session::Session).
//!
//! Configuration here is a single typed, serde-serializable struct: every
//! field gets a concrete Rust type and a documented default,
//! rather than a property-bag of loosely typed settings.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A codec slot selector: an IBM code-page number.
pub type CodePageId = u16;

/// Per-session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub host: String,
    /// Defaults to 992 when `secure`, else 23; see [`SessionConfig::new`].
    pub port: u16,
    pub secure: bool,
    pub verify_cert: bool,
    pub terminal_type: String,
    /// Presence of an LU name triggers TN3270E CONNECT in the device-type
    /// negotiation.
    pub lu_name: Option<String>,
    pub use_tn3270e: bool,
    /// `(primary, alternate)` EBCDIC code-page numbers.
    pub encoding: (CodePageId, CodePageId),
    pub alt_rows: usize,
    pub alt_cols: usize,
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub read_timeout: Duration,
    /// Overrides the native trust store for TLS verification.
    pub ca_bundle_path: Option<PathBuf>,
}

impl SessionConfig {
    /// Build a config for `host`, applying the default port for `secure`.
    pub fn new(host: impl Into<String>, secure: bool) -> Self {
        Self {
            host: host.into(),
            port: if secure { 992 } else { 23 },
            secure,
            ..Self::default()
        }
    }

    /// Read a `SessionConfig` from the `TN3270RS_CONFIG` environment
    /// variable, which must name a JSON file on disk. Convenience only; the
    /// core state machine never consults the environment itself.
    pub fn from_env() -> Option<Self> {
        let path = std::env::var_os("TN3270RS_CONFIG")?;
        let contents = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 23,
            secure: false,
            verify_cert: true,
            terminal_type: "IBM-DYNAMIC".to_string(),
            lu_name: None,
            use_tn3270e: true,
            encoding: (37, 37), // CP037 for both slots by default
            alt_rows: 24,
            alt_cols: 80,
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(15),
            ca_bundle_path: None,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports_match_secure_flag() {
        assert_eq!(SessionConfig::new("host", false).port, 23);
        assert_eq!(SessionConfig::new("host", true).port, 992);
    }

    #[test]
    fn default_terminal_type_is_ibm_dynamic() {
        assert_eq!(SessionConfig::default().terminal_type, "IBM-DYNAMIC");
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = SessionConfig::new("mainframe.example.com", true);
        let json = serde_json::to_string(&cfg).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.host, cfg.host);
        assert_eq!(back.port, cfg.port);
    }
}
