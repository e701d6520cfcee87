//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] wrappers used for connection strings and
//! other credentials. `SecretString` implements `Debug` with redaction, so
//! a config struct that derives `Debug` stays safe to log.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct StoreSettings {
//!     pool_size: u32,
//!     database_url: SecretString,
//! }
//!
//! let settings = StoreSettings {
//!     pool_size: 20,
//!     database_url: SecretString::from("postgres://streams:pw@db/videos"),
//! };
//!
//! assert!(!format!("{settings:?}").contains("pw@db"));
//! let url: &str = settings.database_url.expose_secret();
//! assert!(url.starts_with("postgres://"));
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("postgres://u:hunter2@db/videos");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("postgres://localhost/videos");
        assert_eq!(secret.expose_secret(), "postgres://localhost/videos");
    }

    #[test]
    fn test_deserialize_keeps_value_hidden() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct StoreSettings {
            pool_size: u32,
            database_url: SecretString,
        }

        let json = r#"{"pool_size": 5, "database_url": "postgres://u:s3cret@db/v"}"#;
        let settings: StoreSettings = serde_json::from_str(json).expect("deserialize");

        assert_eq!(settings.database_url.expose_secret(), "postgres://u:s3cret@db/v");
        let debug = format!("{settings:?}");
        assert!(!debug.contains("s3cret"));
    }
}
