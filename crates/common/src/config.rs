//! Common configuration types for streaming components.

use crate::secret::{ExposeSecret, SecretString};
use std::time::Duration;

/// Default maximum number of pooled database connections.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 20;

/// Default minimum number of idle pooled connections.
pub const DEFAULT_DB_MIN_CONNECTIONS: u32 = 2;

/// Default server-side statement timeout in seconds.
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u32 = 10;

/// Database pool configuration.
///
/// The URL is held as a [`SecretString`] so it never shows up in `Debug`
/// output or structured logs.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub url: SecretString,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections kept open
    pub min_connections: u32,
    /// How long to wait for a pooled connection
    pub acquire_timeout: Duration,
    /// Server-side `statement_timeout` appended to the URL
    pub statement_timeout_secs: u32,
}

impl DatabaseConfig {
    /// Build a config with default pool settings.
    #[must_use]
    pub fn new(url: SecretString) -> Self {
        Self {
            url,
            max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            min_connections: DEFAULT_DB_MIN_CONNECTIONS,
            acquire_timeout: Duration::from_secs(5),
            statement_timeout_secs: DEFAULT_STATEMENT_TIMEOUT_SECS,
        }
    }

    /// Connection URL with `statement_timeout` appended, so no query can
    /// hang the server indefinitely.
    #[must_use]
    pub fn url_with_statement_timeout(&self) -> SecretString {
        let url = self.url.expose_secret();
        let separator = if url.contains('?') { '&' } else { '?' };
        SecretString::from(format!(
            "{url}{separator}options=-c%20statement_timeout%3D{}s",
            self.statement_timeout_secs
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_timeout_appended_with_question_mark() {
        let config = DatabaseConfig::new(SecretString::from("postgres://localhost/videos"));
        assert_eq!(
            config.url_with_statement_timeout().expose_secret(),
            "postgres://localhost/videos?options=-c%20statement_timeout%3D10s"
        );
    }

    #[test]
    fn test_statement_timeout_appended_with_ampersand() {
        let mut config =
            DatabaseConfig::new(SecretString::from("postgres://localhost/videos?sslmode=disable"));
        config.statement_timeout_secs = 3;
        assert_eq!(
            config.url_with_statement_timeout().expose_secret(),
            "postgres://localhost/videos?sslmode=disable&options=-c%20statement_timeout%3D3s"
        );
    }

    #[test]
    fn test_debug_redacts_url() {
        let config = DatabaseConfig::new(SecretString::from("postgres://user:pw@db/videos"));
        let debug = format!("{config:?}");
        assert!(!debug.contains("pw@db"));
    }
}
