//! Connector Configuration Settings
//!
//! Configuration types for the connector, loaded from environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::domain::signing::Secret;

const DEFAULT_HOME_URL: &str = "https://www.boerse-frankfurt.de/";
const DEFAULT_API_URL: &str = "https://api.boerse-frankfurt.de/v1/";
const DEFAULT_AUTHORITY: &str = "api.boerse-frankfurt.de";
const DEFAULT_ORIGIN: &str = "https://www.boerse-frankfurt.de";

/// Service endpoints and the static headers derived from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Home page carrying the client script reference.
    pub home: Url,
    /// Base for one-shot data lookups and streams.
    pub data_base: Url,
    /// Base for search queries.
    pub search_base: Url,
    /// Value of the `authority` header.
    pub authority: String,
    /// Value of the `origin` header.
    pub origin: String,
    /// Value of the `referer` header.
    pub referer: String,
}

impl Endpoints {
    /// Build endpoints from a home page URL and an API root.
    ///
    /// The data and search bases are `data/` and `search/` below the API
    /// root. The `authority` header is the API host; `origin` and `referer`
    /// come from the home page.
    ///
    /// # Errors
    ///
    /// Returns an error if either URL does not parse or has no host.
    pub fn new(home: &str, api_root: &str) -> Result<Self, ConfigError> {
        let home = parse_url("home", home)?;
        let api_root = parse_url("api", &with_trailing_slash(api_root))?;

        let authority = match api_root.port() {
            Some(port) => format!("{}:{port}", host_of("api", &api_root)?),
            None => host_of("api", &api_root)?.to_string(),
        };
        let origin = home.origin().ascii_serialization();
        let referer = format!("{origin}/");

        let data_base = api_root
            .join("data/")
            .map_err(|e| ConfigError::InvalidUrl("api".to_string(), e.to_string()))?;
        let search_base = api_root
            .join("search/")
            .map_err(|e| ConfigError::InvalidUrl("api".to_string(), e.to_string()))?;

        Ok(Self {
            home,
            data_base,
            search_base,
            authority,
            origin,
            referer,
        })
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            home: production_url(DEFAULT_HOME_URL),
            data_base: production_url("https://api.boerse-frankfurt.de/v1/data/"),
            search_base: production_url("https://api.boerse-frankfurt.de/v1/search/"),
            authority: DEFAULT_AUTHORITY.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            referer: format!("{DEFAULT_ORIGIN}/"),
        }
    }
}

#[allow(clippy::expect_used)] // Static production URLs
fn production_url(raw: &str) -> Url {
    Url::parse(raw).expect("static production URL is valid")
}

/// HTTP timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutSettings {
    /// TCP/TLS connect timeout for every request.
    pub connect: Duration,
    /// Read timeout for data and search requests.
    pub read: Duration,
    /// Read timeout between chunks of an event stream.
    pub stream_read: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(3500),
            read: Duration::from_secs(15),
            stream_read: Duration::from_secs(5),
        }
    }
}

/// Complete connector configuration.
#[derive(Debug, Clone, Default)]
pub struct ConnectorConfig {
    /// Service endpoints.
    pub endpoints: Endpoints,
    /// HTTP timeouts.
    pub timeouts: TimeoutSettings,
    /// Pre-supplied salt; bootstrapped from the home page when absent.
    pub salt: Option<Secret>,
}

impl ConnectorConfig {
    /// Create configuration from environment variables.
    ///
    /// Call [`load_dotenv`] first to pick up a `.env` file.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `BOERSE_SALT` | bootstrap from the home page |
    /// | `BOERSE_HOME_URL` | `https://www.boerse-frankfurt.de/` |
    /// | `BOERSE_API_URL` | `https://api.boerse-frankfurt.de/v1/` |
    /// | `BOERSE_CONNECT_TIMEOUT_MS` | 3500 |
    /// | `BOERSE_READ_TIMEOUT_MS` | 15000 |
    /// | `BOERSE_STREAM_READ_TIMEOUT_MS` | 5000 |
    ///
    /// # Errors
    ///
    /// Returns an error if a URL is invalid or `BOERSE_SALT` is set but empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// Same variables and defaults as [`ConnectorConfig::from_env`].
    ///
    /// # Errors
    ///
    /// Same as [`ConnectorConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let salt = match lookup("BOERSE_SALT") {
            Some(value) if value.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("BOERSE_SALT".to_string()));
            }
            Some(value) => Some(Secret::new(value.trim())),
            None => None,
        };

        let home = lookup("BOERSE_HOME_URL").unwrap_or_else(|| DEFAULT_HOME_URL.to_string());
        let api = lookup("BOERSE_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let endpoints = Endpoints::new(&home, &api)?;

        let defaults = TimeoutSettings::default();
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map_or(default, Duration::from_millis)
        };
        let timeouts = TimeoutSettings {
            connect: millis("BOERSE_CONNECT_TIMEOUT_MS", defaults.connect),
            read: millis("BOERSE_READ_TIMEOUT_MS", defaults.read),
            stream_read: millis("BOERSE_STREAM_READ_TIMEOUT_MS", defaults.stream_read),
        };

        Ok(Self {
            endpoints,
            timeouts,
            salt,
        })
    }

    /// Use a known salt instead of bootstrapping one.
    #[must_use]
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(Secret::new(salt));
        self
    }

    /// Use different endpoints.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Use different timeouts.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: TimeoutSettings) -> Self {
        self.timeouts = timeouts;
        self
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// URL could not be parsed or lacks a host.
    #[error("invalid {0} URL: {1}")]
    InvalidUrl(String, String),
    /// Env file could not be read or parsed.
    #[error("failed to load env file {0}: {1}")]
    EnvFile(String, String),
}

/// Load `.env` from the working directory or the nearest ancestor that has one.
///
/// Variables already set in the process environment win. Returns the file
/// that was loaded, if any.
pub fn load_dotenv() -> Option<PathBuf> {
    match dotenvy::dotenv() {
        Ok(path) => {
            tracing::debug!(path = %path.display(), "Loaded .env file");
            Some(path)
        }
        Err(e) => {
            if !e.not_found() {
                tracing::warn!(error = %e, "Failed to load .env file");
            }
            None
        }
    }
}

/// Load a specific env file.
///
/// # Errors
///
/// Returns an error if the file is missing or malformed.
pub fn load_dotenv_from(path: &Path) -> Result<(), ConfigError> {
    dotenvy::from_path(path)
        .map_err(|e| ConfigError::EnvFile(path.display().to_string(), e.to_string()))
}

fn parse_url(name: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidUrl(name.to_string(), e.to_string()))
}

fn host_of<'a>(name: &str, url: &'a Url) -> Result<&'a str, ConfigError> {
    url.host_str()
        .ok_or_else(|| ConfigError::InvalidUrl(name.to_string(), "missing host".to_string()))
}

fn with_trailing_slash(raw: &str) -> String {
    if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_endpoints_target_production() {
        let endpoints = Endpoints::default();
        assert_eq!(endpoints.home.as_str(), "https://www.boerse-frankfurt.de/");
        assert_eq!(
            endpoints.data_base.as_str(),
            "https://api.boerse-frankfurt.de/v1/data/"
        );
        assert_eq!(
            endpoints.search_base.as_str(),
            "https://api.boerse-frankfurt.de/v1/search/"
        );
        assert_eq!(endpoints.authority, "api.boerse-frankfurt.de");
        assert_eq!(endpoints.origin, "https://www.boerse-frankfurt.de");
        assert_eq!(endpoints.referer, "https://www.boerse-frankfurt.de/");
    }

    #[test]
    fn endpoints_from_urls_match_defaults() {
        let built = Endpoints::new(DEFAULT_HOME_URL, "https://api.boerse-frankfurt.de/v1").unwrap();
        assert_eq!(built, Endpoints::default());
    }

    #[test]
    fn endpoints_keep_explicit_ports() {
        let built = Endpoints::new("http://127.0.0.1:4000/", "http://127.0.0.1:4000/v1/").unwrap();
        assert_eq!(built.authority, "127.0.0.1:4000");
        assert_eq!(built.origin, "http://127.0.0.1:4000");
        assert_eq!(built.data_base.as_str(), "http://127.0.0.1:4000/v1/data/");
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(matches!(
            Endpoints::new("not a url", DEFAULT_API_URL),
            Err(ConfigError::InvalidUrl(name, _)) if name == "home"
        ));
    }

    #[test]
    fn timeout_defaults() {
        let timeouts = TimeoutSettings::default();
        assert_eq!(timeouts.connect, Duration::from_millis(3500));
        assert_eq!(timeouts.read, Duration::from_secs(15));
        assert_eq!(timeouts.stream_read, Duration::from_secs(5));
    }

    #[test]
    fn builder_sets_salt() {
        let config = ConnectorConfig::default().with_salt("abc");
        assert_eq!(config.salt.as_ref().map(Secret::expose), Some("abc"));
        assert!(!format!("{config:?}").contains("abc"));
    }

    #[test]
    fn env_file_is_loaded() {
        let path = std::env::temp_dir().join(format!("boerse-connector-{}.env", std::process::id()));
        std::fs::write(&path, "BOERSE_TEST_DOTENV_MARKER=loaded\n").unwrap();

        load_dotenv_from(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(std::env::var("BOERSE_TEST_DOTENV_MARKER").unwrap(), "loaded");
        assert!(matches!(
            load_dotenv_from(&path),
            Err(ConfigError::EnvFile(..))
        ));
    }

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value).to_string())
        }
    }

    #[test]
    fn unset_variables_give_production_defaults() {
        let config = ConnectorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.endpoints, Endpoints::default());
        assert_eq!(config.timeouts, TimeoutSettings::default());
        assert!(config.salt.is_none());
    }

    #[test]
    fn empty_salt_is_rejected() {
        assert!(matches!(
            ConnectorConfig::from_lookup(lookup(&[("BOERSE_SALT", "  ")])),
            Err(ConfigError::EmptyValue(name)) if name == "BOERSE_SALT"
        ));
    }

    #[test]
    fn salt_is_trimmed() {
        let config = ConnectorConfig::from_lookup(lookup(&[("BOERSE_SALT", " s4lt\n")])).unwrap();
        assert_eq!(config.salt.as_ref().map(Secret::expose), Some("s4lt"));
    }

    #[test]
    fn bad_api_url_is_rejected() {
        assert!(matches!(
            ConnectorConfig::from_lookup(lookup(&[("BOERSE_API_URL", "::not a url")])),
            Err(ConfigError::InvalidUrl(name, _)) if name == "api"
        ));
    }

    #[test]
    fn overrides_replace_endpoints_and_timeouts() {
        let config = ConnectorConfig::from_lookup(lookup(&[
            ("BOERSE_HOME_URL", "http://127.0.0.1:4000/"),
            ("BOERSE_API_URL", "http://127.0.0.1:4000/v1"),
            ("BOERSE_READ_TIMEOUT_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.endpoints.search_base.as_str(), "http://127.0.0.1:4000/v1/search/");
        assert_eq!(config.timeouts.read, Duration::from_millis(250));
    }

    #[test]
    fn non_numeric_timeout_falls_back() {
        let config = ConnectorConfig::from_lookup(lookup(&[
            ("BOERSE_CONNECT_TIMEOUT_MS", "soon"),
            ("BOERSE_STREAM_READ_TIMEOUT_MS", "-5"),
        ]))
        .unwrap();
        assert_eq!(config.timeouts, TimeoutSettings::default());
    }
}
