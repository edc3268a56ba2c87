//! Salt Bootstrap
//!
//! Scrapes the signing salt from the site's client bundle:
//!
//! 1. `GET` the home page and find the single `src="main.<hash>.js"` reference.
//! 2. `GET` that script relative to the home page.
//! 3. Find the single `salt:"<token>"` literal in the script.
//!
//! Any deviation from that shape means the site changed; it is reported as a
//! [`BootstrapError`] and never retried.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use super::connector::ConnectorError;
use crate::domain::signing::Secret;

/// Site layout no longer matches what the bootstrap expects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootstrapError {
    /// Home page request returned a non-success status.
    #[error("home page returned HTTP {0}")]
    HomePageStatus(u16),
    /// Home page did not reference exactly one client script.
    #[error("expected one main script reference on the home page, found {found}")]
    ScriptReference {
        /// Number of references found.
        found: usize,
    },
    /// Script request returned a non-success status.
    #[error("client script returned HTTP {0}")]
    ScriptStatus(u16),
    /// Script did not contain exactly one salt literal.
    #[error("expected one salt token in the client script, found {found}")]
    SaltToken {
        /// Number of tokens found.
        found: usize,
    },
    /// Script reference could not be resolved against the home page URL.
    #[error("cannot resolve script path {0}")]
    ScriptUrl(String),
}

#[allow(clippy::expect_used)] // Patterns are compile-time constants
fn script_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"src="(main\.\w*\.js)"#).expect("script regex is valid"))
}

#[allow(clippy::expect_used)] // Patterns are compile-time constants
fn salt_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"salt:"(\w*)"#).expect("salt regex is valid"))
}

fn single_capture<'a>(pattern: &Regex, haystack: &'a str) -> Result<&'a str, usize> {
    let found: Vec<&str> = pattern
        .captures_iter(haystack)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    match found.as_slice() {
        [single] => Ok(*single),
        _ => Err(found.len()),
    }
}

/// Find the client script file name in the home page body.
///
/// # Errors
///
/// Returns [`BootstrapError::ScriptReference`] unless exactly one reference
/// is present.
pub fn extract_script_name(home_page: &str) -> Result<&str, BootstrapError> {
    single_capture(script_pattern(), home_page)
        .map_err(|found| BootstrapError::ScriptReference { found })
}

/// Find the salt literal in the client script body.
///
/// # Errors
///
/// Returns [`BootstrapError::SaltToken`] unless exactly one literal is
/// present.
pub fn extract_salt(script: &str) -> Result<&str, BootstrapError> {
    single_capture(salt_pattern(), script).map_err(|found| BootstrapError::SaltToken { found })
}

/// Fetch the salt from the live site.
///
/// # Errors
///
/// Returns [`ConnectorError::Transport`] for network failures and
/// [`ConnectorError::Bootstrap`] when the site does not have the expected
/// shape.
pub async fn bootstrap(client: &reqwest::Client, home: &Url) -> Result<Secret, ConnectorError> {
    tracing::debug!(url = %home, "Fetching home page for salt bootstrap");

    let response = client.get(home.clone()).send().await?;
    if !response.status().is_success() {
        return Err(BootstrapError::HomePageStatus(response.status().as_u16()).into());
    }
    let page = response.text().await?;

    let script_name = extract_script_name(&page)?;
    let script_url = home
        .join(script_name)
        .map_err(|_| BootstrapError::ScriptUrl(script_name.to_string()))?;

    tracing::debug!(url = %script_url, "Fetching client script");

    let response = client.get(script_url).send().await?;
    if !response.status().is_success() {
        return Err(BootstrapError::ScriptStatus(response.status().as_u16()).into());
    }
    let script = response.text().await?;
    let salt = extract_salt(&script)?;

    tracing::info!(script = %script_name, "Salt bootstrap complete");

    Ok(Secret::new(salt))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOME: &str = r#"<html><head>
        <script src="runtime.0b3f5e.js" defer></script>
        <script src="main.4f9a1c2e7d.js" type="module"></script>
    </head></html>"#;

    #[test]
    fn finds_single_script_reference() {
        assert_eq!(extract_script_name(HOME).unwrap(), "main.4f9a1c2e7d.js");
    }

    #[test]
    fn rejects_missing_or_duplicate_script() {
        assert_eq!(
            extract_script_name("<html></html>"),
            Err(BootstrapError::ScriptReference { found: 0 })
        );
        let twice = format!("{HOME}{HOME}");
        assert_eq!(
            extract_script_name(&twice),
            Err(BootstrapError::ScriptReference { found: 2 })
        );
    }

    #[test]
    fn finds_salt_literal() {
        let script = r#"var a={production:!0,salt:"w4ivc1ATTGta6njAZzMbkL3kJwxMfEAKDa3MNr",api:"x"};"#;
        assert_eq!(
            extract_salt(script).unwrap(),
            "w4ivc1ATTGta6njAZzMbkL3kJwxMfEAKDa3MNr"
        );
    }

    #[test]
    fn rejects_missing_or_duplicate_salt() {
        assert_eq!(
            extract_salt("salt: \"spaced\""),
            Err(BootstrapError::SaltToken { found: 0 })
        );
        assert_eq!(
            extract_salt(r#"salt:"a",salt:"b""#),
            Err(BootstrapError::SaltToken { found: 2 })
        );
    }

    #[test]
    fn tokens_need_no_closing_quote() {
        assert_eq!(
            extract_script_name(r#"<script src="main.abc123.js?v=1"></script>"#).unwrap(),
            "main.abc123.js"
        );
        assert_eq!(extract_salt("{salt:\"k3y9\\u0022}").unwrap(), "k3y9");
    }
}
