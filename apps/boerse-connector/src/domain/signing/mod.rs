//! Request Signing
//!
//! Derives the per-request trace and security headers the Boerse Frankfurt
//! API expects on every call.
//!
//! # Header Derivation
//!
//! | Header | Value |
//! |---|---|
//! | `client-date` | UTC time, ISO-8601 with milliseconds and a `Z` suffix |
//! | `x-client-traceid` | `md5(client-date + url + salt)` as lowercase hex |
//! | `x-security` | `md5(local time as YYYYMMddHHmm)` as lowercase hex |
//!
//! Both digests depend on the current clock, so headers are computed for
//! every request and never reused.

use chrono::{DateTime, NaiveDateTime, Utc};
use md5::{Digest, Md5};

// =============================================================================
// Constants
// =============================================================================

/// Header carrying the UTC request timestamp.
pub const CLIENT_DATE_HEADER: &str = "client-date";

/// Header carrying the salted trace digest.
pub const TRACE_ID_HEADER: &str = "x-client-traceid";

/// Header carrying the minute-resolution security digest.
pub const SECURITY_HEADER: &str = "x-security";

const CLIENT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

const SECURITY_FORMAT: &str = "%Y%m%d%H%M";

// =============================================================================
// Secret
// =============================================================================

/// Shared salt mixed into every trace digest.
///
/// Obtained once per connector, either supplied by the caller or scraped
/// from the site's client script. Never refreshed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a salt value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the raw salt.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Secret").field(&"[REDACTED]").finish()
    }
}

// =============================================================================
// Request Headers
// =============================================================================

/// Signed header triple for one outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeaders {
    /// UTC timestamp, e.g. `2024-03-15T09:30:00.123Z`.
    pub client_date: String,
    /// Hex MD5 of `client_date + url + salt`.
    pub trace_id: String,
    /// Hex MD5 of the local minute stamp.
    pub security_token: String,
}

impl RequestHeaders {
    /// Iterate the headers as `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            (CLIENT_DATE_HEADER, self.client_date.as_str()),
            (TRACE_ID_HEADER, self.trace_id.as_str()),
            (SECURITY_HEADER, self.security_token.as_str()),
        ]
        .into_iter()
    }
}

// =============================================================================
// Signer
// =============================================================================

/// Compute the signed headers for `url`.
///
/// Pure function of its inputs. `url` must be byte-identical to the URL the
/// request is sent to, query string included.
#[must_use]
pub fn sign(
    url: &str,
    secret: &Secret,
    now_utc: DateTime<Utc>,
    now_local: NaiveDateTime,
) -> RequestHeaders {
    let client_date = now_utc.format(CLIENT_DATE_FORMAT).to_string();

    let mut trace = Md5::new();
    trace.update(client_date.as_bytes());
    trace.update(url.as_bytes());
    trace.update(secret.expose().as_bytes());
    let trace_id = format!("{:x}", trace.finalize());

    let minute_stamp = now_local.format(SECURITY_FORMAT).to_string();
    let security_token = format!("{:x}", Md5::digest(minute_stamp.as_bytes()));

    RequestHeaders {
        client_date,
        trace_id,
        security_token,
    }
}

/// Sign `url` against the current wall clock.
#[must_use]
pub fn sign_now(url: &str, secret: &Secret) -> RequestHeaders {
    sign(url, secret, Utc::now(), chrono::Local::now().naive_local())
}

// =============================================================================
// Tests
// =============================================================================
