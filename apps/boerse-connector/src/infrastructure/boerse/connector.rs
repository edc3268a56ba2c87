//! Boerse Frankfurt Connector
//!
//! One HTTP session against the Boerse Frankfurt web API, exposing the
//! signed request primitives everything else is built on:
//!
//! | Operation | Request | Envelope check |
//! |---|---|---|
//! | [`Connector::fetch_data`] | `GET {data}/{endpoint}?{query}` | empty, malformed, `messages` |
//! | [`Connector::post_search`] | `POST {search}/{endpoint}` with JSON body | empty, malformed |
//! | [`Connector::fetch_search`] | `GET {search}/{endpoint}[?{query}]` | empty, malformed, `messages` |
//! | [`Connector::open_stream`] | `GET {data}/{endpoint}?{query}` as `text/event-stream` | status |
//!
//! The session (cookie jar and connection pool) is shared by all requests
//! and is safe for concurrent use. The salt is fixed for the connector's
//! lifetime; if the service rotates it, requests fail until a new connector
//! is built.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use super::bootstrap::{BootstrapError, bootstrap};
use super::codec::SseDecoder;
use crate::application::ports::{EventSourcePort, EventStream, PageSource};
use crate::domain::pagination::PageError;
use crate::domain::params::{Params, encode_query};
use crate::domain::signing::{RequestHeaders, Secret, sign_now};
use crate::domain::stream::ServerEvent;
use crate::infrastructure::config::{ConnectorConfig, Endpoints};
use crate::infrastructure::metrics::{self, Outcome, RequestKind};

const JSON_ACCEPT: &str = "application/json, text/plain, */*";
const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";
const EVENT_STREAM_ACCEPT: &str = "text/event-stream";
const NO_CACHE: &str = "no-cache, no-store, must-revalidate, max-age=0";

// =============================================================================
// Errors
// =============================================================================

/// Response body did not have the expected envelope.
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    /// Body was empty.
    #[error("empty response body")]
    Empty,
    /// Body was not valid JSON.
    #[error("malformed JSON response: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Server answered with an in-band `messages` list.
    #[error("request rejected by server: {}", format_messages(.messages))]
    Rejected {
        /// Messages exactly as sent by the server.
        messages: Vec<Value>,
    },
    /// Paged response lacked its item or count field.
    #[error(transparent)]
    Layout(#[from] PageError),
    /// Stream request returned a non-success status.
    #[error("unexpected HTTP status {status}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
    },
}

fn format_messages(messages: &[Value]) -> String {
    messages
        .iter()
        .map(|m| m.as_str().map_or_else(|| m.to_string(), str::to_string))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Connector request error.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// Salt bootstrap failed because the site layout changed.
    #[error("salt bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
    /// Network failure or timeout.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Response envelope was unusable.
    #[error(transparent)]
    Response(#[from] ResponseError),
    /// Static header value is not a valid HTTP header.
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

impl From<PageError> for ConnectorError {
    fn from(err: PageError) -> Self {
        Self::Response(ResponseError::Layout(err))
    }
}

impl ConnectorError {
    /// Messages of a [`ResponseError::Rejected`] response.
    #[must_use]
    pub fn rejected_messages(&self) -> Option<&[Value]> {
        match self {
            Self::Response(ResponseError::Rejected { messages }) => Some(messages),
            _ => None,
        }
    }

    /// Whether this is a network-level failure.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    const fn outcome(&self) -> Outcome {
        match self {
            Self::Transport(_) => Outcome::Transport,
            Self::Bootstrap(_) => Outcome::Bootstrap,
            Self::Response(_) | Self::InvalidHeader(_) => Outcome::Response,
        }
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// Parse a JSON body, optionally rejecting `messages` envelopes.
fn parse_envelope(body: &str, check_messages: bool) -> Result<Value, ResponseError> {
    if body.trim().is_empty() {
        return Err(ResponseError::Empty);
    }

    let value: Value = serde_json::from_str(body)?;

    if check_messages && let Some(messages) = value.get("messages") {
        let messages = match messages {
            Value::Array(list) => list.clone(),
            other => vec![other.clone()],
        };
        return Err(ResponseError::Rejected { messages });
    }

    Ok(value)
}

// =============================================================================
// Connector
// =============================================================================

/// Signed client for the Boerse Frankfurt web API.
#[derive(Debug)]
pub struct Connector {
    rest: reqwest::Client,
    stream: reqwest::Client,
    endpoints: Endpoints,
    secret: Secret,
}

impl Connector {
    /// Build a connector, bootstrapping the salt unless one is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP clients cannot be built or the salt
    /// bootstrap fails.
    pub async fn new(config: ConnectorConfig) -> Result<Self, ConnectorError> {
        let (rest, stream) = build_clients(&config)?;

        let secret = match config.salt {
            Some(secret) => secret,
            None => {
                let started = Instant::now();
                let result = bootstrap(&rest, &config.endpoints.home).await;
                metrics::record_request(
                    RequestKind::Bootstrap,
                    result.as_ref().map_or_else(ConnectorError::outcome, |_| Outcome::Success),
                    started.elapsed(),
                );
                result?
            }
        };

        tracing::info!(
            data_base = %config.endpoints.data_base,
            search_base = %config.endpoints.search_base,
            "Connector ready"
        );

        Ok(Self {
            rest,
            stream,
            endpoints: config.endpoints,
            secret,
        })
    }

    /// Endpoints this connector talks to.
    #[must_use]
    pub const fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Full URL of a data request. The `?` is always present.
    #[must_use]
    pub fn data_url(&self, endpoint: &str, params: &Params) -> String {
        format!("{}{endpoint}?{}", self.endpoints.data_base, encode_query(params))
    }

    /// Full URL of a search GET. The `?` is only added for non-empty params.
    #[must_use]
    pub fn search_url(&self, endpoint: &str, params: &Params) -> String {
        if params.is_empty() {
            format!("{}{endpoint}", self.endpoints.search_base)
        } else {
            format!("{}{endpoint}?{}", self.endpoints.search_base, encode_query(params))
        }
    }

    /// One-shot data lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Transport`] on network failure and
    /// [`ConnectorError::Response`] if the body is empty, not JSON, or
    /// carries a `messages` list.
    pub async fn fetch_data(&self, endpoint: &str, params: &Params) -> Result<Value, ConnectorError> {
        let url = self.data_url(endpoint, params);
        let request = self
            .rest
            .get(&url)
            .header(ACCEPT, JSON_ACCEPT);
        self.execute_json(RequestKind::Data, endpoint, &url, request, true)
            .await
    }

    /// Search query with `params` sent as the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Transport`] on network failure and
    /// [`ConnectorError::Response`] if the body is empty or not JSON.
    pub async fn post_search(&self, endpoint: &str, params: &Params) -> Result<Value, ConnectorError> {
        let url = self.search_url(endpoint, &Params::new());
        let request = self
            .rest
            .post(&url)
            .header(ACCEPT, JSON_ACCEPT)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(serde_json::to_vec(params).map_err(ResponseError::from)?);
        self.execute_json(RequestKind::Search, endpoint, &url, request, false)
            .await
    }

    /// Search-side lookup sent as a GET, e.g. for search criteria lists.
    ///
    /// # Errors
    ///
    /// Same as [`Connector::fetch_data`].
    pub async fn fetch_search(&self, endpoint: &str, params: &Params) -> Result<Value, ConnectorError> {
        let url = self.search_url(endpoint, params);
        let request = self
            .rest
            .get(&url)
            .header(ACCEPT, JSON_ACCEPT);
        self.execute_json(RequestKind::Search, endpoint, &url, request, true)
            .await
    }

    /// Open a live event stream.
    ///
    /// The returned stream owns the connection and ends when the server
    /// closes it or a read times out.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Transport`] if the connection fails and
    /// [`ResponseError::UnexpectedStatus`] for a non-success status.
    pub async fn open_stream(
        &self,
        endpoint: &str,
        params: &Params,
    ) -> Result<EventStream<ConnectorError>, ConnectorError> {
        let url = self.data_url(endpoint, params);
        let started = Instant::now();

        let result = async {
            let response = with_signature(
                self.stream
                    .get(&url)
                    .header(ACCEPT, EVENT_STREAM_ACCEPT)
                    .header(CACHE_CONTROL, NO_CACHE),
                &sign_now(&url, &self.secret),
            )
            .send()
            .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(ConnectorError::from(ResponseError::UnexpectedStatus {
                    status: status.as_u16(),
                }));
            }
            Ok::<_, ConnectorError>(response)
        }
        .await;

        metrics::record_request(
            RequestKind::Stream,
            result.as_ref().map_or_else(ConnectorError::outcome, |_| Outcome::Success),
            started.elapsed(),
        );
        let response = result?;

        tracing::debug!(endpoint, "Event stream opened");

        let events = response
            .bytes_stream()
            .scan(SseDecoder::new(), |decoder, chunk| {
                let batch: Vec<Result<ServerEvent, ConnectorError>> = match chunk {
                    Ok(bytes) => decoder.decode(&bytes).into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(ConnectorError::Transport(e))],
                };
                futures_util::future::ready(Some(futures_util::stream::iter(batch)))
            })
            .flatten()
            .boxed();

        Ok(events)
    }

    /// Data lookups as a [`PageSource`].
    #[must_use]
    pub const fn data_pages(&self) -> DataPages<'_> {
        DataPages(self)
    }

    /// Search POSTs as a [`PageSource`].
    #[must_use]
    pub const fn search_pages(&self) -> SearchPages<'_> {
        SearchPages(self)
    }

    async fn execute_json(
        &self,
        kind: RequestKind,
        endpoint: &str,
        url: &str,
        request: reqwest::RequestBuilder,
        check_messages: bool,
    ) -> Result<Value, ConnectorError> {
        let started = Instant::now();

        let result = async {
            let response = with_signature(request, &sign_now(url, &self.secret))
                .send()
                .await?;
            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                tracing::warn!(endpoint, status = status.as_u16(), "Non-success status");
            }
            Ok::<_, ConnectorError>(parse_envelope(&body, check_messages)?)
        }
        .await;

        metrics::record_request(
            kind,
            result.as_ref().map_or_else(ConnectorError::outcome, |_| Outcome::Success),
            started.elapsed(),
        );

        if let Err(e) = &result {
            tracing::debug!(endpoint, error = %e, "Request failed");
        }
        result
    }
}

fn with_signature(
    request: reqwest::RequestBuilder,
    headers: &RequestHeaders,
) -> reqwest::RequestBuilder {
    headers
        .iter()
        .fold(request, |request, (name, value)| request.header(name, value))
}

fn build_clients(config: &ConnectorConfig) -> Result<(reqwest::Client, reqwest::Client), ConnectorError> {
    let endpoints = &config.endpoints;
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("authority"),
        HeaderValue::from_str(&endpoints.authority)?,
    );
    headers.insert(
        HeaderName::from_static("origin"),
        HeaderValue::from_str(&endpoints.origin)?,
    );
    headers.insert(
        HeaderName::from_static("referer"),
        HeaderValue::from_str(&endpoints.referer)?,
    );

    let jar = Arc::new(reqwest::cookie::Jar::default());
    let timeouts = config.timeouts;

    let rest = reqwest::Client::builder()
        .default_headers(headers.clone())
        .cookie_provider(Arc::clone(&jar))
        .connect_timeout(timeouts.connect)
        .read_timeout(timeouts.read)
        .build()?;

    let stream = reqwest::Client::builder()
        .default_headers(headers)
        .cookie_provider(jar)
        .connect_timeout(timeouts.connect)
        .read_timeout(timeouts.stream_read)
        .build()?;

    Ok((rest, stream))
}

// =============================================================================
// Ports
// =============================================================================

/// [`PageSource`] over [`Connector::fetch_data`].
#[derive(Debug, Clone, Copy)]
pub struct DataPages<'a>(&'a Connector);

#[async_trait]
impl PageSource for DataPages<'_> {
    type Error = ConnectorError;

    async fn fetch_page(&self, endpoint: &str, params: &Params) -> Result<Value, ConnectorError> {
        let page = self.0.fetch_data(endpoint, params).await?;
        metrics::record_page(endpoint);
        Ok(page)
    }
}

/// [`PageSource`] over [`Connector::post_search`].
#[derive(Debug, Clone, Copy)]
pub struct SearchPages<'a>(&'a Connector);

#[async_trait]
impl PageSource for SearchPages<'_> {
    type Error = ConnectorError;

    async fn fetch_page(&self, endpoint: &str, params: &Params) -> Result<Value, ConnectorError> {
        let page = self.0.post_search(endpoint, params).await?;
        metrics::record_page(endpoint);
        Ok(page)
    }
}

#[async_trait]
impl EventSourcePort for Connector {
    type Error = ConnectorError;

    async fn open(
        &self,
        endpoint: &str,
        params: &Params,
    ) -> Result<EventStream<ConnectorError>, ConnectorError> {
        self.open_stream(endpoint, params).await
    }
}

// =============================================================================
// Tests
// =============================================================================
