//! Port Interfaces
//!
//! Contracts between the retrieval logic and the HTTP adapters.
//!
//! ## Driven Ports (Outbound)
//!
//! - `PageSource`: fetches one page of a paginated endpoint
//! - `EventSourcePort`: opens a live `text/event-stream` feed

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::domain::params::Params;
use crate::domain::stream::ServerEvent;

/// Live sequence of server events, ending when the connection closes.
pub type EventStream<E> = BoxStream<'static, Result<ServerEvent, E>>;

/// Fetches single pages of a paginated endpoint.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Failure type of one page request.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Request one page. `params` already carries `limit` and `offset`.
    async fn fetch_page(&self, endpoint: &str, params: &Params) -> Result<Value, Self::Error>;
}

/// Opens server-push feeds.
#[async_trait]
pub trait EventSourcePort: Send + Sync + 'static {
    /// Failure type of opening or reading a feed.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a feed. The returned stream owns the connection.
    async fn open(
        &self,
        endpoint: &str,
        params: &Params,
    ) -> Result<EventStream<Self::Error>, Self::Error>;
}
