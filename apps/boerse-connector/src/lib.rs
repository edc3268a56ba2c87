#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::cast_possible_truncation,
        clippy::items_after_statements,
        clippy::panic
    )
)]

//! Boerse Connector - Signed Client for the Boerse Frankfurt Web API
//!
//! Client library for the JSON data, search and event-stream endpoints
//! behind boerse-frankfurt.de.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure request and retrieval logic
//!   - `signing`: Per-request trace and security headers
//!   - `params`: Ordered parameters and query encoding
//!   - `pagination`: Page layouts and cursor arithmetic
//!   - `stream`: Subscription states, events and message buffers
//!
//! - **Application**: Ports and services
//!   - `ports`: `PageSource` and `EventSourcePort`
//!   - `services`: Chunked retrieval (`fetch_all`, `fetch_while`)
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `boerse`: Salt bootstrap, signed connector, SSE codec, subscriptions
//!   - `config`: Endpoints, timeouts and salt from the environment
//!   - `metrics`: Prometheus counters
//!   - `telemetry`: Tracing subscriber and OTLP export
//!
//! # Data Flow
//!
//! ```text
//! bootstrap ──► salt ──► sign ──► Connector ──┬──► fetch_data / post_search ──► fetch_all ──► caller
//!                                             └──► open_stream ──► StreamSubscription ──► callback / buffer
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use boerse_connector::{Connector, ConnectorConfig, PageLayout, PageQuery, StreamSubscription, fetch_all, params};
//!
//! let connector = Arc::new(Connector::new(ConnectorConfig::from_env()?).await?);
//!
//! let quote = connector
//!     .fetch_data("quote_box", &params([("isin", "DE0007164600"), ("mic", "XETR")]))
//!     .await?;
//!
//! let query = PageQuery::new("equity_search", params([("lang", "de")])).with_chunk_size(100);
//! let all = fetch_all(&connector.search_pages(), &query, PageLayout::RECORDS_TOTAL).await?;
//!
//! let ticks = StreamSubscription::new(Arc::clone(&connector), "bid_ask_overview", params([("isin", "DE0007164600")]))
//!     .with_cache(true);
//! ticks.start();
//! ticks.stop().await;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Signing, parameters, pagination and stream state.
pub mod domain;

/// Application layer - Ports and retrieval services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::pagination::{
    DEFAULT_CHUNK_SIZE, PageCursor, PageError, PageLayout, PageQuery, PageWindow, Paged,
    published_since,
};
pub use domain::params::{Params, encode_query, params};
pub use domain::signing::{RequestHeaders, Secret, sign};
pub use domain::stream::{BufferMode, MessageBuffer, ServerEvent, StreamState};

// Ports and services
pub use application::ports::{EventSourcePort, EventStream, PageSource};
pub use application::services::{fetch_all, fetch_while};

// Connector
pub use infrastructure::boerse::{
    BootstrapError, BoxError, Connector, ConnectorError, DataPages, ResponseError, SearchPages,
    StreamError, StreamSubscription,
};

// Configuration
pub use infrastructure::config::{
    ConfigError, ConnectorConfig, Endpoints, TimeoutSettings, load_dotenv, load_dotenv_from,
};

// Metrics
pub use infrastructure::metrics::{get_metrics_handle, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{
    TelemetryConfig, TelemetryError, TelemetryGuard, init as init_telemetry,
};
