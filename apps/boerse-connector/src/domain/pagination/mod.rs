//! Pagination Model
//!
//! Page layouts, cursor arithmetic and item predicates for the chunked
//! retrieval loop. Everything here is pure; the loop that drives a
//! [`PageSource`](crate::application::ports::PageSource) lives in
//! [`application::services`](crate::application::services).
//!
//! # Cursor Arithmetic
//!
//! The cursor advances by the configured chunk size after every page, not
//! by the number of items the page actually contained. A server that
//! returns short pages in the middle of a result set therefore causes the
//! missing positions to be skipped. This mirrors the upstream API client and
//! is kept on purpose; see the `short_page_skips_positions` test.

use chrono::{DateTime, Utc};
use serde_json::Value;

// =============================================================================
// Layout
// =============================================================================

/// Count field used by most data endpoints.
pub const TOTAL_COUNT: &str = "totalCount";

/// Count field used by the bond search endpoint.
pub const RECORDS_TOTAL: &str = "recordsTotal";

/// Count field used by the derivative search endpoint.
pub const TOTAL_ELEMENTS: &str = "totalElements";

/// Item array field used by almost every endpoint.
pub const DATA: &str = "data";

/// Where a paged response keeps its items and its total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    /// Field holding the item array.
    pub items_field: &'static str,
    /// Field holding the reported total.
    pub count_field: &'static str,
}

impl PageLayout {
    /// `data` / `totalCount`.
    pub const TOTAL_COUNT: Self = Self::new(DATA, TOTAL_COUNT);

    /// `data` / `recordsTotal`.
    pub const RECORDS_TOTAL: Self = Self::new(DATA, RECORDS_TOTAL);

    /// `data` / `totalElements`.
    pub const TOTAL_ELEMENTS: Self = Self::new(DATA, TOTAL_ELEMENTS);

    /// Create a layout.
    #[must_use]
    pub const fn new(items_field: &'static str, count_field: &'static str) -> Self {
        Self {
            items_field,
            count_field,
        }
    }

    /// Use a different item field, e.g. `ticks` for tick data.
    #[must_use]
    pub const fn with_items_field(mut self, items_field: &'static str) -> Self {
        self.items_field = items_field;
        self
    }

    /// Split one response into its items and reported total.
    ///
    /// # Errors
    ///
    /// Returns [`PageError`] if either field is missing or has the wrong type.
    pub fn split(&self, page: Value) -> Result<(Vec<Value>, u64), PageError> {
        let Value::Object(mut body) = page else {
            return Err(PageError::NotAnObject);
        };

        let total = body
            .get(self.count_field)
            .and_then(Value::as_u64)
            .ok_or(PageError::MissingField {
                field: self.count_field,
            })?;

        match body.remove(self.items_field) {
            Some(Value::Array(items)) => Ok((items, total)),
            _ => Err(PageError::MissingField {
                field: self.items_field,
            }),
        }
    }
}

impl Default for PageLayout {
    fn default() -> Self {
        Self::TOTAL_COUNT
    }
}

/// Malformed page envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageError {
    /// Response body is not a JSON object.
    #[error("page response is not a JSON object")]
    NotAnObject,
    /// Expected field is absent or has the wrong type.
    #[error("page response has no usable `{field}` field")]
    MissingField {
        /// Field name.
        field: &'static str,
    },
}

// =============================================================================
// Query
// =============================================================================

/// Default page size.
pub const DEFAULT_CHUNK_SIZE: u64 = 1000;

/// One paginated retrieval request.
#[derive(Debug, Clone, PartialEq)]
pub struct PageQuery {
    /// Endpoint name relative to the base URL.
    pub endpoint: String,
    /// Parameters sent with every page; `limit` and `offset` are overwritten.
    pub params: crate::domain::params::Params,
    /// Items requested per page.
    pub chunk_size: u64,
    /// Maximum number of items to retrieve (0 = everything).
    pub limit: u64,
    /// Position of the first item.
    pub offset: u64,
}

impl PageQuery {
    /// Create a query for everything behind `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, params: crate::domain::params::Params) -> Self {
        Self {
            endpoint: endpoint.into(),
            params,
            chunk_size: DEFAULT_CHUNK_SIZE,
            limit: 0,
            offset: 0,
        }
    }

    /// Set the page size.
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Cap the number of items retrieved.
    #[must_use]
    pub const fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Start at `offset`.
    #[must_use]
    pub const fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Start a cursor for this query.
    #[must_use]
    pub const fn cursor(&self) -> PageCursor {
        PageCursor::new(self.chunk_size, self.limit, self.offset)
    }
}

// =============================================================================
// Cursor
// =============================================================================

/// `(offset, limit)` window of one page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    /// Value sent as `offset`.
    pub offset: u64,
    /// Value sent as `limit`.
    pub limit: u64,
}

/// Cursor state of one retrieval.
///
/// With a caller limit the ceiling is fixed at `offset + limit`. Without one
/// the ceiling starts one past the first chunk, so the first page is always
/// requested, and is replaced by the server's total after every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    chunk_size: u64,
    position: u64,
    ceiling: u64,
    fixed_ceiling: bool,
}

impl PageCursor {
    /// Create a cursor.
    ///
    /// A zero `chunk_size` is treated as one so the cursor always advances.
    #[must_use]
    pub const fn new(chunk_size: u64, limit: u64, offset: u64) -> Self {
        let chunk_size = if chunk_size == 0 { 1 } else { chunk_size };
        if limit > 0 {
            Self {
                chunk_size,
                position: offset,
                ceiling: offset.saturating_add(limit),
                fixed_ceiling: true,
            }
        } else {
            Self {
                chunk_size,
                position: offset,
                ceiling: offset.saturating_add(chunk_size).saturating_add(1),
                fixed_ceiling: false,
            }
        }
    }

    /// Window of the next page, or `None` once the ceiling is reached.
    #[must_use]
    pub fn next_window(&self) -> Option<PageWindow> {
        (self.position < self.ceiling).then(|| PageWindow {
            offset: self.position,
            limit: self.chunk_size.min(self.ceiling - self.position),
        })
    }

    /// Record a fetched page and its reported total, then advance.
    pub const fn advance(&mut self, reported_total: u64) {
        if !self.fixed_ceiling {
            self.ceiling = reported_total;
        }
        self.position = self.position.saturating_add(self.chunk_size);
    }

    /// Current position.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }
}

// =============================================================================
// Result
// =============================================================================

/// Accumulated result of a paginated retrieval.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Paged {
    /// Items in page order.
    pub items: Vec<Value>,
    /// Total reported by the last page fetched (0 if none was fetched).
    pub total: u64,
}

// =============================================================================
// Predicates
// =============================================================================

/// Keep items whose `field` timestamp is at or after `cutoff`.
///
/// Timestamps are parsed as RFC 3339 and compared in UTC. Items without a
/// parseable timestamp are kept.
pub fn published_since(
    cutoff: DateTime<Utc>,
    field: &'static str,
) -> impl Fn(&Value) -> bool + Send + Sync {
    move |item| {
        item.get(field)
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .is_none_or(|time| time.with_timezone(&Utc) >= cutoff)
    }
}
