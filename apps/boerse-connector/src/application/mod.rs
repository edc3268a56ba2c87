//! Application Layer - Port definitions and the retrieval services.
//!
//! This layer defines how the retrieval logic talks to the HTTP adapters
//! without depending on them.

/// Port interfaces for page sources and event sources.
pub mod ports;

/// Application services (paginated retrieval).
pub mod services;
