//! Application Services
//!
//! Services that drive the ports.
//!
//! - `pagination`: chunked "fetch every page" retrieval over a `PageSource`

mod pagination;

pub use pagination::{fetch_all, fetch_while};
