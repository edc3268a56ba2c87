//! Domain Layer
//!
//! Request signing, parameter encoding, pagination arithmetic and stream
//! state. No I/O.

/// Signed request headers.
pub mod signing;

/// Ordered request parameters.
pub mod params;

/// Page layouts and cursor arithmetic.
pub mod pagination;

/// Stream lifecycle and message buffering.
pub mod stream;
