//! Boerse Frankfurt HTTP Adapters
//!
//! Implements the ports against the Boerse Frankfurt web API:
//!
//! - **Bootstrap**: Salt extraction from the site's client script
//! - **Connector**: Signed data, search and stream requests
//! - **Codec**: `text/event-stream` framing
//! - **Subscription**: Background stream workers

pub mod bootstrap;
pub mod codec;
pub mod connector;
pub mod subscription;

pub use bootstrap::{BootstrapError, bootstrap, extract_salt, extract_script_name};
pub use codec::SseDecoder;
pub use connector::{Connector, ConnectorError, DataPages, ResponseError, SearchPages};
pub use subscription::{
    BoxError, ErrorHook, MessageCallback, StreamError, StreamSubscription,
};
