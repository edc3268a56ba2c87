//! Configuration Module
//!
//! Endpoint, timeout and salt configuration for the connector.

mod settings;

pub use settings::{
    ConfigError, ConnectorConfig, Endpoints, TimeoutSettings, load_dotenv, load_dotenv_from,
};
