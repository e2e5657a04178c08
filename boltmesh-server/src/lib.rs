//! # boltmesh-server
//!
//! Bolt v1 sidecar proxy.
//!
//! This crate provides:
//! - Named listeners managed through [`ListenerAdapter`]
//! - Per-connection frame proxying with request/response correlation
//! - Optional downstream TLS, swappable at runtime
//! - YAML and environment configuration

pub mod adapter;
pub mod config;
pub mod error;
pub mod listener;
pub mod proxy;
pub mod stream;
pub mod tls;

#[cfg(test)]
mod test_support;

pub use adapter::ListenerAdapter;
pub use config::{Config, ConfigError, ListenerConfig, TlsConfig};
pub use error::ServerError;
pub use listener::ActiveListener;
pub use proxy::{Correlation, Direction, InFlight, ListenerStats};
pub use stream::Downstream;
