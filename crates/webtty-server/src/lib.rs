//! webtty-server: serves a local command to browsers over websocket.
//!
//! # Architecture
//!
//! - [`cli`]: Command line flags.
//! - [`config`]: `ServerConfig`, loaded from TOML and overridden by flags.
//! - [`ws_master`]: [`webtty_core::Master`] over an axum websocket.
//! - [`handshake`]: Authenticates the first client message.
//! - [`server`]: Routes, connection accounting and per-connection sessions.

pub mod cli;
pub mod config;
pub mod error;
pub mod handshake;
pub mod server;
pub mod ws_master;

pub use cli::Cli;
pub use config::{ConfigError, ServerConfig};
pub use error::ServerError;
pub use server::Server;
pub use ws_master::WsMaster;
