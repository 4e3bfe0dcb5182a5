//! # parley-server
//!
//! WebSocket front end for the Parley chat router: token handshake,
//! per-connection socket tasks, configuration and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{build_app, run_server, AppState};
