//! wgui daemon
//!
//! HTTP API, authentication and server-level interface control on top of
//! the [`wgui_common::Reconciler`].

pub mod auth;
pub mod config;
pub mod interface;
pub mod server;

pub use config::DaemonConfig;
pub use server::{router, serve, AppState};
