//! CLI Commands

pub mod auth;
pub mod backup;
pub mod import;
pub mod peer;
pub mod server;
