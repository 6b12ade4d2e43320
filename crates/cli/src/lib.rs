//! wgui CLI
//!
//! Command-line client for the wgui daemon.

pub mod client;
pub mod commands;
pub mod output;
