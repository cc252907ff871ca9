//! Feed relay bot library.
//!
//! This crate provides the IRC session, the feed poller, the operator console
//! and the coordinator that runs them together, plus the CLI around them.

pub mod bot;
mod cli;
pub mod commands;
mod config;
pub mod console;
pub mod poller;
pub mod session;
pub mod shutdown;

pub use cli::{Cli, Commands};
pub use config::Config;
