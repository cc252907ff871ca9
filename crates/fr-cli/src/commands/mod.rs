//! CLI subcommand implementations.

pub mod status;
