//! Core domain logic for the feed relay bot.
//!
//! This crate contains the fundamental types and logic for:
//! - Items: polled feed posts, delivery records and their chat rendering
//! - Protocol: tokenizing inbound IRC lines and building outbound ones
//! - Commands: parsing operator console input

pub mod command;
mod item;
pub mod protocol;

pub use command::ConsoleCommand;
pub use item::{DeliveryRecord, PolledItem};
pub use protocol::{InboundEvent, InboundLine, LineError, OutboundCommand};
