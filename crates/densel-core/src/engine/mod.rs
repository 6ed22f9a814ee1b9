//! # Engine Module
//!
//! The asynchronous messaging stack between the application and the compute
//! engine.
//!
//! ## Architecture
//!
//! - **Wire protocol** ([`protocol`]) - Correlated request/reply messages and typed result decoding
//! - **Transports** ([`transport`]) - In-process and child-process workers behind one channel pair
//! - **Channel Adapter** ([`channel`]) - Multiplexes concurrent requests by correlation id
//! - **Command Centre** ([`centre`]) - Semantic commands, initialize handshake and lifecycle events
//! - **History** ([`history`]) - Append-only journal of mutating commands
//! - **Configuration** ([`config`]) - Channel limits and map display defaults
//! - **Error Handling** ([`error`]) - Engine-specific error types
//!
//! Commands flow strictly downwards: a [`centre::CommandCentre`] journals a
//! [`command::CommandDescriptor`] and posts it through its
//! [`channel::ChannelAdapter`], which hands back a [`channel::PendingReply`]
//! resolved once the worker answers.

pub mod centre;
pub mod channel;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod protocol;
pub mod transport;
