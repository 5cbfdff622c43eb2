//! ecwire Core Library
//!
//! Encrypted point-to-point channels over byte streams:
//! - Length-prefixed wire records
//! - Ephemeral P-256 handshake for both roles
//! - Authenticated, ordered message channel
//! - TCP server and client helpers
//! - Configuration resolution and logging setup

pub mod channel;
pub mod config;
pub mod error;
pub mod handshake;
pub mod server;
pub mod tracing_init;
pub mod wire;

pub use channel::{ChannelState, DEFAULT_MAX_FRAME_LEN, SecureChannel};
#[cfg(any(test, feature = "test-utils"))]
pub use channel::test_channel_pair;
pub use config::Config;
pub use error::{Error, Result};
pub use handshake::{HandshakeSettings, accept, initiate};
pub use server::{ChannelServer, connect};
