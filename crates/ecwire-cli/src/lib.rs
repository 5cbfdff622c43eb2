//! ecwire CLI Library
//!
//! Command-line front end for ecwire secure channels.
//! Provides the server, the interactive client, and the CA helper.

pub mod ca_cmd;
pub mod cli;
pub mod net_cmd;
pub mod session;
