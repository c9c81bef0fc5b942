//! # parlor-shared
//!
//! Types shared by the relay server and its clients: identifiers, the JSON
//! event-channel protocol, negotiation payloads and protocol constants.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod signal;
pub mod sink;
pub mod types;
