//! # parlor-server
//!
//! Real-time relay for Parlor: one WebSocket event channel per client
//! session, multi-device presence, persist-then-broadcast chat delivery and
//! stateless call signaling.

pub mod api;
pub mod auth;
pub mod calls;
pub mod config;
pub mod error;
pub mod hub;
pub mod pipeline;
pub mod presence;
pub mod relay;

pub use config::ServerConfig;
pub use error::ServerError;
pub use relay::Relay;
