//! # parlor-client
//!
//! Client half of the messaging and calling service: optimistic message
//! delivery with echo reconciliation, typing and presence tracking, and
//! routing of call signaling into per-call negotiation sessions.

pub mod calls;
pub mod chat;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod session;
pub mod state;

pub use calls::CallRouter;
pub use chat::ChatClient;
pub use config::ClientConfig;
pub use connection::{open_channel, Credentials};
pub use error::ClientError;
pub use events::ClientUpdate;
pub use session::{connect, ClientSession};
pub use state::{ConversationPreview, MessageView};
