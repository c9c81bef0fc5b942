//! Outbound side of the event channel, as seen by client-side components.

use tokio::sync::mpsc;

use crate::error::ProtocolError;
use crate::protocol::ClientEvent;

/// Anything that can put a [`ClientEvent`] on the event channel.
///
/// Emitting never blocks; a closed channel is reported as an error and the
/// caller decides whether that matters.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ClientEvent) -> Result<(), ProtocolError>;
}

impl EventSink for mpsc::UnboundedSender<ClientEvent> {
    fn emit(&self, event: ClientEvent) -> Result<(), ProtocolError> {
        self.send(event).map_err(|_| ProtocolError::ChannelClosed)
    }
}
