//! Ties the chat client and the call router to one event channel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use parlor_media::{MediaDevices, TransportFactory};
use parlor_shared::protocol::ServerEvent;
use parlor_shared::sink::EventSink;
use parlor_shared::types::UserId;

use crate::calls::CallRouter;
use crate::chat::ChatClient;
use crate::config::ClientConfig;
use crate::connection::{open_channel, Credentials};
use crate::error::ClientError;
use crate::events::{ClientUpdate, UpdateTx};

#[derive(Clone)]
pub struct ClientSession {
    chat: ChatClient,
    calls: CallRouter,
}

impl ClientSession {
    pub fn new(
        me: UserId,
        display_name: String,
        config: &ClientConfig,
        sink: Arc<dyn EventSink>,
        devices: Arc<dyn MediaDevices>,
        transports: Arc<dyn TransportFactory>,
        updates: UpdateTx,
    ) -> Self {
        let chat = ChatClient::new(me, config, sink.clone(), updates.clone());
        let calls = CallRouter::new(display_name, config, sink, devices, transports, updates);
        Self { chat, calls }
    }

    pub fn chat(&self) -> &ChatClient {
        &self.chat
    }

    pub fn calls(&self) -> &CallRouter {
        &self.calls
    }

    /// Hand one server event to whichever side handles it.
    pub fn dispatch(&self, event: &ServerEvent) {
        if self.chat.handle_event(event) || self.calls.handle_event(event) {
            return;
        }
        debug!(?event, "Unhandled server event");
    }

    /// Pump server events until the channel closes.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<ServerEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(&event);
        }
        info!(user = %self.chat.me().short(), "Server event stream ended");
    }
}

/// Connect to the relay and start pumping its events. The returned task ends
/// when the connection does.
pub async fn connect(
    config: &ClientConfig,
    credentials: &Credentials,
    devices: Arc<dyn MediaDevices>,
    transports: Arc<dyn TransportFactory>,
) -> Result<
    (
        ClientSession,
        mpsc::UnboundedReceiver<ClientUpdate>,
        JoinHandle<()>,
    ),
    ClientError,
> {
    let (outgoing, incoming) = open_channel(config, credentials).await?;
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let session = ClientSession::new(
        credentials.user_id.clone(),
        credentials.display_name.clone(),
        config,
        Arc::new(outgoing),
        devices,
        transports,
        updates_tx,
    );
    let pump = tokio::spawn(session.clone().run(incoming));
    Ok((session, updates_rx, pump))
}
