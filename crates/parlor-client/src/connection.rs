//! The event channel to the relay: one WebSocket carrying JSON text frames.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use parlor_shared::protocol::{ClientEvent, ServerEvent};
use parlor_shared::types::UserId;

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Who we connect as.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: UserId,
    pub display_name: String,
    /// Bearer token, when the relay requires one.
    pub token: Option<String>,
}

/// Open the event channel. Events sent on the returned sender are written to
/// the socket in order; decoded server events arrive on the receiver until
/// the socket closes.
pub async fn open_channel(
    config: &ClientConfig,
    credentials: &Credentials,
) -> Result<
    (
        mpsc::UnboundedSender<ClientEvent>,
        mpsc::UnboundedReceiver<ServerEvent>,
    ),
    ClientError,
> {
    let url = channel_url(config, &credentials.user_id);
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|_| ClientError::InvalidUrl(url.clone()))?;
    if let Some(token) = &credentials.token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ClientError::InvalidCredentials("token is not a valid header".into()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (stream, _) = connect_async(request).await?;
    info!(user = %credentials.user_id.short(), "Event channel connected");
    let (mut sink, mut source) = stream.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEvent>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerEvent>();

    tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(event = event.name(), error = %e, "Failed to encode event");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                warn!(error = %e, "Event channel write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        while let Some(frame) = source.next().await {
            match frame {
                Ok(Message::Text(text)) => match ServerEvent::from_json(&text) {
                    Ok(event) => {
                        if in_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!(error = %e, "Ignoring undecodable frame"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Event channel read failed");
                    break;
                }
            }
        }
        info!("Event channel closed");
    });

    Ok((out_tx, in_rx))
}

fn channel_url(config: &ClientConfig, user_id: &UserId) -> String {
    format!("{}?user_id={}", config.ws_url(), encode_query(user_id.as_str()))
}

fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_url_escapes_user_id() {
        let config = ClientConfig::default();
        assert_eq!(
            channel_url(&config, &UserId::new("alice")),
            "ws://127.0.0.1:8080/ws?user_id=alice"
        );
        assert_eq!(
            channel_url(&config, &UserId::new("a b&c=é")),
            "ws://127.0.0.1:8080/ws?user_id=a%20b%26c%3D%C3%A9"
        );
    }
}
