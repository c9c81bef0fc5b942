use std::time::Duration;

/// Protocol version reported by the health endpoint.
pub const PROTOCOL_VERSION: &str = "/parlor/1.0.0";

/// Application name
pub const APP_NAME: &str = "Parlor";

/// How long an optimistic message waits for its echo before it is failed.
pub const MESSAGE_ECHO_TIMEOUT: Duration = Duration::from_secs(12);

/// How long an outgoing call rings before it counts as missed.
pub const CALL_NO_ANSWER_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a typing indicator stays lit after the last typing event.
pub const TYPING_EXPIRY: Duration = Duration::from_secs(3);

/// Default HTTP / WebSocket port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Chat text appended to a shared conversation for a missed call.
pub const MISSED_AUDIO_CALL_TEXT: &str = "Missed audio call";
pub const MISSED_VIDEO_CALL_TEXT: &str = "Missed video call";

pub const OFFLINE_REASON_RECORDED: &str =
    "User is offline. A missed call was added to your conversation.";
pub const OFFLINE_REASON_PLAIN: &str = "User is offline.";
