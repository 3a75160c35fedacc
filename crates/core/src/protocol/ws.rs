use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SpaceEvent;

pub const WS_SUBPROTOCOL: &str = "spaceshare-events-v1";

// WebSocket close codes.
pub const CLOSE_AUTH_FAILED: i32 = 4001;
pub const CLOSE_PROTOCOL_ERROR: i32 = 4002;
pub const CLOSE_TOO_MANY_CONNECTIONS: i32 = 4003;
pub const CLOSE_SLOW_CONSUMER: i32 = 4004;

// Realtime error codes carried in `ServerFrame::Error`.
pub const ERR_CODE_FORBIDDEN: &str = "forbidden";
pub const ERR_CODE_INTERNAL: &str = "internal";
pub const ERR_CODE_UNAVAILABLE: &str = "unavailable";

/// Frames sent by a client over the realtime socket. The first frame must be
/// `Auth`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth {
        #[serde(rename = "token")]
        token: String,
    },
    Join {
        #[serde(rename = "space")]
        space: Uuid,
    },
    Leave {
        #[serde(rename = "space")]
        space: Uuid,
    },
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Joined {
        #[serde(rename = "space")]
        space: Uuid,
    },
    Left {
        #[serde(rename = "space")]
        space: Uuid,
    },
    Event {
        #[serde(rename = "space")]
        space: Uuid,
        #[serde(rename = "event")]
        event: SpaceEvent,
    },
    Error {
        #[serde(rename = "space", skip_serializing_if = "Option::is_none", default)]
        space: Option<Uuid>,
        #[serde(rename = "code")]
        code: String,
        #[serde(rename = "message")]
        message: String,
    },
    Pong,
}
