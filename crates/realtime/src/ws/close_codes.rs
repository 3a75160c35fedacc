use spaceshare_core::protocol::{
    CLOSE_AUTH_FAILED, CLOSE_PROTOCOL_ERROR, CLOSE_SLOW_CONSUMER, CLOSE_TOO_MANY_CONNECTIONS,
};

pub use spaceshare_core::protocol::WS_SUBPROTOCOL;

/// Close frame the server sends before dropping a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseDirective {
    pub code: i32,
    pub reason: &'static str,
}

impl CloseDirective {
    #[must_use]
    pub const fn auth_failed(reason: &'static str) -> Self {
        Self {
            code: CLOSE_AUTH_FAILED,
            reason,
        }
    }

    #[must_use]
    pub const fn protocol_error(reason: &'static str) -> Self {
        Self {
            code: CLOSE_PROTOCOL_ERROR,
            reason,
        }
    }

    #[must_use]
    pub const fn too_many_connections() -> Self {
        Self {
            code: CLOSE_TOO_MANY_CONNECTIONS,
            reason: "too many connections",
        }
    }

    #[must_use]
    pub const fn slow_consumer() -> Self {
        Self {
            code: CLOSE_SLOW_CONSUMER,
            reason: "event queue overflowed",
        }
    }
}
