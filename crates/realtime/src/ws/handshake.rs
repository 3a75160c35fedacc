use spaceshare_auth::{AuthContext, AuthError, TokenValidator};
use spaceshare_core::protocol::ClientFrame;

use super::close_codes::CloseDirective;
use super::protocol::parse_client_frame;

/// First message read from a freshly upgraded socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirstMessage {
    Text(String),
    NonText,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeError {
    pub close: CloseDirective,
}

impl HandshakeError {
    fn auth_failed(reason: &'static str) -> Self {
        Self {
            close: CloseDirective::auth_failed(reason),
        }
    }
}

/// The first frame must be `auth` carrying a bearer token.
pub async fn authenticate_first_message(
    validator: &(dyn TokenValidator + Send + Sync),
    first_message: FirstMessage,
) -> Result<AuthContext, HandshakeError> {
    let text = match first_message {
        FirstMessage::Text(text) => text,
        FirstMessage::NonText => {
            return Err(HandshakeError::auth_failed("expected text auth frame"));
        }
        FirstMessage::Closed => {
            return Err(HandshakeError::auth_failed("connection closed before auth"));
        }
    };

    let token = match parse_client_frame(&text) {
        Ok(ClientFrame::Auth { token }) if !token.is_empty() => token,
        Ok(ClientFrame::Auth { .. }) => {
            return Err(HandshakeError::auth_failed("empty auth token"));
        }
        Ok(_) => {
            return Err(HandshakeError::auth_failed("first frame must be auth"));
        }
        Err(_) => return Err(HandshakeError::auth_failed("invalid auth frame")),
    };

    validator
        .validate_token(&token)
        .await
        .map_err(map_auth_error)
}

fn map_auth_error(error: AuthError) -> HandshakeError {
    match error {
        AuthError::MissingToken => HandshakeError::auth_failed("missing auth token"),
        AuthError::InvalidToken => HandshakeError::auth_failed("invalid auth token"),
        AuthError::ExpiredToken => HandshakeError::auth_failed("expired auth token"),
    }
}
