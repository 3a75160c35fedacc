mod close_codes;
mod handshake;
mod protocol;

pub use close_codes::{CloseDirective, WS_SUBPROTOCOL};
pub use handshake::{authenticate_first_message, FirstMessage, HandshakeError};
pub use protocol::{encode_server_frame, parse_client_frame};
