use spaceshare_core::protocol::{ClientFrame, ServerFrame};

use super::close_codes::CloseDirective;

/// Decodes one client text frame. Anything that is not a known frame closes
/// the connection with a protocol error.
pub fn parse_client_frame(text: &str) -> Result<ClientFrame, CloseDirective> {
    if text.trim().is_empty() {
        return Err(CloseDirective::protocol_error("empty frame"));
    }
    serde_json::from_str(text).map_err(|_| CloseDirective::protocol_error("invalid frame"))
}

pub fn encode_server_frame(frame: &ServerFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}
