use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand_core::{OsRng, RngCore};

/// Random bytes behind each invite token.
pub const INVITE_TOKEN_BYTES: usize = 24;

/// Generates a URL-safe invite token from the operating system RNG.
#[must_use]
pub fn generate_invite_token() -> String {
    let mut bytes = [0u8; INVITE_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
