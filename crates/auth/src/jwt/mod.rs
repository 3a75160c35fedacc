#![forbid(unsafe_code)]

mod validator;

pub use validator::{SessionClaims, SessionTokenValidator, MIN_SECRET_LEN};
