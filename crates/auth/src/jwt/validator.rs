#![forbid(unsafe_code)]

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AuthContext, AuthError, TokenValidator};

/// Shortest accepted HS256 secret.
pub const MIN_SECRET_LEN: usize = 32;

/// Claims carried by session tokens issued by the credential service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub name: String,
    pub exp: u64,
}

/// Validates HS256 session tokens signed with a shared secret.
pub struct SessionTokenValidator {
    key: DecodingKey,
    validation: Validation,
}

impl SessionTokenValidator {
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn decode_claims(&self, token: &str) -> Result<SessionClaims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let data =
            decode::<SessionClaims>(token, &self.key, &self.validation).map_err(map_decode_error)?;
        Ok(data.claims)
    }
}

#[async_trait]
impl TokenValidator for SessionTokenValidator {
    async fn validate_token(&self, token: &str) -> Result<AuthContext, AuthError> {
        let claims = self.decode_claims(token)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        Ok(AuthContext {
            user_id,
            account: claims.account,
            name: claims.name,
        })
    }
}

fn map_decode_error(error: jsonwebtoken::errors::Error) -> AuthError {
    if matches!(
        error.kind(),
        jsonwebtoken::errors::ErrorKind::ExpiredSignature
    ) {
        AuthError::ExpiredToken
    } else {
        AuthError::InvalidToken
    }
}
