//! Session tokens minted after a successful verification
//!
//! Tokens are HS256 JWTs whose subject is the identity id. The secret
//! comes from configuration (`JWT_SECRET` in production).

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{IdentityError, Result};
use crate::identity::{Identity, IdentityKind};

pub const DEFAULT_TOKEN_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;
const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Identity id
    pub sub: String,
    pub name: String,
    pub kind: IdentityKind,
    pub approved: bool,
    pub iat: u64,
    pub exp: u64,
}

/// Turns a verified identity into an opaque bearer token.
pub trait SessionTokenIssuer: Send + Sync {
    fn issue(&self, identity: &Identity) -> Result<String>;

    /// Identity id carried by a valid, unexpired token.
    fn validate(&self, token: &str) -> Result<Uuid>;
}

#[derive(Clone)]
pub struct JwtTokenIssuer {
    secret: String,
    expiry_seconds: u64,
}

impl std::fmt::Debug for JwtTokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtTokenIssuer")
            .field("secret", &"<redacted>")
            .field("expiry_seconds", &self.expiry_seconds)
            .finish()
    }
}

impl JwtTokenIssuer {
    pub fn new(secret: impl Into<String>, expiry_seconds: u64) -> Result<Self> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LEN {
            return Err(IdentityError::Token(format!(
                "JWT secret must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }
        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    /// Issuer for local development with a fixed secret
    pub fn new_dev() -> Self {
        Self {
            secret: "dev-mode-secret-not-for-production-use-123456".into(),
            expiry_seconds: DEFAULT_TOKEN_EXPIRY_SECS,
        }
    }
}

impl SessionTokenIssuer for JwtTokenIssuer {
    fn issue(&self, identity: &Identity) -> Result<String> {
        let now = Utc::now().timestamp().max(0) as u64;
        let claims = Claims {
            sub: identity.id.to_string(),
            name: identity.display_name.clone(),
            kind: identity.kind,
            approved: identity.approved,
            iat: now,
            exp: now + self.expiry_seconds,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| IdentityError::Token(format!("Failed to generate token: {}", e)))
    }

    fn validate(&self, token: &str) -> Result<Uuid> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            let reason = match e.kind() {
                ErrorKind::ExpiredSignature => "token expired",
                ErrorKind::InvalidSignature => "invalid token signature",
                _ => "invalid token",
            };
            IdentityError::Unauthorized(reason.to_string())
        })?;

        Uuid::parse_str(&data.claims.sub)
            .map_err(|_| IdentityError::Unauthorized("invalid token subject".to_string()))
    }
}

/// Extract token from an Authorization header value.
/// Supports "Bearer <token>" and raw tokens.
pub fn extract_bearer(header: Option<&str>) -> Option<&str> {
    let header = header?.trim();
    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
