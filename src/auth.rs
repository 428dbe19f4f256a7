use crate::app::AppState;
use crate::error::ApiError;
use crate::models::Member;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use chrono::{DateTime, Duration, Utc};
use constant_time_eq::constant_time_eq;
use headers::authorization::Bearer;
use headers::Authorization;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token signing key must not be empty")]
    EmptySecret,
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    Expired,
    #[error("token encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

pub fn verify_password(password: &str, hashed: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(hashed).map_err(|e| AuthError::Hash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

/// Issues and checks bearer tokens of the form `hex(claims).hex(hmac)`.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration) -> Result<Self, AuthError> {
        let secret = secret.as_ref().to_vec();
        if secret.is_empty() {
            return Err(AuthError::EmptySecret);
        }
        Ok(Self { secret, ttl })
    }

    pub fn issue(&self, username: &str) -> Result<String, AuthError> {
        self.issue_at(username, Utc::now())
    }

    pub fn issue_at(&self, username: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = Claims {
            sub: username.to_string(),
            exp: (now + self.ttl).timestamp(),
        };
        let payload = hex::encode(serde_json::to_vec(&claims)?);
        let signature = hex::encode(self.sign(payload.as_bytes())?);
        Ok(format!("{payload}.{signature}"))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let Some((payload, signature)) = token.split_once('.') else {
            return Err(AuthError::InvalidToken);
        };
        let Ok(expected) = hex::decode(signature) else {
            return Err(AuthError::InvalidToken);
        };
        let computed = self.sign(payload.as_bytes())?;
        if expected.len() != computed.len() || !constant_time_eq(&computed, &expected) {
            return Err(AuthError::InvalidToken);
        }

        let raw = hex::decode(payload).map_err(|_| AuthError::InvalidToken)?;
        let claims: Claims = serde_json::from_slice(&raw).map_err(|_| AuthError::InvalidToken)?;
        if claims.exp <= now.timestamp() {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, AuthError> {
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(&self.secret) else {
            return Err(AuthError::EmptySecret);
        };
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// The member behind a valid bearer token, loaded fresh from the store so
/// role changes apply immediately.
#[derive(Debug, Clone)]
pub struct AuthMember(pub Member);

impl AuthMember {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.0.is_admin {
            Ok(())
        } else {
            warn!("Member '{}' attempted an admin action", self.0.username);
            Err(ApiError::Forbidden("Admin role required".to_string()))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthMember {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::Unauthorized("Missing or malformed bearer token".to_string()))?;

        let claims = state.tokens.verify(bearer.token()).map_err(|e| {
            debug!("Rejected bearer token: {}", e);
            ApiError::Unauthorized("Could not validate credentials".to_string())
        })?;

        let member = state
            .store
            .member_by_username(&claims.sub)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("Could not validate credentials".to_string()))?;
        Ok(AuthMember(member))
    }
}
