//! Bearer-token authentication gate.
//!
//! Connections present a signed JWT (HS256 against a process-shared secret)
//! at connect time. Rejected tokens never create any connection state.
//! The role claim is optional and defaults to `citizen`.

use axum::extract::FromRequestParts;
use axum::http::{request::Parts, StatusCode};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token expired")]
    Expired,
    #[error("token invalid")]
    Invalid,
}

/// Connection roles, least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Citizen,
    Responder,
    Coordinator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Citizen => "citizen",
            Role::Responder => "responder",
            Role::Coordinator => "coordinator",
            Role::Admin => "admin",
        }
    }

    /// Coordinators and admins see responder status traffic and may
    /// publish alerts / operator messages.
    pub fn is_coordinator(&self) -> bool {
        matches!(self, Role::Coordinator | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWT claims carried by alert-service tokens.
/// `role` is absent for plain citizen tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub iat: i64,
    pub exp: i64,
}

/// Identity derived from a validated token.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub user_id: String,
    pub role: Role,
}

/// Validates bearer tokens and derives identity + role.
pub struct AuthGate {
    secret: Vec<u8>,
}

impl AuthGate {
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }

    /// Validate a bearer token. Missing role claim defaults to `citizen`.
    pub fn authenticate(&self, token: &str) -> Result<AuthedUser, AuthError> {
        let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        let data = decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid,
            })?;

        Ok(AuthedUser {
            user_id: data.claims.sub,
            role: data.claims.role.unwrap_or(Role::Citizen),
        })
    }

    /// Issue a token for a user. Used by operator tooling and tests; the
    /// production token issuer is an external identity service sharing the
    /// same secret.
    pub fn issue_token(
        &self,
        user_id: &str,
        role: Option<Role>,
        ttl_secs: i64,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            iat: now,
            exp: now + ttl_secs,
        };
        encode(
            &Header::default(), // HS256
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
    }
}

/// Load or generate the JWT signing key (256-bit random secret).
/// Stored as raw bytes at data_dir/jwt_secret. All processes serving the
/// same cluster must share this file (or mount the same secret).
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Axum extractor for REST endpoints: validates `Authorization: Bearer`.
impl FromRequestParts<AppState> for AuthedUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        state
            .auth
            .authenticate(token)
            .map_err(|_| StatusCode::UNAUTHORIZED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> AuthGate {
        AuthGate::new(vec![7u8; 32])
    }

    #[test]
    fn round_trip_preserves_identity_and_role() {
        let gate = gate();
        let token = gate
            .issue_token("user-1", Some(Role::Responder), 900)
            .unwrap();
        let user = gate.authenticate(&token).unwrap();
        assert_eq!(user.user_id, "user-1");
        assert_eq!(user.role, Role::Responder);
    }

    #[test]
    fn missing_role_claim_defaults_to_citizen() {
        let gate = gate();
        let token = gate.issue_token("user-2", None, 900).unwrap();
        let user = gate.authenticate(&token).unwrap();
        assert_eq!(user.role, Role::Citizen);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = gate().issue_token("user-3", None, 900).unwrap();
        let other = AuthGate::new(vec![9u8; 32]);
        assert!(matches!(other.authenticate(&token), Err(AuthError::Invalid)));
    }

    #[test]
    fn expired_token_is_rejected_as_expired() {
        let gate = gate();
        let token = gate.issue_token("user-4", None, -120).unwrap();
        assert!(matches!(gate.authenticate(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn jwt_secret_is_generated_once_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();

        let generated = load_or_generate_jwt_secret(data_dir).unwrap();
        assert_eq!(generated.len(), 32);

        let reloaded = load_or_generate_jwt_secret(data_dir).unwrap();
        assert_eq!(reloaded, generated);
    }

    #[test]
    fn truncated_jwt_secret_file_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();
        std::fs::write(dir.path().join("jwt_secret"), [1u8; 7]).unwrap();

        let key = load_or_generate_jwt_secret(data_dir).unwrap();
        assert_eq!(key.len(), 32);
        let on_disk = std::fs::read(dir.path().join("jwt_secret")).unwrap();
        assert_eq!(on_disk, key);
    }
}
