//! Session verification for the dashboard API.
//!
//! Tokens are HS256 JWTs issued by the login flow and carried either in the
//! `authToken` cookie or an `Authorization: Bearer` header. This module only
//! verifies them; issuing sessions happens elsewhere.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
    },
};
use jsonwebtoken::{DecodingKey, Validation};
use serde::Deserialize;
use std::{convert::Infallible, sync::Arc};
use tracing::debug;

use crate::error::ApiError;

/// Cookie the dashboard stores its session token in
pub const AUTH_COOKIE: &str = "authToken";

/// User object embedded in session tokens by the login flow
#[derive(Debug, Clone, Deserialize)]
pub struct SessionUser {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// Claims the gate relies on.
///
/// Sessions carry `{user: {_id, username, ..}, iat, exp}`; a plain `sub`
/// claim is accepted when no `user` object is present.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub user: Option<SessionUser>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    pub exp: i64,
}

impl Claims {
    /// The caller this token was issued to, if it names one
    pub fn into_auth_user(self) -> Option<AuthUser> {
        match self.user {
            Some(user) if !user.id.is_empty() => Some(AuthUser {
                user_id: user.id,
                username: user.username.or(self.username),
            }),
            _ => self.sub.filter(|sub| !sub.is_empty()).map(|sub| AuthUser {
                user_id: sub,
                username: self.username,
            }),
        }
    }
}

/// Validates session tokens against the shared secret
#[derive(Clone)]
pub struct AuthGate {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AuthGate {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::default(),
        }
    }

    /// Validate a token and return its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }

    fn authenticate(&self, parts: &Parts) -> Result<AuthUser, ApiError> {
        let token = token_from_parts(parts)
            .ok_or_else(|| ApiError::unauthorized("Unauthorized user"))?;
        let claims = self.verify(&token).map_err(|e| {
            debug!(error = %e, "Rejected session token");
            ApiError::unauthorized("Invalid or expired session")
        })?;
        claims
            .into_auth_user()
            .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))
    }
}

/// Optional gate as held in the router state; `None` when no secret is configured
#[derive(Clone, Default)]
pub struct AuthState(pub Option<Arc<AuthGate>>);

/// An authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
    pub username: Option<String>,
}

impl<S> FromRequestParts<S> for AuthUser
where
    AuthState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthState(gate) = AuthState::from_ref(state);
        let gate = gate.ok_or_else(|| ApiError::unauthorized("Authentication is not configured"))?;
        gate.authenticate(parts)
    }
}

/// Caller identity when a valid session is present, `None` otherwise.
/// Never rejects, so a stale cookie does not break ungated routes.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl<S> FromRequestParts<S> for MaybeAuthUser
where
    AuthState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthState(gate) = AuthState::from_ref(state);
        Ok(MaybeAuthUser(
            gate.and_then(|gate| gate.authenticate(parts).ok()),
        ))
    }
}

/// Bearer header first, then the session cookie
fn token_from_parts(parts: &Parts) -> Option<String> {
    let bearer = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    parts
        .headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == AUTH_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::{json, Value};

    const SECRET: &[u8] = b"test-secret-key-for-testing";

    fn sign(secret: &[u8], claims: &Value) -> String {
        jsonwebtoken::encode(&Header::default(), claims, &EncodingKey::from_secret(secret))
            .unwrap()
    }

    /// Same layout the login flow signs
    fn token(secret: &[u8], exp: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        sign(
            secret,
            &json!({
                "user": {
                    "_id": "user-1",
                    "username": "alice",
                    "email": "alice@example.com",
                    "history": [],
                },
                "iat": now,
                "exp": exp,
            }),
        )
    }

    fn future_exp() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    fn parts_with(header: (&str, String)) -> Parts {
        let (parts, _) = Request::builder()
            .header(header.0, header.1)
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn test_verify_valid_token() {
        let gate = AuthGate::new(SECRET);
        let user = gate
            .verify(&token(SECRET, future_exp()))
            .unwrap()
            .into_auth_user()
            .unwrap();
        assert_eq!(user.user_id, "user-1");
        assert_eq!(user.username.as_deref(), Some("alice"));
    }

    #[test]
    fn test_sub_claim_fallback() {
        let gate = AuthGate::new(SECRET);
        let token = sign(SECRET, &json!({"sub": "user-2", "exp": future_exp()}));
        let user = gate.verify(&token).unwrap().into_auth_user().unwrap();
        assert_eq!(user.user_id, "user-2");
        assert_eq!(user.username, None);
    }

    #[test]
    fn test_token_without_identity_rejected() {
        let gate = AuthGate::new(SECRET);
        let token = sign(SECRET, &json!({"iat": 0, "exp": future_exp()}));
        let parts = parts_with(("authorization", format!("Bearer {}", token)));
        let err = gate.authenticate(&parts).unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_wrong_secret_fails() {
        let gate = AuthGate::new(b"different-secret");
        assert!(gate.verify(&token(SECRET, future_exp())).is_err());
    }

    #[test]
    fn test_expired_token_fails() {
        let gate = AuthGate::new(SECRET);
        let expired = chrono::Utc::now().timestamp() - 3600;
        assert!(gate.verify(&token(SECRET, expired)).is_err());
    }

    #[test]
    fn test_token_from_cookie() {
        let parts = parts_with(("cookie", format!("theme=dark; {}=abc.def.ghi", AUTH_COOKIE)));
        assert_eq!(token_from_parts(&parts).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn test_token_from_bearer_header() {
        let parts = parts_with(("authorization", "Bearer abc.def.ghi".to_string()));
        assert_eq!(token_from_parts(&parts).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn test_authenticate_cookie_session() {
        let gate = AuthGate::new(SECRET);
        let parts = parts_with(("cookie", format!("{}={}", AUTH_COOKIE, token(SECRET, future_exp()))));
        let user = gate.authenticate(&parts).unwrap();
        assert_eq!(user.user_id, "user-1");
    }

    #[test]
    fn test_authenticate_without_token() {
        let gate = AuthGate::new(SECRET);
        let parts = parts_with(("x-other", "1".to_string()));
        let err = gate.authenticate(&parts).unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::UNAUTHORIZED);
    }
}
