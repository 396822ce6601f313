//! Signed bearer tokens handed out at login and checked on every API call.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::domain::{User, UserId};

pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const BEARER: &str = "Bearer";

/// Signing key used when no secret is configured. Never accepted in production config.
pub const DEVELOPMENT_TOKEN_SECRET: &str = "credit-desk-development-signing-key";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    username: String,
    role: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token signing failed: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
    #[error("token rejected: {0}")]
    Rejected(#[source] jsonwebtoken::errors::Error),
    #[error("token subject {0:?} is not a user id")]
    Subject(String),
}

/// Result of a successful login.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

/// HS256 issuer and verifier sharing one secret.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    pub fn development() -> Self {
        Self::new(DEVELOPMENT_TOKEN_SECRET.as_bytes(), DEFAULT_TOKEN_TTL)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, user: &User) -> Result<(String, DateTime<Utc>), TokenError> {
        self.issue_at(user, Utc::now())
    }

    pub fn issue_at(
        &self,
        user: &User,
        issued_at: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), TokenError> {
        let ttl_secs = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let exp = issued_at.timestamp().saturating_add(ttl_secs);
        let claims = Claims {
            sub: user.id.0.to_string(),
            username: user.username.clone(),
            role: user.role.label().to_string(),
            iat: issued_at.timestamp(),
            exp,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(TokenError::Signing)?;
        let expires_at = Utc.timestamp_opt(exp, 0).single().unwrap_or(issued_at);
        Ok((token, expires_at))
    }

    /// Check signature and expiry, returning the user the token was issued to.
    pub fn verify(&self, token: &str) -> Result<UserId, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(TokenError::Rejected)?;
        data.claims
            .sub
            .parse::<i64>()
            .map(UserId)
            .map_err(|_| TokenError::Subject(data.claims.sub))
    }
}

/// Token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case(BEARER) && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::credit::domain::Role;

    fn user(id: i64) -> User {
        User {
            id: UserId(id),
            username: "lvega".into(),
            display_name: "Lucia Vega".into(),
            role: Role::Risk,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn issued_token_resolves_to_its_user() {
        let issuer = TokenIssuer::new(b"desk-signing-key", Duration::from_secs(600));
        let (token, expires_at) = issuer.issue(&user(7)).expect("issue");
        assert_eq!(issuer.verify(&token).expect("verify"), UserId(7));
        assert!(expires_at > Utc::now());
    }

    #[test]
    fn foreign_and_expired_tokens_are_rejected() {
        let issuer = TokenIssuer::new(b"desk-signing-key", Duration::from_secs(600));
        let other = TokenIssuer::new(b"someone-else", Duration::from_secs(600));
        let (forged, _) = other.issue(&user(1)).expect("issue");
        assert!(matches!(issuer.verify(&forged), Err(TokenError::Rejected(_))));

        let (stale, _) = issuer
            .issue_at(&user(1), Utc::now() - chrono::Duration::hours(2))
            .expect("issue");
        assert!(matches!(issuer.verify(&stale), Err(TokenError::Rejected(_))));
        assert!(issuer.verify("not.a.token").is_err());
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer  abc.def "), Some("abc.def"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc.def"), None);
    }
}
