//! Signed access and refresh tokens.
//!
//! Both are HS256 JWTs signed with separate secrets. The `kind` claim stops a
//! refresh token from being replayed as an access token even if the two
//! secrets were configured to the same value.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AuthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT claims carried by both token kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub role: String,
    pub kind: TokenKind,
    /// Unique per token so two logins in the same second still rotate
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,
    #[error("Token is invalid")]
    Invalid,
    #[error("Wrong token type")]
    WrongKind,
    #[error("Failed to sign token: {0}")]
    Signing(String),
}

/// A freshly issued access/refresh pair
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

fn sign(claims: &Claims, secret: &str) -> Result<String, TokenError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| TokenError::Signing(e.to_string()))
}

fn claims_for(user_id: &str, role: &str, kind: TokenKind, ttl: Duration) -> Claims {
    let now = Utc::now();
    Claims {
        sub: user_id.to_string(),
        role: role.to_string(),
        kind,
        jti: uuid::Uuid::new_v4().to_string(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    }
}

pub fn issue_token_pair(config: &AuthConfig, user_id: &str, role: &str) -> Result<TokenPair, TokenError> {
    let access = claims_for(
        user_id,
        role,
        TokenKind::Access,
        Duration::minutes(config.access_token_ttl_minutes),
    );
    let refresh = claims_for(
        user_id,
        role,
        TokenKind::Refresh,
        Duration::days(config.refresh_token_ttl_days),
    );

    Ok(TokenPair {
        access_token: sign(&access, &config.access_token_secret)?,
        refresh_token: sign(&refresh, &config.refresh_token_secret)?,
    })
}

fn verify(token: &str, secret: &str, expected: TokenKind) -> Result<Claims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation).map_err(
        |e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid,
        },
    )?;

    if data.claims.kind != expected {
        return Err(TokenError::WrongKind);
    }
    Ok(data.claims)
}

pub fn verify_access_token(config: &AuthConfig, token: &str) -> Result<Claims, TokenError> {
    verify(token, &config.access_token_secret, TokenKind::Access)
}

pub fn verify_refresh_token(config: &AuthConfig, token: &str) -> Result<Claims, TokenError> {
    verify(token, &config.refresh_token_secret, TokenKind::Refresh)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            access_token_secret: "access-test-secret".to_string(),
            refresh_token_secret: "refresh-test-secret".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_issue_and_verify_pair() {
        let config = config();
        let pair = issue_token_pair(&config, "user-1", "admin").unwrap();

        let access = verify_access_token(&config, &pair.access_token).unwrap();
        assert_eq!(access.sub, "user-1");
        assert_eq!(access.role, "admin");
        assert_eq!(access.kind, TokenKind::Access);
        assert_eq!(access.exp - access.iat, 15 * 60);

        let refresh = verify_refresh_token(&config, &pair.refresh_token).unwrap();
        assert_eq!(refresh.kind, TokenKind::Refresh);
        assert_eq!(refresh.exp - refresh.iat, 7 * 24 * 3600);
    }

    #[test]
    fn test_tokens_are_not_interchangeable() {
        let config = config();
        let pair = issue_token_pair(&config, "user-1", "user").unwrap();

        assert!(matches!(
            verify_access_token(&config, &pair.refresh_token),
            Err(TokenError::Invalid)
        ));

        let mut shared = config.clone();
        shared.refresh_token_secret = shared.access_token_secret.clone();
        let pair = issue_token_pair(&shared, "user-1", "user").unwrap();
        assert!(matches!(
            verify_access_token(&shared, &pair.refresh_token),
            Err(TokenError::WrongKind)
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let config = config();
        let mut claims = claims_for("user-1", "user", TokenKind::Access, Duration::minutes(15));
        claims.iat -= 3600;
        claims.exp = claims.iat + 60;
        let token = sign(&claims, &config.access_token_secret).unwrap();

        assert!(matches!(verify_access_token(&config, &token), Err(TokenError::Expired)));
    }

    #[test]
    fn test_tampered_token_is_rejected() {
        let config = config();
        let pair = issue_token_pair(&config, "user-1", "user").unwrap();
        let mut tampered = pair.access_token.clone();
        tampered.push('x');
        assert!(verify_access_token(&config, &tampered).is_err());
        assert!(verify_access_token(&config, "not.a.jwt").is_err());
    }

    #[test]
    fn test_two_pairs_differ() {
        let config = config();
        let a = issue_token_pair(&config, "user-1", "user").unwrap();
        let b = issue_token_pair(&config, "user-1", "user").unwrap();
        assert_ne!(a.refresh_token, b.refresh_token);
    }
}
