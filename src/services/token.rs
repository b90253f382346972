use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    config::Config,
    models::auth::{AccessClaims, AuthenticatedUser, RefreshClaims, TokenKind, TokenPair},
};

/// Process-wide signing configuration for access and refresh tokens.
#[derive(Clone)]
pub struct TokenConfig {
    encoding: EncodingKey,
    decoding: DecodingKey,
    pub algorithm: Algorithm,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
}

impl TokenConfig {
    pub fn new(secret: &str, algorithm: Algorithm, access_ttl_secs: u64, refresh_ttl_secs: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            algorithm,
            access_ttl_secs,
            refresh_ttl_secs,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.jwt_secret,
            config.jwt_algorithm,
            config.jwt_access_expiry_secs,
            config.jwt_refresh_expiry_secs,
        )
    }
}

/// Why a token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("token has expired")]
    Expired,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token is malformed")]
    Malformed,
}

impl From<jsonwebtoken::errors::Error> for DecodeError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => DecodeError::Expired,
            ErrorKind::InvalidSignature => DecodeError::BadSignature,
            _ => DecodeError::Malformed,
        }
    }
}

fn now() -> usize {
    Utc::now().timestamp() as usize
}

pub(crate) fn sign<T: Serialize>(claims: &T, cfg: &TokenConfig) -> anyhow::Result<String> {
    Ok(encode(&Header::new(cfg.algorithm), claims, &cfg.encoding)?)
}

fn verify<T: DeserializeOwned>(token: &str, cfg: &TokenConfig) -> Result<T, DecodeError> {
    let mut validation = Validation::new(cfg.algorithm);
    validation.leeway = 0;
    Ok(decode::<T>(token, &cfg.decoding, &validation)?.claims)
}

pub fn issue_access_token(identity: &AuthenticatedUser, cfg: &TokenConfig) -> anyhow::Result<String> {
    let iat = now();
    let claims = AccessClaims {
        typ: TokenKind::Access,
        user_id: identity.user_id,
        username: identity.username.clone(),
        is_admin: identity.is_admin,
        roles: identity.roles.clone(),
        permissions: identity.permissions.clone(),
        iat,
        exp: iat.saturating_add(cfg.access_ttl_secs as usize),
    };
    sign(&claims, cfg)
}

pub fn issue_refresh_token(user_id: i32, cfg: &TokenConfig) -> anyhow::Result<String> {
    let iat = now();
    let claims = RefreshClaims {
        typ: TokenKind::Refresh,
        user_id,
        iat,
        exp: iat.saturating_add(cfg.refresh_ttl_secs as usize),
    };
    sign(&claims, cfg)
}

pub fn issue_pair(identity: &AuthenticatedUser, cfg: &TokenConfig) -> anyhow::Result<TokenPair> {
    Ok(TokenPair {
        access_token: issue_access_token(identity, cfg)?,
        refresh_token: issue_refresh_token(identity.user_id, cfg)?,
    })
}

pub fn decode_access_token(token: &str, cfg: &TokenConfig) -> Result<AccessClaims, DecodeError> {
    let claims: AccessClaims = verify(token, cfg)?;
    if claims.typ != TokenKind::Access {
        return Err(DecodeError::Malformed);
    }
    Ok(claims)
}

pub fn decode_refresh_token(token: &str, cfg: &TokenConfig) -> Result<RefreshClaims, DecodeError> {
    let claims: RefreshClaims = verify(token, cfg)?;
    if claims.typ != TokenKind::Refresh {
        return Err(DecodeError::Malformed);
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> TokenConfig {
        TokenConfig::new("test-secret", Algorithm::HS256, 1800, 7 * 86_400)
    }

    fn identity() -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: 7,
            username: "zhangsan".into(),
            is_admin: true,
            roles: vec!["admin".into(), "user".into()],
            permissions: vec!["ccc".into(), "ddd".into()],
        }
    }

    #[test]
    fn test_access_token_round_trip() {
        let cfg = cfg();
        let token = issue_access_token(&identity(), &cfg).unwrap();
        let claims = decode_access_token(&token, &cfg).unwrap();

        assert_eq!(claims.exp - claims.iat, 1800);
        assert_eq!(AuthenticatedUser::from(claims), identity());
    }

    #[test]
    fn test_refresh_token_carries_only_the_user_id() {
        let cfg = cfg();
        let token = issue_refresh_token(7, &cfg).unwrap();
        let claims = decode_refresh_token(&token, &cfg).unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.exp - claims.iat, 7 * 86_400);

        // Decoding the raw payload shows nothing but kind, id and timestamps.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        let raw = decode::<serde_json::Value>(&token, &DecodingKey::from_secret(b"test-secret"), &validation)
            .unwrap()
            .claims;
        let mut keys: Vec<_> = raw.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["exp", "iat", "typ", "user_id"]);
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let cfg = cfg();
        let past = now() - 120;
        let claims = AccessClaims {
            typ: TokenKind::Access,
            user_id: 7,
            username: "zhangsan".into(),
            is_admin: false,
            roles: vec![],
            permissions: vec![],
            iat: past - 1800,
            exp: past,
        };
        let token = sign(&claims, &cfg).unwrap();
        assert_eq!(decode_access_token(&token, &cfg), Err(DecodeError::Expired));
    }

    #[test]
    fn test_wrong_secret_is_a_signature_failure() {
        let token = issue_access_token(&identity(), &cfg()).unwrap();
        let other = TokenConfig::new("another-secret", Algorithm::HS256, 1800, 60);
        assert_eq!(decode_access_token(&token, &other), Err(DecodeError::BadSignature));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert_eq!(decode_access_token("not.a.jwt", &cfg()), Err(DecodeError::Malformed));
        assert_eq!(decode_refresh_token("", &cfg()), Err(DecodeError::Malformed));
    }

    #[test]
    fn test_token_kinds_are_not_interchangeable() {
        let cfg = cfg();
        let access = issue_access_token(&identity(), &cfg).unwrap();
        let refresh = issue_refresh_token(7, &cfg).unwrap();

        assert_eq!(decode_refresh_token(&access, &cfg), Err(DecodeError::Malformed));
        assert_eq!(decode_access_token(&refresh, &cfg), Err(DecodeError::Malformed));
    }
}
