use serde::{Deserialize, Serialize};

use super::user::UserInfo;

/// Distinguishes the two token kinds signed with the same key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims embedded in the JWT access token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessClaims {
    pub typ: TokenKind,
    pub user_id: i32,
    pub username: String,
    pub is_admin: bool,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub exp: usize,
    pub iat: usize,
}

/// Claims embedded in the JWT refresh token: identity is re-derived from storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshClaims {
    pub typ: TokenKind,
    pub user_id: i32,
    pub exp: usize,
    pub iat: usize,
}

/// Identity extracted from a validated access token, available as an Axum extractor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthenticatedUser {
    pub user_id: i32,
    pub username: String,
    pub is_admin: bool,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl AuthenticatedUser {
    pub fn has_permission(&self, code: &str) -> bool {
        self.permissions.iter().any(|p| p == code)
    }
}

impl From<AccessClaims> for AuthenticatedUser {
    fn from(c: AccessClaims) -> Self {
        Self {
            user_id: c.user_id,
            username: c.username,
            is_admin: c.is_admin,
            roles: c.roles,
            permissions: c.permissions,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

// Request/Response DTOs
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    #[serde(rename = "userInfo")]
    pub user_info: UserInfo,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[derive(Debug, Deserialize)]
pub struct RefreshQuery {
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}
