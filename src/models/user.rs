use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::auth::AuthenticatedUser;
use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i32,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub nick_name: String,
    pub email: String,
    pub head_pic: Option<String>,
    pub phone_number: Option<String>,
    pub is_frozen: bool,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user together with its role names and flattened permission codes.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user: User,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl UserRecord {
    /// Snapshot of the claims that go into an access token.
    pub fn identity(&self) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: self.user.id,
            username: self.user.username.clone(),
            is_admin: self.user.is_admin,
            roles: self.roles.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

/// Profile returned alongside the tokens on login.
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub id: i32,
    pub username: String,
    pub nick_name: String,
    pub email: String,
    pub head_pic: Option<String>,
    pub phone_number: Option<String>,
    pub is_frozen: bool,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl From<UserRecord> for UserInfo {
    fn from(r: UserRecord) -> Self {
        Self {
            id: r.user.id,
            username: r.user.username,
            nick_name: r.user.nick_name,
            email: r.user.email,
            head_pic: r.user.head_pic,
            phone_number: r.user.phone_number,
            is_frozen: r.user.is_frozen,
            is_admin: r.user.is_admin,
            created_at: r.user.created_at,
            updated_at: r.user.updated_at,
            roles: r.roles,
            permissions: r.permissions,
        }
    }
}

/// Public view of a user, used by `/user/info` and the paged list.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserDetail {
    pub id: i32,
    pub username: String,
    pub nick_name: String,
    pub email: String,
    pub head_pic: Option<String>,
    pub phone_number: Option<String>,
    pub is_frozen: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserDetail {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            nick_name: u.nick_name,
            email: u.email,
            head_pic: u.head_pic,
            phone_number: u.phone_number,
            is_frozen: u.is_frozen,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserDetail>,
    pub total: i64,
}

// Request DTOs
#[derive(Debug, Deserialize)]
pub struct RegisterUserRequest {
    pub username: String,
    pub password: String,
    pub nick_name: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub captcha: String,
}

impl RegisterUserRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        not_empty(&self.username, "Username must not be empty")?;
        password_length(&self.password)?;
        not_empty(&self.nick_name, "Nickname must not be empty")?;
        email_format(&self.email)?;
        not_empty(&self.captcha, "Verification code must not be empty")
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    pub password: String,
    pub email: String,
    pub captcha: String,
}

impl UpdatePasswordRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        password_length(&self.password)?;
        email_format(&self.email)?;
        not_empty(&self.captcha, "Verification code must not be empty")
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub head_pic: Option<String>,
    pub nick_name: Option<String>,
    pub email: String,
    pub captcha: String,
}

impl UpdateUserRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        email_format(&self.email)?;
        not_empty(&self.captcha, "Verification code must not be empty")
    }
}

#[derive(Debug, Deserialize)]
pub struct CaptchaQuery {
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct FreezeQuery {
    pub id: i32,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserListQuery {
    pub page: Option<i64>,
    pub size: Option<i64>,
    pub username: Option<String>,
    pub nick_name: Option<String>,
    pub email: Option<String>,
}

pub const MIN_PASSWORD_LEN: usize = 6;

fn not_empty(value: &str, message: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::bad_request(message));
    }
    Ok(())
}

fn password_length(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Loose shape check; deliverability is proven by the verification code.
pub fn email_format(email: &str) -> Result<(), AppError> {
    let email = email.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid {
        return Err(AppError::bad_request("Invalid email address"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_request() -> RegisterUserRequest {
        RegisterUserRequest {
            username: "wangwu".into(),
            password: "secret1".into(),
            nick_name: "Wang Wu".into(),
            email: "wangwu@example.com".into(),
            phone_number: None,
            captcha: "123456".into(),
        }
    }

    #[test]
    fn test_register_validation() {
        assert!(register_request().validate().is_ok());

        let mut short = register_request();
        short.password = "12345".into();
        assert!(matches!(short.validate(), Err(AppError::BadRequest(_))));

        let mut blank = register_request();
        blank.username = "   ".into();
        assert!(matches!(blank.validate(), Err(AppError::BadRequest(_))));

        let mut no_code = register_request();
        no_code.captcha = String::new();
        assert!(no_code.validate().is_err());
    }

    #[test]
    fn test_email_format() {
        assert!(email_format("a@b.co").is_ok());
        assert!(email_format("a@b").is_err());
        assert!(email_format("@b.co").is_err());
        assert!(email_format("plain").is_err());
        assert!(email_format("a@.co").is_err());
    }
}
