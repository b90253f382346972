use std::future::Future;

use sqlx::PgPool;

use crate::{
    error::{AppError, AppResult},
    models::user::{
        RegisterUserRequest, UpdatePasswordRequest, UpdateUserRequest, User, UserDetail,
        UserListQuery, UserListResponse, UserRecord,
    },
    services::{
        captcha::{self, CodeCache, CodePurpose},
        password,
    },
};

const USER_COLUMNS: &str = "id, username, password_hash, nick_name, email, head_pic, phone_number,
    is_frozen, is_admin, created_at, updated_at";

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Lookup of users together with their roles and permission codes.
pub trait IdentityStore {
    fn find_by_credentials(
        &self,
        username: &str,
        is_admin: bool,
    ) -> impl Future<Output = anyhow::Result<Option<UserRecord>>> + Send;

    fn find_by_id(&self, id: i32) -> impl Future<Output = anyhow::Result<Option<UserRecord>>> + Send;
}

impl IdentityStore for PgPool {
    async fn find_by_credentials(&self, username: &str, is_admin: bool) -> anyhow::Result<Option<UserRecord>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 AND is_admin = $2"
        ))
        .bind(username)
        .bind(is_admin)
        .fetch_optional(self)
        .await?;

        match user {
            Some(user) => Ok(Some(load_grants(self, user).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, id: i32) -> anyhow::Result<Option<UserRecord>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(self)
            .await?;

        match user {
            Some(user) => Ok(Some(load_grants(self, user).await?)),
            None => Ok(None),
        }
    }
}

async fn load_grants(pool: &PgPool, user: User) -> anyhow::Result<UserRecord> {
    let rows: Vec<(String, Option<String>)> = sqlx::query_as(
        "SELECT r.name, p.code
         FROM user_roles ur
         JOIN roles r ON r.id = ur.role_id
         LEFT JOIN role_permissions rp ON rp.role_id = r.id
         LEFT JOIN permissions p ON p.id = rp.permission_id
         WHERE ur.user_id = $1
         ORDER BY r.id, p.id",
    )
    .bind(user.id)
    .fetch_all(pool)
    .await?;

    let (roles, permissions) = flatten_grants(rows);
    Ok(UserRecord { user, roles, permissions })
}

/// Collapse `(role, permission)` join rows into ordered role names and
/// permission codes, each listed once. Permissions are deduplicated by code.
pub fn flatten_grants(rows: Vec<(String, Option<String>)>) -> (Vec<String>, Vec<String>) {
    let mut roles: Vec<String> = Vec::new();
    let mut permissions: Vec<String> = Vec::new();
    for (role, code) in rows {
        if !roles.contains(&role) {
            roles.push(role);
        }
        if let Some(code) = code {
            if !permissions.contains(&code) {
                permissions.push(code);
            }
        }
    }
    (roles, permissions)
}

/// Turn a free-text filter into a LIKE pattern, escaping wildcards.
fn like_pattern(filter: Option<&str>) -> Option<String> {
    let filter = filter.map(str::trim).filter(|s| !s.is_empty())?;
    let escaped = filter
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    Some(format!("%{escaped}%"))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Validated `(limit, offset)` for a 1-based page request.
fn page_window(page: Option<i64>, size: Option<i64>) -> AppResult<(i64, i64)> {
    let page = page.unwrap_or(1);
    let size = size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page < 1 {
        return Err(AppError::bad_request("page must be at least 1"));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&size) {
        return Err(AppError::bad_request(format!("size must be between 1 and {MAX_PAGE_SIZE}")));
    }
    let offset = (page - 1)
        .checked_mul(size)
        .ok_or_else(|| AppError::bad_request("page out of range"))?;
    Ok((size, offset))
}

/// Addresses compare the way verification-code keys do: trimmed, case-insensitive.
fn email_matches(stored: &str, submitted: &str) -> bool {
    captcha::normalize_recipient(stored) == captcha::normalize_recipient(submitted)
}

pub struct UserService;

impl UserService {
    pub async fn register<C: CodeCache>(pool: &PgPool, cache: &C, req: &RegisterUserRequest) -> AppResult<()> {
        req.validate()?;
        captcha::require(cache, CodePurpose::Register, &req.email, &req.captcha).await?;

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
            .bind(&req.username)
            .fetch_one(pool)
            .await?;
        if exists {
            return Err(AppError::UsernameTaken);
        }

        let password_hash = password::hash(&req.password)?;

        let id: i32 = sqlx::query_scalar(
            "INSERT INTO users (username, password_hash, nick_name, email, phone_number)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
        )
        .bind(&req.username)
        .bind(&password_hash)
        .bind(&req.nick_name)
        .bind(captcha::normalize_recipient(&req.email))
        .bind(non_blank(req.phone_number.as_deref()))
        .fetch_one(pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return AppError::UsernameTaken;
                }
            }
            tracing::error!("user registration failed for {}: {e}", req.username);
            AppError::from(e)
        })?;

        tracing::info!(user_id = id, "user registered");
        Ok(())
    }

    pub async fn find_detail_by_id(pool: &PgPool, user_id: i32) -> AppResult<UserDetail> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(pool)
            .await?
            .map(UserDetail::from)
            .ok_or(AppError::UserNotFound)
    }

    /// The email must be the account's own address: the code proves access
    /// to that mailbox, not to any mailbox.
    pub async fn update_password<C: CodeCache>(
        pool: &PgPool,
        cache: &C,
        user_id: i32,
        req: &UpdatePasswordRequest,
    ) -> AppResult<()> {
        req.validate()?;
        captcha::require(cache, CodePurpose::UpdatePassword, &req.email, &req.captcha).await?;
        Self::require_own_email(pool, user_id, &req.email).await?;

        let password_hash = password::hash(&req.password)?;
        sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
            .bind(&password_hash)
            .bind(user_id)
            .execute(pool)
            .await?;

        tracing::info!(user_id, "password updated");
        Ok(())
    }

    pub async fn update<C: CodeCache>(
        pool: &PgPool,
        cache: &C,
        user_id: i32,
        req: &UpdateUserRequest,
    ) -> AppResult<()> {
        req.validate()?;
        captcha::require(cache, CodePurpose::UpdateUser, &req.email, &req.captcha).await?;
        Self::require_own_email(pool, user_id, &req.email).await?;

        sqlx::query(
            "UPDATE users
             SET nick_name = COALESCE($2, nick_name),
                 head_pic = COALESCE($3, head_pic),
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(non_blank(req.nick_name.as_deref()))
        .bind(non_blank(req.head_pic.as_deref()))
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn require_own_email(pool: &PgPool, user_id: i32, email: &str) -> AppResult<()> {
        let stored: String = sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await?
            .ok_or(AppError::UserNotFound)?;

        if !email_matches(&stored, email) {
            return Err(AppError::bad_request("Email does not belong to this account"));
        }
        Ok(())
    }

    pub async fn freeze(pool: &PgPool, user_id: i32) -> AppResult<()> {
        let result = sqlx::query("UPDATE users SET is_frozen = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::UserNotFound);
        }
        tracing::info!(user_id, "user frozen");
        Ok(())
    }

    pub async fn list(pool: &PgPool, query: &UserListQuery) -> AppResult<UserListResponse> {
        let (size, offset) = page_window(query.page, query.size)?;

        let username = like_pattern(query.username.as_deref());
        let nick_name = like_pattern(query.nick_name.as_deref());
        let email = like_pattern(query.email.as_deref());

        const FILTER: &str = "($1::TEXT IS NULL OR username LIKE $1)
             AND ($2::TEXT IS NULL OR nick_name LIKE $2)
             AND ($3::TEXT IS NULL OR email LIKE $3)";

        let users = sqlx::query_as::<_, UserDetail>(&format!(
            "SELECT id, username, nick_name, email, head_pic, phone_number, is_frozen, created_at
             FROM users WHERE {FILTER}
             ORDER BY id
             LIMIT $4 OFFSET $5"
        ))
        .bind(&username)
        .bind(&nick_name)
        .bind(&email)
        .bind(size)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM users WHERE {FILTER}"))
            .bind(&username)
            .bind(&nick_name)
            .bind(&email)
            .fetch_one(pool)
            .await?;

        Ok(UserListResponse { users, total })
    }

    /// Insert the starter roles, permissions and two accounts. Idempotent.
    pub async fn seed_initial_data(pool: &PgPool, password: &str) -> anyhow::Result<()> {
        let password_hash = password::hash(password)?;
        let mut tx = pool.begin().await?;

        for (code, description) in [("ccc", "Access the ccc endpoint"), ("ddd", "Access the ddd endpoint")] {
            sqlx::query(
                "INSERT INTO permissions (code, description) VALUES ($1, $2)
                 ON CONFLICT (code) DO NOTHING",
            )
            .bind(code)
            .bind(description)
            .execute(&mut *tx)
            .await?;
        }

        let roles: [(&str, &[&str]); 2] = [("admin", &["ccc", "ddd"]), ("user", &["ccc"])];
        for (role, codes) in roles {
            sqlx::query("INSERT INTO roles (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
                .bind(role)
                .execute(&mut *tx)
                .await?;
            for &code in codes {
                sqlx::query(
                    "INSERT INTO role_permissions (role_id, permission_id)
                     SELECT r.id, p.id FROM roles r, permissions p
                     WHERE r.name = $1 AND p.code = $2
                     ON CONFLICT DO NOTHING",
                )
                .bind(role)
                .bind(code)
                .execute(&mut *tx)
                .await?;
            }
        }

        let users = [
            ("zhangsan", "Zhang San", "zhangsan@example.com", Some("13288888888"), true, "admin"),
            ("lisi", "Li Si", "lisi@example.com", None, false, "user"),
        ];
        for (username, nick_name, email, phone, is_admin, role) in users {
            sqlx::query(
                "INSERT INTO users (username, password_hash, nick_name, email, phone_number, is_admin)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (username) DO NOTHING",
            )
            .bind(username)
            .bind(&password_hash)
            .bind(nick_name)
            .bind(email)
            .bind(phone)
            .bind(is_admin)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO user_roles (user_id, role_id)
                 SELECT u.id, r.id FROM users u, roles r
                 WHERE u.username = $1 AND r.name = $2
                 ON CONFLICT DO NOTHING",
            )
            .bind(username)
            .bind(role)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(role: &str, code: Option<&str>) -> (String, Option<String>) {
        (role.to_string(), code.map(String::from))
    }

    #[test]
    fn test_flatten_grants_dedupes_by_code() {
        let rows = vec![
            row("admin", Some("ccc")),
            row("admin", Some("ddd")),
            row("user", Some("ccc")),
        ];
        let (roles, permissions) = flatten_grants(rows);
        assert_eq!(roles, vec!["admin", "user"]);
        assert_eq!(permissions, vec!["ccc", "ddd"]);
    }

    #[test]
    fn test_flatten_grants_keeps_roles_without_permissions() {
        let (roles, permissions) = flatten_grants(vec![row("guest", None), row("user", Some("ccc"))]);
        assert_eq!(roles, vec!["guest", "user"]);
        assert_eq!(permissions, vec!["ccc"]);
    }

    #[test]
    fn test_page_window() {
        assert_eq!(page_window(None, None).unwrap(), (DEFAULT_PAGE_SIZE, 0));
        assert_eq!(page_window(Some(3), Some(20)).unwrap(), (20, 40));
        assert!(matches!(page_window(Some(0), None), Err(AppError::BadRequest(_))));
        assert!(matches!(page_window(Some(1), Some(0)), Err(AppError::BadRequest(_))));
        assert!(matches!(page_window(Some(1), Some(MAX_PAGE_SIZE + 1)), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_huge_page_is_rejected_instead_of_overflowing() {
        let err = page_window(Some(i64::MAX), Some(MAX_PAGE_SIZE)).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "page out of range"));
    }

    #[tokio::test]
    async fn test_list_rejects_huge_page_before_querying() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://unused@127.0.0.1:1/unused")
            .unwrap();
        let query = UserListQuery {
            page: Some(i64::MAX),
            size: Some(100),
            ..Default::default()
        };
        let res = UserService::list(&pool, &query).await;
        assert!(matches!(res, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_email_must_be_the_accounts_own() {
        assert!(email_matches("lisi@example.com", "lisi@example.com"));
        assert!(email_matches("lisi@example.com", " LiSi@Example.com "));
        assert!(!email_matches("lisi@example.com", "attacker@example.com"));
        assert!(!email_matches("lisi@example.com", "lisi@example.co"));
    }

    #[test]
    fn test_like_pattern() {
        assert_eq!(like_pattern(None), None);
        assert_eq!(like_pattern(Some("  ")), None);
        assert_eq!(like_pattern(Some("zhang")).as_deref(), Some("%zhang%"));
        assert_eq!(like_pattern(Some("50%_off")).as_deref(), Some("%50\\%\\_off%"));
    }
}
