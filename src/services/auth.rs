use crate::{
    error::{AppError, AppResult},
    models::{
        auth::{LoginResponse, TokenPair},
        user::UserInfo,
    },
    services::{
        password,
        token::{self, TokenConfig},
        user::IdentityStore,
    },
};

pub struct AuthService;

impl AuthService {
    /// Check a username/password pair within the regular or admin realm and
    /// issue a token pair carrying the user's current roles and permissions.
    ///
    /// Unknown user and wrong password produce the same error.
    pub async fn login<S: IdentityStore>(
        store: &S,
        tokens: &TokenConfig,
        username: &str,
        password: &str,
        is_admin: bool,
    ) -> AppResult<LoginResponse> {
        let record = store
            .find_by_credentials(username, is_admin)
            .await?
            .ok_or(AppError::CredentialMismatch)?;

        if !password::verify(password, &record.user.password_hash) {
            tracing::info!(user_id = record.user.id, "login rejected: bad password");
            return Err(AppError::CredentialMismatch);
        }
        if record.user.is_frozen {
            return Err(AppError::AccountFrozen);
        }

        let pair = token::issue_pair(&record.identity(), tokens)?;
        tracing::info!(user_id = record.user.id, is_admin, "login succeeded");

        Ok(LoginResponse {
            user_info: UserInfo::from(record),
            tokens: pair,
        })
    }

    /// Exchange a refresh token for a new pair. Claims are rebuilt from the
    /// store, so role and permission changes show up here and nowhere earlier.
    pub async fn refresh<S: IdentityStore>(
        store: &S,
        tokens: &TokenConfig,
        refresh_token: &str,
        is_admin: bool,
    ) -> AppResult<TokenPair> {
        let claims = token::decode_refresh_token(refresh_token, tokens).map_err(|e| {
            tracing::debug!("refresh token rejected: {e}");
            AppError::AuthenticationInvalid
        })?;

        let record = store
            .find_by_id(claims.user_id)
            .await?
            .ok_or(AppError::UserNotFound)?;

        if record.user.is_admin != is_admin {
            return Err(AppError::AuthenticationInvalid);
        }
        if record.user.is_frozen {
            return Err(AppError::AccountFrozen);
        }

        Ok(token::issue_pair(&record.identity(), tokens)?)
    }
}
