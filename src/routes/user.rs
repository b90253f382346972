use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    middleware::{auth::RouteGuard, rate_limit::RateLimit},
    models::{
        auth::{AuthenticatedUser, LoginRequest, LoginResponse, RefreshQuery, TokenPair},
        user::{
            email_format, CaptchaQuery, FreezeQuery, RegisterUserRequest, UpdatePasswordRequest,
            UpdateUserRequest, UserDetail, UserListQuery, UserListResponse,
        },
    },
    services::{
        auth::AuthService,
        captcha::{self, CodePurpose},
        user::UserService,
    },
    AppState,
};

/// Routes mounted under `/user`.
pub fn router() -> Router<AppState> {
    let login = RouteGuard::login;

    Router::new()
        .route("/register-captcha", get(register_captcha))
        .route("/register", post(register))
        .route("/login", post(login_user))
        .route("/admin/login", post(login_admin))
        .route("/refresh", get(refresh))
        .route("/admin/refresh", get(refresh_admin))
        .route("/info", login().apply(get(info)))
        .route("/update_password", login().apply(post(update_password)))
        .route("/admin/update_password", login().apply(post(update_password)))
        .route("/update_password/captcha", get(update_password_captcha))
        .route("/update", login().apply(post(update)))
        .route("/admin/update", login().apply(post(update)))
        .route("/update/captcha", get(update_captcha))
        .route("/freeze", login().apply(get(freeze)))
        .route("/list", login().apply(get(list)))
}

fn message(text: &str) -> Json<Value> {
    Json(json!({ "message": text }))
}

/// Rate-limit, generate, store and mail a verification code for `address`.
async fn send_captcha(state: &AppState, purpose: CodePurpose, address: &str) -> AppResult<Json<Value>> {
    email_format(address)?;
    let address = captcha::normalize_recipient(address);

    let mut redis = state.redis.clone();
    RateLimit::CAPTCHA
        .check(&mut redis, &format!("captcha:{}", purpose.as_str()), &address)
        .await?;

    let mailer = state.email.as_deref().ok_or(AppError::MailerUnavailable)?;
    let code = captcha::issue(&state.redis, purpose, &address).await?;
    mailer.send_captcha(&address, purpose, &code).await?;

    Ok(message("Verification code sent"))
}

pub async fn register_captcha(
    State(state): State<AppState>,
    Query(q): Query<CaptchaQuery>,
) -> AppResult<Json<Value>> {
    send_captcha(&state, CodePurpose::Register, &q.address).await
}

pub async fn update_password_captcha(
    State(state): State<AppState>,
    Query(q): Query<CaptchaQuery>,
) -> AppResult<Json<Value>> {
    send_captcha(&state, CodePurpose::UpdatePassword, &q.address).await
}

pub async fn update_captcha(
    State(state): State<AppState>,
    Query(q): Query<CaptchaQuery>,
) -> AppResult<Json<Value>> {
    send_captcha(&state, CodePurpose::UpdateUser, &q.address).await
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterUserRequest>,
) -> AppResult<Json<Value>> {
    UserService::register(&state.db, &state.redis, &body).await?;
    Ok(message("Registration successful"))
}

async fn login_in_realm(state: &AppState, body: &LoginRequest, is_admin: bool) -> AppResult<Json<LoginResponse>> {
    let mut redis = state.redis.clone();
    let scope = if is_admin { "admin-login" } else { "login" };
    RateLimit::LOGIN.check(&mut redis, scope, &body.username).await?;

    let res = AuthService::login(&state.db, &state.tokens, &body.username, &body.password, is_admin).await?;
    RateLimit::reset(&mut redis, scope, &body.username).await?;
    Ok(Json(res))
}

pub async fn login_user(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    login_in_realm(&state, &body, false).await
}

pub async fn login_admin(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    login_in_realm(&state, &body, true).await
}

pub async fn refresh(
    State(state): State<AppState>,
    Query(q): Query<RefreshQuery>,
) -> AppResult<Json<TokenPair>> {
    let pair = AuthService::refresh(&state.db, &state.tokens, &q.refresh_token, false).await?;
    Ok(Json(pair))
}

pub async fn refresh_admin(
    State(state): State<AppState>,
    Query(q): Query<RefreshQuery>,
) -> AppResult<Json<TokenPair>> {
    let pair = AuthService::refresh(&state.db, &state.tokens, &q.refresh_token, true).await?;
    Ok(Json(pair))
}

pub async fn info(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<UserDetail>> {
    let detail = UserService::find_detail_by_id(&state.db, user.user_id).await?;
    Ok(Json(detail))
}

pub async fn update_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<UpdatePasswordRequest>,
) -> AppResult<Json<Value>> {
    UserService::update_password(&state.db, &state.redis, user.user_id, &body).await?;
    Ok(message("Password updated"))
}

pub async fn update(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<UpdateUserRequest>,
) -> AppResult<Json<Value>> {
    UserService::update(&state.db, &state.redis, user.user_id, &body).await?;
    Ok(message("Profile updated"))
}

/// Only admins may freeze accounts, and never their own.
fn authorize_freeze(caller: &AuthenticatedUser, target: i32) -> AppResult<()> {
    if !caller.is_admin {
        return Err(AppError::AuthorizationDenied("administrator only".into()));
    }
    if target == caller.user_id {
        return Err(AppError::bad_request("Cannot freeze your own account"));
    }
    Ok(())
}

pub async fn freeze(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(q): Query<FreezeQuery>,
) -> AppResult<Json<Value>> {
    authorize_freeze(&user, q.id)?;
    UserService::freeze(&state.db, q.id).await?;
    Ok(message("success"))
}

pub async fn list(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Query(q): Query<UserListQuery>,
) -> AppResult<Json<UserListResponse>> {
    let page = UserService::list(&state.db, &q).await?;
    Ok(Json(page))
}
