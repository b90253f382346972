use axum::{routing::get, Router};

use crate::{middleware::auth::RouteGuard, models::auth::AuthenticatedUser};

/// Landing route plus two sample routes exercising the guard.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/", get(hello))
        .route("/aaa", RouteGuard::login().permissions(["ddd"]).apply(get(aaa)))
        .route("/bbb", RouteGuard::login().apply(get(bbb)))
}

pub async fn hello() -> &'static str {
    "Hello World!"
}

pub async fn aaa(user: AuthenticatedUser) -> &'static str {
    tracing::debug!(username = %user.username, "aaa");
    "aaa"
}

pub async fn bbb() -> &'static str {
    "bbb"
}
