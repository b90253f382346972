use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::{from_fn_with_state, Next},
    response::Response,
    routing::MethodRouter,
};

use crate::{
    error::AppError,
    models::auth::AuthenticatedUser,
    services::{
        permission,
        token::{self, TokenConfig},
    },
};

/// Access requirements declared for a route when it is registered.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    pub login_required: bool,
    pub permissions: Arc<[String]>,
}

impl RouteGuard {
    pub fn public() -> Self {
        Self {
            login_required: false,
            permissions: Arc::from(Vec::new()),
        }
    }

    pub fn login() -> Self {
        Self {
            login_required: true,
            ..Self::public()
        }
    }

    /// Every listed code must be held by the caller.
    pub fn permissions<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = codes.into_iter().map(Into::into).collect();
        self
    }

    /// Wrap `route` so that [`gate`] runs before its handler.
    pub fn apply<S>(self, route: MethodRouter<S>) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        route.route_layer(from_fn_with_state(self, gate))
    }
}

/// Runs before a guarded handler. Login-required routes get the caller's
/// identity resolved from the bearer token and attached to the request;
/// the declared permissions are then checked against it.
pub async fn gate(
    State(guard): State<RouteGuard>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if guard.login_required {
        let tokens = request
            .extensions()
            .get::<Arc<TokenConfig>>()
            .cloned()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("token configuration missing")))?;
        let user = authenticate(request.headers(), &tokens)?;
        request.extensions_mut().insert(user);
    }

    permission::evaluate(
        request.extensions().get::<AuthenticatedUser>(),
        &*guard.permissions,
    )?;

    Ok(next.run(request).await)
}

/// `Authorization: Bearer <token>`; anything else counts as no credentials.
fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::AuthenticationMissing)?;

    let (scheme, token) = value.split_once(' ').ok_or(AppError::AuthenticationMissing)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AppError::AuthenticationMissing);
    }
    Ok(token)
}

pub fn authenticate(headers: &HeaderMap, tokens: &TokenConfig) -> Result<AuthenticatedUser, AppError> {
    let token = bearer_token(headers)?;
    let claims = token::decode_access_token(token, tokens).map_err(|e| {
        tracing::debug!("access token rejected: {e}");
        AppError::AuthenticationInvalid
    })?;
    Ok(claims.into())
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    /// Only the identity attached by [`gate`] is handed out; routes without
    /// a login guard never see one, whatever header they were sent.
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or(AppError::AuthenticationMissing)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use jsonwebtoken::Algorithm;

    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&headers("Bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
        assert_eq!(bearer_token(&headers("bearer abc")).unwrap(), "abc");
        assert!(matches!(bearer_token(&HeaderMap::new()), Err(AppError::AuthenticationMissing)));
        assert!(matches!(bearer_token(&headers("Basic dXNlcjpwdw==")), Err(AppError::AuthenticationMissing)));
        assert!(matches!(bearer_token(&headers("Bearer")), Err(AppError::AuthenticationMissing)));
        assert!(matches!(bearer_token(&headers("Bearer   ")), Err(AppError::AuthenticationMissing)));
    }

    #[test]
    fn test_authenticate_distinguishes_missing_from_invalid() {
        let cfg = TokenConfig::new("gate-secret", Algorithm::HS256, 60, 60);
        assert!(matches!(authenticate(&HeaderMap::new(), &cfg), Err(AppError::AuthenticationMissing)));
        assert!(matches!(authenticate(&headers("Bearer nope"), &cfg), Err(AppError::AuthenticationInvalid)));
    }

    #[test]
    fn test_guard_builders() {
        let public = RouteGuard::public();
        assert!(!public.login_required && public.permissions.is_empty());

        let guard = RouteGuard::login().permissions(["ccc", "ddd"]);
        assert!(guard.login_required);
        assert_eq!(&*guard.permissions, &["ccc".to_string(), "ddd".to_string()]);
    }
}
