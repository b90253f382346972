use crate::{error::AppError, models::auth::AuthenticatedUser};

/// Decides whether `identity` may reach a route declaring `required`.
///
/// Anonymous requests and routes without requirements are allowed: the
/// check only applies once the auth gate has resolved an identity. Every
/// required code must be held; the first missing one rejects the request.
pub fn evaluate<S: AsRef<str>>(
    identity: Option<&AuthenticatedUser>,
    required: &[S],
) -> Result<(), AppError> {
    let Some(user) = identity else {
        return Ok(());
    };

    for code in required {
        let code = code.as_ref();
        if !user.has_permission(code) {
            tracing::debug!(user_id = user.user_id, permission = code, "permission denied");
            return Err(AppError::AuthorizationDenied(format!(
                "missing permission `{code}`"
            )));
        }
    }
    Ok(())
}
