//! Session authentication for HTTP handlers.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, header, request::Parts};
use tasklane_common::models::User;

use crate::api::{ApiError, AppState};
use crate::errors::StoreResult;

pub const DEV_USER_NAME: &str = "Local Dev User";
pub const DEV_USER_EMAIL: &str = "dev@localhost";

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn id(&self) -> i64 {
        self.0.id
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Look up the caller from the bearer header, or from `fallback_token` when
/// there is no header. In bypass mode an anonymous caller becomes the local
/// development user.
pub async fn resolve_user(
    state: &AppState,
    headers: &HeaderMap,
    fallback_token: Option<&str>,
) -> StoreResult<Option<User>> {
    let token = bearer_token(headers)
        .or(fallback_token)
        .map(str::to_string);
    if let Some(token) = token {
        let user = state.db.call(move |db| db.user_for_session(&token)).await?;
        if user.is_some() {
            return Ok(user);
        }
    }
    if state.config.auth.bypass {
        let dev = state
            .db
            .call(|db| db.upsert_user(DEV_USER_NAME, DEV_USER_EMAIL, None))
            .await?;
        return Ok(Some(dev));
    }
    Ok(None)
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        match resolve_user(state, &parts.headers, None).await {
            Ok(Some(user)) => Ok(AuthUser(user)),
            Ok(None) => Err(ApiError::Unauthorized),
            Err(e) => {
                tracing::error!(error = %e, "session lookup failed");
                Err(ApiError::Internal("Internal server error".into()))
            }
        }
    }
}
