use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::config::AuthConfig;
use crate::models::Role;
use crate::utils::ApiError;

#[derive(Clone)]
pub struct AuthState {
    pub auth: AuthConfig,
}

/// Authenticated caller context inserted into request extensions
#[derive(Clone, Debug, serde::Serialize)]
pub struct AuthedCaller {
    pub role: Role,
    pub auth_method: &'static str,
}

/// Authentication middleware.
/// 1. Accept either "X-API-Key: <key>" or "Authorization: Bearer <key>"
/// 2. Resolve the key to a role (admin / analyst / public)
/// 3. With no admin key configured, run in development mode: every caller
///    is accepted as admin
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let uri = req.uri().path().to_string();
    let method = req.method().to_string();

    let api_key = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let presented = api_key.as_deref().or(bearer.as_deref());
    let auth_method = if api_key.is_some() {
        "api_key"
    } else if bearer.is_some() {
        "bearer"
    } else {
        "none"
    };

    let caller = match resolve_role(&state.auth, presented) {
        Some(role) => AuthedCaller { role, auth_method },
        None => {
            tracing::warn!("Rejected unauthenticated request: {} {}", method, uri);
            return Err(ApiError::unauthorized(
                "Invalid or missing admin API key. Provide X-API-Key header or Bearer token.",
            ));
        },
    };

    tracing::debug!(
        "Authenticated {} caller via {} for {} {}",
        caller.role.as_str(),
        caller.auth_method,
        method,
        uri
    );

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

/// Map a presented key to a role. No configured admin key means
/// development mode: everyone is admin.
fn resolve_role(auth: &AuthConfig, presented: Option<&str>) -> Option<Role> {
    let Some(admin_key) = auth.admin_api_key.as_deref() else {
        return Some(Role::Admin);
    };

    let presented = presented?;
    if presented == admin_key {
        return Some(Role::Admin);
    }
    if auth.analyst_api_key.as_deref() == Some(presented) {
        return Some(Role::Analyst);
    }
    if auth.public_api_key.as_deref() == Some(presented) {
        return Some(Role::Public);
    }
    None
}
