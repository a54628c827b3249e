use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use common::errors::AuthError;

use crate::handlers::ErrorResponse;
use crate::state::AppState;

/// Owner id of the authenticated caller, inserted into request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerId(pub String);

/// Resolve the caller identity from the `Authorization: Bearer` header
#[tracing::instrument(skip(state, req, next))]
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ErrorResponse> {
    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ErrorResponse::from(AuthError::MissingIdentity))?;

    let Some(token) = auth_header.strip_prefix("Bearer ") else {
        tracing::warn!("Invalid authorization header format");
        return Err(AuthError::MissingIdentity.into());
    };

    let owner_id = state.identity.resolve(token.trim())?;
    tracing::debug!(owner_id = %owner_id, "Caller identity resolved");

    req.extensions_mut().insert(OwnerId(owner_id));
    Ok(next.run(req).await)
}
