use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::StatusCode;
use http::header::AUTHORIZATION;

use crate::api::server::AppState;
use crate::util::constant_time_cmp;

/// Guards the award route: only other platform services holding the internal token may post
/// points. An unset token locks the route entirely.
pub async fn verify_internal_ident(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let authorized_header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or(StatusCode::BAD_REQUEST)?
        .to_str()
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    if state.internal_token.is_empty() {
        tracing::warn!("award route called but INTERNAL_POST_TOKEN is not configured");
        return Err(StatusCode::UNAUTHORIZED);
    }

    if !constant_time_cmp(authorized_header, &state.internal_token) {
        Err(StatusCode::UNAUTHORIZED)
    } else {
        Ok(next.run(req).await)
    }
}
