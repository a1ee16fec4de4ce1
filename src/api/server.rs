use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::api::handler::*;
use crate::api::middleware::verify_internal::verify_internal_ident;
use crate::db::{StoreResult, store_from_env};
use crate::engine::{EngineError, InvalidInput, PointsEngine, RankingLimits};
use crate::util::env::Env;

pub type JsonResult<T> = core::result::Result<Json<T>, RouteError>;

#[derive(Clone, Debug)]
pub struct AppState {
    pub engine: PointsEngine,
    pub internal_token: String,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(engine: PointsEngine, env: &Env) -> Self {
        Self {
            engine,
            internal_token: env.internal_post_token.clone(),
            request_timeout: env.request_timeout(),
        }
    }

    /// Storage backend, ranking limits and route settings, all taken from configuration
    pub async fn from_env(env: &Env) -> StoreResult<Self> {
        let store = store_from_env(env).await?;
        let limits = RankingLimits {
            default_limit: env.leaderboard_limit,
            max_limit: env.leaderboard_max_limit,
        };

        Ok(Self::new(PointsEngine::new(store, limits), env))
    }
}

pub fn router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    // callers are other platform services, never browsers
    let internal_post_routes = Router::new()
        .route("/points/award", post(award_points))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            verify_internal_ident,
        ));

    Router::new()
        .merge(internal_post_routes)
        .route("/health", get(health))
        //
        // rankings
        .route("/leaderboard", get(leaderboard))
        .route("/users/{id}/rank", get(user_rank))
        //
        // per-user points
        .route("/users/{id}/points", get(user_points))
        .route("/users/{id}/history", get(user_history))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let method = req.method();
                let uri = req.uri();

                let matched_path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|matched| matched.as_str());

                tracing::debug_span!("api_request", ?method, ?uri, ?matched_path)
            }),
        )
        .layer(from_fn(log_route_errors))
        .layer(cors)
        .with_state(state)
}

/// Logs the `RouteError` a handler stashed in its response extensions
#[instrument(skip(request, next), fields(uri = request.uri().to_string()))]
async fn log_route_errors(request: Request, next: Next) -> Response {
    let res = next.run(request).await;
    if let Some(err) = res.extensions().get::<Arc<RouteError>>() {
        tracing::error!(error = ?err, "error occurred inside route handler");
    }

    res
}

/// Serves the API until ctrl-c
#[instrument(skip(state, cors))]
pub async fn start_server(
    state: Arc<AppState>,
    cors: CorsLayer,
    port: u16,
) -> std::io::Result<()> {
    let app = router(state, cors);

    let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;

    tracing::info!(
        server_url = &format!("http://127.0.0.1:{}", listener.local_addr()?.port()),
        "server ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = ?e, "unable to listen for shutdown signal");
            }
            tracing::info!("shutting down");
        })
        .await
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Input(#[from] InvalidInput),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

fn input_status(input: &InvalidInput) -> StatusCode {
    match input {
        InvalidInput::UnknownUser(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            message: String,
        }

        let (status, message, err) = match &self {
            RouteError::Input(input) | RouteError::Engine(EngineError::InvalidInput(input)) => {
                // rejected input is the caller's problem, not ours
                (input_status(input), input.to_string(), None)
            }

            RouteError::Engine(EngineError::Storage(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("points storage is unavailable"),
                Some(self),
            ),

            RouteError::Timeout(after) => (
                StatusCode::GATEWAY_TIMEOUT,
                format!("request timed out after {}ms", after.as_millis()),
                Some(self),
            ),
        };

        let mut response = (status, Json(ErrorResponse { message })).into_response();
        if let Some(err) = err {
            response.extensions_mut().insert(Arc::new(err));
        }

        response
    }
}
