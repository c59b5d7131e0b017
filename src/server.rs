use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AskError;
use crate::models::{AnswerResult, AskRequest};
use crate::pipeline::AnswerService;

#[derive(Clone)]
struct AppState {
    answers: AnswerService,
}

pub fn router(answers: AnswerService) -> Router {
    Router::new()
        .route("/api/ask", post(ask_handler))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { answers })
}

pub async fn run_server(config: AppConfig, answers: AnswerService) -> Result<()> {
    let app = router(answers);

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ask_handler(
    State(state): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AnswerResult>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        ApiError::from(AskError::Validation(rejection.body_text()))
    })?;

    let answer = state.answers.answer(request).await?;
    Ok(Json(answer))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<AskError> for ApiError {
    fn from(value: AskError) -> Self {
        Self {
            status: StatusCode::from_u16(value.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: value.user_message(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "message": self.message });
        (self.status, Json(body)).into_response()
    }
}
