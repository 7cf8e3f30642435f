//! API Routes
//!
//! Command and query ingress: POST endpoints accepting `{type, payload}` /
//! `{type, params}` envelopes, answering `{success: true, data}` or
//! `{success: false, error: {message, kind}}`.

use axum::{extract::State, routing::post, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::OperationContext;
use crate::error::AppError;
use crate::handlers::dispatch_command;
use crate::queries::dispatch_query;

use super::AppState;

/// `{type, payload}` command envelope
#[derive(Debug, Deserialize)]
pub struct CommandEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

/// `{type, params}` query envelope
#[derive(Debug, Deserialize)]
pub struct QueryEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: Value,
}

/// `{success: true, data}` response envelope
#[derive(Debug, Serialize)]
pub struct SuccessEnvelope {
    pub success: bool,
    pub data: Value,
}

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/commands", post(execute_command))
        .route("/queries", post(execute_query))
}

/// Execute a command selected by the envelope's `type`
async fn execute_command(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(envelope): Json<CommandEnvelope>,
) -> Result<Json<SuccessEnvelope>, AppError> {
    let data = dispatch_command(&state, &context, &envelope.kind, envelope.payload).await?;
    Ok(Json(SuccessEnvelope {
        success: true,
        data,
    }))
}

/// Execute a view query selected by the envelope's `type`. Empty result
/// lists are a success.
async fn execute_query(
    State(state): State<AppState>,
    Extension(_context): Extension<OperationContext>,
    Json(envelope): Json<QueryEnvelope>,
) -> Result<Json<SuccessEnvelope>, AppError> {
    let data = dispatch_query(&state, &envelope.kind, envelope.params).await?;
    Ok(Json(SuccessEnvelope {
        success: true,
        data,
    }))
}
