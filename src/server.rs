//! HTTP surface of the proxy.
//!
//! | Route                 | Body                        |
//! |-----------------------|-----------------------------|
//! | `GET /`               | identity text               |
//! | `GET /onibus_bruto`   | raw records, newest first   |
//! | `GET /onibus_tratado` | normalized moving vehicles  |
//!
//! Collection failures answer 500 with `{"erro": "Falha na coleta: ..."}`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::collector::FeedCollector;
use crate::error::CollectError;
use crate::fetch::HttpClient;
use crate::record::{RawRecord, RenderedRecord};

pub const IDENTITY: &str = "API - Coleta de ônibus RJ 🚍";

/// A failed collection, rendered as the 500 error envelope.
#[derive(Debug)]
pub struct ApiError(CollectError);

impl From<CollectError> for ApiError {
    fn from(err: CollectError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "Collection failed");
        let body = json!({ "erro": format!("Falha na coleta: {}", self.0) });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

/// Builds the router around a shared collector.
pub fn router<C>(collector: Arc<FeedCollector<C>>) -> Router
where
    C: HttpClient + 'static,
{
    Router::new()
        .route("/", get(home))
        .route("/onibus_bruto", get(onibus_bruto::<C>))
        .route("/onibus_tratado", get(onibus_tratado::<C>))
        .layer(TraceLayer::new_for_http())
        .with_state(collector)
}

async fn home() -> &'static str {
    IDENTITY
}

async fn onibus_bruto<C: HttpClient>(
    State(collector): State<Arc<FeedCollector<C>>>,
) -> Result<Json<Vec<RawRecord>>, ApiError> {
    Ok(Json(collector.collect_raw().await?))
}

async fn onibus_tratado<C: HttpClient>(
    State(collector): State<Arc<FeedCollector<C>>>,
) -> Result<Json<Vec<RenderedRecord>>, ApiError> {
    Ok(Json(collector.collect_normalized().await?))
}
