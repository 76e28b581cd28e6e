//! HTTP request handlers and shared application state.

use axum::extract::State;
use axum::Json;
use std::sync::Arc;
use tracing::warn;
use veloxann_core::{EngineError, VectorEngine};

use crate::api::models::{
    InsertRequest, InsertResponse, SearchRequest, SearchResponse, CODE_INTERNAL, CODE_INVALID,
    CODE_OK,
};

/// Shared application state passed to every handler via Axum's `State`
/// extractor.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<VectorEngine>,
}

fn error_code(err: &EngineError) -> i32 {
    match err {
        EngineError::DimensionMismatch { .. } | EngineError::IdOutOfRange { .. } => CODE_INVALID,
        _ => CODE_INTERNAL,
    }
}

/// `POST /insert` — buffered insert of one (id, vector) pair.
pub async fn insert(
    State(state): State<AppState>,
    Json(request): Json<InsertRequest>,
) -> Json<InsertResponse> {
    match state.engine.insert(&request.vector, request.id) {
        Ok(()) => Json(InsertResponse { code: CODE_OK }),
        Err(err) => {
            warn!(id = request.id, %err, "insert rejected");
            Json(InsertResponse {
                code: error_code(&err),
            })
        }
    }
}

/// `POST /search` — top-k query merged across the write buffers and the graph.
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Json<SearchResponse> {
    if request.k < 0 || request.ef_search < 0 {
        return Json(SearchResponse::error(
            CODE_INVALID,
            "k and ef_search must be non-negative",
        ));
    }
    match state.engine.search(
        &request.query_vector,
        request.k as usize,
        request.ef_search as usize,
    ) {
        Ok(ids) => Json(SearchResponse::ok(ids)),
        Err(err) => {
            warn!(%err, "search rejected");
            Json(SearchResponse::error(error_code(&err), err.to_string()))
        }
    }
}
