//! Request and response data transfer objects for the HTTP API.
//!
//! Responses carry the wire status in the body: `0` success, `-1` invalid
//! input (e.g. dimension mismatch or id out of range), `-2` internal error.

use serde::{Deserialize, Serialize};

/// Wire code for success.
pub const CODE_OK: i32 = 0;
/// Wire code for invalid input.
pub const CODE_INVALID: i32 = -1;
/// Wire code for internal errors.
pub const CODE_INTERNAL: i32 = -2;

/// Request body for `POST /search`.
#[derive(Debug, Deserialize, Serialize)]
pub struct SearchRequest {
    pub query_vector: Vec<f32>,
    pub k: i32,
    pub ef_search: i32,
}

/// Response body for `POST /search`.
#[derive(Debug, Deserialize, Serialize)]
pub struct SearchResponse {
    pub code: i32,
    pub message: String,
    pub ids: Vec<u32>,
}

impl SearchResponse {
    pub fn ok(ids: Vec<u32>) -> Self {
        Self {
            code: CODE_OK,
            message: String::new(),
            ids,
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            ids: Vec::new(),
        }
    }
}

/// Request body for `POST /insert`.
#[derive(Debug, Deserialize, Serialize)]
pub struct InsertRequest {
    pub vector: Vec<f32>,
    pub id: u32,
}

/// Response body for `POST /insert`.
#[derive(Debug, Deserialize, Serialize)]
pub struct InsertResponse {
    pub code: i32,
}
