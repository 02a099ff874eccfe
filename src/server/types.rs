use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::pages;
use crate::errors::SegError;
use crate::report::{BarChart, ScoreTable, TagSummary};

#[derive(Debug, Deserialize, Default)]
pub struct IndexQuery {
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ThresholdForm {
    pub threshold: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SamplesResponse {
    pub split: String,
    pub category: String,
    pub images: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResultImage {
    pub file_name: String,
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub data_base64: String,
}

impl ResultImage {
    pub fn png(file_name: &str, (width, height): (u32, u32), bytes: &[u8]) -> Self {
        Self {
            file_name: file_name.to_string(),
            mime: "image/png".to_string(),
            width,
            height,
            data_base64: STANDARD.encode(bytes),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SegmentResponse {
    pub threshold: u8,
    pub summary: TagSummary,
    pub table: ScoreTable,
    pub chart: BarChart,
    /// Overlay at the model input size.
    pub image: ResultImage,
    /// The same overlay resized for display.
    pub display: ResultImage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Error for the JSON endpoints.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<SegError> for ApiError {
    fn from(err: SegError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else if matches!(err, SegError::Catalog { .. }) {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(status, err.to_string())
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        Self::new(err.status(), err.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Same classification as [`ApiError`], rendered as a page.
#[derive(Debug)]
pub struct PageError(pub ApiError);

impl From<ApiError> for PageError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl From<SegError> for PageError {
    fn from(err: SegError) -> Self {
        Self(err.into())
    }
}

impl From<axum::extract::multipart::MultipartError> for PageError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        (
            self.0.status,
            Html(pages::error_page(self.0.status, &self.0.message)),
        )
            .into_response()
    }
}
