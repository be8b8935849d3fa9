//! Extractors whose rejections use the API error body

use axum::extract::FromRequest;

use crate::error::ApiError;

/// `axum::Json` that answers a missing content type, broken JSON or a wrong shape with
/// a 400 `invalid_input` body instead of axum's plain-text rejection
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);
