//! Request extraction for the pipeline endpoints
//!
//! A request carries its image either as a multipart upload or as a base64
//! string in a JSON body. [`ImageRequest`] resolves that once, so handlers
//! only ever see an [`ImageSource`] and the parsed parameters.

use super::error::ApiError;
use crate::{error::InpaintError, services::ImageSource};
use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request},
    http::header::CONTENT_TYPE,
};
use serde::Deserialize;

/// Parameters shared by remove, fill and replace
///
/// Numeric fields stay wide and signed here so range errors come from the
/// validator with a precise message instead of a serde failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationParams {
    #[serde(default)]
    pub point_coords: Vec<Vec<f64>>,
    #[serde(default)]
    pub point_labels: Vec<i64>,
    #[serde(default)]
    pub dilate_kernel_size: Option<i64>,
    #[serde(default)]
    pub text_prompt: Option<String>,
    #[serde(default)]
    pub num_inference_steps: Option<i64>,
    /// Raw base64 or data URI
    #[serde(default)]
    pub image_data: Option<String>,
}

/// Image plus parameters of one pipeline request
#[derive(Debug)]
pub struct ImageRequest {
    pub source: ImageSource,
    pub params: OperationParams,
}

impl ImageRequest {
    /// Enforce exactly one image source
    fn resolve(upload: Option<ImageSource>, mut params: OperationParams) -> Result<Self, ApiError> {
        let encoded = params.image_data.take().filter(|s| !s.trim().is_empty());
        let source = match (upload, encoded) {
            (Some(upload), None) => upload,
            (None, Some(text)) => ImageSource::Base64(text),
            (None, None) => {
                return Err(invalid("Either image file or image_data must be provided"));
            },
            (Some(_), Some(_)) => {
                return Err(invalid("Provide either an image file or image_data, not both"));
            },
        };
        Ok(Self { source, params })
    }

    async fn from_multipart(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut upload = None;
        let mut params: Option<OperationParams> = None;
        let mut image_data = None;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| invalid(format!("Malformed multipart body: {e}")))?
        {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some("image") => {
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| invalid(format!("Failed to read image upload: {e}")))?;
                    if !bytes.is_empty() {
                        upload = Some(ImageSource::Upload {
                            bytes: bytes.to_vec(),
                            content_type,
                        });
                    }
                },
                Some("request") => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| invalid(format!("Failed to read request field: {e}")))?;
                    params = Some(parse_params(text.as_bytes())?);
                },
                Some("image_data") => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| invalid(format!("Failed to read image_data field: {e}")))?;
                    image_data = Some(text);
                },
                other => {
                    tracing::debug!(field = ?other, "Ignoring unknown multipart field");
                },
            }
        }

        let mut params = params.ok_or_else(|| invalid("Request data is required"))?;
        if image_data.is_some() {
            params.image_data = image_data;
        }
        Self::resolve(upload, params)
    }

    fn from_json(body: &[u8]) -> Result<Self, ApiError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(invalid("Either image file or image_data must be provided"));
        }
        Self::resolve(None, parse_params(body)?)
    }
}

#[axum::async_trait]
impl<S> FromRequest<S> for ImageRequest
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| invalid(format!("Malformed multipart body: {}", e.body_text())))?;
            return Self::from_multipart(multipart).await;
        }

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| invalid(format!("Failed to read request body: {}", e.body_text())))?;
        Self::from_json(&body)
    }
}

fn parse_params(bytes: &[u8]) -> Result<OperationParams, ApiError> {
    serde_json::from_slice(bytes).map_err(|e| invalid(format!("Invalid request body: {e}")))
}

fn invalid(message: impl Into<String>) -> ApiError {
    InpaintError::invalid_input(message).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn params_with_data(data: Option<&str>) -> OperationParams {
        OperationParams {
            point_coords: vec![vec![1.0, 2.0]],
            point_labels: vec![1],
            image_data: data.map(str::to_string),
            ..OperationParams::default()
        }
    }

    fn upload() -> ImageSource {
        ImageSource::Upload {
            bytes: vec![1, 2, 3],
            content_type: Some("image/png".to_string()),
        }
    }

    #[test]
    fn test_exactly_one_source() {
        let req = ImageRequest::resolve(None, params_with_data(Some("abc"))).unwrap();
        assert_eq!(req.source, ImageSource::Base64("abc".to_string()));
        assert!(req.params.image_data.is_none());

        let req = ImageRequest::resolve(Some(upload()), params_with_data(None)).unwrap();
        assert!(matches!(req.source, ImageSource::Upload { .. }));

        let err = ImageRequest::resolve(None, params_with_data(None)).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.message().contains("Either image file or image_data"));

        let err =
            ImageRequest::resolve(Some(upload()), params_with_data(Some("abc"))).unwrap_err();
        assert!(err.message().contains("not both"));
    }

    #[test]
    fn test_blank_image_data_counts_as_missing() {
        let err = ImageRequest::resolve(None, params_with_data(Some("   "))).unwrap_err();
        assert_eq!(err.error_code(), "InvalidInput");
    }

    #[test]
    fn test_json_body() {
        let body = br#"{
            "point_coords": [[10, 20]],
            "point_labels": [1],
            "dilate_kernel_size": 5,
            "image_data": "xyz"
        }"#;
        let req = ImageRequest::from_json(body).unwrap();
        assert_eq!(req.params.point_coords, vec![vec![10.0, 20.0]]);
        assert_eq!(req.params.dilate_kernel_size, Some(5));

        let err = ImageRequest::from_json(b"").unwrap_err();
        assert_eq!(err.error_code(), "InvalidInput");

        let err = ImageRequest::from_json(b"{not json").unwrap_err();
        assert!(err.message().contains("Invalid request body"));
    }
}
