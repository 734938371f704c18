//! Request handlers

use super::{
    error::ApiError,
    extract::{ImageRequest, OperationParams},
    responses::{HealthResponse, InpaintResponse, ModelStatus, ModelStatusResponse},
    RequestId,
};
use crate::{
    context::AppContext,
    error::{InpaintError, Result},
    processor::{Operation, PipelineRequest},
    services::ImageCodec,
    types::{ModelKind, OperationResult},
    utils::validation::PromptValidator,
};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use serde_json::json;
use std::{collections::BTreeMap, sync::Arc, time::Instant};
use tracing::{info, Instrument};

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Remove,
    Fill,
    Replace,
}

impl Endpoint {
    fn name(self) -> &'static str {
        match self {
            Self::Remove => "remove",
            Self::Fill => "fill",
            Self::Replace => "replace",
        }
    }

    fn success_message(self) -> &'static str {
        match self {
            Self::Remove => "Object removed successfully",
            Self::Fill => "Object filled successfully",
            Self::Replace => "Object replaced successfully",
        }
    }
}

pub(super) async fn remove(
    State(ctx): State<Arc<AppContext>>,
    Extension(request_id): Extension<RequestId>,
    request: ApiResult<ImageRequest>,
) -> ApiResult<Json<InpaintResponse>> {
    run_endpoint(&ctx, Endpoint::Remove, request_id, request).await
}

pub(super) async fn fill(
    State(ctx): State<Arc<AppContext>>,
    Extension(request_id): Extension<RequestId>,
    request: ApiResult<ImageRequest>,
) -> ApiResult<Json<InpaintResponse>> {
    run_endpoint(&ctx, Endpoint::Fill, request_id, request).await
}

pub(super) async fn replace(
    State(ctx): State<Arc<AppContext>>,
    Extension(request_id): Extension<RequestId>,
    request: ApiResult<ImageRequest>,
) -> ApiResult<Json<InpaintResponse>> {
    run_endpoint(&ctx, Endpoint::Replace, request_id, request).await
}

/// Shared body of the three pipeline endpoints; every outcome is counted
async fn run_endpoint(
    ctx: &AppContext,
    endpoint: Endpoint,
    request_id: RequestId,
    request: ApiResult<ImageRequest>,
) -> ApiResult<Json<InpaintResponse>> {
    let span = tracing::info_span!("pipeline_request", endpoint = endpoint.name(), %request_id);
    let outcome = match request {
        Ok(request) => handle_pipeline(ctx, endpoint, request_id, request)
            .instrument(span)
            .await
            .map_err(ApiError::from),
        Err(rejection) => Err(rejection),
    };
    ctx.metrics().record_request(endpoint.name(), outcome.is_ok());
    outcome.map(Json)
}

async fn handle_pipeline(
    ctx: &AppContext,
    endpoint: Endpoint,
    request_id: RequestId,
    request: ImageRequest,
) -> Result<InpaintResponse> {
    let started = Instant::now();
    let ImageRequest { source, params } = request;

    // Everything checkable without the image is rejected before decoding
    PromptValidator::check_structure(&params.point_coords, &params.point_labels)?;
    let operation = operation_for(endpoint, &params)?;
    let kernel = PromptValidator::validate_dilate_kernel(params.dilate_kernel_size)?;

    let codec = *ctx.codec();
    info!(source = %source.describe(), "Decoding input image");
    let image = blocking(move || codec.decode(&source)).await?;
    let (width, height) = image.dimensions();

    let OperationParams {
        point_coords,
        point_labels,
        dilate_kernel_size,
        text_prompt: _,
        num_inference_steps: _,
        image_data: _,
    } = params;
    let mut metadata = json!({
        "point_coords": point_coords,
        "point_labels": point_labels,
        "dilate_kernel_size": dilate_kernel_size,
        "width": width,
        "height": height,
        "request_id": request_id.to_string(),
    });
    match &operation {
        Operation::Remove => {},
        Operation::Fill { prompt } => {
            metadata["text_prompt"] = json!(prompt.as_str());
        },
        Operation::Replace { prompt, steps } => {
            metadata["text_prompt"] = json!(prompt.as_str());
            metadata["num_inference_steps"] = json!(steps);
        },
    }

    let outcome = ctx
        .processor()
        .process(PipelineRequest {
            image,
            point_coords,
            point_labels,
            dilate_kernel_size: kernel,
            operation,
        })
        .await?;
    metadata["selected_mask_index"] = json!(outcome.selected_index);
    metadata["selected_mask_score"] = json!(outcome.selected_score);
    metadata["timings"] = json!(outcome.timings);

    let (result_image, mask_image) = blocking(move || encode_outcome(&outcome)).await?;
    let processing_time = started.elapsed().as_secs_f64();
    info!(processing_time, "{} completed", endpoint.name());

    Ok(InpaintResponse {
        success: true,
        message: endpoint.success_message().to_string(),
        timestamp: Utc::now(),
        result_image,
        mask_image,
        processing_time,
        metadata,
    })
}

fn operation_for(endpoint: Endpoint, params: &OperationParams) -> Result<Operation> {
    let prompt = || {
        let raw = params
            .text_prompt
            .as_deref()
            .ok_or_else(|| InpaintError::invalid_input("text_prompt is required"))?;
        PromptValidator::validate_text_prompt(raw)
    };
    Ok(match endpoint {
        Endpoint::Remove => Operation::Remove,
        Endpoint::Fill => Operation::Fill { prompt: prompt()? },
        Endpoint::Replace => Operation::Replace {
            prompt: prompt()?,
            steps: PromptValidator::validate_inference_steps(params.num_inference_steps)?,
        },
    })
}

fn encode_outcome(outcome: &OperationResult) -> Result<(String, String)> {
    Ok((
        ImageCodec::encode_image(&outcome.result)?,
        ImageCodec::encode_mask(&outcome.mask)?,
    ))
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| InpaintError::internal(format!("image task failed: {e}")))?
}

fn health_response(ctx: &AppContext, status: &'static str, message: &str) -> HealthResponse {
    let registry = ctx.registry();
    HealthResponse {
        success: true,
        message: message.to_string(),
        timestamp: Utc::now(),
        status,
        models_loaded: registry.loaded_flags(),
        device: registry.device().to_string(),
        memory_usage: registry.memory_usage(),
        uptime: ctx.uptime().as_secs_f64(),
    }
}

pub(super) async fn health(State(ctx): State<Arc<AppContext>>) -> Json<HealthResponse> {
    let (status, message) = if ctx.registry().is_ready() {
        ("healthy", "Service is healthy")
    } else {
        ("partial", "Service is running, some models are not loaded")
    };
    Json(health_response(&ctx, status, message))
}

pub(super) async fn ready(State(ctx): State<Arc<AppContext>>) -> ApiResult<Json<HealthResponse>> {
    if !ctx.registry().is_ready() {
        return Err(ApiError::not_ready());
    }
    Ok(Json(health_response(&ctx, "ready", "Service is ready")))
}

pub(super) async fn models(State(ctx): State<Arc<AppContext>>) -> Json<ModelStatusResponse> {
    let registry = ctx.registry();
    let device = registry.device().to_string();
    let models: BTreeMap<_, _> = ModelKind::ALL
        .into_iter()
        .map(|kind| {
            let loaded = registry.is_loaded(kind);
            let status = ModelStatus {
                loaded,
                descriptor: registry.describe(kind),
                device: loaded.then(|| device.clone()),
            };
            (kind.as_str(), status)
        })
        .collect();

    Json(ModelStatusResponse {
        success: true,
        message: "Model status retrieved".to_string(),
        timestamp: Utc::now(),
        models,
    })
}

pub(super) async fn metrics(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        ctx.render_metrics(),
    )
}

pub(super) async fn root(State(ctx): State<Arc<AppContext>>) -> Json<serde_json::Value> {
    let prefix = &ctx.config().api_prefix;
    Json(json!({
        "message": "Inpaint Anything API",
        "version": env!("CARGO_PKG_VERSION"),
        "health": format!("{prefix}/health"),
    }))
}

pub(super) async fn info(State(ctx): State<Arc<AppContext>>) -> Json<serde_json::Value> {
    let config = ctx.config();
    let prefix = &config.api_prefix;
    Json(json!({
        "title": "Inpaint Anything API",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": config.environment.to_string(),
        "device": ctx.registry().device().to_string(),
        "models": {
            "sam_model_type": config.models.segmenter_model_type,
            "sd_model_name": config.models.diffusion_model,
        },
        "endpoints": {
            "health": format!("{prefix}/health"),
            "ready": format!("{prefix}/ready"),
            "models": format!("{prefix}/models"),
            "metrics": format!("{prefix}/metrics"),
            "remove": format!("{prefix}/remove"),
            "fill": format!("{prefix}/fill"),
            "replace": format!("{prefix}/replace"),
        },
    }))
}
