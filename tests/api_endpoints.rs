//! HTTP surface tests against the real router with mock models

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use common::{data_uri_dimensions, mock_context, png_bytes, png_data_uri};
use http_body_util::BodyExt;
use inpaint_server::{
    backends::{mock::LoadGate, MockModelFactory},
    server,
    types::ModelKind,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "inpaint-test-boundary";

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body, request_id)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_multipart(uri: &str, image: &[u8], content_type: &str, request: &Value) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"input.png\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(image);
    body.extend_from_slice(
        format!(
            "\r\n--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"request\"\r\n\r\n{request}\r\n--{BOUNDARY}--\r\n"
        )
        .as_bytes(),
    );
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn loaded_app(factory: &MockModelFactory) -> Router {
    let ctx = mock_context(factory);
    ctx.load_models().await.unwrap();
    server::router(ctx)
}

#[tokio::test]
async fn test_remove_end_to_end() {
    let factory = MockModelFactory::new();
    let app = loaded_app(&factory).await;

    let request = json!({
        "point_coords": [[100, 75]],
        "point_labels": [1],
        "dilate_kernel_size": 5,
        "image_data": png_data_uri(200, 150),
    });
    let (status, body, request_id) = send(&app, post_json("/api/v1/remove", &request)).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Object removed successfully");
    assert_eq!(
        data_uri_dimensions(body["mask_image"].as_str().unwrap()),
        (200, 150)
    );
    assert_eq!(
        data_uri_dimensions(body["result_image"].as_str().unwrap()),
        (200, 150)
    );
    assert!(body["processing_time"].as_f64().unwrap() > 0.0);
    assert_eq!(body["metadata"]["width"], 200);
    assert_eq!(body["metadata"]["height"], 150);
    assert_eq!(body["metadata"]["dilate_kernel_size"], 5);
    assert_eq!(body["metadata"]["request_id"].as_str(), request_id.as_deref());
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_fill_and_replace_report_prompt() {
    let factory = MockModelFactory::new();
    let app = loaded_app(&factory).await;

    let fill = json!({
        "point_coords": [[32, 32]],
        "point_labels": [1],
        "text_prompt": "  a red <b>ball</b> ",
        "image_data": png_data_uri(64, 64),
    });
    let (status, body, _) = send(&app, post_json("/api/v1/fill", &fill)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["message"], "Object filled successfully");
    assert_eq!(body["metadata"]["text_prompt"], "a red bball/b");

    let replace = json!({
        "point_coords": [[32, 32]],
        "point_labels": [1],
        "text_prompt": "a beach at sunset",
        "image_data": png_data_uri(64, 64),
    });
    let (status, body, _) = send(&app, post_json("/api/v1/replace", &replace)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["message"], "Object replaced successfully");
    assert_eq!(body["metadata"]["num_inference_steps"], 50);
}

#[tokio::test]
async fn test_multipart_upload() {
    let factory = MockModelFactory::new();
    let app = loaded_app(&factory).await;

    let params = json!({"point_coords": [[10, 10]], "point_labels": [1]});
    let request = post_multipart("/api/v1/remove", &png_bytes(48, 32), "image/png", &params);
    let (status, body, _) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(
        data_uri_dimensions(body["mask_image"].as_str().unwrap()),
        (48, 32)
    );
}

#[tokio::test]
async fn test_multipart_rejects_unsupported_type() {
    let factory = MockModelFactory::new();
    let app = loaded_app(&factory).await;

    let params = json!({"point_coords": [[10, 10]], "point_labels": [1]});
    let request = post_multipart("/api/v1/remove", &png_bytes(48, 32), "image/gif", &params);
    let (status, body, _) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "InvalidInput");
    assert_eq!(factory.inference_calls(), 0);
}

#[tokio::test]
async fn test_empty_prompt_makes_no_model_calls() {
    let factory = MockModelFactory::new();
    let app = loaded_app(&factory).await;

    let request = json!({
        "point_coords": [[10, 10]],
        "point_labels": [1],
        "text_prompt": "   ",
        "image_data": png_data_uri(64, 64),
    });
    let (status, body, _) = send(&app, post_json("/api/v1/fill", &request)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], "InvalidInput");
    assert_eq!(factory.inference_calls(), 0);
}

#[tokio::test]
async fn test_missing_image_is_invalid_input() {
    let factory = MockModelFactory::new();
    let app = loaded_app(&factory).await;

    let request = json!({"point_coords": [[10, 10]], "point_labels": [1]});
    let (status, body, _) = send(&app, post_json("/api/v1/remove", &request)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "InvalidInput");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Either image file or image_data must be provided"));
}

#[tokio::test]
async fn test_invalid_points_and_steps() {
    let factory = MockModelFactory::new();
    let app = loaded_app(&factory).await;

    let cases = [
        ("/api/v1/remove", json!({"point_coords": [[10, 10]], "point_labels": [2]})),
        ("/api/v1/remove", json!({"point_coords": [[10, 10], [5, 5]], "point_labels": [1]})),
        ("/api/v1/remove", json!({"point_coords": [[500, 10]], "point_labels": [1]})),
        (
            "/api/v1/remove",
            json!({"point_coords": [[10, 10]], "point_labels": [1], "dilate_kernel_size": -1}),
        ),
        (
            "/api/v1/replace",
            json!({
                "point_coords": [[10, 10]],
                "point_labels": [1],
                "text_prompt": "sky",
                "num_inference_steps": 5,
            }),
        ),
    ];
    for (uri, mut request) in cases {
        request["image_data"] = json!(png_data_uri(64, 64));
        let (status, body, _) = send(&app, post_json(uri, &request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{request}");
        assert_eq!(body["error_code"], "InvalidInput");
    }
    assert_eq!(factory.inference_calls(), 0);
}

#[tokio::test]
async fn test_unloaded_model_is_bad_request() {
    let factory = MockModelFactory::new();
    let ctx = mock_context(&factory);
    ctx.registry().load(ModelKind::Segmenter).await.unwrap();
    let app = server::router(ctx);

    let request = json!({
        "point_coords": [[10, 10]],
        "point_labels": [1],
        "image_data": png_data_uri(64, 64),
    });
    let (status, body, _) = send(&app, post_json("/api/v1/remove", &request)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "ModelNotLoaded");
    assert_eq!(body["message"], "Model not loaded: lama");
    assert_eq!(factory.inference_calls(), 0);

    // Readiness still reports the partial load as unavailable
    let (status, _, _) = send(&app, get("/api/v1/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_model_failure_is_generic_internal_error() {
    let factory = MockModelFactory::new().with_failing_inference(ModelKind::Inpainter);
    let app = loaded_app(&factory).await;

    let request = json!({
        "point_coords": [[10, 10]],
        "point_labels": [1],
        "image_data": png_data_uri(64, 64),
    });
    let (status, body, _) = send(&app, post_json("/api/v1/remove", &request)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error_code"], "InternalError");
    assert_eq!(body["message"], server::INTERNAL_ERROR_MESSAGE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readiness_gating() {
    let gate = LoadGate::new();
    let factory = MockModelFactory::new().with_load_gate(gate.clone());
    let ctx = mock_context(&factory);
    let app = server::router(Arc::clone(&ctx));

    let loading = tokio::spawn({
        let ctx = Arc::clone(&ctx);
        async move { ctx.load_models().await }
    });

    let (status, body, _) = send(&app, get("/api/v1/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);

    let (status, body, _) = send(&app, get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "partial");

    gate.open();
    loading.await.unwrap().unwrap();

    for _ in 0..3 {
        let (status, _, _) = send(&app, get("/api/v1/ready")).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (_, body, _) = send(&app, get("/api/v1/health")).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["models_loaded"]["sam"], true);
    assert_eq!(body["models_loaded"]["stable_diffusion"], true);
    assert_eq!(body["device"], "cpu");
}

#[tokio::test]
async fn test_models_and_metrics() {
    let factory = MockModelFactory::new();
    let ctx = mock_context(&factory);
    ctx.registry().load(ModelKind::Segmenter).await.unwrap();
    let app = server::router(ctx);

    let (status, body, _) = send(&app, get("/api/v1/models")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["models"]["sam"]["loaded"], true);
    assert_eq!(body["models"]["sam"]["model_type"], "vit_h");
    assert_eq!(body["models"]["sam"]["device"], "cpu");
    assert_eq!(body["models"]["lama"]["loaded"], false);
    assert!(body["models"]["lama"]["device"].is_null());
    assert!(body["models"]["lama"]["config_path"].is_string());

    // One counted failure: the inpainter is not loaded
    let request = json!({
        "point_coords": [[10, 10]],
        "point_labels": [1],
        "image_data": png_data_uri(32, 32),
    });
    send(&app, post_json("/api/v1/remove", &request)).await;

    let response = app.clone().oneshot(get("/api/v1/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("inpaint_models_loaded{model=\"sam\"} 1"));
    assert!(text.contains("inpaint_models_loaded{model=\"lama\"} 0"));
    assert!(text.contains("inpaint_requests_total{operation=\"remove\",outcome=\"error\"} 1"));
}

#[tokio::test]
async fn test_root_and_info_outside_prefix() {
    let factory = MockModelFactory::new();
    let app = server::router(mock_context(&factory));

    let (status, body, request_id) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["health"], "/api/v1/health");
    assert!(request_id.is_some());

    let (status, body, _) = send(&app, get("/info")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["environment"], "development");
    assert_eq!(body["endpoints"]["remove"], "/api/v1/remove");

    let (status, _, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
