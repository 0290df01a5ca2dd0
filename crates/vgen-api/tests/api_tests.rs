//! API integration tests over the in-process fakes.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use vgen_api::{create_router, ApiConfig, AppState};
use vgen_models::RemoteTaskStatus;
use vgen_worker::test_support::{test_config, test_service, FakeObjectStore, FakeProvider};

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDRpixels";

fn create_test_router(
    dir: &std::path::Path,
    provider: Arc<FakeProvider>,
    store: Option<Arc<FakeObjectStore>>,
) -> Router {
    let service = test_service(test_config(dir), provider, store);
    create_router(AppState::new(ApiConfig::default(), service), None)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Test health endpoint.
#[tokio::test]
async fn test_health_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_router(dir.path(), Arc::new(FakeProvider::new()), None);

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert!(response.headers().contains_key("x-request-id"));
}

/// Without FFmpeg the service is not ready; missing storage alone is fine.
#[tokio::test]
async fn test_ready_reports_missing_ffmpeg() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_router(dir.path(), Arc::new(FakeProvider::new()), None);

    let response = app.oneshot(get("/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = body_json(response).await;
    assert_eq!(body["checks"]["storage"]["status"], "disabled");
    assert_eq!(body["checks"]["ffmpeg"]["status"], "error");
}

#[tokio::test]
async fn test_generate_then_poll_to_success() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(FakeProvider::new());
    let app = create_test_router(dir.path(), provider.clone(), None);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/video/generate",
            json!({"mode": "t2v", "prompt": "a paper boat in the rain", "duration": 5}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = body_json(response).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    assert!(job_id.starts_with("job_"));
    assert_eq!(body["status"], "RUNNING");
    assert_eq!(body["task_ids"], json!(["fake-task-0"]));
    assert_eq!(body["segment_durations"], json!([5]));

    let mut view = Value::Null;
    for _ in 0..200 {
        let response = app
            .clone()
            .oneshot(get(&format!("/api/video/job/{}", job_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        view = body_json(response).await;
        if view["status"] == "SUCCEEDED" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(view["status"], "SUCCEEDED");
    assert_eq!(view["segment_count"], 1);
    let video_url = view["video_url"].as_str().unwrap().to_string();
    assert_eq!(video_url, format!("/media/videos/{}.mp4", job_id));
    assert_eq!(view["file_size"], "[fake-task-0]".len());

    // Single-segment videos are served like merged ones.
    let response = app.oneshot(get(&video_url)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"[fake-task-0]");
}

#[tokio::test]
async fn test_generate_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(FakeProvider::new());
    let app = create_test_router(dir.path(), provider.clone(), None);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/video/generate",
            json!({"mode": "i2v", "prompt": "no image given", "duration": 5}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("image_url"));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/video/generate")
                .header("Content-Type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(provider.create_calls(), 0);
}

#[tokio::test]
async fn test_provider_rejection_is_bad_gateway_with_job_id() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(FakeProvider::new().reject_create(0, "prompt blocked"));
    let app = create_test_router(dir.path(), provider, None);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/video/generate",
            json!({"mode": "t2v", "prompt": "something blocked", "duration": 5}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let body = body_json(response).await;
    assert_eq!(body["code"], "provider_rejection");
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let view = body_json(
        app.oneshot(get(&format!("/api/video/job/{}", job_id)))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(view["status"], "FAILED");
    assert_eq!(view["error_kind"], "provider_rejection");
}

#[tokio::test]
async fn test_job_lookup_errors() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_router(dir.path(), Arc::new(FakeProvider::new()), None);

    let response = app.clone().oneshot(get("/api/video/job/bogus")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(get("/api/video/job/job_0123456789abcdef0123456789abcdef"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn test_list_jobs_by_project() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(FakeProvider::new().with_default_script(vec![RemoteTaskStatus::Running]));
    let app = create_test_router(dir.path(), provider, None);

    for project in [1, 1, 2] {
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/video/generate",
                json!({"mode": "t2v", "prompt": "clouds", "duration": 5, "project_id": project}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let body = body_json(
        app.clone()
            .oneshot(get("/api/video/jobs?project_id=1&limit=1"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["jobs"].as_array().unwrap().len(), 1);
    assert_eq!(body["jobs"][0]["project_id"], 1);

    let response = app.oneshot(get("/api/video/jobs?limit=lots")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_image_falls_back_to_local() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_router(dir.path(), Arc::new(FakeProvider::new()), None);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/video/upload-image?filename=cat.png")
                .header("Content-Type", "image/png")
                .body(Body::from(PNG))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["method"], "inline_encoded");
    assert_eq!(body["degraded"], true);
    let image_url = body["image_url"].as_str().unwrap().to_string();
    assert!(image_url.starts_with("/media/images/"));

    // The staged file is served back.
    let response = app.oneshot(get(&image_url)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_upload_image_to_object_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FakeObjectStore::new());
    let app = create_test_router(dir.path(), Arc::new(FakeProvider::new()), Some(store.clone()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/video/upload-image?filename=cat.png")
                .header("Content-Type", "image/png")
                .body(Body::from(PNG))
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["method"], "object_storage");
    assert_eq!(body["degraded"], false);
    assert_eq!(store.put_calls(), 1);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/video/upload-image")
                .header("Content-Type", "text/plain")
                .body(Body::from("hello"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

/// Test rate limiting on submissions.
#[tokio::test]
async fn test_submit_rate_limiting() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(FakeProvider::new().with_default_script(vec![RemoteTaskStatus::Running]));
    let app = create_test_router(dir.path(), provider, None);

    let mut limited = false;
    for _ in 0..10 {
        let request = Request::builder()
            .method("POST")
            .uri("/api/video/generate")
            .header("Content-Type", "application/json")
            .header("X-Forwarded-For", "192.168.1.100")
            .body(Body::from(
                json!({"mode": "t2v", "prompt": "fast", "duration": 5}).to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after: u64 = response.headers()["retry-after"]
                .to_str()
                .unwrap()
                .parse()
                .unwrap();
            assert!(retry_after >= 1);
            assert!(body_json(response).await["detail"].is_string());
            limited = true;
            break;
        }
    }
    assert!(limited);
}
