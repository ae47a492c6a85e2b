use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use dataset_ingest::{config::AppConfig, db, routes::routes::app, state::AppState};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

const BOUNDARY: &str = "ingest-test-boundary";
const SALES_CSV: &str = "region,units,closed\nNorth,12,2024-03-01\nSouth,7,2024-03-02\n";

async fn test_app(allow_demo_mode: bool) -> (Router, TempDir) {
    let dir = TempDir::new().unwrap();
    let config = AppConfig {
        storage_dir: dir.path().join("objects").to_string_lossy().into_owned(),
        allow_demo_mode,
        ..AppConfig::default()
    };
    let db = Arc::new(db::connect_in_memory().await.unwrap());
    (app(AppState::new(config, db)), dir)
}

fn multipart_body(file_name: &str, content_type: &str, contents: &str, name: Option<&str>) -> String {
    let mut body = String::new();
    if let Some(name) = name {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\n{name}\r\n"
        ));
    }
    body.push_str(&format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
         Content-Type: {content_type}\r\n\r\n{contents}\r\n--{BOUNDARY}--\r\n"
    ));
    body
}

fn upload_request(user: Option<Uuid>, body: String) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/datasets")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    builder.body(Body::from(body)).unwrap()
}

fn get(uri: &str, user: Option<Uuid>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_and_readyz() {
    let (app, _dir) = test_app(false).await;

    let response = app.clone().oneshot(get("/healthz", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/readyz", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["metadata"]["ok"], true);
    assert_eq!(body["checks"]["disk"]["ok"], true);
}

#[tokio::test]
async fn upload_then_browse() {
    let (app, _dir) = test_app(false).await;
    let user = Uuid::new_v4();

    let response = app
        .clone()
        .oneshot(upload_request(
            Some(user),
            multipart_body("sales.csv", "text/csv", SALES_CSV, Some("March sales")),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    assert_eq!(created["dataset"]["name"], "March sales");
    assert_eq!(created["dataset"]["row_count"], 2);
    assert_eq!(created["dataset"]["schema"]["units"], "number");
    assert_eq!(created["dataset"]["schema"]["closed"], "date");
    assert_eq!(created["preview_origin"], "stored");
    let dataset_id = created["dataset"]["id"].as_str().unwrap().to_string();
    let handle = created["preview_handle"].as_str().unwrap().to_string();
    let storage_path = created["dataset"]["storage_path"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(get(&format!("/previews/{handle}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let preview = json_body(response).await;
    assert_eq!(preview["rows"][0]["region"], "North");

    let response = app.clone().oneshot(get("/datasets", Some(user))).await.unwrap();
    let listed = json_body(response).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let response = app
        .clone()
        .oneshot(get(&format!("/datasets/{dataset_id}"), Some(user)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get(&format!("/datasets/{dataset_id}"), Some(Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(get("/uploads/last", Some(user)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let last = json_body(response).await;
    assert_eq!(last["last_upload"]["dataset_id"], dataset_id.as_str());

    let response = app
        .oneshot(get(&format!("/storage/datasets/{storage_path}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], SALES_CSV.as_bytes());
}

#[tokio::test]
async fn missing_user_is_rejected_unless_demo_mode() {
    let (app, _dir) = test_app(false).await;
    let response = app
        .oneshot(upload_request(
            None,
            multipart_body("sales.csv", "text/csv", SALES_CSV, None),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (app, _dir) = test_app(true).await;
    let response = app
        .oneshot(upload_request(
            None,
            multipart_body("sales.csv", "text/csv", SALES_CSV, None),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn malformed_user_id_is_rejected() {
    let (app, _dir) = test_app(false).await;
    let request = Request::builder()
        .uri("/datasets")
        .header("x-user-id", "alice")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["code"], "invalid-principal");
}

#[tokio::test]
async fn wrong_file_type_reports_code() {
    let (app, _dir) = test_app(false).await;
    let response = app
        .oneshot(upload_request(
            Some(Uuid::new_v4()),
            multipart_body("notes.txt", "text/plain", "just words", None),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body = json_body(response).await;
    assert_eq!(body["code"], "invalid-type");
}

#[tokio::test]
async fn upload_without_file_field_is_a_bad_request() {
    let (app, _dir) = test_app(false).await;
    let body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nEmpty\r\n--{BOUNDARY}--\r\n"
    );
    let response = app
        .oneshot(upload_request(Some(Uuid::new_v4()), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_preview_is_not_found() {
    let (app, _dir) = test_app(false).await;
    let response = app
        .oneshot(get("/previews/preview_missing", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
