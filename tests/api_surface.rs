use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::{Router, routing::get};
use tower::ServiceExt;

use lumen_backend::AuthSubject;
use lumen_backend::features::health::handler::health_check;
use lumen_backend::request_id::request_id_middleware;

fn test_app() -> Router {
    async fn who(auth: AuthSubject) -> String {
        auth.subject
    }

    Router::new()
        .route("/health", get(health_check))
        .route("/who", get(who))
        .layer(axum::middleware::from_fn(request_id_middleware))
}

#[tokio::test]
async fn health_returns_ok_with_generated_request_id() {
    let res = test_app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let rid = res
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(rid.starts_with("req_"), "server should mint an id, got {rid}");
}

#[tokio::test]
async fn client_request_id_is_echoed_back() {
    let res = test_app()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "trace-abc.1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let rid = res
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert_eq!(rid, "trace-abc.1");
}

#[tokio::test]
async fn missing_subject_header_yields_problem_json_401() {
    let res = test_app()
        .oneshot(Request::builder().uri("/who").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let ct = res
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert_eq!(ct, "application/problem+json");
}

#[tokio::test]
async fn verified_subject_is_trusted_as_is() {
    let res = test_app()
        .oneshot(
            Request::builder()
                .uri("/who")
                .header("x-auth-subject", "user_2abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}
