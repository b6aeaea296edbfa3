use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{
        StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::{
    application::{
        error::{AppError, ErrorReport},
        render::ClusterPhase,
    },
    domain::options::GenerationOptions,
};

use super::HttpState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PdfRequest {
    pub html: String,
    #[serde(default)]
    pub options: GenerationOptions,
}

pub async fn render_pdf(
    State(state): State<HttpState>,
    payload: Result<Json<PdfRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(rejection.body_text())
        } else {
            AppError::validation(rejection.body_text())
        }
    })?;

    if request.html.trim().is_empty() {
        return Err(AppError::validation("html must not be empty"));
    }

    let pdf = state
        .generator
        .generate_from_template(request.html, request.options)
        .await?;

    Ok((
        [
            (CONTENT_TYPE, "application/pdf"),
            (CONTENT_DISPOSITION, "inline; filename=\"document.pdf\""),
        ],
        pdf,
    )
        .into_response())
}

pub async fn health(State(state): State<HttpState>) -> Response {
    let stats = state.generator.cluster().stats();
    if stats.phase == ClusterPhase::Ready {
        return Json(stats).into_response();
    }

    let status = StatusCode::SERVICE_UNAVAILABLE;
    let mut response = (status, Json(stats)).into_response();
    ErrorReport::from_message(
        "infra::http::health",
        status,
        format!("render cluster is {}", stats.phase.as_str()),
    )
    .attach(&mut response);
    response
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode, header::CONTENT_TYPE},
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::{
        application::{
            generator::PdfGenerator,
            render::{Cluster, ClusterOptions, FontInliner, testing::FakeEngine},
        },
        infra::http::{HttpState, build_router},
    };

    async fn router(initialized: bool) -> Router {
        let engine = FakeEngine::new();
        let fonts = FontInliner::new(Duration::from_secs(5)).expect("font client");
        let options = ClusterOptions {
            max_workers: 1,
            max_concurrent_jobs: 1,
            ..ClusterOptions::default()
        };
        let cluster = Cluster::new(options, engine.launcher(), fonts);
        if initialized {
            cluster.init().await.expect("init");
        }
        build_router(
            HttpState {
                generator: PdfGenerator::new(cluster),
            },
            64 * 1024,
        )
    }

    fn post_json(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/pdf")
            .header(CONTENT_TYPE, "application/json")
            .body(body.into())
            .expect("request")
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes()
            .to_vec()
    }

    #[tokio::test]
    async fn renders_pdf() {
        let payload = json!({ "html": "<p>hello</p>", "options": { "format": "Letter" } });
        let response = router(true)
            .await
            .oneshot(post_json(payload.to_string()))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).expect("content type"),
            "application/pdf"
        );
        assert!(body_bytes(response).await.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let response = router(true)
            .await
            .oneshot(post_json("{ not json"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_html_is_bad_request() {
        let response = router(true)
            .await
            .oneshot(post_json(json!({ "html": "  " }).to_string()))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_length_is_bad_request() {
        let payload = json!({ "html": "<p>x</p>", "options": { "width": "12em" } });
        let response = router(true)
            .await
            .oneshot(post_json(payload.to_string()))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let payload = json!({ "html": "x".repeat(128 * 1024) });
        let response = router(true)
            .await
            .oneshot(post_json(payload.to_string()))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn render_failure_is_generic_500() {
        let response = router(true)
            .await
            .oneshot(post_json(json!({ "html": "FAIL" }).to_string()))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = String::from_utf8(body_bytes(response).await).expect("utf8");
        assert_eq!(body, "PDF generation failed");
    }

    #[tokio::test]
    async fn health_reports_stats() {
        let response = router(true)
            .await
            .oneshot(
                Request::get("/_health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let stats: Value = serde_json::from_slice(&body_bytes(response).await).expect("json");
        assert_eq!(stats["phase"], "ready");
        assert_eq!(stats["workers"], 1);
        assert_eq!(stats["queued"], 0);
    }

    #[tokio::test]
    async fn health_is_unavailable_before_init() {
        let response = router(false)
            .await
            .oneshot(
                Request::get("/_health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
