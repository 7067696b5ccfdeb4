// SPDX-License-Identifier: GPL-3.0-or-later
pub mod handlers;
pub mod middleware;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use handlers::events::{publish_event, EventAck, __path_publish_event};
use handlers::orchestrator::{
    get_settings, list_processing, list_runs, put_settings, ProcessingEntryResponse,
    RuleReportResponse, RunSummaryResponse, SettingsDocument, __path_get_settings,
    __path_list_processing, __path_list_runs, __path_put_settings,
};
use handlers::ErrorResponse;
use middleware::auth::api_key_middleware;
use multiversion_application::AppState;
use serde::Serialize;
use tracing::info;
use utoipa::OpenApi;

#[derive(Serialize, utoipa::ToSchema)]
struct HealthResponse {
    status: &'static str,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        publish_event,
        list_processing,
        list_runs,
        get_settings,
        put_settings,
    ),
    components(
        schemas(
            HealthResponse,
            EventAck,
            ProcessingEntryResponse,
            RuleReportResponse,
            RunSummaryResponse,
            SettingsDocument,
            ErrorResponse,
        )
    ),
    tags(
        (name = "system", description = "System health and status endpoints"),
        (name = "events", description = "Host event ingestion"),
        (name = "orchestrator", description = "Multi-version orchestrator state and settings")
    ),
    info(
        title = "MultiVersion API",
        version = "0.1.0",
        description = "Fetches additional versions of subscribed media after a subscription download",
    )
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn router(state: AppState) -> Router {
    info!(target: "api", "building router");

    let api_v1 = Router::new()
        .route("/events", post(publish_event))
        .route("/processing", get(list_processing))
        .route("/runs", get(list_runs))
        .route("/settings", get(get_settings).put(put_settings))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            api_key_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/api-doc/openapi.json", get(openapi_json))
        .nest("/api/v1", api_v1)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use indexmap::IndexMap;
    use multiversion_application::test_support::{
        arrival, download_added, FakeDownloadService, FakeSearchService,
        InMemoryDownloadHistory, ManualScheduler,
    };
    use multiversion_application::{
        AcquisitionRunner, DelayScheduler, InMemoryEventBus, Orchestrator, ProcessingRegistry,
        RecentRuns,
    };
    use multiversion_config::AppConfig;
    use multiversion_domain::{Candidate, OrchestratorSettings};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        scheduler: Arc<ManualScheduler>,
        state: AppState,
    }

    fn app_with(config: AppConfig) -> TestApp {
        let mut selected_rules = IndexMap::new();
        selected_rules.insert("4K".to_string(), true);
        selected_rules.insert("1080p".to_string(), true);
        let settings = OrchestratorSettings {
            enabled: true,
            selected_rules,
            delay_seconds: 1.0,
            ..Default::default()
        };

        let runs = RecentRuns::new(10);
        let runner = AcquisitionRunner::new(
            Arc::new(
                FakeSearchService::new()
                    .with_results("4K", vec![Candidate::new("Arrival 2160p").with_hash("a")])
                    .with_results("1080p", Vec::new()),
            ),
            Arc::new(FakeDownloadService::new()),
            Arc::new(InMemoryDownloadHistory::new()),
        )
        .with_reporter(Arc::new(runs.clone()));
        let scheduler = Arc::new(ManualScheduler::new());
        let orchestrator = Arc::new(Orchestrator::new(
            settings,
            ProcessingRegistry::new(),
            Arc::new(runner),
            scheduler.clone(),
        ));
        let bus = InMemoryEventBus::new();
        orchestrator.start(Arc::new(bus.clone()));

        let state = AppState::new(config, orchestrator, bus, runs);
        TestApp {
            router: router(state.clone()),
            scheduler,
            state,
        }
    }

    fn app() -> TestApp {
        app_with(AppConfig::default())
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = app();
        let response = app
            .router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn subscription_event_is_scheduled_and_visible_in_registry() {
        let app = app();
        let event = serde_json::to_value(download_added("Subscribe", arrival())).unwrap();

        let response = app
            .router
            .clone()
            .oneshot(post_json("/api/v1/events", event))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await["published"], true);
        assert_eq!(app.scheduler.pending(), 1);

        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/processing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let entries = body_json(response).await;
        assert_eq!(entries[0]["media"], "tmdb:100");
        assert_eq!(entries[0]["title"], "Arrival (2016)");

        app.scheduler.fire_all().await;

        let response = app
            .router
            .oneshot(Request::builder().uri("/api/v1/runs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let runs = body_json(response).await;
        assert_eq!(runs[0]["status"], "completed");
        assert_eq!(runs[0]["success"], 1);
        assert_eq!(runs[0]["skipped"], 1);
        assert_eq!(runs[0]["rules"][1]["reason"], "no candidates");
        assert!(app.state.orchestrator.registry().is_empty());
    }

    #[tokio::test]
    async fn garbage_event_is_still_accepted() {
        let app = app();
        let response = app
            .router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/events")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await["published"], false);
        assert_eq!(app.scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn settings_round_trip_and_validation() {
        let app = app();

        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/v1/settings")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({
                            "enabled": true,
                            "selected_rules": {"720p": true, "4K": false},
                            "delay_seconds": 5
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["delay_seconds"], 5.0);
        assert_eq!(body["debounce_seconds"], 60);
        assert_eq!(app.state.orchestrator.settings().enabled_rules(), vec!["720p"]);

        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/v1/settings")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"delay_seconds": -1}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/settings")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["delay_seconds"], 5.0);
        assert_eq!(body["selected_rules"], json!({"720p": true, "4K": false}));
    }

    #[tokio::test]
    async fn api_key_is_enforced_when_configured() {
        let mut config = AppConfig::default();
        config.http.api_key = Some("s3cret".to_string());
        let app = app_with(config);

        let response = app
            .router
            .clone()
            .oneshot(Request::builder().uri("/api/v1/runs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/runs")
                    .header("X-Api-Key", "s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn openapi_document_lists_routes() {
        let app = app();
        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/api-doc/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let doc = body_json(response).await;
        assert!(doc["paths"]["/api/v1/events"].is_object());
        assert!(doc["paths"]["/api/v1/settings"]["put"].is_object());
    }
}
