//! Unit tests for the runtime and its HTTP surface
//!
//! Tests cover:
//! - Command execution through the runtime
//! - Router responses for health, status and commands

use axum::body::Body;
use axum::http::{Request, StatusCode};
use botkeeper::api;
use botkeeper::capabilities::Capabilities;
use botkeeper::clock::ManualClock;
use botkeeper::config::{Config, RecoveryConfig};
use botkeeper::orchestration::{Command, CommandType};
use botkeeper::runtime::Runtime;
use botkeeper::self_healing::metrics::ScriptedMetrics;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn runtime() -> Arc<Runtime> {
    let config = Config {
        recovery: RecoveryConfig {
            temp_dirs: vec![],
            log_dirs: vec![],
            lower_priority: false,
            ..Default::default()
        },
        ..Default::default()
    };
    Arc::new(Runtime::with_parts(
        config,
        Capabilities::builtin(Arc::new(ScriptedMetrics::constant(15.0, 25.0, 35.0))),
        Arc::new(ManualClock::default()),
    ))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// Runtime
// ============================================================================

mod runtime_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_start_agent() {
        let rt = runtime();
        let created = rt
            .execute(Command::new(CommandType::CreateAgent).with_param("type", "generator"))
            .await;
        assert!(created.is_success());
        let agent_id = created.data["agent"]["id"].as_str().unwrap().to_string();

        let started = rt
            .execute(Command::new(CommandType::StartAgent).with_param("agent_id", agent_id.as_str()))
            .await;
        assert!(started.is_success());
        assert!(rt.director().agent(&agent_id).unwrap().is_running());

        rt.shutdown().await;
        assert!(!rt.director().agent(&agent_id).unwrap().is_running());
    }

    #[tokio::test]
    async fn test_health_summary_before_first_sample() {
        let rt = runtime();
        assert!(rt.healing().get_health_summary().is_no_data());
        rt.healing().force_health_check().unwrap();
        assert!(!rt.healing().get_health_summary().is_no_data());
    }
}

// ============================================================================
// HTTP routes
// ============================================================================

mod api_tests {
    use super::*;

    #[tokio::test]
    async fn test_health_route() {
        let app = api::router(runtime());
        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], json!("healthy"));
        assert_eq!(body["health"]["state"], json!("no_data"));
    }

    #[tokio::test]
    async fn test_command_route() {
        let app = api::router(runtime());
        let request = Request::post("/api/commands")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"command_id": "r1", "command_type": "create_bot", "parameters": {"bot_type": "monitor"}}"#,
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["command_id"], json!("r1"));
        assert_eq!(body["status"], json!("success"));
        assert_eq!(body["data"]["agent"]["type"], json!("monitor"));
    }

    #[tokio::test]
    async fn test_status_route_lists_templates() {
        let app = api::router(runtime());
        let response = app
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["agent_count"], json!(0));
        let templates = body["templates"].as_array().unwrap();
        assert_eq!(templates.len(), 3);
    }

    #[tokio::test]
    async fn test_autonomy_toggle() {
        let rt = runtime();
        let app = api::router(Arc::clone(&rt));
        let response = app
            .oneshot(
                Request::post("/api/autonomy/disable")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!rt.healing().get_autonomy_status().autonomy_enabled);
    }
}
