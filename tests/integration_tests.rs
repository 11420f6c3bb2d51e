//! Integration tests for tasklane
//!
//! The CLI is driven as a subprocess; the HTTP surface is driven through the
//! full router against an on-disk database.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Helper to create a tasklane Command isolated from the caller's environment
fn tasklane(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("tasklane");
    cmd.current_dir(dir.path());
    for key in [
        "TASKLANE_PORT",
        "TASKLANE_DB_PATH",
        "TASKLANE_BACKEND_URL",
        "TASKLANE_API_KEY",
        "TASKLANE_REALTIME_TRANSPORT",
        "TASKLANE_BYPASS_AUTH",
        "TASKLANE_MAX_ACTIVE_TASKS",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

// =============================================================================
// CLI
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        let dir = TempDir::new().unwrap();
        tasklane(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("session"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        tasklane(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_database() {
        let dir = TempDir::new().unwrap();
        tasklane(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Database initialized"));
        assert!(dir.path().join(".tasklane/tasklane.db").exists());
    }

    #[test]
    fn test_init_honours_db_path_flag() {
        let dir = TempDir::new().unwrap();
        tasklane(&dir)
            .args(["--db-path", "data/custom.db", "init"])
            .assert()
            .success();
        assert!(dir.path().join("data/custom.db").exists());
    }

    #[test]
    fn test_session_prints_token() {
        let dir = TempDir::new().unwrap();
        let output = tasklane(&dir)
            .args(["session", "--email", "ada@example.com"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let token = String::from_utf8(output.stdout).unwrap();
        assert_eq!(token.trim().len(), 32);
    }

    #[test]
    fn test_session_rejects_non_positive_days() {
        let dir = TempDir::new().unwrap();
        tasklane(&dir)
            .args(["session", "--email", "ada@example.com", "--days", "0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--days must be positive"));
    }

    #[test]
    fn test_config_reads_toml_and_env() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("tasklane.toml"),
            "port = 8080\n[backend]\nbase_url = \"http://agents:9000\"\napi_key = \"s3cret\"\n",
        )
        .unwrap();
        tasklane(&dir)
            .env("TASKLANE_REALTIME_TRANSPORT", "socket")
            .arg("config")
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 8080"))
            .stdout(predicate::str::contains("http://agents:9000"))
            .stdout(predicate::str::contains("transport = \"socket\""))
            .stdout(predicate::str::contains("s3cret").not());
    }

    #[test]
    fn test_bad_config_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("tasklane.toml"), "port = \"nope\"").unwrap();
        tasklane(&dir)
            .arg("init")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse tasklane.toml"));
    }
}

// =============================================================================
// HTTP surface
// =============================================================================

mod http_flow {
    use std::sync::Arc;

    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tasklane::api::AppState;
    use tasklane::config::ServiceConfig;
    use tasklane::realtime::RealtimeMode;
    use tasklane::server::{build_router, open_store};
    use tasklane::store::DbHandle;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Harness {
        _dir: TempDir,
        router: Router,
        token: String,
    }

    fn harness(transport: RealtimeMode) -> Harness {
        let dir = TempDir::new().unwrap();
        let mut config = ServiceConfig {
            db_path: dir.path().join("tasklane.db"),
            ..ServiceConfig::default()
        };
        config.realtime.transport = transport;
        config.backend.base_url = "http://127.0.0.1:1".into();
        let store = open_store(&config).unwrap();
        let user = store.upsert_user("Ada", "ada@example.com", None).unwrap();
        let token = store
            .create_session(user.id, chrono::Duration::days(1))
            .unwrap()
            .token;
        let state = Arc::new(AppState::new(DbHandle::new(store), config));
        Harness {
            _dir: dir,
            router: build_router(state, false),
            token,
        }
    }

    impl Harness {
        async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let mut builder = Request::builder()
                .method(method)
                .uri(uri)
                .header("authorization", format!("Bearer {}", self.token));
            let body = match body {
                Some(json) => {
                    builder = builder.header("content-type", "application/json");
                    Body::from(json.to_string())
                }
                None => Body::empty(),
            };
            let response = self
                .router
                .clone()
                .oneshot(builder.body(body).unwrap())
                .await
                .unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }

        async fn create_scratchpad(&self, message: &str) -> i64 {
            let boundary = "flow-boundary";
            let mut body = String::new();
            for (name, value) in [("message", message), ("model", "claude-sonnet-4"), ("isScratchpad", "true")] {
                body.push_str(&format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                ));
            }
            body.push_str(&format!("--{boundary}--\r\n"));
            let response = self
                .router
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/api/tasks")
                        .header("authorization", format!("Bearer {}", self.token))
                        .header("content-type", format!("multipart/form-data; boundary={boundary}"))
                        .body(Body::from(body))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let value: Value = serde_json::from_slice(&bytes).unwrap();
            value["taskId"].as_i64().unwrap()
        }
    }

    #[tokio::test]
    async fn test_unauthenticated_task_list() {
        let h = harness(RealtimeMode::Native);
        let response = h
            .router
            .clone()
            .oneshot(Request::builder().uri("/api/tasks").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], br#"{"error":"Unauthorized"}"#);
    }

    #[tokio::test]
    async fn test_unreachable_backend_fails_task_but_creation_succeeds() {
        let h = harness(RealtimeMode::Native);
        let task_id = h.create_scratchpad("Sketch a parser").await;

        let (status, task) = h.call("GET", &format!("/api/tasks/{task_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(task["status"], "FAILED");
        assert!(
            task["initializationError"]
                .as_str()
                .unwrap()
                .starts_with("Initialization failed:")
        );

        let (_, list) = h.call("GET", "/api/tasks", None).await;
        assert_eq!(list["tasks"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_streamed_reply_shows_in_live_view() {
        let h = harness(RealtimeMode::Native);
        let task_id = h.create_scratchpad("Explain lifetimes").await;

        let (_, opened) = h
            .call("POST", &format!("/api/tasks/{task_id}/messages/stream"), Some(json!({})))
            .await;
        let message_id = opened["messageId"].as_i64().unwrap();
        assert_eq!(opened["sequence"], 1);

        let delta_uri = format!("/api/messages/{message_id}/delta");
        h.call("POST", &delta_uri, Some(json!({ "deltaText": "Borrows " }))).await;

        let (_, live) = h.call("GET", &format!("/api/tasks/{task_id}/live"), None).await;
        assert_eq!(live["isStreaming"], true);
        assert_eq!(live["mode"], "native");

        h.call(
            "POST",
            &delta_uri,
            Some(json!({ "deltaText": "end.", "isFinal": true, "finishReason": "stop" })),
        )
        .await;
        let (_, live) = h.call("GET", &format!("/api/tasks/{task_id}/live"), None).await;
        assert_eq!(live["isStreaming"], false);
        let messages = live["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["content"], "Borrows end.");
    }

    #[tokio::test]
    async fn test_socket_mode_has_no_sidecar_data() {
        let h = harness(RealtimeMode::Socket);
        let task_id = h.create_scratchpad("hello").await;
        h.call(
            "POST",
            &format!("/api/tasks/{task_id}/file-changes"),
            Some(json!({ "filePath": "a.txt", "operation": "CREATE", "additions": 1 })),
        )
        .await;

        let (_, live) = h.call("GET", &format!("/api/tasks/{task_id}/live"), None).await;
        assert_eq!(live["mode"], "socket");
        assert_eq!(live["isNativeEnabled"], false);
        assert_eq!(live["fileChanges"], json!([]));
        assert_eq!(live["isWorkspaceHealthy"], true);
        assert_eq!(live["messages"].as_array().unwrap().len(), 1);
    }
}
