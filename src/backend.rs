//! Client for the agent backend that owns task workspaces.

use serde::Serialize;
use serde_json::Value;

use crate::config::BackendSection;
use crate::errors::BackendError;

/// Body of the initiate call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateTask {
    pub message: String,
    pub model: String,
    pub user_id: i64,
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl BackendClient {
    pub fn new(config: &BackendSection) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, path: String, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let response = builder.send().await.map_err(|source| BackendError::Request {
            path: path.clone(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { path, status, body });
        }
        Ok(response)
    }

    async fn json(&self, path: String, builder: reqwest::RequestBuilder) -> Result<Value, BackendError> {
        let response = self.send(path.clone(), builder).await?;
        response
            .json()
            .await
            .map_err(|source| BackendError::Request { path, source })
    }

    /// Ask the backend to start preparing the task's workspace.
    pub async fn initiate_task(&self, task_id: i64, body: &InitiateTask) -> Result<(), BackendError> {
        let path = format!("/api/tasks/{task_id}/initiate");
        let builder = self.request(reqwest::Method::POST, &path).json(body);
        self.send(path, builder).await?;
        Ok(())
    }

    pub async fn file_tree(&self, task_id: i64) -> Result<Value, BackendError> {
        let path = format!("/api/tasks/{task_id}/files/tree");
        let builder = self.request(reqwest::Method::GET, &path);
        self.json(path, builder).await
    }

    pub async fn create_pull_request(&self, task_id: i64, user_id: i64) -> Result<Value, BackendError> {
        let path = format!("/api/tasks/{task_id}/pull-request");
        let builder = self
            .request(reqwest::Method::POST, &path)
            .json(&serde_json::json!({ "userId": user_id }));
        self.json(path, builder).await
    }
}
