use graphcore::{ExecutionStatusReport, LogPage, LogQuery, RunRequest, TransportError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Body returned when a run is accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub execution_id: String,
}

/// Request/response client of the execution HTTP API
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn submit(&self, request: &RunRequest) -> Result<SubmitResponse, TransportError> {
        let url = self.url("/api/executions");
        tracing::debug!("POST {}", url);
        let response = self.client.post(&url).json(request).send().await;
        read_json(response).await
    }

    pub async fn cancel(&self, execution_id: &str) -> Result<(), TransportError> {
        let url = self.url(&format!("/api/executions/{}/cancel", execution_id));
        tracing::debug!("POST {}", url);
        let response = self.client.post(&url).send().await;
        read_json::<serde_json::Value>(response).await.map(|_| ())
    }

    pub async fn fetch_status(
        &self,
        execution_id: &str,
    ) -> Result<ExecutionStatusReport, TransportError> {
        let url = self.url(&format!("/api/executions/{}/status", execution_id));
        tracing::debug!("GET {}", url);
        let response = self.client.get(&url).send().await;
        read_json(response).await
    }

    pub async fn fetch_logs(
        &self,
        execution_id: &str,
        query: &LogQuery,
    ) -> Result<LogPage, TransportError> {
        let url = self.url(&format!("/api/executions/{}/logs", execution_id));
        tracing::debug!("GET {} (offset {}, limit {})", url, query.offset, query.limit);
        let response = self.client.get(&url).query(query).send().await;
        read_json(response).await
    }
}

async fn read_json<T: DeserializeOwned>(
    response: reqwest::Result<reqwest::Response>,
) -> Result<T, TransportError> {
    let response = response.map_err(|e| TransportError::Request(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::Status {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| TransportError::Decode(e.to_string()))
}
