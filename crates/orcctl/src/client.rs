//! HTTP client for the orcd control plane.

use orc_core::plan::Plan;
use orc_core::{DecisionResult, RunRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not running at {addr}\n  → start with: orcd\n  → or set ORCD_ADDR if using a different address")]
    ConnectionFailed { addr: String },

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            let addr = e
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            ClientError::ConnectionFailed { addr }
        } else {
            ClientError::HttpError {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct GeneratePlanRequest<'a> {
    requirement: &'a str,
}

#[derive(Debug, Deserialize)]
struct GeneratePlanResponse {
    plan: Plan,
}

#[derive(Debug, Serialize)]
struct RunPlanRequest<'a> {
    #[serde(rename = "workspacePath")]
    workspace_path: &'a str,
    plan: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    requirement: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RunPlanResponse {
    #[serde(rename = "runId")]
    run_id: String,
}

/// Listing entry mirrored from the daemon's run store.
#[derive(Debug, Deserialize)]
pub struct RunListEntry {
    pub run_id: String,
    #[serde(rename = "startTime")]
    pub start_time: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "endTime")]
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "exitCode")]
    pub exit_code: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ListRunsResponse {
    runs: Vec<RunListEntry>,
}

#[derive(Debug, Serialize)]
struct StartAutobuildRequest<'a> {
    workspace: &'a str,
    requirement: &'a str,
    #[serde(rename = "maxIterations", skip_serializing_if = "Option::is_none")]
    max_iterations: Option<u32>,
}

#[derive(Debug, Serialize)]
struct SubmitDecisionRequest {
    result: DecisionResult,
}

#[derive(Debug, Deserialize)]
struct AcceptedResponse {
    accepted: bool,
}

#[derive(Debug, Deserialize)]
struct CancelledResponse {
    cancelled: bool,
}

#[derive(Debug, Deserialize)]
struct RunsRootResponse {
    path: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Client for the daemon's HTTP API.
#[derive(Debug)]
pub struct Client {
    addr: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(addr: String) -> Self {
        Self {
            addr,
            http: reqwest::Client::new(),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn check<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(|b| b.error)
                .unwrap_or(text);
            return Err(ClientError::HttpError {
                status: status.as_u16(),
                message,
            });
        }
        serde_json::from_str(&text).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    pub async fn generate_plan(&self, requirement: &str) -> Result<Plan, ClientError> {
        let response = self
            .http
            .post(format!("{}/plan", self.addr))
            .json(&GeneratePlanRequest { requirement })
            .send()
            .await?;
        Ok(Self::check::<GeneratePlanResponse>(response).await?.plan)
    }

    pub async fn run_plan(
        &self,
        workspace: &str,
        plan: serde_json::Value,
        requirement: Option<&str>,
    ) -> Result<String, ClientError> {
        let response = self
            .http
            .post(format!("{}/runs", self.addr))
            .json(&RunPlanRequest {
                workspace_path: workspace,
                plan,
                requirement,
            })
            .send()
            .await?;
        Ok(Self::check::<RunPlanResponse>(response).await?.run_id)
    }

    pub async fn list_runs(&self) -> Result<Vec<RunListEntry>, ClientError> {
        let response = self.http.get(format!("{}/runs", self.addr)).send().await?;
        Ok(Self::check::<ListRunsResponse>(response).await?.runs)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<RunRecord, ClientError> {
        let response = self
            .http
            .get(format!("{}/runs/{run_id}", self.addr))
            .send()
            .await?;
        Self::check(response).await
    }

    pub async fn cancel_run(&self, run_id: &str) -> Result<bool, ClientError> {
        let response = self
            .http
            .post(format!("{}/runs/{run_id}/cancel", self.addr))
            .send()
            .await?;
        Ok(Self::check::<CancelledResponse>(response).await?.cancelled)
    }

    pub async fn submit_decision(
        &self,
        run_id: &str,
        result: DecisionResult,
    ) -> Result<bool, ClientError> {
        let response = self
            .http
            .post(format!("{}/runs/{run_id}/decision", self.addr))
            .json(&SubmitDecisionRequest { result })
            .send()
            .await?;
        Ok(Self::check::<AcceptedResponse>(response).await?.accepted)
    }

    pub async fn start_autobuild(
        &self,
        workspace: &str,
        requirement: &str,
        max_iterations: Option<u32>,
    ) -> Result<(), ClientError> {
        let response = self
            .http
            .post(format!("{}/autobuild", self.addr))
            .json(&StartAutobuildRequest {
                workspace,
                requirement,
                max_iterations,
            })
            .send()
            .await?;
        Self::check::<serde_json::Value>(response).await?;
        Ok(())
    }

    pub async fn cancel_autobuild(&self) -> Result<bool, ClientError> {
        let response = self
            .http
            .post(format!("{}/autobuild/cancel", self.addr))
            .send()
            .await?;
        Ok(Self::check::<CancelledResponse>(response).await?.cancelled)
    }

    pub async fn runs_root(&self) -> Result<String, ClientError> {
        let response = self
            .http
            .get(format!("{}/runs-root", self.addr))
            .send()
            .await?;
        Ok(Self::check::<RunsRootResponse>(response).await?.path)
    }

    /// Tail the SSE event stream, invoking the callback per event.
    pub async fn tail_events(
        &self,
        mut on_event: impl FnMut(&str, &str),
    ) -> Result<(), ClientError> {
        use futures::StreamExt;

        let response = self
            .http
            .get(format!("{}/events", self.addr))
            .send()
            .await?;
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut event_name = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                let line = line.trim_end();
                if let Some(name) = line.strip_prefix("event: ") {
                    event_name = name.to_string();
                } else if let Some(data) = line.strip_prefix("data: ") {
                    on_event(&event_name, data);
                }
            }
        }
        Ok(())
    }
}
