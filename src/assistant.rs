// Client for the remote assistant service. One request to `/chat` maps to
// one isolated conversation thread on the remote side: create the thread,
// post the user message, start a run, poll until it finishes, then read the
// assistant's messages back.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::format;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("request to assistant service failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("assistant service returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("no assistant is configured under the name {0:?}")]
    UnknownAssistant(String),
    #[error("run {run_id} ended with status {status}")]
    RunNotCompleted { run_id: String, status: RunStatus },
    #[error("run {run_id} did not complete within {timeout:?}")]
    PollTimeout { run_id: String, timeout: Duration },
}

#[derive(Debug, Deserialize)]
pub struct Thread {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// Terminal statuses other than `Completed` mean the run can never
    /// produce a reply; polling past them would block forever.
    fn is_terminal_failure(self) -> bool {
        matches!(
            self,
            RunStatus::Cancelled | RunStatus::Failed | RunStatus::Incomplete | RunStatus::Expired
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Expired => "expired",
            RunStatus::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageObject {
    pub role: String,
    pub content: MessageContent,
}

/// Message content as the service returns it. Decoded once at the wire
/// boundary so the normalization code works over a closed set of cases.
/// The fallback variants mirror the block-level ones: a top-level object
/// carrying a nested or direct value still yields its text, and anything
/// unrecognized decodes as raw JSON rather than failing the request.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
    TextBlock { text: TextValue },
    Value { value: String },
    Other(serde_json::Value),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ContentBlock {
    Str(String),
    Text { text: TextValue },
    Value { value: String },
    Other(serde_json::Value),
}

#[derive(Debug, Deserialize)]
pub struct TextValue {
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct MessageList {
    pub data: Vec<MessageObject>,
}

pub struct AssistantClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    assistants: HashMap<String, String>,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl AssistantClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            assistants: config.assistants.clone(),
            poll_interval: config.poll_interval,
            poll_timeout: config.poll_timeout,
        }
    }

    /// Run one prompt through the named assistant and return the formatted
    /// reply chunks, one per assistant message, in the order the service
    /// lists them (most recent first). The end-of-response marker is the
    /// HTTP layer's concern, not added here.
    pub async fn respond(
        &self,
        assistant_name: &str,
        prompt: &str,
    ) -> Result<Vec<String>, BridgeError> {
        let assistant_id = self
            .assistants
            .get(assistant_name)
            .ok_or_else(|| BridgeError::UnknownAssistant(assistant_name.to_string()))?;

        // Fresh thread per request, so no conversation history leaks across
        // requests.
        let thread: Thread = self.post_json("/threads", &json!({})).await?;
        debug!(thread_id = %thread.id, "Created conversation thread");

        let _message: MessageObject = self
            .post_json(
                &format!("/threads/{}/messages", thread.id),
                &json!({ "role": "user", "content": prompt }),
            )
            .await?;

        let run: Run = self
            .post_json(
                &format!("/threads/{}/runs", thread.id),
                &json!({ "assistant_id": assistant_id }),
            )
            .await?;
        info!(thread_id = %thread.id, run_id = %run.id, "Started assistant run");

        let run = self.wait_for_run(&thread.id, run).await?;
        debug!(run_id = %run.id, "Run completed");

        let messages: MessageList = self
            .get_json(&format!("/threads/{}/messages", thread.id))
            .await?;

        let chunks = messages
            .data
            .iter()
            .filter(|message| message.role == "assistant")
            .map(|message| format::format_message(&message.content))
            .collect();
        Ok(chunks)
    }

    /// Poll the run at a fixed interval until it reaches a terminal status,
    /// giving up after the configured timeout.
    async fn wait_for_run(&self, thread_id: &str, mut run: Run) -> Result<Run, BridgeError> {
        let deadline = Instant::now() + self.poll_timeout;
        loop {
            if run.status == RunStatus::Completed {
                return Ok(run);
            }
            if run.status.is_terminal_failure() {
                error!(run_id = %run.id, status = %run.status, "Assistant run did not complete");
                return Err(BridgeError::RunNotCompleted {
                    run_id: run.id,
                    status: run.status,
                });
            }
            if Instant::now() >= deadline {
                return Err(BridgeError::PollTimeout {
                    run_id: run.id,
                    timeout: self.poll_timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
            run = self
                .get_json(&format!("/threads/{}/runs/{}", thread_id, run.id))
                .await?;
        }
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, BridgeError> {
        let response = self
            .http
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BridgeError> {
        let response = self
            .http
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BridgeError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %body, "Assistant service request failed");
            return Err(BridgeError::Api { status, body });
        }
        Ok(response.json::<T>().await?)
    }
}
