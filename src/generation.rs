use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::config::CartoonApiConfig;
use crate::error::CartoonError;

/// 提交给生成服务的源图片。
#[derive(Clone, Debug)]
pub enum ImageSource {
    /// A URL reachable by the remote service.
    Url(String),
    /// Raw bytes, embedded as a base64 data reference.
    Bytes(Vec<u8>),
}

#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub image: ImageSource,
    pub style_index: i32,
    pub model: String,
}

/// Outcome of submitting a generation request: either the service answered
/// synchronously with a finished asset, or it handed back a task to poll.
#[derive(Clone, Debug, PartialEq)]
pub enum SubmitOutcome {
    Asset(String),
    Task(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl TaskStatus {
    /// The upstream API uses both `SUCCEEDED`/`SUCCESS` and `FAILED`/`FAIL`
    /// as terminal tokens; both spellings are accepted.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => TaskStatus::Pending,
            "RUNNING" => TaskStatus::Running,
            "SUCCEEDED" | "SUCCESS" => TaskStatus::Succeeded,
            "FAILED" | "FAIL" => TaskStatus::Failed,
            _ => TaskStatus::Unknown,
        }
    }
}

/// One observation of an in-flight task.
#[derive(Clone, Debug)]
pub struct TaskPoll {
    pub status: TaskStatus,
    pub asset_url: Option<String>,
    pub message: Option<String>,
}

/// Seam between the pipeline and the remote generation API.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn submit(&self, request: &GenerationRequest) -> Result<SubmitOutcome, CartoonError>;

    async fn poll_status(&self, task_id: &str) -> Result<TaskPoll, CartoonError>;
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    code: Option<String>,
    message: Option<String>,
    output: Option<GenerationOutput>,
}

#[derive(Debug, Deserialize)]
struct GenerationOutput {
    task_id: Option<String>,
    task_status: Option<String>,
    message: Option<String>,
    results: Option<Vec<GeneratedResult>>,
}

#[derive(Debug, Deserialize)]
struct GeneratedResult {
    url: Option<String>,
}

impl GenerationResponse {
    fn first_result_url(&self) -> Option<String> {
        self.output
            .as_ref()
            .and_then(|output| output.results.as_ref())
            .and_then(|results| results.iter().find_map(|result| result.url.clone()))
    }
}

/// DashScope风格的人物动漫化API客户端。
pub struct DashScopeClient {
    client: Client,
    config: CartoonApiConfig,
}

impl DashScopeClient {
    pub fn new(config: CartoonApiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn with_client(config: CartoonApiConfig, client: Client) -> Self {
        Self { client, config }
    }

    async fn parse_response(
        response: reqwest::Response,
    ) -> Result<GenerationResponse, CartoonError> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| CartoonError::RemoteGeneration(err.to_string()))?;
        if !status.is_success() {
            return Err(CartoonError::RemoteGeneration(format!(
                "HTTP {status}: {text}"
            )));
        }
        let payload: GenerationResponse = serde_json::from_str(&text)
            .map_err(|err| CartoonError::RemoteGeneration(format!("解析响应失败: {err}")))?;
        // 顶层code非Success表示请求被拒绝。
        if let Some(code) = payload.code.as_deref() {
            if code != "Success" {
                let message = payload
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("code={code}"));
                return Err(CartoonError::RemoteGeneration(message));
            }
        }
        Ok(payload)
    }
}

#[async_trait]
impl GenerationBackend for DashScopeClient {
    async fn submit(&self, request: &GenerationRequest) -> Result<SubmitOutcome, CartoonError> {
        let image_ref = match &request.image {
            ImageSource::Url(url) => url.clone(),
            ImageSource::Bytes(bytes) => format!(
                "data:image/jpeg;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(bytes)
            ),
        };
        let body = json!({
            "model": request.model,
            "input": {
                "image_url": image_ref,
                "style_index": request.style_index,
            }
        });

        debug!(endpoint = %self.config.endpoint, model = %request.model, "submitting generation request");
        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .header("X-DashScope-Async", "enable")
            .json(&body)
            .send()
            .await
            .map_err(|err| CartoonError::RemoteGeneration(err.to_string()))?;
        let payload = Self::parse_response(response).await?;

        // 异步路径优先：有task_id就去轮询。
        if let Some(task_id) = payload.output.as_ref().and_then(|o| o.task_id.clone()) {
            info!(task_id = %task_id, "generation task accepted");
            return Ok(SubmitOutcome::Task(task_id));
        }
        if let Some(url) = payload.first_result_url() {
            return Ok(SubmitOutcome::Asset(url));
        }
        Err(CartoonError::RemoteGeneration(
            "响应中既无图片地址也无task_id".to_string(),
        ))
    }

    async fn poll_status(&self, task_id: &str) -> Result<TaskPoll, CartoonError> {
        let url = format!("{}/{}", self.config.tasks_endpoint.trim_end_matches('/'), task_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|err| CartoonError::RemoteGeneration(err.to_string()))?;
        let payload = Self::parse_response(response).await?;

        let status = payload
            .output
            .as_ref()
            .and_then(|output| output.task_status.as_deref())
            .map(TaskStatus::parse)
            .unwrap_or(TaskStatus::Unknown);
        let asset_url = payload.first_result_url();
        let message = payload
            .output
            .as_ref()
            .and_then(|output| output.message.clone())
            .or(payload.message);
        Ok(TaskPoll {
            status,
            asset_url,
            message,
        })
    }
}

/// Polls `task_id` until a terminal state or the deadline runs out.
///
/// The attempt budget is `(deadline - now) / interval`; each attempt waits
/// one interval before querying, so the loop never outlives the deadline.
/// The sleep is a plain tokio timer, cancellable by dropping the future.
pub async fn poll_task<B: GenerationBackend + ?Sized>(
    backend: &B,
    task_id: &str,
    interval: Duration,
    deadline: Instant,
) -> Result<String, CartoonError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    let interval_ms = interval.as_millis().max(1);
    let budget = ((remaining.as_millis() / interval_ms) as u32).max(1);

    for attempt in 1..=budget {
        sleep(interval).await;
        let poll = backend.poll_status(task_id).await?;
        match poll.status {
            TaskStatus::Succeeded => {
                info!(task_id = %task_id, attempt, "generation task succeeded");
                return poll.asset_url.ok_or_else(|| {
                    CartoonError::RemoteGeneration("任务成功但未返回图片地址".to_string())
                });
            }
            TaskStatus::Failed => {
                let message = poll
                    .message
                    .unwrap_or_else(|| "任务执行失败".to_string());
                return Err(CartoonError::RemoteGeneration(message));
            }
            TaskStatus::Pending | TaskStatus::Running | TaskStatus::Unknown => {
                debug!(task_id = %task_id, attempt, budget, status = ?poll.status, "task still in progress");
            }
        }
    }

    Err(CartoonError::Timeout {
        task_id: task_id.to_string(),
        attempts: budget,
    })
}

/// Resolves a submit outcome to a downloadable asset URL, polling if the
/// service went down the async path.
pub async fn resolve_asset<B: GenerationBackend + ?Sized>(
    backend: &B,
    outcome: SubmitOutcome,
    interval: Duration,
    deadline: Instant,
) -> Result<String, CartoonError> {
    match outcome {
        SubmitOutcome::Asset(url) => Ok(url),
        SubmitOutcome::Task(task_id) => poll_task(backend, &task_id, interval, deadline).await,
    }
}
