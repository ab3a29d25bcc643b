//! Analysis backend contract and its HTTP implementation.

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::survey::payload::SurveyPayload;

/// Header carrying the invitation code on submission.
pub const INVITATION_HEADER: &str = "x-invitation-code";

/// Returned by a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub job_id: String,
}

/// A progress snapshot of a running job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub stage: String,
    /// 0–100.
    pub percentage: f64,
    pub completed: bool,
}

/// One sub-task record in a result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// The final result of a job, from either the result endpoint or a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_markdown: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<TaskRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<TaskRecord>>::deserialize(deserializer)?.unwrap_or_default())
}

impl AnalysisResult {
    /// Parse a result body, unwrapping the `{"ok": true, "analysis": {...}}`
    /// envelope when present.
    pub fn from_json(value: serde_json::Value) -> Result<Self, BackendError> {
        let inner = match value.get("analysis") {
            Some(analysis) if analysis.is_object() => analysis.clone(),
            _ => value,
        };
        serde_json::from_value(inner).map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }
}

/// The backend that runs analysis jobs.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Create a job from a survey payload.
    async fn submit(&self, payload: &SurveyPayload) -> Result<SubmitReceipt, BackendError>;

    /// Current progress of a job.
    async fn get_progress(&self, job_id: &str) -> Result<ProgressReport, BackendError>;

    /// Final result of a job. Only meaningful once progress reports completion.
    async fn get_result(&self, job_id: &str) -> Result<AnalysisResult, BackendError>;
}

/// Progress body as the survey service sends it. Accepts both the
/// `{stage, percentage, completed}` shape and the legacy
/// `{in_progress, progress (0..1), message}` shape.
#[derive(Debug, Deserialize)]
struct ProgressBody {
    stage: Option<String>,
    percentage: Option<f64>,
    completed: Option<bool>,
    in_progress: Option<bool>,
    progress: Option<f64>,
    message: Option<String>,
}

impl From<ProgressBody> for ProgressReport {
    fn from(body: ProgressBody) -> Self {
        let percentage = body
            .percentage
            .or_else(|| body.progress.map(|p| p * 100.0))
            .unwrap_or(0.0);
        let completed = body.completed.unwrap_or_else(|| {
            body.in_progress == Some(false) && body.progress.is_some_and(|p| p >= 1.0)
        });
        Self {
            stage: body.stage.or(body.message).unwrap_or_default(),
            percentage,
            completed,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitBody {
    #[serde(default)]
    ok: bool,
    #[serde(alias = "job_id")]
    analysis_id: Option<String>,
    error: Option<String>,
    message: Option<String>,
}

/// HTTP client for the survey analysis service.
pub struct HttpBackend {
    client: reqwest::Client,
    config: BackendConfig,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn read_json(resp: reqwest::Response) -> Result<serde_json::Value, BackendError> {
        let status = resp.status();
        if !status.is_success() {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            let message = body
                .get("message")
                .or_else(|| body.get("error"))
                .and_then(|v| v.as_str())
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed"))
                .to_string();
            return Err(BackendError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl AnalysisBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn submit(&self, payload: &SurveyPayload) -> Result<SubmitReceipt, BackendError> {
        let mut req = self.client.post(self.url("survey/")).json(payload);
        if let Some(ref code) = self.config.invitation_code {
            req = req.header(INVITATION_HEADER, code.expose_secret());
        }
        let resp = req.send().await?;
        if resp.status() == StatusCode::BAD_REQUEST {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            return Err(BackendError::Rejected(
                body.get("errors")
                    .or_else(|| body.get("error"))
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "invalid survey".to_string()),
            ));
        }

        let body: SubmitBody = serde_json::from_value(Self::read_json(resp).await?)
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        match (body.ok, body.analysis_id) {
            (true, Some(job_id)) if !job_id.is_empty() => {
                tracing::debug!(job_id = %job_id, "Survey submitted");
                Ok(SubmitReceipt { job_id })
            }
            _ => Err(BackendError::Rejected(
                body.error
                    .or(body.message)
                    .unwrap_or_else(|| "no analysis id returned".to_string()),
            )),
        }
    }

    async fn get_progress(&self, job_id: &str) -> Result<ProgressReport, BackendError> {
        let resp = self
            .client
            .get(self.url(&format!("survey/progress/{job_id}/")))
            .send()
            .await?;
        let body: ProgressBody = serde_json::from_value(Self::read_json(resp).await?)
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        Ok(body.into())
    }

    async fn get_result(&self, job_id: &str) -> Result<AnalysisResult, BackendError> {
        let resp = self
            .client
            .get(self.url(&format!("survey/result/{job_id}/")))
            .send()
            .await?;
        AnalysisResult::from_json(Self::read_json(resp).await?)
    }
}
