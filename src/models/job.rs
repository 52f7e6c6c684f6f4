use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use strum::Display;

const MAX_JOB_ID_LEN: usize = 128;

/// Lifecycle state of a scan job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Error,
}

impl JobState {
    /// No further automatic transition happens from a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Error)
    }
}

/// Opaque job identifier, restricted to characters that are safe as a file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidJobId> {
        let raw = raw.into();
        validate_job_id(&raw, &()).map_err(|_| InvalidJobId(raw.clone()))?;
        Ok(Self(raw))
    }

    /// Fresh id in UUID simple form (32 hex chars).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for JobId {
    type Error = InvalidJobId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        JobId::parse(value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid job id {0:?}")]
pub struct InvalidJobId(pub String);

fn validate_job_id(value: &str, _ctx: &()) -> garde::Result {
    if value.is_empty() || value.len() > MAX_JOB_ID_LEN {
        return Err(garde::Error::new("job id must be 1-128 characters"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(garde::Error::new(
            "job id may only contain ASCII letters, digits, '-' and '_'",
        ));
    }
    Ok(())
}

fn not_blank(value: &str, _ctx: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("must not be blank"));
    }
    Ok(())
}

/// Raw job descriptor as it travels over the queue.
///
/// Both fields default to empty so that a payload missing either one still
/// deserializes and is rejected by validation instead of by serde.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JobMessage {
    #[serde(default, alias = "Id")]
    #[garde(custom(validate_job_id))]
    pub id: String,

    #[serde(default, alias = "Path")]
    #[garde(custom(not_blank))]
    pub path: String,
}

/// A validated video-to-QR extraction request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub source_path: PathBuf,
}

impl Job {
    pub fn new(id: JobId, source_path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            source_path: source_path.into(),
        }
    }

    /// Parse and validate a queue payload.
    pub fn from_payload(payload: &str) -> Result<Self, MalformedJob> {
        let message: JobMessage = serde_json::from_str(payload)?;
        message.validate()?;
        Ok(Self {
            id: JobId(message.id),
            source_path: PathBuf::from(message.path),
        })
    }

    pub fn to_message(&self) -> JobMessage {
        JobMessage {
            id: self.id.to_string(),
            path: self.source_path.to_string_lossy().into_owned(),
        }
    }

    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_message())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MalformedJob {
    #[error("payload is not a JSON job descriptor: {0}")]
    Json(#[from] serde_json::Error),

    #[error("job descriptor failed validation: {0}")]
    Invalid(#[from] garde::Report),
}

/// Persisted status record for one job id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: JobId,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    pub fn new(id: JobId, state: JobState) -> Self {
        Self {
            id,
            state,
            error_detail: None,
            updated_at: Utc::now(),
        }
    }

    pub fn queued(id: JobId) -> Self {
        Self::new(id, JobState::Queued)
    }

    pub fn processing(id: JobId) -> Self {
        Self::new(id, JobState::Processing)
    }

    pub fn completed(id: JobId) -> Self {
        Self::new(id, JobState::Completed)
    }

    pub fn error(id: JobId, detail: impl Into<String>) -> Self {
        Self {
            error_detail: Some(detail.into()),
            ..Self::new(id, JobState::Error)
        }
    }
}
