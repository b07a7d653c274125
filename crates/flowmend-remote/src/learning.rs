//! The error-learning store: remembers error signatures and fix outcomes so
//! later sessions can bias the generative repairer. Strictly best-effort —
//! every failure is logged and swallowed.

use async_trait::async_trait;

use flowmend_types::{RemoteError, Result};

use crate::types::FixHint;

pub const SERVICE_NAME: &str = "learning-store";

#[async_trait]
pub trait LearningStore: Send + Sync {
    /// Record an observed error pattern. Returns the pattern id.
    async fn log_pattern(&self, error: &RemoteError, document_snapshot: &str) -> Result<String>;

    /// Record the outcome of a fix attempt against a pattern.
    async fn log_fix_attempt(
        &self,
        pattern_id: &str,
        fix_description: &str,
        succeeded: bool,
    ) -> Result<()>;

    /// Fetch any known fixes for the given errors.
    async fn known_fixes(&self, errors: &[RemoteError]) -> Result<Vec<FixHint>>;
}

/// A store that remembers nothing. Used when no learning backend is
/// configured; sessions behave identically apart from the missing hints.
#[derive(Debug, Default)]
pub struct NoopLearningStore;

#[async_trait]
impl LearningStore for NoopLearningStore {
    async fn log_pattern(&self, _error: &RemoteError, _snapshot: &str) -> Result<String> {
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn log_fix_attempt(&self, _id: &str, _description: &str, _succeeded: bool) -> Result<()> {
        Ok(())
    }

    async fn known_fixes(&self, _errors: &[RemoteError]) -> Result<Vec<FixHint>> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// HttpLearningStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct HttpLearningStore {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl HttpLearningStore {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl LearningStore for HttpLearningStore {
    async fn log_pattern(&self, error: &RemoteError, document_snapshot: &str) -> Result<String> {
        let url = format!("{}/v1/patterns", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "error": error,
                "snapshot": document_snapshot,
            }))
            .send()
            .await
            .map_err(service_error)?;
        let body: serde_json::Value = response.json().await.map_err(service_error)?;
        Ok(body
            .get("patternId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn log_fix_attempt(
        &self,
        pattern_id: &str,
        fix_description: &str,
        succeeded: bool,
    ) -> Result<()> {
        let url = format!("{}/v1/patterns/{}/attempts", self.base_url, pattern_id);
        self.client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "fix": fix_description,
                "succeeded": succeeded,
            }))
            .send()
            .await
            .map_err(service_error)?;
        Ok(())
    }

    async fn known_fixes(&self, errors: &[RemoteError]) -> Result<Vec<FixHint>> {
        let url = format!("{}/v1/patterns/fixes", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "errors": errors }))
            .send()
            .await
            .map_err(service_error)?;
        let hints: Vec<FixHint> = response.json().await.map_err(service_error)?;
        Ok(hints)
    }
}

fn service_error(e: reqwest::Error) -> flowmend_types::Error {
    flowmend_types::Error::Service {
        service: SERVICE_NAME.into(),
        status: e.status().map(|s| s.as_u16()).unwrap_or(0),
        message: e.to_string(),
        retryable: false,
    }
}
