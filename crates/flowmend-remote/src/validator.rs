//! The external semantic validator: the authoritative accept/reject oracle
//! for a flow document.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use flowmend_types::{Error, Result};

use crate::types::ValidationReport;

pub const SERVICE_NAME: &str = "semantic-validator";

/// The authoritative semantic validator. Transport failures are fatal to a
/// refinement session; a 401 is reported distinctly as [`Error::Auth`].
#[async_trait]
pub trait SemanticValidator: Send + Sync {
    async fn validate(&self, csv: &str) -> Result<ValidationReport>;
}

// ---------------------------------------------------------------------------
// HttpSemanticValidator
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct HttpSemanticValidator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl HttpSemanticValidator {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_env() -> Result<Self> {
        let key = std::env::var("FLOWMEND_VALIDATOR_KEY").map_err(|_| Error::Auth {
            service: SERVICE_NAME.into(),
        })?;
        let url = std::env::var("FLOWMEND_VALIDATOR_URL")
            .map_err(|_| Error::Other("FLOWMEND_VALIDATOR_URL not set".into()))?;
        Ok(Self::new(key, url))
    }
}

#[async_trait]
impl SemanticValidator for HttpSemanticValidator {
    async fn validate(&self, csv: &str) -> Result<ValidationReport> {
        let url = format!("{}/v1/flows/validate", self.base_url);
        tracing::debug!(bytes = csv.len(), "submitting document for semantic validation");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&json!({ "csv": csv }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout {
                        service: SERVICE_NAME.into(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    Error::Service {
                        service: SERVICE_NAME.into(),
                        status: 0,
                        message: e.to_string(),
                        retryable: false,
                    }
                }
            })?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(Error::Auth {
                service: SERVICE_NAME.into(),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Service {
                service: SERVICE_NAME.into(),
                status: status.as_u16(),
                message,
                retryable: status.is_server_error(),
            });
        }

        let report: ValidationReport = response.json().await.map_err(|e| Error::Service {
            service: SERVICE_NAME.into(),
            status: status.as_u16(),
            message: format!("malformed validation response: {e}"),
            retryable: false,
        })?;
        tracing::info!(
            valid = report.valid,
            errors = report.errors.len(),
            "semantic validation result"
        );
        Ok(report)
    }
}
