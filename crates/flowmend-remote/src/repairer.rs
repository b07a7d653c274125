//! The generative repairer: proposes a fixed document for the errors the
//! deterministic rules could not resolve. Failures here are non-fatal — the
//! refinement loop continues with programmatic fixes only.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use flowmend_types::{Error, RemoteError, Result};

use crate::types::{FixHint, RepairProposal};

pub const SERVICE_NAME: &str = "flow-repairer";

#[async_trait]
pub trait FlowRepairer: Send + Sync {
    /// Ask for a repaired document. Only the unresolved errors are sent, plus
    /// any previously-learned fix hints.
    async fn propose(
        &self,
        csv: &str,
        errors: &[RemoteError],
        hints: &[FixHint],
    ) -> Result<RepairProposal>;
}

// ---------------------------------------------------------------------------
// HttpFlowRepairer
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct HttpFlowRepairer {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl HttpFlowRepairer {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_env() -> Result<Self> {
        let key = std::env::var("FLOWMEND_REPAIRER_KEY").map_err(|_| Error::Auth {
            service: SERVICE_NAME.into(),
        })?;
        let url = std::env::var("FLOWMEND_REPAIRER_URL")
            .map_err(|_| Error::Other("FLOWMEND_REPAIRER_URL not set".into()))?;
        Ok(Self::new(key, url))
    }
}

#[async_trait]
impl FlowRepairer for HttpFlowRepairer {
    async fn propose(
        &self,
        csv: &str,
        errors: &[RemoteError],
        hints: &[FixHint],
    ) -> Result<RepairProposal> {
        let url = format!("{}/v1/flows/repair", self.base_url);
        tracing::debug!(errors = errors.len(), hints = hints.len(), "requesting generative repair");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&json!({
                "csv": csv,
                "errors": errors,
                "hints": hints,
            }))
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
                        retryable: true,
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

        let proposal: RepairProposal = response.json().await.map_err(|e| Error::Service {
            service: SERVICE_NAME.into(),
            status: status.as_u16(),
            message: format!("malformed repair response: {e}"),
            retryable: false,
        })?;
        tracing::info!(
            fixes = proposal.fixes_made.len(),
            still_broken = proposal.still_broken.len(),
            "generative repair proposal received"
        );
        Ok(proposal)
    }
}
