//! Collaborator interfaces for the flowmend refinement loop.
//!
//! Three external services, each behind an `async_trait` so sessions can be
//! driven against HTTP backends in production and in-process mocks in tests:
//! the semantic validator (authoritative accept/reject), the generative
//! repairer (proposes fixes for what the deterministic rules cannot handle),
//! and the best-effort error-learning store.

pub mod learning;
pub mod repairer;
pub mod types;
pub mod validator;

pub use learning::{HttpLearningStore, LearningStore, NoopLearningStore};
pub use repairer::{FlowRepairer, HttpFlowRepairer};
pub use types::{FixHint, RepairProposal, ValidationReport};
pub use validator::{HttpSemanticValidator, SemanticValidator};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowmend_types::{RemoteError, Result};

    struct AlwaysValid;

    #[async_trait]
    impl SemanticValidator for AlwaysValid {
        async fn validate(&self, _csv: &str) -> Result<ValidationReport> {
            Ok(ValidationReport::clean())
        }
    }

    struct EchoRepairer;

    #[async_trait]
    impl FlowRepairer for EchoRepairer {
        async fn propose(
            &self,
            csv: &str,
            errors: &[RemoteError],
            _hints: &[FixHint],
        ) -> Result<RepairProposal> {
            Ok(RepairProposal {
                csv: csv.to_string(),
                fixes_made: errors.iter().map(|e| e.message.clone()).collect(),
                still_broken: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn traits_are_object_safe_behind_arc() {
        use std::sync::Arc;
        let validator: Arc<dyn SemanticValidator> = Arc::new(AlwaysValid);
        let repairer: Arc<dyn FlowRepairer> = Arc::new(EchoRepairer);

        let report = validator.validate("id,type\n").await.unwrap();
        assert!(report.valid);

        let errors = vec![RemoteError::new(5, "nextNodes", "orphan 20")];
        let proposal = repairer.propose("id,type\n", &errors, &[]).await.unwrap();
        assert_eq!(proposal.fixes_made, vec!["orphan 20"]);
    }
}
