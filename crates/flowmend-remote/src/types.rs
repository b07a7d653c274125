//! Wire types exchanged with the collaborators. The sole on-the-wire document
//! format is the 26-column UTF-8 delimited text with its header row; these
//! structs wrap it with the JSON envelopes each service speaks.

use serde::{Deserialize, Serialize};

use flowmend_types::RemoteError;

/// Response of the external semantic validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<RemoteError>,
    #[serde(rename = "versionId", default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

impl ValidationReport {
    pub fn clean() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            version_id: None,
        }
    }
}

/// Response of the generative repairer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairProposal {
    /// The full proposed document text.
    pub csv: String,
    #[serde(rename = "fixesMade", default)]
    pub fixes_made: Vec<String>,
    #[serde(rename = "stillBroken", default)]
    pub still_broken: Vec<String>,
}

/// A previously-learned hint about how an error class was fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixHint {
    #[serde(rename = "patternId")]
    pub pattern_id: String,
    pub description: String,
    pub succeeded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_report_deserializes_sparse_payload() {
        let report: ValidationReport = serde_json::from_str(r#"{"valid": true}"#).unwrap();
        assert!(report.valid);
        assert!(report.errors.is_empty());
        assert!(report.version_id.is_none());
    }

    #[test]
    fn validation_report_full_payload() {
        let json = r#"{
            "valid": false,
            "errors": [{"nodeId": 12, "field": "whatNext", "message": "unhandled value 'other'"}],
            "versionId": "v7"
        }"#;
        let report: ValidationReport = serde_json::from_str(json).unwrap();
        assert!(!report.valid);
        assert_eq!(report.errors[0].node_id, 12);
        assert_eq!(report.version_id.as_deref(), Some("v7"));
    }

    #[test]
    fn repair_proposal_round_trip() {
        let proposal = RepairProposal {
            csv: "id,type\n".into(),
            fixes_made: vec!["rewrote orphan 20 -> 201".into()],
            still_broken: vec![],
        };
        let json = serde_json::to_string(&proposal).unwrap();
        assert!(json.contains("fixesMade"));
        let back: RepairProposal = serde_json::from_str(&json).unwrap();
        assert_eq!(back, proposal);
    }
}
