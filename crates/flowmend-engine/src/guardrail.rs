//! Guardrails against destructive generative proposals.
//!
//! A proposed replacement document is rejected when it drifts too far from
//! the current one: too many rows added or removed, or too many rows with a
//! broken column count. Accepted proposals still go through a residual check
//! so a "fixed" error that is demonstrably still present is caught.

use tracing::warn;

use flowmend_dialect::columns as col;
use flowmend_dialect::{parse_document, split_header, RawRow};
use flowmend_types::RemoteError;

#[derive(Debug, Clone)]
pub struct GuardrailConfig {
    /// Row-count drift must exceed this fraction of the original...
    pub row_drift_fraction: f64,
    /// ...and this absolute count before a proposal is rejected.
    pub row_drift_absolute: usize,
    /// Maximum rows with a non-canonical column count.
    pub max_column_mismatches: usize,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            row_drift_fraction: 0.05,
            row_drift_absolute: 3,
            max_column_mismatches: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(Vec<String>),
}

/// Compare a proposed document against the current one.
pub fn check_proposal(current: &str, proposed: &str, config: &GuardrailConfig) -> Verdict {
    let (current_rows, _) = split_header(parse_document(current));
    let (proposed_rows, _) = split_header(parse_document(proposed));
    let mut reasons = Vec::new();

    let drift = current_rows.len().abs_diff(proposed_rows.len());
    let fraction_limit = config.row_drift_fraction * current_rows.len() as f64;
    if drift > config.row_drift_absolute && drift as f64 > fraction_limit {
        reasons.push(format!(
            "row count drifted by {drift} ({} -> {})",
            current_rows.len(),
            proposed_rows.len()
        ));
    }

    let mismatches = proposed_rows
        .iter()
        .filter(|r| r.len() != col::COLUMN_COUNT)
        .count();
    if mismatches > config.max_column_mismatches {
        reasons.push(format!("{mismatches} rows with a broken column count"));
    }

    if reasons.is_empty() {
        Verdict::Accepted
    } else {
        for reason in &reasons {
            warn!(reason = %reason, "proposal rejected");
        }
        Verdict::Rejected(reasons)
    }
}

/// Which of `errors` are demonstrably still present in `document`: the node
/// still exists and the offending quoted token still appears in the named
/// field. Errors with no quoted token cannot be checked and are not reported.
pub fn residual_errors(document: &str, errors: &[RemoteError]) -> Vec<RemoteError> {
    let (rows, _) = split_header(parse_document(document));
    errors
        .iter()
        .filter(|e| {
            let Some(row) = find_row(&rows, e.node_id) else {
                return false;
            };
            let tokens = quoted_tokens(&e.message);
            if tokens.is_empty() {
                return false;
            }
            let haystack = match column_index(&e.field) {
                Some(index) => row.get(index).to_string(),
                None => row.fields.join(","),
            };
            tokens.iter().any(|t| haystack.contains(t.as_str()))
        })
        .cloned()
        .collect()
}

fn find_row(rows: &[RawRow], node_id: i64) -> Option<&RawRow> {
    rows.iter()
        .find(|r| r.get(col::ID).trim().parse() == Ok(node_id))
}

fn column_index(field: &str) -> Option<usize> {
    col::HEADER.iter().position(|&name| name == field)
}

/// Substrings wrapped in single or double quotes.
fn quoted_tokens(message: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for quote in ['\'', '"'] {
        let mut parts = message.split(quote);
        parts.next(); // text before the first quote
        while let (Some(inner), Some(_)) = (parts.next(), parts.next()) {
            if !inner.is_empty() {
                tokens.push(inner.to_string());
            }
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmend_dialect::serialize_document;

    fn document(n: usize) -> String {
        let rows: Vec<RawRow> = (0..n)
            .map(|i| {
                let mut row = RawRow::blank();
                row.set(col::ID, (100 + i).to_string());
                row.set(col::TYPE, "decision");
                row.set(col::BEHAVIORS, "endChat");
                row
            })
            .collect();
        serialize_document(&rows)
    }

    #[test]
    fn small_drift_is_accepted() {
        let verdict = check_proposal(&document(100), &document(98), &GuardrailConfig::default());
        assert_eq!(verdict, Verdict::Accepted);
    }

    #[test]
    fn large_drift_is_rejected() {
        let verdict = check_proposal(&document(100), &document(80), &GuardrailConfig::default());
        let Verdict::Rejected(reasons) = verdict else {
            panic!("expected rejection")
        };
        assert!(reasons[0].contains("drifted by 20"));
    }

    #[test]
    fn absolute_floor_protects_small_documents() {
        // 3 of 10 rows is 30%, but within the absolute allowance
        let verdict = check_proposal(&document(10), &document(7), &GuardrailConfig::default());
        assert_eq!(verdict, Verdict::Accepted);
        // 4 of 10 exceeds both limits
        let verdict = check_proposal(&document(10), &document(6), &GuardrailConfig::default());
        assert!(matches!(verdict, Verdict::Rejected(_)));
    }

    #[test]
    fn broken_column_counts_rejected() {
        let current = document(10);
        let mut proposed = document(10);
        for _ in 0..5 {
            proposed.push_str("1,2,3\n");
        }
        // five short rows replace nothing; drift of 5 also trips, so check
        // the reason text
        let Verdict::Rejected(reasons) =
            check_proposal(&current, &proposed, &GuardrailConfig::default())
        else {
            panic!("expected rejection")
        };
        assert!(reasons.iter().any(|r| r.contains("column count")));
    }

    #[test]
    fn residual_error_found_in_named_field() {
        let mut row = RawRow::blank();
        row.set(col::ID, "100");
        row.set(col::TYPE, "decision");
        row.set(col::NEXT_NODES, "777");
        let doc = serialize_document(&[row]);
        let errors = vec![RemoteError::new(100, "nextNodes", "reference '777' does not exist")];
        let residual = residual_errors(&doc, &errors);
        assert_eq!(residual.len(), 1);
    }

    #[test]
    fn fixed_error_is_not_residual() {
        let mut row = RawRow::blank();
        row.set(col::ID, "100");
        row.set(col::TYPE, "decision");
        row.set(col::NEXT_NODES, "101");
        let doc = serialize_document(&[row]);
        let errors = vec![RemoteError::new(100, "nextNodes", "reference '777' does not exist")];
        assert!(residual_errors(&doc, &errors).is_empty());
    }

    #[test]
    fn unverifiable_errors_are_skipped() {
        let doc = document(1);
        let errors = vec![
            RemoteError::new(100, "message", "tone is too informal"),
            RemoteError::new(999, "nextNodes", "reference '777' does not exist"),
        ];
        assert!(residual_errors(&doc, &errors).is_empty());
    }
}
