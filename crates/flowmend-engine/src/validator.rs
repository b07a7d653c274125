//! Structural validation: column-count normalization, typing, and the graph
//! checks (duplicates, orphans, dead ends, routing gaps, variable scope).
//!
//! Validation is pure and deterministic: same rows in, same entries and
//! diagnostics out, in the same order. It never returns an error — every
//! finding becomes a [`Diagnostic`] for the repair pass to act on.

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use flowmend_dialect::columns as col;
use flowmend_dialect::{
    detect_form, CommandContracts, Entry, Record, ReservedLayout, RichForm, RichType, RowError,
    RawRow, SYSTEM_VARIABLES,
};

use crate::diagnostic::{Diagnostic, DiagnosticKind};

/// Typed entries plus everything structurally wrong with them.
#[derive(Debug, Clone)]
pub struct ValidationOutput {
    pub entries: Vec<Entry>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationOutput {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Validate a complete document, including required-system-node presence.
pub fn validate(
    rows: &[RawRow],
    contracts: &CommandContracts,
    layout: &ReservedLayout,
) -> ValidationOutput {
    run(rows, contracts, layout, true)
}

/// Validate one flow segment. Segments are assembled into a full document
/// later, so system-node presence is not checked here.
pub fn validate_segment(
    rows: &[RawRow],
    contracts: &CommandContracts,
    layout: &ReservedLayout,
) -> ValidationOutput {
    run(rows, contracts, layout, false)
}

fn run(
    rows: &[RawRow],
    contracts: &CommandContracts,
    layout: &ReservedLayout,
    require_system_nodes: bool,
) -> ValidationOutput {
    let mut diagnostics = Vec::new();
    let mut entries = Vec::new();

    for row in rows {
        let Some(normalized) = normalize_row(row, &mut diagnostics) else {
            continue;
        };
        match Record::from_row(&normalized) {
            Ok((record, issues)) => {
                let id = record.id();
                for issue in issues {
                    diagnostics.push(field_issue_diag(id, issue));
                }
                entries.push(Entry::Record(record));
            }
            Err(RowError::UnknownKind(token)) => {
                let id = normalized.get(col::ID).trim().parse().ok();
                diagnostics.push(Diagnostic::new(
                    id,
                    col::TYPE,
                    DiagnosticKind::UnknownKind { token },
                ));
                entries.push(Entry::Malformed {
                    row: normalized,
                    reason: "unknown node kind".into(),
                });
            }
            // non-integer ids were dropped during normalization
            Err(RowError::NonIntegerId(_)) => unreachable!("id checked by normalize_row"),
        }
    }

    graph_checks(&entries, contracts, layout, &mut diagnostics);

    if require_system_nodes {
        let ids: HashSet<i64> = entries.iter().filter_map(Entry::id).collect();
        for (role, id) in layout.required_roles() {
            if !ids.contains(&id) {
                diagnostics.push(Diagnostic::new(
                    None,
                    col::ID,
                    DiagnosticKind::MissingSystemNode { role, id },
                ));
            }
        }
    }

    debug!(
        rows = rows.len(),
        entries = entries.len(),
        diagnostics = diagnostics.len(),
        "validation pass complete"
    );
    ValidationOutput { entries, diagnostics }
}

// --- column-count normalization ---

/// Bring a row to the canonical width, or drop it if it has no usable id.
fn normalize_row(row: &RawRow, diagnostics: &mut Vec<Diagnostic>) -> Option<RawRow> {
    let anchor: Option<i64> = row.get(col::ID).trim().parse().ok();
    let found = row.len();
    let mut fields = row.fields.clone();

    if found < col::COLUMN_COUNT {
        fields.resize(col::COLUMN_COUNT, String::new());
        diagnostics.push(Diagnostic::new(
            anchor,
            col::ID,
            DiagnosticKind::ShortRow { found },
        ));
    } else if found > col::COLUMN_COUNT {
        let extra = found - col::COLUMN_COUNT;
        match overflow_target(&fields) {
            Some(target) => {
                // an unquoted JSON object was split across extra fields;
                // glue the pieces back together with the delimiter
                let merged = fields[target..=target + extra].join(",");
                fields.splice(target..=target + extra, [merged]);
                diagnostics.push(Diagnostic::new(
                    anchor,
                    target,
                    DiagnosticKind::LongRowMerged { found, merged_into: target },
                ));
            }
            None => {
                fields.truncate(col::COLUMN_COUNT);
                diagnostics.push(Diagnostic::new(
                    anchor,
                    col::ID,
                    DiagnosticKind::LongRowTrimmed { found },
                ));
            }
        }
    }

    if anchor.is_none() {
        diagnostics.push(Diagnostic::new(
            None,
            col::ID,
            DiagnosticKind::RowDropped { id_text: row.get(col::ID).to_string() },
        ));
        return None;
    }
    Some(RawRow::new(fields))
}

/// The first JSON-capable column whose field looks like the start of a JSON
/// object. That column is where a split happened, if anywhere.
fn overflow_target(fields: &[String]) -> Option<usize> {
    col::JSON_COLUMNS
        .into_iter()
        .find(|&j| fields.get(j).is_some_and(|f| f.trim_start().starts_with('{')))
}

fn field_issue_diag(id: i64, issue: flowmend_dialect::FieldIssue) -> Diagnostic {
    use flowmend_dialect::IssueKind;
    let kind = match issue.kind {
        IssueKind::JunkToken => DiagnosticKind::JunkToken { token: issue.token },
        IssueKind::MalformedPair => DiagnosticKind::MalformedPair { token: issue.token },
        IssueKind::DuplicateArm => DiagnosticKind::DuplicateArm { value: issue.token },
        IssueKind::NonstandardBool => DiagnosticKind::NonstandardBool { token: issue.token },
        IssueKind::BadVariableName => DiagnosticKind::BadVariableName { name: issue.token },
        IssueKind::CrossKindValue => DiagnosticKind::CrossKindValue { value: issue.token },
        IssueKind::UnparseableJson => DiagnosticKind::UnparseableJson {
            snippet: truncate(&issue.token, 80),
        },
        IssueKind::UnknownRichType => DiagnosticKind::UnknownRichType { token: issue.token },
    };
    Diagnostic::new(Some(id), issue.column, kind)
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

// --- graph checks ---

fn graph_checks(
    entries: &[Entry],
    contracts: &CommandContracts,
    layout: &ReservedLayout,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let records: Vec<&Record> = entries.iter().filter_map(Entry::as_record).collect();

    // duplicate ids, in first-occurrence order
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for r in &records {
        *counts.entry(r.id()).or_default() += 1;
    }
    for (&id, &count) in &counts {
        if count > 1 {
            diagnostics.push(Diagnostic::new(
                Some(id),
                col::ID,
                DiagnosticKind::DuplicateId { count },
            ));
        }
    }

    // references may legitimately point at system ids even before the system
    // nodes exist (segments reference the shared menu and handoff nodes)
    let mut known: HashSet<i64> = counts.keys().copied().collect();
    known.extend(layout.system_ids());

    for r in &records {
        for reference in r.references() {
            if !known.contains(&reference.target) {
                diagnostics.push(Diagnostic::new(
                    Some(r.id()),
                    reference.column,
                    DiagnosticKind::OrphanReference { target: reference.target },
                ));
            }
        }
    }

    for r in &records {
        match r {
            Record::Decision(d) => {
                // the designated end-of-chat node ends the conversation even
                // when its behaviors column is empty
                if !d.is_terminal() && d.meta.id != layout.end_of_chat {
                    let dests = d.destinations();
                    if dests.is_empty() {
                        diagnostics.push(Diagnostic::new(
                            Some(d.meta.id),
                            col::NEXT_NODES,
                            DiagnosticKind::DeadEnd,
                        ));
                    } else if dests.iter().all(|&t| t == d.meta.id) {
                        diagnostics.push(Diagnostic::new(
                            Some(d.meta.id),
                            col::NEXT_NODES,
                            DiagnosticKind::SelfLoop,
                        ));
                    }
                }
                if let Some(rich_type) = d.rich_type {
                    check_rich_form(d.meta.id, rich_type, &d.rich_content, diagnostics);
                }
            }
            Record::Action(a) => {
                if let Some(outputs) = contracts.outputs(&a.command) {
                    let covered: HashSet<&str> =
                        a.what_next.iter().map(|arm| arm.value.as_str()).collect();
                    let missing: Vec<String> = outputs
                        .iter()
                        .filter(|v| !covered.contains(v.as_str()))
                        .cloned()
                        .collect();
                    if !missing.is_empty() {
                        diagnostics.push(Diagnostic::new(
                            Some(a.meta.id),
                            col::WHAT_NEXT,
                            DiagnosticKind::RoutingGap { command: a.command.clone(), missing },
                        ));
                    }
                }
            }
        }
    }

    variable_scope_checks(&records, diagnostics);
}

fn check_rich_form(
    id: i64,
    rich_type: RichType,
    content: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    // image content is a URL, not a button list; no form to check
    if rich_type == RichType::Image {
        return;
    }
    let Some(form) = detect_form(content) else {
        return;
    };
    let expected_pipe = rich_type.is_pipe_form();
    let actual_pipe = form == RichForm::Pipe;
    if expected_pipe != actual_pipe {
        diagnostics.push(Diagnostic::new(
            Some(id),
            col::RICH_CONTENT,
            DiagnosticKind::RichFormMismatch { expected_pipe },
        ));
    }
}

// --- variable scope ---

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{([A-Z][A-Z0-9_]*)\}").unwrap())
}

/// Scope is positional by ascending id: a `{NAME}` reference resolves against
/// system variables plus every `variable` declaration at or before the node,
/// plus (for Action `paramInput`) the node's own `nodeInput` names.
fn variable_scope_checks(records: &[&Record], diagnostics: &mut Vec<Diagnostic>) {
    let mut ordered: Vec<&Record> = records.to_vec();
    ordered.sort_by_key(|r| r.id());

    let mut available: HashSet<String> =
        SYSTEM_VARIABLES.iter().map(|s| s.to_string()).collect();

    for r in ordered {
        for name in &r.meta().variables {
            available.insert(name.clone());
        }
        match r {
            Record::Decision(d) => {
                check_references(d.meta.id, col::MESSAGE, &d.message, &available, &[], diagnostics);
                check_references(
                    d.meta.id,
                    col::RICH_CONTENT,
                    &d.rich_content,
                    &available,
                    &[],
                    diagnostics,
                );
            }
            Record::Action(a) => {
                let local: Vec<&str> =
                    a.node_input.iter().map(|(name, _)| name.as_str()).collect();
                check_references(
                    a.meta.id,
                    col::PARAM_INPUT,
                    &a.param_input,
                    &available,
                    &local,
                    diagnostics,
                );
            }
        }
    }
}

fn check_references(
    id: i64,
    column: usize,
    text: &str,
    available: &HashSet<String>,
    local: &[&str],
    diagnostics: &mut Vec<Diagnostic>,
) {
    let mut seen: HashSet<&str> = HashSet::new();
    for captures in variable_pattern().captures_iter(text) {
        let name = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        if available.contains(name) || local.contains(&name) || !seen.insert(name) {
            continue;
        }
        diagnostics.push(Diagnostic::new(
            Some(id),
            column,
            DiagnosticKind::UnboundVariable { name: name.to_string() },
        ));
    }
}
