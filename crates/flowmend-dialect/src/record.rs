//! Typed record model for flow nodes.
//!
//! A row is either a Decision (routes on user input) or an Action (runs a
//! server-side command and routes on its result). The tagged variant makes
//! populating the other kind's fields unrepresentable; anything the generator
//! leaked into cross-kind columns is surfaced as a [`FieldIssue`] instead.

use crate::codec::{serialize_document, RawRow};
use crate::columns as col;
use crate::forgiving_json::recover_json;
use crate::rich;

/// Variable names that are always in scope.
pub const SYSTEM_VARIABLES: [&str; 5] =
    ["USER_NAME", "USER_EMAIL", "CHANNEL", "LANGUAGE", "SESSION_ID"];

/// Behavior tokens that make a Decision a legitimate end of the flow.
pub const TERMINAL_BEHAVIORS: [&str; 2] = ["transferToAgent", "endChat"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Decision,
    Action,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Decision => "decision",
            NodeKind::Action => "action",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RichType {
    Buttons,
    QuickReplies,
    List,
    Card,
    Image,
}

impl RichType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buttons" => Some(RichType::Buttons),
            "quickreplies" | "quick_replies" => Some(RichType::QuickReplies),
            "list" => Some(RichType::List),
            "card" => Some(RichType::Card),
            "image" => Some(RichType::Image),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RichType::Buttons => "buttons",
            RichType::QuickReplies => "quickReplies",
            RichType::List => "list",
            RichType::Card => "card",
            RichType::Image => "image",
        }
    }

    /// Pipe-form types carry `label~dest|...` content; the others carry a
    /// JSON object with an `options` array.
    pub fn is_pipe_form(&self) -> bool {
        matches!(self, RichType::Buttons | RichType::QuickReplies)
    }
}

/// Fields shared by both node kinds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeMeta {
    pub id: i64,
    pub name: String,
    pub variables: Vec<String>,
    pub tags: Vec<String>,
    pub flows_label: String,
    pub style_class: String,
    pub language: String,
    pub channel: String,
    pub notes: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionNode {
    pub meta: NodeMeta,
    pub intent: String,
    pub nlu_disabled: Option<bool>,
    pub next_nodes: Vec<i64>,
    pub message: String,
    pub rich_type: Option<RichType>,
    /// Raw rich content; use [`rich`] for typed access.
    pub rich_content: String,
    pub answer_required: Option<bool>,
    pub behaviors: Vec<String>,
}

impl DecisionNode {
    /// All routable destinations: `nextNodes` plus rich-content buttons.
    pub fn destinations(&self) -> Vec<i64> {
        let mut out = self.next_nodes.clone();
        let (buttons, _) = rich::parse_buttons(&self.rich_content);
        out.extend(buttons.iter().map(|b| b.dest));
        out
    }

    pub fn is_terminal(&self) -> bool {
        self.behaviors
            .iter()
            .any(|b| TERMINAL_BEHAVIORS.contains(&b.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhatNextArm {
    pub value: String,
    pub target: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionNode {
    pub meta: NodeMeta,
    pub command: String,
    pub description: String,
    pub output_var: String,
    /// Ordered local-name → producing-node-id bindings.
    pub node_input: Vec<(String, i64)>,
    /// Raw JSON text of command parameters.
    pub param_input: String,
    pub decision_var: String,
    pub what_next: Vec<WhatNextArm>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Decision(DecisionNode),
    Action(ActionNode),
}

/// Where an id is used as a reference target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub column: usize,
    pub target: i64,
}

/// A recoverable oddity noticed while typing a row. The validator turns these
/// into diagnostics; typing itself stays permissive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub column: usize,
    pub kind: IssueKind,
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// A list slot that is not an integer id.
    JunkToken,
    /// A `value~id` pair missing the `~` or with a non-integer id.
    MalformedPair,
    /// A `whatNext` value token listed more than once; the first pair wins.
    DuplicateArm,
    /// A boolean spelled non-canonically (`TRUE`, `1`, `yes`) or unreadably.
    NonstandardBool,
    /// A declared variable name that is not UPPER_SNAKE.
    BadVariableName,
    /// A non-empty value in a column belonging to the other node kind.
    CrossKindValue,
    /// A JSON column whose content defeats even the recovery parser.
    UnparseableJson,
    /// A `richType` tag that is not a known value.
    UnknownRichType,
}

/// Why a row could not be typed at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    NonIntegerId(String),
    UnknownKind(String),
}

impl Record {
    pub fn id(&self) -> i64 {
        self.meta().id
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Record::Decision(_) => NodeKind::Decision,
            Record::Action(_) => NodeKind::Action,
        }
    }

    pub fn meta(&self) -> &NodeMeta {
        match self {
            Record::Decision(d) => &d.meta,
            Record::Action(a) => &a.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut NodeMeta {
        match self {
            Record::Decision(d) => &mut d.meta,
            Record::Action(a) => &mut a.meta,
        }
    }

    /// Every place this record uses an id as a target: `nextNodes` entries,
    /// `whatNext` targets, and rich-content button destinations.
    pub fn references(&self) -> Vec<Reference> {
        match self {
            Record::Decision(d) => {
                let mut refs: Vec<Reference> = d
                    .next_nodes
                    .iter()
                    .map(|&target| Reference { column: col::NEXT_NODES, target })
                    .collect();
                let (buttons, _) = rich::parse_buttons(&d.rich_content);
                refs.extend(buttons.iter().map(|b| Reference {
                    column: col::RICH_CONTENT,
                    target: b.dest,
                }));
                refs
            }
            Record::Action(a) => a
                .what_next
                .iter()
                .map(|arm| Reference {
                    column: col::WHAT_NEXT,
                    target: arm.target,
                })
                .collect(),
        }
    }

    /// Rewrite every reference target through `map`, preserving order and
    /// rich-content form.
    pub fn rewrite_targets(&mut self, map: impl Fn(i64) -> i64) {
        match self {
            Record::Decision(d) => {
                for id in &mut d.next_nodes {
                    *id = map(*id);
                }
                if let Some(rewritten) = rich::rewrite_dests(&d.rich_content, &map) {
                    d.rich_content = rewritten;
                }
            }
            Record::Action(a) => {
                for arm in &mut a.what_next {
                    arm.target = map(arm.target);
                }
            }
        }
    }

    /// Rewrite `nodeInput` binding sources. Kept separate from
    /// [`rewrite_targets`]: bindings are not References for orphan purposes,
    /// but the allocator must still renumber them.
    pub fn rewrite_bindings(&mut self, map: impl Fn(i64) -> i64) {
        if let Record::Action(a) = self {
            for (_, id) in &mut a.node_input {
                *id = map(*id);
            }
        }
    }

    /// Type a normalized raw row. Permissive: junk is dropped but reported.
    pub fn from_row(row: &RawRow) -> Result<(Record, Vec<FieldIssue>), RowError> {
        let id: i64 = row
            .get(col::ID)
            .trim()
            .parse()
            .map_err(|_| RowError::NonIntegerId(row.get(col::ID).to_string()))?;

        let kind = match row.get(col::TYPE).trim().to_ascii_lowercase().as_str() {
            "decision" => NodeKind::Decision,
            "action" => NodeKind::Action,
            other => return Err(RowError::UnknownKind(other.to_string())),
        };

        let mut issues = Vec::new();
        let mut meta = NodeMeta {
            id,
            name: row.get(col::NAME).to_string(),
            variables: Vec::new(),
            tags: split_tokens(row.get(col::TAGS)),
            flows_label: row.get(col::FLOWS_LABEL).to_string(),
            style_class: row.get(col::STYLE_CLASS).to_string(),
            language: row.get(col::LANGUAGE).to_string(),
            channel: row.get(col::CHANNEL).to_string(),
            notes: row.get(col::NOTES).to_string(),
            version: row.get(col::VERSION).to_string(),
        };
        for name in split_tokens(row.get(col::VARIABLE)) {
            if !is_upper_snake(&name) {
                issues.push(FieldIssue {
                    column: col::VARIABLE,
                    kind: IssueKind::BadVariableName,
                    token: name.clone(),
                });
            }
            meta.variables.push(name);
        }

        let foreign = match kind {
            NodeKind::Decision => col::ACTION_COLUMNS.as_slice(),
            NodeKind::Action => col::DECISION_COLUMNS.as_slice(),
        };
        for &c in foreign {
            let value = row.get(c);
            if !value.trim().is_empty() {
                issues.push(FieldIssue {
                    column: c,
                    kind: IssueKind::CrossKindValue,
                    token: value.to_string(),
                });
            }
        }

        let record = match kind {
            NodeKind::Decision => {
                let rich_type_raw = row.get(col::RICH_TYPE).trim();
                let rich_type = if rich_type_raw.is_empty() {
                    None
                } else {
                    let parsed = RichType::parse(rich_type_raw);
                    if parsed.is_none() {
                        issues.push(FieldIssue {
                            column: col::RICH_TYPE,
                            kind: IssueKind::UnknownRichType,
                            token: rich_type_raw.to_string(),
                        });
                    }
                    parsed
                };
                Record::Decision(DecisionNode {
                    meta,
                    intent: row.get(col::INTENT).to_string(),
                    nlu_disabled: parse_bool(row, col::NLU_DISABLED, &mut issues),
                    next_nodes: parse_id_list(row, col::NEXT_NODES, &mut issues),
                    message: row.get(col::MESSAGE).to_string(),
                    rich_type,
                    rich_content: row.get(col::RICH_CONTENT).to_string(),
                    answer_required: parse_bool(row, col::ANSWER_REQUIRED, &mut issues),
                    behaviors: split_tokens(row.get(col::BEHAVIORS)),
                })
            }
            NodeKind::Action => Record::Action(ActionNode {
                meta,
                command: row.get(col::COMMAND).trim().to_string(),
                description: row.get(col::DESCRIPTION).to_string(),
                output_var: row.get(col::OUTPUT_VAR).trim().to_string(),
                node_input: parse_node_input(row, &mut issues),
                param_input: row.get(col::PARAM_INPUT).to_string(),
                decision_var: row.get(col::DECISION_VAR).trim().to_string(),
                what_next: parse_what_next(row, &mut issues),
            }),
        };

        Ok((record, issues))
    }

    /// Serialize back to a canonical 26-column row. Cross-kind leakage is not
    /// representable and therefore not emitted.
    pub fn to_row(&self) -> RawRow {
        let mut row = RawRow::blank();
        let meta = self.meta();
        row.set(col::ID, meta.id.to_string());
        row.set(col::TYPE, self.kind().as_str());
        row.set(col::NAME, meta.name.clone());
        row.set(col::VARIABLE, meta.variables.join(";"));
        row.set(col::TAGS, meta.tags.join(";"));
        row.set(col::FLOWS_LABEL, meta.flows_label.clone());
        row.set(col::STYLE_CLASS, meta.style_class.clone());
        row.set(col::LANGUAGE, meta.language.clone());
        row.set(col::CHANNEL, meta.channel.clone());
        row.set(col::NOTES, meta.notes.clone());
        row.set(col::VERSION, meta.version.clone());

        match self {
            Record::Decision(d) => {
                row.set(col::INTENT, d.intent.clone());
                row.set(col::NLU_DISABLED, bool_text(d.nlu_disabled));
                row.set(
                    col::NEXT_NODES,
                    d.next_nodes
                        .iter()
                        .map(i64::to_string)
                        .collect::<Vec<_>>()
                        .join(";"),
                );
                row.set(col::MESSAGE, d.message.clone());
                row.set(
                    col::RICH_TYPE,
                    d.rich_type.map(|t| t.as_str()).unwrap_or(""),
                );
                row.set(col::RICH_CONTENT, d.rich_content.clone());
                row.set(col::ANSWER_REQUIRED, bool_text(d.answer_required));
                row.set(col::BEHAVIORS, d.behaviors.join(";"));
            }
            Record::Action(a) => {
                row.set(col::COMMAND, a.command.clone());
                row.set(col::DESCRIPTION, a.description.clone());
                row.set(col::OUTPUT_VAR, a.output_var.clone());
                row.set(col::NODE_INPUT, node_input_text(&a.node_input));
                row.set(col::PARAM_INPUT, a.param_input.clone());
                row.set(col::DECISION_VAR, a.decision_var.clone());
                row.set(
                    col::WHAT_NEXT,
                    a.what_next
                        .iter()
                        .map(|arm| format!("{}~{}", arm.value, arm.target))
                        .collect::<Vec<_>>()
                        .join("|"),
                );
            }
        }
        row
    }
}

/// A typed record, or a row we refuse to guess about. Malformed rows pass
/// through serialization unchanged rather than being dropped or corrupted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Record(Record),
    Malformed { row: RawRow, reason: String },
}

impl Entry {
    pub fn id(&self) -> Option<i64> {
        match self {
            Entry::Record(r) => Some(r.id()),
            Entry::Malformed { .. } => None,
        }
    }

    pub fn to_row(&self) -> RawRow {
        match self {
            Entry::Record(r) => r.to_row(),
            Entry::Malformed { row, .. } => row.clone(),
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Entry::Record(r) => Some(r),
            Entry::Malformed { .. } => None,
        }
    }
}

/// Serialize typed entries to full document text (header included).
pub fn serialize_entries(entries: &[Entry]) -> String {
    let rows: Vec<RawRow> = entries.iter().map(Entry::to_row).collect();
    serialize_document(&rows)
}

// --- field parsing helpers ---

fn split_tokens(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_upper_snake(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn parse_bool(row: &RawRow, column: usize, issues: &mut Vec<FieldIssue>) -> Option<bool> {
    let raw = row.get(column).trim();
    match raw {
        "" => None,
        "true" => Some(true),
        "false" => Some(false),
        other => {
            let coerced = match other.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" => Some(true),
                "false" | "0" | "no" | "n" => Some(false),
                _ => None,
            };
            issues.push(FieldIssue {
                column,
                kind: IssueKind::NonstandardBool,
                token: other.to_string(),
            });
            coerced
        }
    }
}

/// `;`-separated ids; the generator sometimes uses commas instead.
fn parse_id_list(row: &RawRow, column: usize, issues: &mut Vec<FieldIssue>) -> Vec<i64> {
    let mut out = Vec::new();
    for token in row.get(column).split([';', ',']) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match token.parse::<i64>() {
            Ok(id) => out.push(id),
            Err(_) => issues.push(FieldIssue {
                column,
                kind: IssueKind::JunkToken,
                token: token.to_string(),
            }),
        }
    }
    out
}

fn parse_what_next(row: &RawRow, issues: &mut Vec<FieldIssue>) -> Vec<WhatNextArm> {
    let mut arms = Vec::new();
    for token in row.get(col::WHAT_NEXT).split('|') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match token.split_once('~') {
            Some((value, target)) => match target.trim().parse::<i64>() {
                Ok(id) => {
                    let value = value.trim();
                    if arms.iter().any(|a: &WhatNextArm| a.value == value) {
                        issues.push(FieldIssue {
                            column: col::WHAT_NEXT,
                            kind: IssueKind::DuplicateArm,
                            token: value.to_string(),
                        });
                    } else {
                        arms.push(WhatNextArm { value: value.to_string(), target: id });
                    }
                }
                Err(_) => issues.push(FieldIssue {
                    column: col::WHAT_NEXT,
                    kind: IssueKind::MalformedPair,
                    token: token.to_string(),
                }),
            },
            None => issues.push(FieldIssue {
                column: col::WHAT_NEXT,
                kind: IssueKind::MalformedPair,
                token: token.to_string(),
            }),
        }
    }
    arms
}

fn parse_node_input(row: &RawRow, issues: &mut Vec<FieldIssue>) -> Vec<(String, i64)> {
    let raw = row.get(col::NODE_INPUT).trim();
    if raw.is_empty() {
        return Vec::new();
    }
    let value = match recover_json(raw) {
        Ok(v) => v,
        Err(_) => {
            issues.push(FieldIssue {
                column: col::NODE_INPUT,
                kind: IssueKind::UnparseableJson,
                token: raw.to_string(),
            });
            return Vec::new();
        }
    };
    let Some(obj) = value.as_object() else {
        issues.push(FieldIssue {
            column: col::NODE_INPUT,
            kind: IssueKind::UnparseableJson,
            token: raw.to_string(),
        });
        return Vec::new();
    };
    let mut bindings = Vec::new();
    for (name, v) in obj {
        let id = match v {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        match id {
            Some(id) => bindings.push((name.clone(), id)),
            None => issues.push(FieldIssue {
                column: col::NODE_INPUT,
                kind: IssueKind::JunkToken,
                token: format!("{name}:{v}"),
            }),
        }
    }
    bindings
}

fn node_input_text(bindings: &[(String, i64)]) -> String {
    if bindings.is_empty() {
        return String::new();
    }
    let mut obj = serde_json::Map::new();
    for (name, id) in bindings {
        obj.insert(name.clone(), serde_json::json!(id));
    }
    serde_json::Value::Object(obj).to_string()
}

fn bool_text(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "true",
        Some(false) => "false",
        None => "",
    }
}
