//! Structural diagnostics emitted by the validator and consumed by the
//! deterministic repair rules.
//!
//! Every diagnostic carries enough payload for its repair rule to act without
//! re-deriving anything from the document.

use flowmend_dialect::columns;
use flowmend_dialect::SystemRole;

/// One structural finding, anchored to a node and column where possible.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// The node the finding is about; `None` for rows with no usable id.
    pub node_id: Option<i64>,
    /// Column index the finding is anchored to.
    pub column: usize,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(node_id: Option<i64>, column: usize, kind: DiagnosticKind) -> Self {
        let message = kind.describe(node_id, column);
        Self { node_id, column, kind, message }
    }

    /// Header name of the anchored column.
    pub fn field(&self) -> &'static str {
        columns::name(self.column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticKind {
    /// Row had fewer fields than the canonical width; padded.
    ShortRow { found: usize },
    /// Row had extra fields that were merged back into a JSON column.
    LongRowMerged { found: usize, merged_into: usize },
    /// Row had extra fields and no JSON column to blame; trailing fields cut.
    LongRowTrimmed { found: usize },
    /// Row had no usable integer id and was removed.
    RowDropped { id_text: String },
    /// Row's `type` value is not a known node kind; passed through untyped.
    UnknownKind { token: String },
    /// A non-empty value in a column belonging to the other node kind.
    CrossKindValue { value: String },
    /// More than one record claims this id.
    DuplicateId { count: usize },
    /// A reference target that no record defines.
    OrphanReference { target: i64 },
    /// A non-terminal Decision with no outgoing destination.
    DeadEnd,
    /// A Decision whose only destinations point back at itself.
    SelfLoop,
    /// An Action whose `whatNext` does not cover its command contract.
    RoutingGap { command: String, missing: Vec<String> },
    /// A `{NAME}` reference with no visible declaration.
    UnboundVariable { name: String },
    /// A `value~id` pair that would not parse.
    MalformedPair { token: String },
    /// A `whatNext` value token listed more than once.
    DuplicateArm { value: String },
    /// A list slot that is not an integer id.
    JunkToken { token: String },
    /// A boolean spelled non-canonically.
    NonstandardBool { token: String },
    /// A declared variable name that is not UPPER_SNAKE.
    BadVariableName { name: String },
    /// A JSON column that defeated even the recovery parser.
    UnparseableJson { snippet: String },
    /// A `richType` tag that is not a known value.
    UnknownRichType { token: String },
    /// `richType` and the content's actual form disagree.
    RichFormMismatch { expected_pipe: bool },
    /// A required system node is absent.
    MissingSystemNode { role: SystemRole, id: i64 },
}

impl DiagnosticKind {
    /// Stable short name, used in signatures and logs.
    pub fn name(&self) -> &'static str {
        match self {
            DiagnosticKind::ShortRow { .. } => "short_row",
            DiagnosticKind::LongRowMerged { .. } => "long_row_merged",
            DiagnosticKind::LongRowTrimmed { .. } => "long_row_trimmed",
            DiagnosticKind::RowDropped { .. } => "row_dropped",
            DiagnosticKind::UnknownKind { .. } => "unknown_kind",
            DiagnosticKind::CrossKindValue { .. } => "cross_kind_value",
            DiagnosticKind::DuplicateId { .. } => "duplicate_id",
            DiagnosticKind::OrphanReference { .. } => "orphan_reference",
            DiagnosticKind::DeadEnd => "dead_end",
            DiagnosticKind::SelfLoop => "self_loop",
            DiagnosticKind::RoutingGap { .. } => "routing_gap",
            DiagnosticKind::UnboundVariable { .. } => "unbound_variable",
            DiagnosticKind::MalformedPair { .. } => "malformed_pair",
            DiagnosticKind::DuplicateArm { .. } => "duplicate_arm",
            DiagnosticKind::JunkToken { .. } => "junk_token",
            DiagnosticKind::NonstandardBool { .. } => "nonstandard_bool",
            DiagnosticKind::BadVariableName { .. } => "bad_variable_name",
            DiagnosticKind::UnparseableJson { .. } => "unparseable_json",
            DiagnosticKind::UnknownRichType { .. } => "unknown_rich_type",
            DiagnosticKind::RichFormMismatch { .. } => "rich_form_mismatch",
            DiagnosticKind::MissingSystemNode { .. } => "missing_system_node",
        }
    }

    fn describe(&self, node_id: Option<i64>, column: usize) -> String {
        let node = match node_id {
            Some(id) => format!("node {id}"),
            None => "row".to_string(),
        };
        let field = columns::name(column);
        match self {
            DiagnosticKind::ShortRow { found } => {
                format!("{node}: {found} fields, padded to canonical width")
            }
            DiagnosticKind::LongRowMerged { found, merged_into } => format!(
                "{node}: {found} fields, overflow merged into {}",
                columns::name(*merged_into)
            ),
            DiagnosticKind::LongRowTrimmed { found } => {
                format!("{node}: {found} fields, trailing fields dropped")
            }
            DiagnosticKind::RowDropped { id_text } => {
                format!("row dropped: id {id_text:?} is not an integer")
            }
            DiagnosticKind::UnknownKind { token } => {
                format!("{node}: unknown type {token:?}, row passed through untyped")
            }
            DiagnosticKind::CrossKindValue { value } => {
                format!("{node}: {field} is not valid for this node kind (was {value:?})")
            }
            DiagnosticKind::DuplicateId { count } => {
                format!("{node}: id defined by {count} records")
            }
            DiagnosticKind::OrphanReference { target } => {
                format!("{node}: {field} references missing node {target}")
            }
            DiagnosticKind::DeadEnd => format!("{node}: no outgoing destination"),
            DiagnosticKind::SelfLoop => format!("{node}: only destination is itself"),
            DiagnosticKind::RoutingGap { command, missing } => format!(
                "{node}: whatNext misses {} outputs of {command}: {}",
                missing.len(),
                missing.join(", ")
            ),
            DiagnosticKind::UnboundVariable { name } => {
                format!("{node}: {field} references undeclared variable {{{name}}}")
            }
            DiagnosticKind::MalformedPair { token } => {
                format!("{node}: {field} pair {token:?} would not parse")
            }
            DiagnosticKind::DuplicateArm { value } => {
                format!("{node}: {field} lists {value:?} more than once, first kept")
            }
            DiagnosticKind::JunkToken { token } => {
                format!("{node}: {field} token {token:?} is not an id")
            }
            DiagnosticKind::NonstandardBool { token } => {
                format!("{node}: {field} boolean spelled {token:?}")
            }
            DiagnosticKind::BadVariableName { name } => {
                format!("{node}: variable {name:?} is not UPPER_SNAKE")
            }
            DiagnosticKind::UnparseableJson { snippet } => {
                format!("{node}: {field} JSON unrecoverable: {snippet:?}")
            }
            DiagnosticKind::UnknownRichType { token } => {
                format!("{node}: unknown richType {token:?}")
            }
            DiagnosticKind::RichFormMismatch { expected_pipe } => {
                let expected = if *expected_pipe { "pipe" } else { "JSON" };
                format!("{node}: richContent form does not match richType (expected {expected})")
            }
            DiagnosticKind::MissingSystemNode { role, id } => {
                format!("document is missing system node {role:?} (id {id})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmend_dialect::columns as col;

    #[test]
    fn messages_name_the_column() {
        let d = Diagnostic::new(
            Some(5),
            col::NEXT_NODES,
            DiagnosticKind::OrphanReference { target: 77 },
        );
        assert_eq!(d.field(), "nextNodes");
        assert!(d.message.contains("node 5"));
        assert!(d.message.contains("77"));
    }

    #[test]
    fn anonymous_rows_render_without_id() {
        let d = Diagnostic::new(
            None,
            col::ID,
            DiagnosticKind::RowDropped { id_text: "Sure!".into() },
        );
        assert!(d.message.contains("Sure!"));
        assert!(!d.message.contains("node "));
    }

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(DiagnosticKind::DeadEnd.name(), "dead_end");
        assert_eq!(
            DiagnosticKind::RoutingGap { command: "X".into(), missing: vec![] }.name(),
            "routing_gap"
        );
    }
}
