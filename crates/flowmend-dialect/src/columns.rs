//! Named column registry for the 26-field flow dialect.
//!
//! All field access goes through these named indices; nothing else in the
//! workspace indexes a row with a bare literal.

/// Number of columns in a well-formed row.
pub const COLUMN_COUNT: usize = 26;

/// Stable header names, in column order. This exact row is the first line of
/// every serialized document.
pub const HEADER: [&str; COLUMN_COUNT] = [
    "id",
    "type",
    "name",
    "intent",
    "nluDisabled",
    "nextNodes",
    "message",
    "richType",
    "richContent",
    "answerRequired",
    "behaviors",
    "command",
    "description",
    "outputVar",
    "nodeInput",
    "paramInput",
    "decisionVar",
    "whatNext",
    "variable",
    "tags",
    "flowsLabel",
    "styleClass",
    "language",
    "channel",
    "notes",
    "version",
];

pub const ID: usize = 0;
pub const TYPE: usize = 1;
pub const NAME: usize = 2;
pub const INTENT: usize = 3;
pub const NLU_DISABLED: usize = 4;
pub const NEXT_NODES: usize = 5;
pub const MESSAGE: usize = 6;
pub const RICH_TYPE: usize = 7;
pub const RICH_CONTENT: usize = 8;
pub const ANSWER_REQUIRED: usize = 9;
pub const BEHAVIORS: usize = 10;
pub const COMMAND: usize = 11;
pub const DESCRIPTION: usize = 12;
pub const OUTPUT_VAR: usize = 13;
pub const NODE_INPUT: usize = 14;
pub const PARAM_INPUT: usize = 15;
pub const DECISION_VAR: usize = 16;
pub const WHAT_NEXT: usize = 17;
pub const VARIABLE: usize = 18;
pub const TAGS: usize = 19;
pub const FLOWS_LABEL: usize = 20;
pub const STYLE_CLASS: usize = 21;
pub const LANGUAGE: usize = 22;
pub const CHANNEL: usize = 23;
pub const NOTES: usize = 24;
pub const VERSION: usize = 25;

/// Columns that may legitimately contain a JSON object, in the scan order
/// used by the overflow-merge heuristic. `RICH_CONTENT` is the first
/// JSON-capable column, so merge scans start at index 8.
pub const JSON_COLUMNS: [usize; 3] = [RICH_CONTENT, NODE_INPUT, PARAM_INPUT];

/// Columns meaningful only on Decision rows.
pub const DECISION_COLUMNS: [usize; 8] = [
    INTENT,
    NLU_DISABLED,
    NEXT_NODES,
    MESSAGE,
    RICH_TYPE,
    RICH_CONTENT,
    ANSWER_REQUIRED,
    BEHAVIORS,
];

/// Columns meaningful only on Action rows.
pub const ACTION_COLUMNS: [usize; 7] = [
    COMMAND,
    DESCRIPTION,
    OUTPUT_VAR,
    NODE_INPUT,
    PARAM_INPUT,
    DECISION_VAR,
    WHAT_NEXT,
];

/// Human-readable name for a column index. Out-of-range indices (possible on
/// overflowing rows) are rendered positionally.
pub fn name(index: usize) -> &'static str {
    HEADER.get(index).copied().unwrap_or("<overflow>")
}
