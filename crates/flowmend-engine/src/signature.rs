//! Error signatures: stable keys for stuck-loop detection and for routing a
//! remote finding to the deterministic rule that can fix it.

use flowmend_types::RemoteError;

use crate::diagnostic::Diagnostic;

/// `field:kind` key of a structural diagnostic.
pub fn diagnostic_signature(d: &Diagnostic) -> String {
    format!("{}:{}", d.field(), d.kind.name())
}

/// Normalized key of a remote finding. Digits are collapsed so that "node 105
/// missing" and "node 106 missing" count as the same failure shape.
pub fn remote_signature(e: &RemoteError) -> String {
    format!(
        "{}:{}",
        e.field.trim().to_ascii_lowercase(),
        normalize_message(&e.message)
    )
}

fn normalize_message(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_digits = false;
    let mut in_space = true; // suppress leading whitespace
    for c in raw.chars() {
        if c.is_ascii_digit() {
            if !in_digits {
                out.push('#');
            }
            in_digits = true;
            in_space = false;
        } else if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_digits = false;
            in_space = true;
        } else {
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            in_digits = false;
            in_space = false;
        }
    }
    out.trim_end().to_string()
}

/// What kind of failure a remote finding describes, as far as its message
/// reveals. Everything except `Unknown` has a deterministic repair rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Orphan,
    DeadEnd,
    RoutingGap,
    UnboundVariable,
    ColumnCount,
    RichMismatch,
    Unknown,
}

impl ErrorClass {
    pub fn is_deterministic(&self) -> bool {
        *self != ErrorClass::Unknown
    }
}

/// Keyword classification of a remote finding's message.
pub fn classify(e: &RemoteError) -> ErrorClass {
    let text = format!("{} {}", e.field, e.message).to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has(&["orphan", "does not exist", "missing node", "unknown node", "dangling"]) {
        ErrorClass::Orphan
    } else if has(&["dead end", "dead-end", "no outgoing", "no destination", "self-loop", "self loop"]) {
        ErrorClass::DeadEnd
    } else if has(&["whatnext", "routing", "unhandled output", "output not handled"]) {
        ErrorClass::RoutingGap
    } else if has(&["variable"]) {
        ErrorClass::UnboundVariable
    } else if has(&["column", "field count", "too many fields", "too few fields"]) {
        ErrorClass::ColumnCount
    } else if has(&["richtype", "richcontent", "rich content", "rich type"]) {
        ErrorClass::RichMismatch
    } else {
        ErrorClass::Unknown
    }
}
