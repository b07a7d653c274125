//! Rich-content handling: the `richContent` column carries button/list
//! destinations in one of two forms.
//!
//! Pipe form: `label~dest|label~dest` (used by `buttons` / `quickReplies`).
//! JSON form: `{"type": ..., "options": [{"label": ..., "value": ...}]}`
//! (used by `list` / `card`). Destinations are node ids in both forms.

use serde_json::Value;

use crate::forgiving_json::recover_json;

/// One routable choice extracted from rich content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonRef {
    pub label: String,
    pub dest: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RichForm {
    Pipe,
    Json,
}

/// Which form the raw content is written in, if it is non-empty.
pub fn detect_form(raw: &str) -> Option<RichForm> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.starts_with('{') {
        Some(RichForm::Json)
    } else {
        Some(RichForm::Pipe)
    }
}

/// Extract buttons from either form. Returns the parsed buttons plus the raw
/// tokens that could not be parsed (for malformed-pair diagnostics).
pub fn parse_buttons(raw: &str) -> (Vec<ButtonRef>, Vec<String>) {
    match detect_form(raw) {
        None => (Vec::new(), Vec::new()),
        Some(RichForm::Pipe) => parse_pipe(raw),
        Some(RichForm::Json) => parse_json(raw),
    }
}

fn parse_pipe(raw: &str) -> (Vec<ButtonRef>, Vec<String>) {
    let mut buttons = Vec::new();
    let mut bad = Vec::new();
    for token in raw.split('|') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match token.split_once('~') {
            Some((label, dest)) => match dest.trim().parse::<i64>() {
                Ok(id) => buttons.push(ButtonRef {
                    label: label.trim().to_string(),
                    dest: id,
                }),
                Err(_) => bad.push(token.to_string()),
            },
            None => bad.push(token.to_string()),
        }
    }
    (buttons, bad)
}

fn parse_json(raw: &str) -> (Vec<ButtonRef>, Vec<String>) {
    let value = match recover_json(raw) {
        Ok(v) => v,
        Err(_) => return (Vec::new(), vec![raw.to_string()]),
    };
    let mut buttons = Vec::new();
    let mut bad = Vec::new();
    let Some(options) = value.get("options").and_then(Value::as_array) else {
        return (buttons, bad);
    };
    for opt in options {
        let label = opt
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match option_dest(opt) {
            Some(id) => buttons.push(ButtonRef { label, dest: id }),
            None => bad.push(opt.to_string()),
        }
    }
    (buttons, bad)
}

/// `value` may be a JSON number or a numeric string.
fn option_dest(option: &Value) -> Option<i64> {
    match option.get("value") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Serialize buttons in pipe form.
pub fn serialize_pipe(buttons: &[ButtonRef]) -> String {
    buttons
        .iter()
        .map(|b| format!("{}~{}", b.label, b.dest))
        .collect::<Vec<_>>()
        .join("|")
}

/// Serialize buttons in the canonical JSON form with the given type tag.
pub fn serialize_json(type_tag: &str, buttons: &[ButtonRef]) -> String {
    let options: Vec<Value> = buttons
        .iter()
        .map(|b| serde_json::json!({"label": b.label, "value": b.dest.to_string()}))
        .collect();
    serde_json::json!({"type": type_tag, "options": options}).to_string()
}

/// Rewrite every destination id through `map`, preserving the content's form.
/// For JSON content, non-`options` keys and extra option fields are kept.
/// Returns `None` when the content holds no rewritable destinations.
pub fn rewrite_dests(raw: &str, map: impl Fn(i64) -> i64) -> Option<String> {
    match detect_form(raw)? {
        RichForm::Pipe => {
            let (buttons, bad) = parse_pipe(raw);
            if buttons.is_empty() {
                return None;
            }
            let rewritten: Vec<ButtonRef> = buttons
                .into_iter()
                .map(|b| ButtonRef {
                    dest: map(b.dest),
                    label: b.label,
                })
                .collect();
            let mut out = serialize_pipe(&rewritten);
            // keep malformed tokens so repair can still see (and log) them
            for token in bad {
                if !out.is_empty() {
                    out.push('|');
                }
                out.push_str(&token);
            }
            Some(out)
        }
        RichForm::Json => {
            let mut value = recover_json(raw).ok()?;
            let options = value.get_mut("options")?.as_array_mut()?;
            let mut touched = false;
            for opt in options {
                if let Some(id) = option_dest(opt) {
                    let mapped = map(id);
                    if let Some(obj) = opt.as_object_mut() {
                        obj.insert("value".into(), Value::String(mapped.to_string()));
                        touched = true;
                    }
                }
            }
            touched.then(|| value.to_string())
        }
    }
}

/// Convert JSON content to pipe form, keeping label/destination pairs.
pub fn convert_to_pipe(raw: &str) -> Option<String> {
    let (buttons, _) = parse_buttons(raw);
    if buttons.is_empty() {
        None
    } else {
        Some(serialize_pipe(&buttons))
    }
}

/// Convert pipe content to the canonical JSON form, keeping pairs.
pub fn convert_to_json(raw: &str, type_tag: &str) -> Option<String> {
    let (buttons, _) = parse_buttons(raw);
    if buttons.is_empty() {
        None
    } else {
        Some(serialize_json(type_tag, &buttons))
    }
}
