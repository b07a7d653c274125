//! Recovery parser for the JSON-bearing columns.
//!
//! The upstream generator emits JSON that is frequently almost-right: single
//! quotes, unquoted object keys, trailing commas, and containers left open at
//! the end of the field. This module accepts all of those and returns a
//! normalized [`serde_json::Value`]. Every heuristic lives here so it can be
//! unit-tested independently of the pipeline.

use serde_json::{Map, Number, Value};
use winnow::ascii::multispace0;
use winnow::combinator::{alt, opt};
use winnow::error::{ContextError, ErrMode};
use winnow::token::take_while;
use winnow::{ModalResult, Parser};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("JSON recovery failed: {0}")]
pub struct JsonRecoveryError(pub String);

/// Parse a (possibly malformed) JSON value, applying the recovery heuristics.
pub fn recover_json(input: &str) -> Result<Value, JsonRecoveryError> {
    let mut remaining = input;
    let value = json_value
        .parse_next(&mut remaining)
        .map_err(|e| JsonRecoveryError(format!("{e}")))?;
    let _ = multispace0::<_, ContextError>.parse_next(&mut remaining);
    if !remaining.is_empty() {
        return Err(JsonRecoveryError(format!(
            "trailing characters: {:?}",
            remaining.chars().take(20).collect::<String>()
        )));
    }
    Ok(value)
}

fn ws(input: &mut &str) -> ModalResult<()> {
    multispace0.void().parse_next(input)
}

fn json_value(input: &mut &str) -> ModalResult<Value> {
    ws.parse_next(input)?;
    alt((
        object,
        array,
        string_lit.map(Value::String),
        "true".value(Value::Bool(true)),
        "false".value(Value::Bool(false)),
        "null".value(Value::Null),
        number,
    ))
    .parse_next(input)
}

/// Single- or double-quoted string with escape support. An unterminated
/// string is taken to run to the end of the input.
fn string_lit(input: &mut &str) -> ModalResult<String> {
    let delim = alt(('"', '\'')).parse_next(input)?;
    let mut s = String::new();
    loop {
        let Some(c) = opt(winnow::token::any).parse_next(input)? else {
            return Ok(s); // unterminated — recover with what we have
        };
        if c == delim {
            break;
        }
        if c == '\\' {
            let Some(esc) = opt(winnow::token::any).parse_next(input)? else {
                s.push('\\');
                return Ok(s);
            };
            match esc {
                'n' => s.push('\n'),
                't' => s.push('\t'),
                '\\' => s.push('\\'),
                '"' => s.push('"'),
                '\'' => s.push('\''),
                '/' => s.push('/'),
                other => {
                    s.push('\\');
                    s.push(other);
                }
            }
        } else {
            s.push(c);
        }
    }
    Ok(s)
}

/// Unquoted object key: [A-Za-z_][A-Za-z0-9_-]*
fn bare_key(input: &mut &str) -> ModalResult<String> {
    (
        take_while(1, |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
    )
        .take()
        .map(str::to_string)
        .parse_next(input)
}

fn number(input: &mut &str) -> ModalResult<Value> {
    let s: &str = take_while(1.., |c: char| {
        c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')
    })
    .parse_next(input)?;
    if let Ok(i) = s.parse::<i64>() {
        return Ok(Value::Number(Number::from(i)));
    }
    let f: f64 = s
        .parse()
        .map_err(|_| ErrMode::Backtrack(ContextError::new()))?;
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| ErrMode::Backtrack(ContextError::new()))
}

fn object(input: &mut &str) -> ModalResult<Value> {
    let _ = '{'.parse_next(input)?;
    let mut map = Map::new();
    loop {
        ws.parse_next(input)?;
        if opt('}').parse_next(input)?.is_some() || input.is_empty() {
            break; // missing `}` at end of input is tolerated
        }
        let key = alt((string_lit, bare_key)).parse_next(input)?;
        ws.parse_next(input)?;
        let _ = ':'.parse_next(input)?;
        let value = json_value.parse_next(input)?;
        map.insert(key, value);
        ws.parse_next(input)?;
        let _ = opt(',').parse_next(input)?; // also tolerates a trailing comma
    }
    Ok(Value::Object(map))
}

fn array(input: &mut &str) -> ModalResult<Value> {
    let _ = '['.parse_next(input)?;
    let mut items = Vec::new();
    loop {
        ws.parse_next(input)?;
        if opt(']').parse_next(input)?.is_some() || input.is_empty() {
            break;
        }
        let value = json_value.parse_next(input)?;
        items.push(value);
        ws.parse_next(input)?;
        let _ = opt(',').parse_next(input)?;
    }
    Ok(Value::Array(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn well_formed_json_passes_through() {
        let v = recover_json(r#"{"type":"buttons","options":[{"label":"A","value":"10"}]}"#)
            .unwrap();
        assert_eq!(
            v,
            json!({"type":"buttons","options":[{"label":"A","value":"10"}]})
        );
    }

    #[test]
    fn single_quotes_accepted() {
        let v = recover_json("{'type': 'buttons', 'options': []}").unwrap();
        assert_eq!(v, json!({"type": "buttons", "options": []}));
    }

    #[test]
    fn unquoted_keys_accepted() {
        let v = recover_json(r#"{type: "list", options: [1, 2]}"#).unwrap();
        assert_eq!(v, json!({"type": "list", "options": [1, 2]}));
    }

    #[test]
    fn trailing_commas_accepted() {
        let v = recover_json(r#"{"a": 1, "b": [1, 2,], }"#).unwrap();
        assert_eq!(v, json!({"a": 1, "b": [1, 2]}));
    }

    #[test]
    fn unclosed_object_recovers() {
        let v = recover_json(r#"{"NAME": 12"#).unwrap();
        assert_eq!(v, json!({"NAME": 12}));
    }

    #[test]
    fn unclosed_array_recovers() {
        let v = recover_json(r#"{"options": [{"label": "A", "value": 10}"#).unwrap();
        assert_eq!(v, json!({"options": [{"label": "A", "value": 10}]}));
    }

    #[test]
    fn numbers_integers_and_floats() {
        assert_eq!(recover_json("42").unwrap(), json!(42));
        assert_eq!(recover_json("-7").unwrap(), json!(-7));
        assert_eq!(recover_json("3.5").unwrap(), json!(3.5));
    }

    #[test]
    fn literals() {
        assert_eq!(recover_json("true").unwrap(), json!(true));
        assert_eq!(recover_json("false").unwrap(), json!(false));
        assert_eq!(recover_json("null").unwrap(), Value::Null);
    }

    #[test]
    fn escapes_in_strings() {
        let v = recover_json(r#""a\nb\t\"c\"""#).unwrap();
        assert_eq!(v, json!("a\nb\t\"c\""));
    }

    #[test]
    fn trailing_garbage_rejected() {
        let err = recover_json(r#"{"a":1} oops"#).unwrap_err();
        assert!(err.to_string().contains("trailing"));
    }

    #[test]
    fn plain_text_rejected() {
        assert!(recover_json("hello there").is_err());
    }
}
