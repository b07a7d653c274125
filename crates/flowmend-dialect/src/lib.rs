//! The 26-column flow dialect: permissive codec, typed record model,
//! rich-content forms, command contracts, and reserved-id layout.
//!
//! Parsing never fails — the codec tokenizes whatever it is given and the
//! record model types what it can, reporting the rest as issues for the
//! validator to classify.
//!
//! # Example
//! ```
//! use flowmend_dialect::{codec, Record};
//!
//! let text = "1,decision,Welcome,,,10,Hi!,,,,,,,,,,,,,,,,,,,\n";
//! let rows = codec::parse_document(text);
//! let (record, issues) = Record::from_row(&rows[0]).unwrap();
//! assert_eq!(record.id(), 1);
//! assert!(issues.is_empty());
//! ```

pub mod codec;
pub mod columns;
pub mod contract;
pub mod forgiving_json;
pub mod record;
pub mod reserved;
pub mod rich;

pub use codec::{parse_document, serialize_document, serialize_row, split_header, RawRow};
pub use contract::CommandContracts;
pub use forgiving_json::{recover_json, JsonRecoveryError};
pub use record::{
    serialize_entries, ActionNode, DecisionNode, Entry, FieldIssue, IssueKind, NodeKind, NodeMeta,
    Record, Reference, RichType, RowError, WhatNextArm, SYSTEM_VARIABLES, TERMINAL_BEHAVIORS,
};
pub use reserved::{ReservedLayout, SystemRole};
pub use rich::{detect_form, ButtonRef, RichForm};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_type_serialize_round_trip() {
        let mut row = RawRow::blank();
        row.set(columns::ID, "1");
        row.set(columns::TYPE, "decision");
        row.set(columns::NAME, "Welcome");
        row.set(columns::MESSAGE, "Hello, and welcome!");
        row.set(columns::NEXT_NODES, "100");
        let text = serialize_document(&[row]);

        let (rows, had_header) = split_header(parse_document(&text));
        assert!(had_header);
        let (record, issues) = Record::from_row(&rows[0]).unwrap();
        assert!(issues.is_empty());
        assert_eq!(record.id(), 1);
        assert_eq!(record.to_row(), rows[0]);
    }

    #[test]
    fn documented_reference_kinds() {
        let mut row = RawRow::blank();
        row.set(columns::ID, "2");
        row.set(columns::TYPE, "decision");
        row.set(columns::NEXT_NODES, "10");
        row.set(columns::RICH_CONTENT, "A~20");
        let (record, _) = Record::from_row(&row).unwrap();
        assert_eq!(record.references().len(), 2);
    }
}
