//! End-to-end pipeline tests through the public crate API: sanitize passes,
//! orchestrated refinement with mock collaborators, and multi-segment
//! assembly.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use flowmend_dialect::columns as col;
use flowmend_dialect::{
    parse_document, rich, serialize_document, split_header, CommandContracts, RawRow, Record,
    ReservedLayout,
};
use flowmend_engine::{
    refine_and_assemble, repair, sanitize_document, validate_segment, RefineSession,
    RefineStatus, Scope,
};
use flowmend_remote::{
    FixHint, FlowRepairer, RepairProposal, SemanticValidator, ValidationReport,
};
use flowmend_types::{RemoteError, Result};

// ---------------------------------------------------------------------------
// row builders
// ---------------------------------------------------------------------------

fn decision(id: i64, next: &str, message: &str) -> RawRow {
    let mut row = RawRow::blank();
    row.set(col::ID, id.to_string());
    row.set(col::TYPE, "decision");
    row.set(col::NAME, format!("Node {id}"));
    row.set(col::NEXT_NODES, next);
    row.set(col::MESSAGE, message);
    row
}

fn terminal(id: i64) -> RawRow {
    let mut row = decision(id, "", "Goodbye!");
    row.set(col::BEHAVIORS, "endChat");
    row
}

fn action(id: i64, command: &str, what_next: &str) -> RawRow {
    let mut row = RawRow::blank();
    row.set(col::ID, id.to_string());
    row.set(col::TYPE, "action");
    row.set(col::COMMAND, command);
    row.set(col::WHAT_NEXT, what_next);
    row
}

fn typed(csv: &str) -> Vec<Record> {
    let (rows, _) = split_header(parse_document(csv));
    rows.iter().map(|r| Record::from_row(r).unwrap().0).collect()
}

// ---------------------------------------------------------------------------
// mock collaborators
// ---------------------------------------------------------------------------

struct ScriptedValidator {
    reports: Mutex<VecDeque<ValidationReport>>,
}

impl ScriptedValidator {
    fn new(reports: Vec<ValidationReport>) -> Self {
        Self { reports: Mutex::new(reports.into()) }
    }

    fn erroring(errors: Vec<RemoteError>) -> ValidationReport {
        ValidationReport { valid: false, errors, version_id: None }
    }
}

#[async_trait]
impl SemanticValidator for ScriptedValidator {
    async fn validate(&self, _csv: &str) -> Result<ValidationReport> {
        let next = self.reports.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(ValidationReport::clean))
    }
}

/// Echoes the document back and records which errors it was asked about.
struct RecordingRepairer {
    requests: Mutex<Vec<Vec<RemoteError>>>,
}

#[async_trait]
impl FlowRepairer for RecordingRepairer {
    async fn propose(
        &self,
        csv: &str,
        errors: &[RemoteError],
        _hints: &[FixHint],
    ) -> Result<RepairProposal> {
        self.requests.lock().unwrap().push(errors.to_vec());
        Ok(RepairProposal {
            csv: csv.to_string(),
            fixes_made: Vec::new(),
            still_broken: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// named scenarios
// ---------------------------------------------------------------------------

/// Rich-content button to a node that does not exist gets rewritten to the
/// document's fallback id, and the fix is logged.
#[test]
fn orphan_button_rewritten_to_fallback() {
    let mut chooser = decision(100, "", "Pick one");
    chooser.set(col::RICH_TYPE, "buttons");
    chooser.set(col::RICH_CONTENT, "A~101|B~777");
    let csv = serialize_document(&[chooser, terminal(101)]);

    let (fixed, log) = sanitize_document(
        &csv,
        &CommandContracts::builtin(),
        &ReservedLayout::default(),
        Scope::Segment(0),
    );

    let records = typed(&fixed);
    let Record::Decision(d) = &records[0] else { panic!() };
    let (buttons, _) = rich::parse_buttons(&d.rich_content);
    assert_eq!(buttons[0].dest, 101);
    assert_eq!(buttons[1].dest, 101); // nearest defined id to 777
    assert!(log.iter().any(|l| l.contains("orphan 777")));
}

/// Uncovered contract outputs are appended, routed to the node's first
/// non-error destination.
#[test]
fn routing_gap_filled_from_contract() {
    let mut contracts = CommandContracts::empty();
    contracts.register("PlatformDetect", ["ios", "android", "other", "error"]);
    let layout = ReservedLayout::default();

    let rows = vec![
        action(100, "PlatformDetect", "ios~101|error~906"),
        terminal(101),
    ];
    let output = validate_segment(&rows, &contracts, &layout);
    let repaired = repair(&output.entries, &output.diagnostics, &layout);

    let Some(Record::Action(a)) = repaired.entries[0].as_record() else {
        panic!()
    };
    let arms: Vec<(&str, i64)> = a
        .what_next
        .iter()
        .map(|arm| (arm.value.as_str(), arm.target))
        .collect();
    assert_eq!(
        arms,
        vec![
            ("ios", 101),
            ("error", 906),
            ("android", 101),
            ("other", 101),
        ]
    );
}

/// Two segments claiming the same reserved id both get renumbered into their
/// own bands, with internal references following.
#[tokio::test]
async fn colliding_reserved_id_renumbered_per_segment() {
    let make_segment = || {
        serialize_document(&[
            decision(50, "51", "Start here"),
            terminal(51),
        ])
    };
    let session = Arc::new(RefineSession::new(Arc::new(ScriptedValidator::new(vec![]))));
    let result = refine_and_assemble(session, vec![make_segment(), make_segment()], 2)
        .await
        .unwrap();

    let records = typed(&result.csv);
    let ids: Vec<i64> = records.iter().map(Record::id).collect();
    let distinct: HashSet<i64> = ids.iter().copied().collect();
    assert_eq!(ids.len(), distinct.len());

    // 50 and 51 are menu-band ids; each segment's pair moved into its own
    // flow band, wired together
    for (start, band) in [(100, 100..=199), (200, 200..=299)] {
        let node = records
            .iter()
            .find_map(|r| match r {
                Record::Decision(d) if d.meta.id == start => Some(d),
                _ => None,
            })
            .unwrap_or_else(|| panic!("no node {start}"));
        assert_eq!(node.next_nodes.len(), 1);
        assert!(band.contains(&node.next_nodes[0]));
    }
}

/// An error signature that survives two consecutive iterations is excluded
/// from the next repairer call.
#[tokio::test]
async fn unfixable_signature_excluded_from_repairer() {
    let stubborn = || RemoteError::new(100, "message", "tone is too stiff");
    let fresh = RemoteError::new(101, "notes", "note is unclear");

    let validator = Arc::new(ScriptedValidator::new(vec![
        ScriptedValidator::erroring(vec![stubborn()]),
        ScriptedValidator::erroring(vec![stubborn()]),
        ScriptedValidator::erroring(vec![stubborn(), fresh.clone()]),
    ]));
    let repairer = Arc::new(RecordingRepairer { requests: Mutex::new(Vec::new()) });
    let session = RefineSession::new(validator).with_repairer(repairer.clone());

    let csv = serialize_document(&[decision(100, "101", "Hello"), terminal(101)]);
    let result = session.run(&csv, Scope::Segment(0)).await.unwrap();
    assert_eq!(result.status, RefineStatus::Accepted);

    let requests = repairer.requests.lock().unwrap();
    // iteration 1: the stubborn error is new and is sent; iteration 2 marks
    // it unfixable and sends nothing; iteration 3 sends only the fresh error
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].len(), 1);
    assert_eq!(requests[0][0].message, "tone is too stiff");
    assert_eq!(requests[1].len(), 1);
    assert_eq!(requests[1][0].message, "note is unclear");
}

// ---------------------------------------------------------------------------
// pipeline properties
// ---------------------------------------------------------------------------

/// Codec round-trip across quoting, embedded delimiters, and newlines.
#[test]
fn codec_round_trips_awkward_content() {
    let mut row = decision(100, "101", "Line one\nLine \"two\", with commas");
    row.set(col::NOTES, "plain");
    let rows = vec![row, terminal(101)];
    let text = serialize_document(&rows);
    let (reparsed, had_header) = split_header(parse_document(&text));
    assert!(had_header);
    assert_eq!(reparsed, rows);
}

/// After a sanitize pass, every reference in the document resolves.
#[test]
fn sanitized_document_has_no_orphans() {
    let mut messy = decision(100, "777;888", "Hi");
    messy.set(col::RICH_TYPE, "buttons");
    messy.set(col::RICH_CONTENT, "Go~999");
    let csv = serialize_document(&[
        messy,
        action(101, "BusinessHours", "open~555"),
        terminal(102),
    ]);
    let layout = ReservedLayout::default();
    let (fixed, _) = sanitize_document(
        &csv,
        &CommandContracts::builtin(),
        &layout,
        Scope::Segment(0),
    );

    let records = typed(&fixed);
    let mut known: HashSet<i64> = records.iter().map(Record::id).collect();
    known.extend(layout.system_ids());
    for record in &records {
        for reference in record.references() {
            assert!(
                known.contains(&reference.target),
                "node {} still references {}",
                record.id(),
                reference.target
            );
        }
    }
}

/// Sanitizing twice changes nothing the second time.
#[test]
fn sanitize_is_idempotent() {
    let csv = serialize_document(&[
        decision(100, "777", "Hello {NOBODY_HOME}"),
        decision(101, "", "Stuck"),
        action(102, "UserLookup", "found~103"),
        terminal(103),
    ]);
    let contracts = CommandContracts::builtin();
    let layout = ReservedLayout::default();

    let (once, first_log) = sanitize_document(&csv, &contracts, &layout, Scope::Segment(0));
    assert!(!first_log.is_empty());
    let (twice, second_log) = sanitize_document(&once, &contracts, &layout, Scope::Segment(0));
    assert_eq!(once, twice);
    assert!(second_log.is_empty(), "second pass did work: {second_log:?}");
}

/// A document full of generator damage comes out structurally clean.
#[test]
fn kitchen_sink_document_sanitizes_clean() {
    let text = concat!(
        "id,type,name,intent,nluDisabled,nextNodes,message,richType,richContent,",
        "answerRequired,behaviors,command,description,outputVar,nodeInput,paramInput,",
        "decisionVar,whatNext,variable,tags,flowsLabel,styleClass,language,channel,notes,version\n",
        // chatter row, dropped
        "Sure! Here is your flow:\n",
        // short row
        "100,decision,Welcome,,,101,Hi there\n",
        // nonstandard bool, junk next token, unbound variable
        "101,decision,Ask,,TRUE,102;abc,Hello {WHO_DIS},,,yes,,,,,,,,,,,,,,,,\n",
        // routing gap
        "102,action,Check,,,,,,,,,BusinessHours,,,,,,open~103,,,,,,,,\n",
        // terminal
        "103,decision,Bye,,,,Goodbye,,,,endChat,,,,,,,,,,,,,,,\n",
    );
    let contracts = CommandContracts::builtin();
    let layout = ReservedLayout::default();
    let (fixed, log) = sanitize_document(text, &contracts, &layout, Scope::Segment(0));
    assert!(!log.is_empty());

    let (rows, _) = split_header(parse_document(&fixed));
    let output = validate_segment(&rows, &contracts, &layout);
    assert!(
        output.diagnostics.is_empty(),
        "residue: {:?}",
        output.diagnostics
    );
    assert_eq!(output.entries.len(), 4);
}

/// Duplicate ids across a batch become unique without breaking references.
#[test]
fn duplicate_ids_resolved_injectively() {
    let csv = serialize_document(&[
        decision(100, "102", "First"),
        decision(100, "102", "Second claimant"),
        terminal(102),
    ]);
    let (fixed, _) = sanitize_document(
        &csv,
        &CommandContracts::builtin(),
        &ReservedLayout::default(),
        Scope::Segment(0),
    );
    let records = typed(&fixed);
    let ids: Vec<i64> = records.iter().map(Record::id).collect();
    let distinct: HashSet<i64> = ids.iter().copied().collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(ids.len(), distinct.len());
}

/// Malformed rows survive the whole pipeline byte-for-byte.
#[test]
fn malformed_rows_pass_through_sanitize() {
    let mut widget = RawRow::blank();
    widget.set(col::ID, "104");
    widget.set(col::TYPE, "widget");
    widget.set(col::NAME, "mystery");
    let csv = serialize_document(&[terminal(100), widget.clone()]);
    let (fixed, _) = sanitize_document(
        &csv,
        &CommandContracts::builtin(),
        &ReservedLayout::default(),
        Scope::Segment(0),
    );
    let (rows, _) = split_header(parse_document(&fixed));
    assert!(rows.iter().any(|r| *r == widget));
}

/// The full orchestrated path: structural damage fixed locally, a semantic
/// nit fixed by the repairer, accepted on the second pass.
#[tokio::test]
async fn refinement_combines_local_and_generative_fixes() {
    let broken = serialize_document(&[
        decision(100, "777", "howdy friend"),
        terminal(101),
    ]);
    let error = RemoteError::new(100, "message", "informal greeting 'howdy'");
    let validator = Arc::new(ScriptedValidator::new(vec![ScriptedValidator::erroring(
        vec![error],
    )]));

    struct GreetingFixer;
    #[async_trait]
    impl FlowRepairer for GreetingFixer {
        async fn propose(
            &self,
            csv: &str,
            _errors: &[RemoteError],
            _hints: &[FixHint],
        ) -> Result<RepairProposal> {
            Ok(RepairProposal {
                csv: csv.replace("howdy friend", "Hello!"),
                fixes_made: vec!["formalized greeting".into()],
                still_broken: Vec::new(),
            })
        }
    }

    let session = RefineSession::new(validator).with_repairer(Arc::new(GreetingFixer));
    let result = session.run(&broken, Scope::Segment(0)).await.unwrap();

    assert_eq!(result.status, RefineStatus::Accepted);
    assert!(!result.csv.contains("howdy"));
    assert!(!result.csv.contains("777"));
    assert!(result.fix_log.iter().any(|l| l.contains("orphan 777")));
    assert!(result.fix_log.iter().any(|l| l.contains("formalized greeting")));
}
