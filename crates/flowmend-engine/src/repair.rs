//! Deterministic repair: one rule per diagnostic kind, applied in a fixed
//! order, each logged.
//!
//! Rules are idempotent — a repaired document revalidates without the
//! diagnostic that triggered the rule, so running repair again is a no-op.
//! Rows the validator refused to type (unknown kind) pass through untouched.

use std::collections::HashSet;

use tracing::info;

use flowmend_dialect::columns as col;
use flowmend_dialect::rich::{self, ButtonRef};
use flowmend_dialect::{
    DecisionNode, Entry, NodeMeta, Record, ReservedLayout, RichForm, RichType, SystemRole,
    WhatNextArm,
};

use crate::diagnostic::{Diagnostic, DiagnosticKind};

/// Repaired entries plus a human-readable log of every change made.
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub entries: Vec<Entry>,
    pub fix_log: Vec<String>,
}

/// Apply the deterministic rules for `diagnostics` to `entries`.
pub fn repair(
    entries: &[Entry],
    diagnostics: &[Diagnostic],
    layout: &ReservedLayout,
) -> RepairOutcome {
    let mut fixer = Fixer {
        entries: entries.to_vec(),
        layout,
        log: Vec::new(),
    };

    // normalization findings were already applied by the validator; record
    // them so the caller's fix log covers every change to the document
    for d in diagnostics {
        match &d.kind {
            DiagnosticKind::ShortRow { .. }
            | DiagnosticKind::LongRowMerged { .. }
            | DiagnosticKind::LongRowTrimmed { .. }
            | DiagnosticKind::RowDropped { .. }
            | DiagnosticKind::UnknownKind { .. }
            | DiagnosticKind::JunkToken { .. }
            | DiagnosticKind::MalformedPair { .. }
            | DiagnosticKind::DuplicateArm { .. }
            | DiagnosticKind::NonstandardBool { .. }
            | DiagnosticKind::UnparseableJson { .. } => fixer.log.push(d.message.clone()),
            DiagnosticKind::CrossKindValue { .. } => fixer
                .log
                .push(format!("{} (cleared on serialization)", d.message)),
            DiagnosticKind::DuplicateId { .. } => fixer
                .log
                .push(format!("{} (renumbered by id allocation)", d.message)),
            _ => {}
        }
    }

    fixer.synthesize_system_nodes(diagnostics);
    fixer.fix_bad_variable_names(diagnostics);
    fixer.fix_unknown_rich_types(diagnostics);
    fixer.fix_orphans(diagnostics);
    fixer.fix_dead_ends(diagnostics);
    fixer.fix_routing_gaps(diagnostics);
    fixer.fix_unbound_variables(diagnostics);
    fixer.fix_rich_form_mismatches(diagnostics);

    for line in &fixer.log {
        info!(fix = %line, "repair");
    }
    RepairOutcome { entries: fixer.entries, fix_log: fixer.log }
}

struct Fixer<'a> {
    entries: Vec<Entry>,
    layout: &'a ReservedLayout,
    log: Vec<String>,
}

impl Fixer<'_> {
    fn position(&self, id: i64) -> Option<usize> {
        self.entries.iter().position(|e| e.id() == Some(id))
    }

    fn decision_mut(&mut self, id: i64) -> Option<&mut DecisionNode> {
        let index = self.position(id)?;
        match &mut self.entries[index] {
            Entry::Record(Record::Decision(d)) => Some(d),
            _ => None,
        }
    }

    /// Ids that revalidation will consider resolvable.
    fn resolvable(&self) -> HashSet<i64> {
        let mut ids: HashSet<i64> = self.entries.iter().filter_map(Entry::id).collect();
        ids.extend(self.layout.system_ids());
        ids
    }

    // --- system node synthesis ---

    fn synthesize_system_nodes(&mut self, diagnostics: &[Diagnostic]) {
        for d in diagnostics {
            let DiagnosticKind::MissingSystemNode { role, id } = &d.kind else {
                continue;
            };
            if self.position(*id).is_some() {
                continue;
            }
            let node = self.system_node(*role, *id);
            self.log.push(format!("synthesized system node {id} ({role:?})"));
            self.entries.push(Entry::Record(Record::Decision(node)));
        }
    }

    fn system_node(&self, role: SystemRole, id: i64) -> DecisionNode {
        let layout = self.layout;
        let mut node = DecisionNode {
            meta: NodeMeta {
                id,
                flows_label: "System".into(),
                ..NodeMeta::default()
            },
            intent: String::new(),
            nlu_disabled: None,
            next_nodes: Vec::new(),
            message: String::new(),
            rich_type: None,
            rich_content: String::new(),
            answer_required: None,
            behaviors: Vec::new(),
        };
        match role {
            SystemRole::Entry => {
                node.meta.name = "Welcome".into();
                node.message = "Hi! How can I help you today?".into();
                node.next_nodes = vec![layout.return_to_menu];
            }
            SystemRole::ReturnToMenu => {
                node.meta.name = "Main Menu".into();
                node.message = "What would you like to do?".into();
                node.rich_type = Some(RichType::Buttons);
                node.rich_content = rich::serialize_pipe(&[
                    ButtonRef { label: "Talk to an agent".into(), dest: layout.agent_transfer },
                    ButtonRef { label: "End chat".into(), dest: layout.end_of_chat },
                ]);
                node.answer_required = Some(true);
            }
            SystemRole::ErrorHandler => {
                node.meta.name = "Error Handler".into();
                node.message = "Something went wrong. Let's get you back on track.".into();
                node.next_nodes = vec![layout.return_to_menu];
            }
            SystemRole::EndOfChat => {
                node.meta.name = "End of Chat".into();
                node.message = "Thanks for chatting with us. Goodbye!".into();
                node.behaviors = vec!["endChat".into()];
            }
            SystemRole::AgentTransfer => {
                node.meta.name = "Agent Transfer".into();
                node.message = "Connecting you to a human agent now.".into();
                node.behaviors = vec!["transferToAgent".into()];
            }
            SystemRole::OutOfScope(n) => {
                node.meta.name = format!("Out of Scope {}", n + 1);
                node.message = "I'm not sure I understood that. Let's go back to the menu.".into();
                node.next_nodes = vec![layout.return_to_menu];
            }
            SystemRole::GenericError => {
                node.meta.name = "Generic Error".into();
                node.message = "Sorry, something unexpected happened.".into();
                node.next_nodes = vec![layout.return_to_menu];
            }
        }
        node
    }

    // --- variable name canonicalization ---

    fn fix_bad_variable_names(&mut self, diagnostics: &[Diagnostic]) {
        for d in diagnostics {
            let DiagnosticKind::BadVariableName { name } = &d.kind else {
                continue;
            };
            let Some(id) = d.node_id else { continue };
            let Some(index) = self.position(id) else { continue };
            let Entry::Record(record) = &mut self.entries[index] else {
                continue;
            };
            let canonical = canonical_variable_name(name);
            let variables = &mut record.meta_mut().variables;
            let Some(pos) = variables.iter().position(|v| v == name) else {
                continue;
            };
            if variables.iter().any(|v| v == &canonical) {
                // already declared under the canonical spelling
                variables.remove(pos);
            } else {
                variables[pos] = canonical.clone();
            }
            self.log
                .push(format!("node {id}: variable {name:?} renamed to {canonical:?}"));
        }
    }

    // --- rich type inference ---

    fn fix_unknown_rich_types(&mut self, diagnostics: &[Diagnostic]) {
        for d in diagnostics {
            let DiagnosticKind::UnknownRichType { token } = &d.kind else {
                continue;
            };
            let Some(id) = d.node_id else { continue };
            let token = token.clone();
            let Some(node) = self.decision_mut(id) else { continue };
            let inferred = match rich::detect_form(&node.rich_content) {
                Some(RichForm::Json) => Some(RichType::List),
                Some(RichForm::Pipe) => {
                    let (buttons, _) = rich::parse_buttons(&node.rich_content);
                    (!buttons.is_empty()).then_some(RichType::Buttons)
                }
                None => None,
            };
            node.rich_type = inferred;
            let outcome = match inferred {
                Some(t) => format!("inferred {} from content", t.as_str()),
                None => "cleared".to_string(),
            };
            self.log
                .push(format!("node {id}: unknown richType {token:?} {outcome}"));
        }
    }

    // --- orphan references ---

    fn fix_orphans(&mut self, diagnostics: &[Diagnostic]) {
        let resolvable = self.resolvable();
        let layout = self.layout;
        let defined: Vec<i64> = {
            let mut ids: Vec<i64> = self.entries.iter().filter_map(Entry::id).collect();
            ids.sort_unstable();
            ids
        };
        let mut touched: HashSet<i64> = HashSet::new();

        for d in diagnostics {
            let DiagnosticKind::OrphanReference { target } = &d.kind else {
                continue;
            };
            let Some(id) = d.node_id else { continue };
            let replacement = orphan_fallback(layout, *target, &defined);
            self.log.push(format!(
                "node {id}: {} orphan {target} rewritten to {replacement}",
                d.field()
            ));
            if !touched.insert(id) {
                continue; // targets already rewritten on the first pass
            }
            let Some(index) = self.position(id) else { continue };
            if let Entry::Record(record) = &mut self.entries[index] {
                record.rewrite_targets(|t| {
                    if resolvable.contains(&t) {
                        t
                    } else {
                        orphan_fallback(layout, t, &defined)
                    }
                });
            }
        }
    }

    // --- dead ends and self loops ---

    fn fix_dead_ends(&mut self, diagnostics: &[Diagnostic]) {
        let menu = self.layout.return_to_menu;
        let agent = self.layout.agent_transfer;
        for d in diagnostics {
            if !matches!(d.kind, DiagnosticKind::DeadEnd | DiagnosticKind::SelfLoop) {
                continue;
            }
            let Some(id) = d.node_id else { continue };
            let kind = d.kind.name();
            let Some(node) = self.decision_mut(id) else { continue };

            let recovery = [
                ButtonRef { label: "Back to menu".into(), dest: menu },
                ButtonRef { label: "Talk to an agent".into(), dest: agent },
            ];
            let (mut buttons, dropped) = rich::parse_buttons(&node.rich_content);
            let form = rich::detect_form(&node.rich_content);
            buttons.extend(recovery);

            match (form, node.rich_type) {
                (Some(RichForm::Json), _) | (None, Some(RichType::List | RichType::Card)) => {
                    let tag = node.rich_type.unwrap_or(RichType::List).as_str();
                    node.rich_content = rich::serialize_json(tag, &buttons);
                }
                _ => {
                    node.rich_content = rich::serialize_pipe(&buttons);
                    if node.rich_type.is_none() {
                        node.rich_type = Some(RichType::Buttons);
                    }
                }
            }
            node.answer_required = Some(true);
            for token in &dropped {
                self.log.push(format!(
                    "node {id}: discarded unreadable richContent token {token:?}"
                ));
            }
            self.log
                .push(format!("node {id}: {kind} resolved with recovery buttons"));
        }
    }

    // --- routing gaps ---

    fn fix_routing_gaps(&mut self, diagnostics: &[Diagnostic]) {
        for d in diagnostics {
            let DiagnosticKind::RoutingGap { command, missing } = &d.kind else {
                continue;
            };
            let Some(id) = d.node_id else { continue };
            let (command, missing) = (command.clone(), missing.clone());
            let error_ids = [self.layout.error_handler, self.layout.generic_error];
            let generic_error = self.layout.generic_error;

            let Some(index) = self.position(id) else { continue };
            let Entry::Record(Record::Action(a)) = &mut self.entries[index] else {
                continue;
            };
            // the node's first non-error destination, else the generic error
            // node, covers every missing output
            let fallback = a
                .what_next
                .iter()
                .find(|arm| arm.value != "error" && !error_ids.contains(&arm.target))
                .map(|arm| arm.target)
                .unwrap_or(generic_error);
            for value in &missing {
                a.what_next.push(WhatNextArm { value: value.clone(), target: fallback });
            }
            self.log.push(format!(
                "node {id}: added {} missing {command} outputs to whatNext",
                missing.len()
            ));
        }
    }

    // --- unbound variables ---

    fn fix_unbound_variables(&mut self, diagnostics: &[Diagnostic]) {
        for d in diagnostics {
            let DiagnosticKind::UnboundVariable { name } = &d.kind else {
                continue;
            };
            let Some(id) = d.node_id else { continue };
            let name = name.clone();
            if d.column == col::PARAM_INPUT {
                self.bind_or_strip_action_variable(id, &name);
            } else {
                self.strip_decision_variable(id, d.column, &name);
            }
        }
    }

    /// An unbound name in `paramInput` usually means the generator forgot the
    /// `nodeInput` wiring. If a prior Decision collects an answer, bind the
    /// name to it; otherwise strip the reference.
    fn bind_or_strip_action_variable(&mut self, id: i64, name: &str) {
        let producer = self
            .entries
            .iter()
            .filter_map(Entry::as_record)
            .filter_map(|r| match r {
                Record::Decision(d)
                    if d.meta.id < id && d.answer_required == Some(true) =>
                {
                    Some(d.meta.id)
                }
                _ => None,
            })
            .max();

        let Some(index) = self.position(id) else { return };
        let Entry::Record(Record::Action(a)) = &mut self.entries[index] else {
            return;
        };
        match producer {
            Some(producer_id) => {
                a.node_input.push((name.to_string(), producer_id));
                self.log.push(format!(
                    "node {id}: bound {{{name}}} to answer node {producer_id} via nodeInput"
                ));
            }
            None => {
                a.param_input = strip_reference(&a.param_input, name);
                self.log
                    .push(format!("node {id}: stripped unbound {{{name}}} from paramInput"));
            }
        }
    }

    fn strip_decision_variable(&mut self, id: i64, column: usize, name: &str) {
        let Some(node) = self.decision_mut(id) else { return };
        let field = if column == col::MESSAGE {
            &mut node.message
        } else {
            &mut node.rich_content
        };
        *field = strip_reference(field, name);
        self.log.push(format!(
            "node {id}: stripped unbound {{{name}}} from {}",
            col::name(column)
        ));
    }

    // --- rich form mismatches ---

    fn fix_rich_form_mismatches(&mut self, diagnostics: &[Diagnostic]) {
        for d in diagnostics {
            let DiagnosticKind::RichFormMismatch { expected_pipe } = d.kind else {
                continue;
            };
            let Some(id) = d.node_id else { continue };
            let Some(node) = self.decision_mut(id) else { continue };
            let converted = if expected_pipe {
                rich::convert_to_pipe(&node.rich_content)
            } else {
                let tag = node.rich_type.unwrap_or(RichType::List).as_str();
                rich::convert_to_json(&node.rich_content, tag)
            };
            match converted {
                Some(content) => {
                    node.rich_content = content;
                    self.log.push(format!(
                        "node {id}: richContent converted to {} form",
                        if expected_pipe { "pipe" } else { "JSON" }
                    ));
                }
                None => {
                    // nothing salvageable in the wrong-form content
                    node.rich_content = String::new();
                    self.log
                        .push(format!("node {id}: unsalvageable richContent cleared"));
                }
            }
        }
    }
}

/// Fallback target for a dangling reference: the menu node when the document
/// defines one, otherwise the nearest defined id, otherwise the generic error
/// node.
fn orphan_fallback(layout: &ReservedLayout, target: i64, defined_sorted: &[i64]) -> i64 {
    if defined_sorted.binary_search(&layout.return_to_menu).is_ok() {
        return layout.return_to_menu;
    }
    let nearest = defined_sorted
        .iter()
        .copied()
        .min_by_key(|&id| ((id - target).abs(), id));
    nearest.unwrap_or(layout.generic_error)
}

/// `userName` -> `USER_NAME`; anything non-alphanumeric becomes `_`.
fn canonical_variable_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() && prev_lower {
                out.push('_');
            }
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            out.push(c.to_ascii_uppercase());
        } else if !out.ends_with('_') {
            prev_lower = false;
            out.push('_');
        }
    }
    let out = out.trim_matches('_').to_string();
    if out.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
        out
    } else {
        format!("V_{out}")
    }
}

fn strip_reference(text: &str, name: &str) -> String {
    text.replace(&format!("{{{name}}}"), "")
}
