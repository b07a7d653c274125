//! The refinement loop: sanitize, validate against the external semantic
//! validator, and — for findings no deterministic rule covers — consult the
//! generative repairer, guarded and verified, until the document is accepted
//! or the iteration budget runs out.
//!
//! Failure policy: the loop aborts only when the semantic validator itself is
//! unreachable or rejects our credentials. Repairer and learning-store
//! failures degrade the loop, never kill it.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use flowmend_dialect::{
    parse_document, serialize_entries, split_header, CommandContracts, ReservedLayout,
};
use flowmend_remote::{FlowRepairer, LearningStore, SemanticValidator, ValidationReport};
use flowmend_types::{RemoteError, Result};

use crate::allocator;
use crate::guardrail::{self, GuardrailConfig, Verdict};
use crate::repair;
use crate::signature::{classify, remote_signature};
use crate::validator;

#[derive(Debug, Clone)]
pub struct RefineConfig {
    pub max_iterations: usize,
    /// Consecutive iterations with an identical error-signature set before
    /// the loop gives up as stuck.
    pub stuck_threshold: usize,
    pub guardrails: GuardrailConfig,
    pub repairer_timeout: Duration,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            stuck_threshold: 2,
            guardrails: GuardrailConfig::default(),
            repairer_timeout: Duration::from_secs(120),
        }
    }
}

/// What the document under refinement is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// A complete document; system nodes are required and synthesized.
    Document,
    /// One flow segment, numbered into flow band `index` at assembly time.
    Segment(usize),
}

impl Scope {
    fn flow_index(&self) -> usize {
        match self {
            Scope::Document => 0,
            Scope::Segment(index) => *index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineStatus {
    /// The external validator accepted the document.
    Accepted,
    /// The iteration budget ran out with errors remaining.
    Exhausted,
    /// The same errors survived repeated attempts; retrying won't help.
    Stuck,
}

#[derive(Debug, Clone)]
pub struct RefineOutcome {
    pub status: RefineStatus,
    /// Best document text produced, whatever the status.
    pub csv: String,
    pub iterations: usize,
    pub remaining_errors: Vec<RemoteError>,
    pub fix_log: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// One deterministic pass: parse, validate structurally, repair, renumber,
/// serialize. Returns the sanitized text and the log of changes made.
pub fn sanitize_document(
    csv: &str,
    contracts: &CommandContracts,
    layout: &ReservedLayout,
    scope: Scope,
) -> (String, Vec<String>) {
    let (rows, _) = split_header(parse_document(csv));
    let output = match scope {
        Scope::Document => validator::validate(&rows, contracts, layout),
        Scope::Segment(_) => validator::validate_segment(&rows, contracts, layout),
    };
    let repaired = repair::repair(&output.entries, &output.diagnostics, layout);
    let mut log = repaired.fix_log;

    // a segment may not claim ids from the startup, menu, or system bands;
    // a full document owns all of them
    let reserved = match scope {
        Scope::Document => HashSet::new(),
        Scope::Segment(_) => band_reserved(layout),
    };
    let result = allocator::remap(&repaired.entries, scope.flow_index(), &reserved, layout);
    for (old, new) in &result.moves {
        log.push(format!("renumbered node {old} to {new}"));
    }
    log.extend(result.warnings);
    (serialize_entries(&result.entries), log)
}

/// Every id a generated flow node may not claim.
pub fn band_reserved(layout: &ReservedLayout) -> HashSet<i64> {
    layout
        .startup_band
        .clone()
        .chain(layout.menu_band.clone())
        .chain(layout.system_band.clone())
        .collect()
}

/// A configured refinement loop over one semantic validator and optional
/// generative collaborators.
pub struct RefineSession {
    validator: Arc<dyn SemanticValidator>,
    repairer: Option<Arc<dyn FlowRepairer>>,
    learning: Option<Arc<dyn LearningStore>>,
    contracts: CommandContracts,
    layout: ReservedLayout,
    config: RefineConfig,
}

impl RefineSession {
    pub fn new(validator: Arc<dyn SemanticValidator>) -> Self {
        Self {
            validator,
            repairer: None,
            learning: None,
            contracts: CommandContracts::builtin(),
            layout: ReservedLayout::default(),
            config: RefineConfig::default(),
        }
    }

    pub fn with_repairer(mut self, repairer: Arc<dyn FlowRepairer>) -> Self {
        self.repairer = Some(repairer);
        self
    }

    pub fn with_learning(mut self, learning: Arc<dyn LearningStore>) -> Self {
        self.learning = Some(learning);
        self
    }

    pub fn with_contracts(mut self, contracts: CommandContracts) -> Self {
        self.contracts = contracts;
        self
    }

    pub fn with_layout(mut self, layout: ReservedLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_config(mut self, config: RefineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn contracts(&self) -> &CommandContracts {
        &self.contracts
    }

    pub fn layout(&self) -> &ReservedLayout {
        &self.layout
    }

    /// Refine `csv` until accepted, stuck, or out of iterations.
    pub async fn run(&self, csv: &str, scope: Scope) -> Result<RefineOutcome> {
        let session = Uuid::new_v4();
        let started_at = Utc::now();
        let mut document = csv.to_string();
        let mut fix_log: Vec<String> = Vec::new();
        let mut unfixable: HashSet<String> = HashSet::new();
        let mut previous: Option<BTreeSet<String>> = None;
        let mut stuck_runs = 0usize;
        let mut last_errors: Vec<RemoteError> = Vec::new();
        let mut iterations = 0usize;

        for iteration in 1..=self.config.max_iterations {
            iterations = iteration;

            let (sanitized, log) =
                sanitize_document(&document, &self.contracts, &self.layout, scope);
            document = sanitized;
            fix_log.extend(log);

            let report = self.validate_with_retry(&document).await?;
            if report.valid || report.errors.is_empty() {
                info!(session = %session, iteration, "document accepted");
                return Ok(outcome(
                    RefineStatus::Accepted,
                    document,
                    iteration,
                    Vec::new(),
                    fix_log,
                    started_at,
                ));
            }
            last_errors = report.errors;
            info!(
                session = %session,
                iteration,
                errors = last_errors.len(),
                "validator reported errors"
            );

            let signatures: BTreeSet<String> =
                last_errors.iter().map(remote_signature).collect();
            if previous.as_ref() == Some(&signatures) {
                stuck_runs += 1;
                unfixable.extend(signatures.iter().cloned());
                warn!(session = %session, iteration, runs = stuck_runs, "error set unchanged");
                if stuck_runs >= self.config.stuck_threshold {
                    return Ok(outcome(
                        RefineStatus::Stuck,
                        document,
                        iteration,
                        last_errors,
                        fix_log,
                        started_at,
                    ));
                }
            } else {
                stuck_runs = 0;
            }
            previous = Some(signatures);

            // findings with a deterministic class are handled by the sanitize
            // pass at the top of the next iteration; only the rest go to the
            // generative repairer
            let ai_errors: Vec<RemoteError> = last_errors
                .iter()
                .filter(|e| !classify(e).is_deterministic())
                .filter(|e| !unfixable.contains(&remote_signature(e)))
                .cloned()
                .collect();
            if ai_errors.is_empty() {
                continue;
            }
            let Some(repairer) = &self.repairer else {
                continue;
            };

            let hints = self.known_fixes(&ai_errors).await;
            let pattern_ids = self.log_patterns(&ai_errors, &document).await;

            let proposal = match timeout(
                self.config.repairer_timeout,
                repairer.propose(&document, &ai_errors, &hints),
            )
            .await
            {
                Err(_) => {
                    warn!(session = %session, iteration, "repairer timed out");
                    continue;
                }
                Ok(Err(e)) => {
                    warn!(session = %session, iteration, error = %e, "repairer failed");
                    continue;
                }
                Ok(Ok(proposal)) => proposal,
            };

            match guardrail::check_proposal(&document, &proposal.csv, &self.config.guardrails) {
                Verdict::Rejected(reasons) => {
                    fix_log.push(format!("proposal rejected: {}", reasons.join("; ")));
                }
                Verdict::Accepted => {
                    let persisting = guardrail::residual_errors(&proposal.csv, &ai_errors);
                    info!(
                        session = %session,
                        iteration,
                        claimed = proposal.fixes_made.len(),
                        persisting = persisting.len(),
                        "proposal applied"
                    );
                    document = proposal.csv;
                    for fix in &proposal.fixes_made {
                        fix_log.push(format!("repairer: {fix}"));
                    }
                    self.log_attempts(&pattern_ids, &ai_errors, &persisting, &proposal.fixes_made)
                        .await;
                }
            }
        }

        Ok(outcome(
            RefineStatus::Exhausted,
            document,
            iterations,
            last_errors,
            fix_log,
            started_at,
        ))
    }

    async fn validate_with_retry(&self, document: &str) -> Result<ValidationReport> {
        let mut delay = Duration::from_millis(500);
        let mut attempt = 0;
        loop {
            match self.validator.validate(document).await {
                Ok(report) => return Ok(report),
                Err(e) if e.is_retryable() && attempt < 2 => {
                    attempt += 1;
                    warn!(error = %e, attempt, "validator call failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn known_fixes(&self, errors: &[RemoteError]) -> Vec<flowmend_remote::FixHint> {
        let Some(store) = &self.learning else {
            return Vec::new();
        };
        match store.known_fixes(errors).await {
            Ok(hints) => hints,
            Err(e) => {
                warn!(error = %e, "hint lookup failed");
                Vec::new()
            }
        }
    }

    async fn log_patterns(
        &self,
        errors: &[RemoteError],
        snapshot: &str,
    ) -> Vec<Option<String>> {
        let Some(store) = &self.learning else {
            return vec![None; errors.len()];
        };
        let mut ids = Vec::with_capacity(errors.len());
        for error in errors {
            match store.log_pattern(error, snapshot).await {
                Ok(id) => ids.push(Some(id)),
                Err(e) => {
                    warn!(error = %e, "pattern logging failed");
                    ids.push(None);
                }
            }
        }
        ids
    }

    async fn log_attempts(
        &self,
        pattern_ids: &[Option<String>],
        errors: &[RemoteError],
        persisting: &[RemoteError],
        fixes: &[String],
    ) {
        let Some(store) = &self.learning else { return };
        let description = fixes.join("; ");
        let persisting_sigs: HashSet<String> =
            persisting.iter().map(remote_signature).collect();
        for (error, id) in errors.iter().zip(pattern_ids) {
            let Some(id) = id else { continue };
            let succeeded = !persisting_sigs.contains(&remote_signature(error));
            if let Err(e) = store.log_fix_attempt(id, &description, succeeded).await {
                warn!(error = %e, "fix-attempt logging failed");
            }
        }
    }
}

fn outcome(
    status: RefineStatus,
    csv: String,
    iterations: usize,
    remaining_errors: Vec<RemoteError>,
    fix_log: Vec<String>,
    started_at: DateTime<Utc>,
) -> RefineOutcome {
    RefineOutcome {
        status,
        csv,
        iterations,
        remaining_errors,
        fix_log,
        started_at,
        finished_at: Utc::now(),
    }
}
