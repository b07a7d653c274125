//! Multi-flow assembly: refine each flow segment concurrently, then join the
//! results into one document deterministically.
//!
//! Concurrency stops at the refinement stage. The final renumbering and
//! concatenation run single-threaded, in segment order, so the assembled
//! document is identical regardless of which segment finished first.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::info;

use flowmend_dialect::{parse_document, serialize_entries, split_header, Entry};
use flowmend_types::{Error, Result};

use crate::allocator;
use crate::orchestrator::{
    band_reserved, sanitize_document, RefineOutcome, RefineSession, Scope,
};
use crate::validator;

/// How many segments are refined at once by default.
pub const DEFAULT_CONCURRENCY: usize = 3;

#[derive(Debug, Clone)]
pub struct SegmentOutcome {
    pub index: usize,
    pub outcome: RefineOutcome,
}

#[derive(Debug, Clone)]
pub struct AssembledDocument {
    pub csv: String,
    pub segments: Vec<SegmentOutcome>,
    /// Changes made during assembly itself (renumbering, system nodes).
    pub fix_log: Vec<String>,
    pub warnings: Vec<String>,
}

/// Refine every segment through `session` (at most `concurrency` at a time)
/// and assemble the results into one document.
pub async fn refine_and_assemble(
    session: Arc<RefineSession>,
    segments: Vec<String>,
    concurrency: usize,
) -> Result<AssembledDocument> {
    let count = segments.len();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks: JoinSet<Result<(usize, RefineOutcome)>> = JoinSet::new();

    for (index, csv) in segments.into_iter().enumerate() {
        let session = Arc::clone(&session);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|e| Error::Other(e.to_string()))?;
            let outcome = session.run(&csv, Scope::Segment(index)).await?;
            Ok((index, outcome))
        });
    }

    // collect by index so completion order does not matter
    let mut slots: Vec<Option<RefineOutcome>> = (0..count).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        let (index, outcome) = joined.map_err(|e| Error::Other(e.to_string()))??;
        slots[index] = Some(outcome);
    }
    let mut outcomes = Vec::with_capacity(count);
    for (index, slot) in slots.into_iter().enumerate() {
        let outcome =
            slot.ok_or_else(|| Error::Other(format!("segment {index} produced no outcome")))?;
        outcomes.push(SegmentOutcome { index, outcome });
    }

    let layout = session.layout();
    let contracts = session.contracts();
    let mut reserved = band_reserved(layout);
    let mut all_entries: Vec<Entry> = Vec::new();
    let mut fix_log = Vec::new();
    let mut warnings = Vec::new();

    for segment in &outcomes {
        let (rows, _) = split_header(parse_document(&segment.outcome.csv));
        let typed = validator::validate_segment(&rows, contracts, layout);
        // ids claimed by earlier segments count as reserved here, so
        // cross-segment collisions renumber with their references rewritten
        let result = allocator::remap(&typed.entries, segment.index, &reserved, layout);
        for (old, new) in &result.moves {
            fix_log.push(format!(
                "flow {}: renumbered node {old} to {new}",
                segment.index
            ));
        }
        warnings.extend(result.warnings);
        reserved.extend(result.entries.iter().filter_map(Entry::id));
        all_entries.extend(result.entries);
    }

    // one full-document pass adds the shared system nodes and catches
    // anything that crosses a segment boundary
    let merged = serialize_entries(&all_entries);
    let (csv, log) = sanitize_document(&merged, contracts, layout, Scope::Document);
    fix_log.extend(log);

    info!(
        segments = outcomes.len(),
        rows = csv.lines().count().saturating_sub(1),
        "document assembled"
    );
    Ok(AssembledDocument { csv, segments: outcomes, fix_log, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use async_trait::async_trait;
    use flowmend_dialect::columns as col;
    use flowmend_dialect::{serialize_document, RawRow, Record};
    use flowmend_remote::{SemanticValidator, ValidationReport};

    struct AlwaysClean;

    #[async_trait]
    impl SemanticValidator for AlwaysClean {
        async fn validate(&self, _csv: &str) -> Result<ValidationReport> {
            Ok(ValidationReport::clean())
        }
    }

    struct AlwaysUnauthorized;

    #[async_trait]
    impl SemanticValidator for AlwaysUnauthorized {
        async fn validate(&self, _csv: &str) -> Result<ValidationReport> {
            Err(Error::Auth { service: "semantic-validator".into() })
        }
    }

    fn decision(id: i64, next: &str) -> RawRow {
        let mut row = RawRow::blank();
        row.set(col::ID, id.to_string());
        row.set(col::TYPE, "decision");
        row.set(col::NEXT_NODES, next);
        row.set(col::MESSAGE, "Hi");
        row
    }

    fn terminal(id: i64) -> RawRow {
        let mut row = decision(id, "");
        row.set(col::BEHAVIORS, "endChat");
        row
    }

    fn segment_text() -> String {
        serialize_document(&[decision(100, "101"), terminal(101)])
    }

    fn typed_rows(csv: &str) -> Vec<Record> {
        let (rows, _) = split_header(parse_document(csv));
        rows.iter()
            .map(|r| Record::from_row(r).unwrap().0)
            .collect()
    }

    #[tokio::test]
    async fn colliding_segments_get_distinct_bands() {
        let session = Arc::new(RefineSession::new(Arc::new(AlwaysClean)));
        // both segments were numbered from 100 by the generator
        let result =
            refine_and_assemble(session, vec![segment_text(), segment_text()], 2)
                .await
                .unwrap();

        let records = typed_rows(&result.csv);
        let ids: Vec<i64> = records.iter().map(Record::id).collect();
        let distinct: HashSet<i64> = ids.iter().copied().collect();
        assert_eq!(ids.len(), distinct.len(), "duplicate ids in {ids:?}");

        // segment 0 kept its ids; segment 1 moved into band 1 with its
        // internal references following
        assert!(distinct.contains(&100) && distinct.contains(&101));
        assert!(distinct.contains(&200) && distinct.contains(&201));
        let moved = records
            .iter()
            .find_map(|r| match r {
                Record::Decision(d) if d.meta.id == 200 => Some(d),
                _ => None,
            })
            .unwrap();
        assert_eq!(moved.next_nodes, vec![201]);
    }

    #[tokio::test]
    async fn assembled_document_contains_system_nodes() {
        let session = Arc::new(RefineSession::new(Arc::new(AlwaysClean)));
        let result = refine_and_assemble(session, vec![segment_text()], 1)
            .await
            .unwrap();
        let ids: HashSet<i64> = typed_rows(&result.csv).iter().map(Record::id).collect();
        for id in [1, 50, 900, 901, 902, 903, 904, 905, 906] {
            assert!(ids.contains(&id), "missing system node {id}");
        }
    }

    #[tokio::test]
    async fn no_segments_yields_skeleton_document() {
        let session = Arc::new(RefineSession::new(Arc::new(AlwaysClean)));
        let result = refine_and_assemble(session, Vec::new(), 3).await.unwrap();
        assert!(result.segments.is_empty());
        assert_eq!(typed_rows(&result.csv).len(), 9);
    }

    #[tokio::test]
    async fn segment_outcomes_are_ordered_by_index() {
        let session = Arc::new(RefineSession::new(Arc::new(AlwaysClean)));
        let segments = vec![segment_text(), segment_text(), segment_text(), segment_text()];
        let result = refine_and_assemble(session, segments, 2).await.unwrap();
        let indices: Vec<usize> = result.segments.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn fatal_segment_failure_propagates() {
        let session = Arc::new(RefineSession::new(Arc::new(AlwaysUnauthorized)));
        let err = refine_and_assemble(session, vec![segment_text()], 1)
            .await
            .unwrap_err();
        assert!(err.is_terminal());
    }
}
