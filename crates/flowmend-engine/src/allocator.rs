//! Id allocation: renumber ids that collide with reserved ids or with each
//! other, keeping each flow's nodes inside its numbering band.

use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;

use tracing::{debug, warn};

use flowmend_dialect::{Entry, ReservedLayout};

/// Renumbered entries plus the applied moves.
#[derive(Debug, Clone)]
pub struct RemapResult {
    pub entries: Vec<Entry>,
    /// Every `(old, new)` renumbering, in entry order.
    pub moves: Vec<(i64, i64)>,
    pub warnings: Vec<String>,
}

/// Renumber every record whose id is in `reserved` or already claimed by an
/// earlier record in the batch. Replacement ids come from flow band
/// `flow_index`, spilling into the following band (with a warning) when the
/// band runs out.
///
/// References follow a reserved-collision move. References to a duplicated id
/// keep pointing at the first occurrence, which keeps the id.
pub fn remap(
    entries: &[Entry],
    flow_index: usize,
    reserved: &HashSet<i64>,
    layout: &ReservedLayout,
) -> RemapResult {
    let mut entries = entries.to_vec();
    let mut warnings = Vec::new();
    let mut moves = Vec::new();
    let mut rewrite: HashMap<i64, i64> = HashMap::new();

    // claimed by anything: reserved ids, the batch's own ids, and fresh ids
    let mut taken: HashSet<i64> = reserved.clone();
    taken.extend(entries.iter().filter_map(Entry::id));

    let mut cursor = BandCursor::new(layout, flow_index);
    let mut seen: HashSet<i64> = HashSet::new();

    for entry in &mut entries {
        let Entry::Record(record) = entry else { continue };
        let old = record.id();
        let collides = reserved.contains(&old) || !seen.insert(old);
        if !collides {
            continue;
        }
        let new = cursor.next_free(&taken, &mut warnings);
        taken.insert(new);
        seen.insert(new);
        moves.push((old, new));
        record.meta_mut().id = new;
        debug!(old, new, flow_index, "renumbered colliding id");
        if reserved.contains(&old) {
            rewrite.entry(old).or_insert(new);
        }
    }

    if !rewrite.is_empty() {
        let map = |t: i64| rewrite.get(&t).copied().unwrap_or(t);
        for entry in &mut entries {
            if let Entry::Record(record) = entry {
                record.rewrite_targets(map);
                record.rewrite_bindings(map);
            }
        }
    }
    for w in &warnings {
        warn!(warning = %w, "id allocation");
    }
    RemapResult { entries, moves, warnings }
}

/// Walks a flow band from its start, moving to the next band on exhaustion.
struct BandCursor<'a> {
    layout: &'a ReservedLayout,
    flow_index: usize,
    band: RangeInclusive<i64>,
    next: i64,
}

impl<'a> BandCursor<'a> {
    fn new(layout: &'a ReservedLayout, flow_index: usize) -> Self {
        let band = layout.flow_band(flow_index);
        let next = *band.start();
        Self { layout, flow_index, band, next }
    }

    fn next_free(&mut self, taken: &HashSet<i64>, warnings: &mut Vec<String>) -> i64 {
        loop {
            if self.next > *self.band.end() {
                let spill = self.layout.next_band(&self.band);
                warnings.push(format!(
                    "flow {}: band {}..={} exhausted, spilling into {}..={}",
                    self.flow_index,
                    self.band.start(),
                    self.band.end(),
                    spill.start(),
                    spill.end()
                ));
                self.next = *spill.start();
                self.band = spill;
            }
            let candidate = self.next;
            self.next += 1;
            if !taken.contains(&candidate) {
                return candidate;
            }
        }
    }
}
