//! Reserved node ids and numbering bands.
//!
//! Ids are partitioned into non-overlapping bands: startup, main menu, system
//! nodes, and one contiguous band per generated flow. The defaults mirror the
//! platform convention (entry node 1, system nodes in the 900s) but nothing
//! downstream hard-codes them.

use std::ops::RangeInclusive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemRole {
    Entry,
    ReturnToMenu,
    ErrorHandler,
    EndOfChat,
    AgentTransfer,
    OutOfScope(u8),
    GenericError,
}

#[derive(Debug, Clone)]
pub struct ReservedLayout {
    pub entry: i64,
    pub return_to_menu: i64,
    pub error_handler: i64,
    pub end_of_chat: i64,
    pub agent_transfer: i64,
    pub out_of_scope: [i64; 3],
    pub generic_error: i64,
    pub startup_band: RangeInclusive<i64>,
    pub menu_band: RangeInclusive<i64>,
    pub system_band: RangeInclusive<i64>,
    /// First id of flow band 0; each flow band is `flow_band_size` wide.
    pub flow_band_start: i64,
    pub flow_band_size: i64,
}

impl Default for ReservedLayout {
    fn default() -> Self {
        Self {
            entry: 1,
            return_to_menu: 50,
            error_handler: 900,
            end_of_chat: 901,
            agent_transfer: 902,
            out_of_scope: [903, 904, 905],
            generic_error: 906,
            startup_band: 1..=49,
            menu_band: 50..=99,
            system_band: 900..=999,
            flow_band_start: 100,
            flow_band_size: 100,
        }
    }
}

impl ReservedLayout {
    /// Every id with a fixed system meaning.
    pub fn system_ids(&self) -> Vec<i64> {
        let mut ids = vec![
            self.entry,
            self.return_to_menu,
            self.error_handler,
            self.end_of_chat,
            self.agent_transfer,
            self.generic_error,
        ];
        ids.extend(self.out_of_scope);
        ids
    }

    /// The roles that every complete document must contain.
    pub fn required_roles(&self) -> Vec<(SystemRole, i64)> {
        vec![
            (SystemRole::Entry, self.entry),
            (SystemRole::ReturnToMenu, self.return_to_menu),
            (SystemRole::ErrorHandler, self.error_handler),
            (SystemRole::EndOfChat, self.end_of_chat),
            (SystemRole::AgentTransfer, self.agent_transfer),
            (SystemRole::OutOfScope(0), self.out_of_scope[0]),
            (SystemRole::OutOfScope(1), self.out_of_scope[1]),
            (SystemRole::OutOfScope(2), self.out_of_scope[2]),
            (SystemRole::GenericError, self.generic_error),
        ]
    }

    /// True if `id` falls in a band not available to generated flow nodes.
    pub fn is_reserved(&self, id: i64) -> bool {
        self.startup_band.contains(&id)
            || self.menu_band.contains(&id)
            || self.system_band.contains(&id)
    }

    /// The numeric band assigned to flow segment `index`. Bands are laid out
    /// sequentially from `flow_band_start`, skipping any band that would
    /// overlap the system band.
    pub fn flow_band(&self, index: usize) -> RangeInclusive<i64> {
        let size = self.flow_band_size;
        let mut start = self.flow_band_start;
        let mut remaining = index;
        loop {
            let end = start + size - 1;
            let overlaps_system =
                start <= *self.system_band.end() && end >= *self.system_band.start();
            if !overlaps_system {
                if remaining == 0 {
                    return start..=end;
                }
                remaining -= 1;
            }
            start += size;
        }
    }

    /// The band following `band`, skipping the system band. Used when a band
    /// overflows during allocation.
    pub fn next_band(&self, band: &RangeInclusive<i64>) -> RangeInclusive<i64> {
        let size = self.flow_band_size;
        let mut start = band.end() + 1;
        loop {
            let end = start + size - 1;
            let overlaps_system =
                start <= *self.system_band.end() && end >= *self.system_band.start();
            if !overlaps_system {
                return start..=end;
            }
            start += size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_roles() {
        let layout = ReservedLayout::default();
        assert_eq!(layout.entry, 1);
        assert_eq!(layout.return_to_menu, 50);
        assert_eq!(layout.generic_error, 906);
        assert_eq!(layout.required_roles().len(), 9);
    }

    #[test]
    fn reserved_band_membership() {
        let layout = ReservedLayout::default();
        assert!(layout.is_reserved(1));
        assert!(layout.is_reserved(50));
        assert!(layout.is_reserved(903));
        assert!(!layout.is_reserved(100));
        assert!(!layout.is_reserved(250));
    }

    #[test]
    fn flow_bands_are_sequential() {
        let layout = ReservedLayout::default();
        assert_eq!(layout.flow_band(0), 100..=199);
        assert_eq!(layout.flow_band(1), 200..=299);
        assert_eq!(layout.flow_band(7), 800..=899);
    }

    #[test]
    fn flow_bands_skip_system_band() {
        let layout = ReservedLayout::default();
        // Band 8 would nominally be 900..=999; that belongs to system nodes.
        assert_eq!(layout.flow_band(8), 1000..=1099);
        assert_eq!(layout.flow_band(9), 1100..=1199);
    }

    #[test]
    fn next_band_skips_system_band() {
        let layout = ReservedLayout::default();
        assert_eq!(layout.next_band(&(700..=799)), 800..=899);
        assert_eq!(layout.next_band(&(800..=899)), 1000..=1099);
    }

    #[test]
    fn bands_never_overlap() {
        let layout = ReservedLayout::default();
        let bands: Vec<_> = (0..12).map(|i| layout.flow_band(i)).collect();
        for pair in bands.windows(2) {
            assert!(pair[0].end() < pair[1].start());
        }
    }
}
