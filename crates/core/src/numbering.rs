//! Human-readable document numbers (`QT-2025-0001`, `BK-2025-0042`, ...).
//!
//! Counters are keyed by scope, prefix and year so each organization gets its
//! own gap-free series per document type and the series restarts every
//! January. Numbers are handed out under a single lock and never reused.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scope string for platform-wide series (credit invoices).
pub const PLATFORM_SCOPE: &str = "platform";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SequenceState {
    /// `"{scope}/{prefix}/{year}"` -> next number to hand out.
    pub next: BTreeMap<String, u32>,
}

#[derive(Debug, Default)]
pub struct DocumentSequence {
    state: Mutex<SequenceState>,
}

impl DocumentSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: SequenceState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn export(&self) -> SequenceState {
        self.state.lock().clone()
    }

    /// Allocate the next number in the `(scope, prefix, year)` series.
    pub fn next(&self, scope: &str, prefix: &str, year: i32) -> String {
        let key = format!("{scope}/{prefix}/{year}");
        let mut state = self.state.lock();
        let counter = state.next.entry(key).or_insert(1);
        let n = *counter;
        *counter += 1;
        format!("{prefix}-{year}-{n:04}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_per_scope_and_year() {
        let seq = DocumentSequence::new();
        assert_eq!(seq.next("org-a", "QT", 2025), "QT-2025-0001");
        assert_eq!(seq.next("org-a", "QT", 2025), "QT-2025-0002");
        assert_eq!(seq.next("org-b", "QT", 2025), "QT-2025-0001");
        assert_eq!(seq.next("org-a", "QT", 2026), "QT-2026-0001");
        assert_eq!(seq.next("org-a", "BK", 2025), "BK-2025-0001");
    }

    #[test]
    fn test_sequence_survives_export() {
        let seq = DocumentSequence::new();
        seq.next(PLATFORM_SCOPE, "TQB", 2025);
        seq.next(PLATFORM_SCOPE, "TQB", 2025);
        let restored = DocumentSequence::from_state(seq.export());
        assert_eq!(restored.next(PLATFORM_SCOPE, "TQB", 2025), "TQB-2025-0003");
    }

    #[test]
    fn test_wide_numbers() {
        let seq = DocumentSequence::from_state(SequenceState {
            next: BTreeMap::from([("s/INV/2025".to_string(), 10_000)]),
        });
        assert_eq!(seq.next("s", "INV", 2025), "INV-2025-10000");
    }
}
