use std::collections::BTreeSet;

use crate::types::{StoreCode, SummaryCounts};

/// Separator placed between groups of pending store codes.
pub const PENDING_LINE_BREAK: &str = "<br>";
/// Rendering of an empty pending list.
pub const PENDING_PLACEHOLDER: &str = "-";

/// Eligible stores split into completed and pending sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub eligible: BTreeSet<StoreCode>,
    pub completed: BTreeSet<StoreCode>,
    pub pending: Vec<StoreCode>,
}

impl Reconciliation {
    /// Diffs the eligible stores against the stores that submitted.
    ///
    /// Submitted codes outside the eligible set are ignored.
    pub fn new(
        eligible: impl IntoIterator<Item = StoreCode>,
        submitted: impl IntoIterator<Item = StoreCode>,
    ) -> Self {
        let eligible: BTreeSet<StoreCode> = eligible.into_iter().collect();
        let completed: BTreeSet<StoreCode> = submitted
            .into_iter()
            .filter(|code| eligible.contains(code))
            .collect();
        let pending = eligible.difference(&completed).cloned().collect();

        Self {
            eligible,
            completed,
            pending,
        }
    }

    pub fn counts(&self, group_size: usize) -> SummaryCounts {
        SummaryCounts {
            total: self.eligible.len(),
            completed: self.completed.len(),
            pending: self.pending.len(),
            pending_list: format_pending_list(&self.pending, group_size),
        }
    }
}

/// Joins codes with commas in groups of `group_size`, groups separated by [`PENDING_LINE_BREAK`].
///
/// A group size of zero behaves like one.
pub fn format_pending_list(pending: &[StoreCode], group_size: usize) -> String {
    if pending.is_empty() {
        return PENDING_PLACEHOLDER.to_string();
    }

    pending
        .chunks(group_size.max(1))
        .map(|group| {
            group
                .iter()
                .map(StoreCode::as_str)
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect::<Vec<_>>()
        .join(PENDING_LINE_BREAK)
}
