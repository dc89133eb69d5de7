//! Canonical-record selection.

use identity_shared::{Contact, TieBreakPolicy};

/// Pick the contact with the earliest `created_at`.
///
/// Contacts sharing the earliest timestamp are separated by `policy`.
/// Returns `None` only for an empty cluster.
pub fn resolve_primary(cluster: &[Contact], policy: TieBreakPolicy) -> Option<&Contact> {
    cluster.iter().reduce(|best, current| {
        let replace = match current.created_at.cmp(&best.created_at) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => match policy {
                TieBreakPolicy::FirstEncountered => false,
                TieBreakPolicy::LowestId => current.id < best.id,
            },
        };
        if replace { current } else { best }
    })
}
