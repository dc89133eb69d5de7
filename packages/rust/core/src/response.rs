//! Projection of a cluster into the external [`ContactResult`] shape.

use std::collections::HashSet;

use identity_shared::{Contact, ContactResult};

/// Insertion-ordered set of strings.
///
/// Values keep the position of their first insertion; later duplicates are
/// ignored.
#[derive(Debug, Default, Clone)]
pub struct OrderedSet {
    seen: HashSet<String>,
    order: Vec<String>,
}

impl OrderedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value`; returns `false` if it was already present.
    pub fn insert(&mut self, value: &str) -> bool {
        if self.seen.contains(value) {
            return false;
        }
        self.seen.insert(value.to_owned());
        self.order.push(value.to_owned());
        true
    }

    pub fn into_vec(self) -> Vec<String> {
        self.order
    }
}

/// Build the consolidated view of `cluster` under `primary`.
///
/// Emails and phones appear in cluster iteration order, so the primary's own
/// values are not necessarily first. Every contact other than `primary` is
/// listed in `secondary_ids`, in cluster order.
pub fn format_response(primary: &Contact, cluster: &[Contact]) -> ContactResult {
    let mut emails = OrderedSet::new();
    let mut phones = OrderedSet::new();
    let mut secondary_ids = Vec::new();

    for contact in cluster {
        if let Some(email) = contact.email.as_deref() {
            emails.insert(email);
        }
        if let Some(phone) = contact.phone_number.as_deref() {
            phones.insert(phone);
        }
        if contact.id != primary.id {
            secondary_ids.push(contact.id);
        }
    }

    ContactResult {
        primary_id: primary.id,
        emails: emails.into_vec(),
        phones: phones.into_vec(),
        secondary_ids,
    }
}
