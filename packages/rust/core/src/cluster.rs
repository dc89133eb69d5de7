//! Cluster collection: the transitive closure of contacts linked to a set of seeds.
//!
//! Two contacts are adjacent when they are the same row, or when one's
//! `linked_id` is the other's `id`. Each round queries the store for every
//! contact whose `id` or `linked_id` is in the frontier; the ids and
//! `linked_id`s of newly seen contacts form the next frontier, so a demoted
//! primary still pulls in the secondaries linked to it. Rounds are sequential
//! because each frontier depends on the previous round's rows.

use std::collections::HashSet;

use identity_shared::{Contact, ContactId, Result};
use identity_storage::UnitOfWork;
use tracing::debug;

/// Collect every non-deleted contact reachable from `seeds`.
///
/// The result has no duplicate ids and keeps first-seen order: rows of earlier
/// rounds come first, and within a round the store's ordering is preserved.
pub async fn collect_cluster<U: UnitOfWork>(unit: &U, seeds: &[ContactId]) -> Result<Vec<Contact>> {
    let mut visited: HashSet<ContactId> = HashSet::new();
    let mut expanded: HashSet<ContactId> = HashSet::new();
    let mut cluster = Vec::new();
    let mut frontier = dedupe(seeds.iter().copied(), &expanded);
    let mut round = 0usize;

    while !frontier.is_empty() {
        round += 1;
        expanded.extend(frontier.iter().copied());

        let batch = unit.find_by_ids_or_links(&frontier).await?;
        debug!(round, frontier = frontier.len(), rows = batch.len(), "cluster round");

        let mut next = Vec::new();
        for contact in batch {
            if !visited.insert(contact.id) {
                continue;
            }
            if let Some(linked) = contact.linked_id.filter(|id| !visited.contains(id)) {
                next.push(linked);
            }
            next.push(contact.id);
            cluster.push(contact);
        }

        frontier = dedupe(next.into_iter(), &expanded);
    }

    Ok(cluster)
}

/// Drop repeated ids and ids already used as query keys, keeping order.
fn dedupe(ids: impl Iterator<Item = ContactId>, expanded: &HashSet<ContactId>) -> Vec<ContactId> {
    let mut seen = HashSet::new();
    ids.filter(|id| !expanded.contains(id) && seen.insert(*id))
        .collect()
}
