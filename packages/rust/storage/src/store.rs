//! The narrow store contract the reconciler is written against.
//!
//! All reads exclude soft-deleted rows and return contacts in ascending id
//! order. Every operation of one reconcile call goes through a single
//! [`UnitOfWork`]; nothing it writes is visible to other units until
//! [`UnitOfWork::commit`] succeeds.

use identity_shared::{Contact, ContactId, NewContact, Result};

/// A source of atomic units of work over contact records.
#[allow(async_fn_in_trait)]
pub trait ContactStore {
    type Unit: UnitOfWork;

    /// Start an isolated unit of work. Blocks while another unit is open.
    async fn begin(&self) -> Result<Self::Unit>;
}

/// Reads and writes that commit or roll back together.
///
/// Dropping a unit without calling [`commit`](Self::commit) discards its writes.
#[allow(async_fn_in_trait)]
pub trait UnitOfWork {
    /// Contacts whose email equals `email` or whose phone equals `phone`.
    /// An absent field matches nothing.
    async fn find_by_identity(&self, email: Option<&str>, phone: Option<&str>)
    -> Result<Vec<Contact>>;

    /// Contacts whose `id` or `linked_id` is in `ids`.
    async fn find_by_ids_or_links(&self, ids: &[ContactId]) -> Result<Vec<Contact>>;

    /// Insert a contact and return it with its assigned id and timestamps.
    async fn create_contact(&self, contact: &NewContact) -> Result<Contact>;

    /// Make `id` a secondary of `primary_id`, refreshing `updated_at`.
    async fn demote_contact(&self, id: ContactId, primary_id: ContactId) -> Result<()>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}
