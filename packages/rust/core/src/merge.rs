//! Cluster rewrites: demoting competing primaries and recording new information.
//!
//! Both steps write through the caller's unit of work and return what they
//! changed instead of touching the caller's cluster view.

use identity_shared::{Contact, ContactId, NewContact, Result};
use identity_storage::UnitOfWork;
use tracing::info;

/// Demote every primary in `cluster` other than `primary` to a secondary of it.
///
/// Existing secondaries are left alone, even if they point at a demoted
/// contact. Returns the ids that were demoted, in cluster order.
pub async fn demote_competitors<U: UnitOfWork>(
    unit: &U,
    primary: &Contact,
    cluster: &[Contact],
) -> Result<Vec<ContactId>> {
    let mut demoted = Vec::new();
    for contact in cluster {
        if contact.id == primary.id || !contact.is_primary() {
            continue;
        }
        unit.demote_contact(contact.id, primary.id).await?;
        demoted.push(contact.id);
    }

    if !demoted.is_empty() {
        info!(primary_id = %primary.id, demoted = ?demoted, "merged clusters");
    }
    Ok(demoted)
}

/// Insert a secondary for the request if it carries an email or phone the
/// cluster does not already contain.
///
/// An absent request field carries nothing new. Returns the created contact,
/// or `None` when no write was needed.
pub async fn insert_new_information<U: UnitOfWork>(
    unit: &U,
    email: Option<&str>,
    phone: Option<&str>,
    primary: &Contact,
    cluster: &[Contact],
) -> Result<Option<Contact>> {
    let email_known = email.is_none_or(|e| cluster.iter().any(|c| c.email.as_deref() == Some(e)));
    let phone_known =
        phone.is_none_or(|p| cluster.iter().any(|c| c.phone_number.as_deref() == Some(p)));

    if email_known && phone_known {
        return Ok(None);
    }

    let created = unit
        .create_contact(&NewContact::secondary(email, phone, primary.id))
        .await?;
    info!(
        primary_id = %primary.id,
        contact_id = %created.id,
        new_email = !email_known,
        new_phone = !phone_known,
        "recorded new contact information"
    );
    Ok(Some(created))
}
