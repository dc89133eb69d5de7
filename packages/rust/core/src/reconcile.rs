//! The `reconcile` entry point: match → collect → resolve → demote → insert → format.
//!
//! Every step runs inside one unit of work obtained from the store. The unit
//! is committed only when all steps succeed; on any error it is rolled back
//! and the original error is returned unchanged.

use identity_shared::{
    ContactResult, IdentifyRequest, IdentifyResponse, IdentityError, NewContact,
    ReconcileOptions, Result,
};
use identity_storage::{ContactStore, UnitOfWork};
use tracing::{field, info, instrument, warn};

use crate::cluster::collect_cluster;
use crate::merge::{demote_competitors, insert_new_information};
use crate::resolver::resolve_primary;
use crate::response::format_response;

/// Resolves identity signatures against a contact store.
///
/// The store handle is injected; its connection lifecycle belongs to the caller.
pub struct Reconciler<S> {
    store: S,
    options: ReconcileOptions,
}

impl<S: ContactStore> Reconciler<S> {
    pub fn new(store: S, options: ReconcileOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reconcile an `(email, phone)` signature and return the consolidated cluster.
    ///
    /// Empty strings count as absent. Fails with [`IdentityError::InvalidInput`]
    /// before touching the store when both fields are absent.
    #[instrument(skip_all, fields(has_email = field::Empty, has_phone = field::Empty))]
    pub async fn reconcile(&self, email: Option<&str>, phone: Option<&str>) -> Result<ContactResult> {
        let email = email.filter(|s| !s.is_empty());
        let phone = phone.filter(|s| !s.is_empty());
        let span = tracing::Span::current();
        span.record("has_email", email.is_some());
        span.record("has_phone", phone.is_some());

        if email.is_none() && phone.is_none() {
            return Err(IdentityError::invalid_input(
                "at least one of email or phoneNumber must be provided",
            ));
        }

        let unit = self.store.begin().await?;
        match self.reconcile_in(&unit, email, phone).await {
            Ok(result) => {
                unit.commit().await?;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback_err) = unit.rollback().await {
                    warn!(error = %rollback_err, "rollback failed after reconcile error");
                }
                Err(e)
            }
        }
    }

    /// [`reconcile`](Self::reconcile) over the request/response envelopes.
    pub async fn identify(&self, request: IdentifyRequest) -> Result<IdentifyResponse> {
        let request = request.normalized();
        self.reconcile(request.email.as_deref(), request.phone_number.as_deref())
            .await
            .map(IdentifyResponse::from)
    }

    async fn reconcile_in(
        &self,
        unit: &S::Unit,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<ContactResult> {
        let matches = unit.find_by_identity(email, phone).await?;

        if matches.is_empty() {
            let created = unit
                .create_contact(&NewContact::primary(email, phone))
                .await?;
            info!(contact_id = %created.id, "created new primary contact");
            return Ok(format_response(&created, std::slice::from_ref(&created)));
        }

        let seeds: Vec<_> = matches.iter().map(|c| c.id).collect();
        let cluster = collect_cluster(unit, &seeds).await?;
        let primary = resolve_primary(&cluster, self.options.tie_break)
            .cloned()
            .ok_or_else(|| {
                IdentityError::Storage("matched contacts missing from their own cluster".into())
            })?;

        demote_competitors(unit, &primary, &cluster).await?;
        let inserted = insert_new_information(unit, email, phone, &primary, &cluster).await?;

        let view: Vec<_> = cluster.into_iter().chain(inserted).collect();
        info!(
            primary_id = %primary.id,
            cluster_size = view.len(),
            "reconciled contact"
        );
        Ok(format_response(&primary, &view))
    }
}
