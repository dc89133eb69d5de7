//! libSQL storage layer for contact records (local file mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding the `contacts`
//! table and implements [`ContactStore`] for the reconciler.
//!
//! **Access rules:**
//! - Reconciling callers: read-write via [`Storage::open`]
//! - Reporting callers: read-only via [`Storage::open_readonly`]
//!
//! Units of work are `BEGIN IMMEDIATE` transactions serialized by an async
//! mutex, so at most one unit is open per handle at any time.

mod migrations;
mod store;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use identity_shared::{Contact, ContactId, IdentityError, LinkPrecedence, NewContact, Result};
use libsql::params::Params;
use libsql::{Connection, Database, Transaction, TransactionBehavior, Value, params};
use tokio::sync::{Mutex, OwnedMutexGuard};

pub use store::{ContactStore, UnitOfWork};

const CONTACT_COLUMNS: &str =
    "id, email, phone_number, linked_id, link_precedence, created_at, updated_at, deleted_at";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    unit_lock: Arc<Mutex<()>>,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IdentityError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
            unit_lock: Arc::new(Mutex::new(())),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
            unit_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    IdentityError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(IdentityError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Administrative operations (outside any unit of work)
    // -----------------------------------------------------------------------

    /// Get a contact by id, including soft-deleted rows.
    ///
    /// Waits for any open unit of work, so uncommitted rows are never visible.
    pub async fn get_contact(&self, id: ContactId) -> Result<Option<Contact>> {
        let _guard = self.unit_lock.lock().await;
        let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1");
        let mut contacts = query_contacts(&self.conn, &sql, params![id.0]).await?;
        Ok(contacts.pop())
    }

    /// List all non-deleted contacts in id order.
    pub async fn list_contacts(&self) -> Result<Vec<Contact>> {
        let _guard = self.unit_lock.lock().await;
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE deleted_at IS NULL ORDER BY id"
        );
        query_contacts(&self.conn, &sql, params![]).await
    }

    /// Mark a contact as deleted. Returns `false` if it was missing or already deleted.
    pub async fn soft_delete_contact(&self, id: ContactId) -> Result<bool> {
        self.check_writable()?;
        let _guard = self.unit_lock.lock().await;
        let now = timestamp_now();
        let affected = self
            .conn
            .execute(
                "UPDATE contacts SET deleted_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND deleted_at IS NULL",
                params![now.as_str(), id.0],
            )
            .await
            .map_err(db_err)?;
        Ok(affected == 1)
    }
}

impl ContactStore for Storage {
    type Unit = StorageUnit;

    async fn begin(&self) -> Result<StorageUnit> {
        self.check_writable()?;
        let guard = Arc::clone(&self.unit_lock).lock_owned().await;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(db_err)?;
        Ok(StorageUnit { tx, _guard: guard })
    }
}

/// One open `BEGIN IMMEDIATE` transaction plus the handle's unit lock.
///
/// Field order matters: the transaction is dropped (rolled back) before the
/// lock is released.
pub struct StorageUnit {
    tx: Transaction,
    _guard: OwnedMutexGuard<()>,
}

impl UnitOfWork for StorageUnit {
    async fn find_by_identity(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<Contact>> {
        if email.is_none() && phone.is_none() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts
             WHERE deleted_at IS NULL AND (email = ?1 OR phone_number = ?2)
             ORDER BY id"
        );
        query_contacts(&self.tx, &sql, params![email, phone]).await
    }

    async fn find_by_ids_or_links(&self, ids: &[ContactId]) -> Result<Vec<Contact>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (1..=ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts
             WHERE deleted_at IS NULL
               AND (id IN ({placeholders}) OR linked_id IN ({placeholders}))
             ORDER BY id"
        );
        let values = ids.iter().map(|id| Value::Integer(id.0)).collect();
        query_contacts(&self.tx, &sql, Params::Positional(values)).await
    }

    async fn create_contact(&self, contact: &NewContact) -> Result<Contact> {
        let now = timestamp_now();
        let sql = format!(
            "INSERT INTO contacts (email, phone_number, linked_id, link_precedence, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             RETURNING {CONTACT_COLUMNS}"
        );
        let mut created = query_contacts(
            &self.tx,
            &sql,
            params![
                contact.email.as_deref(),
                contact.phone_number.as_deref(),
                contact.linked_id.map(|id| id.0),
                contact.link_precedence.as_str(),
                now.as_str(),
            ],
        )
        .await?;
        created
            .pop()
            .ok_or_else(|| IdentityError::Storage("insert returned no row".into()))
    }

    async fn demote_contact(&self, id: ContactId, primary_id: ContactId) -> Result<()> {
        let now = timestamp_now();
        let affected = self
            .tx
            .execute(
                "UPDATE contacts SET link_precedence = ?1, linked_id = ?2, updated_at = ?3
                 WHERE id = ?4 AND deleted_at IS NULL",
                params![
                    LinkPrecedence::Secondary.as_str(),
                    primary_id.0,
                    now.as_str(),
                    id.0,
                ],
            )
            .await
            .map_err(db_err)?;
        if affected != 1 {
            return Err(IdentityError::Storage(format!(
                "contact {id} vanished during demotion"
            )));
        }
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(db_err)
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(db_err)
    }
}

fn db_err(e: libsql::Error) -> IdentityError {
    IdentityError::Storage(e.to_string())
}

fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Run a `SELECT`/`RETURNING` statement and convert every row.
async fn query_contacts(
    conn: &Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
) -> Result<Vec<Contact>> {
    let mut rows = conn.query(sql, params).await.map_err(db_err)?;

    let mut results = Vec::new();
    while let Some(row) = rows.next().await.map_err(db_err)? {
        results.push(row_to_contact(&row)?);
    }
    Ok(results)
}

/// Convert a database row (in [`CONTACT_COLUMNS`] order) to a [`Contact`].
fn row_to_contact(row: &libsql::Row) -> Result<Contact> {
    let link_precedence: String = row.get(4).map_err(db_err)?;
    Ok(Contact {
        id: ContactId(row.get::<i64>(0).map_err(db_err)?),
        email: optional_text(row, 1)?,
        phone_number: optional_text(row, 2)?,
        linked_id: match row.get_value(3).map_err(db_err)? {
            Value::Null => None,
            Value::Integer(id) => Some(ContactId(id)),
            other => {
                return Err(IdentityError::Storage(format!(
                    "invalid linked_id value: {other:?}"
                )));
            }
        },
        link_precedence: link_precedence.parse().map_err(IdentityError::Storage)?,
        created_at: parse_timestamp(&row.get::<String>(5).map_err(db_err)?)?,
        updated_at: parse_timestamp(&row.get::<String>(6).map_err(db_err)?)?,
        deleted_at: optional_text(row, 7)?
            .map(|s| parse_timestamp(&s))
            .transpose()?,
    })
}

fn optional_text(row: &libsql::Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx).map_err(db_err)? {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s)),
        other => Err(IdentityError::Storage(format!(
            "expected text in column {idx}, got {other:?}"
        ))),
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| IdentityError::Storage(format!("invalid date: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("identity_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    async fn seed(storage: &Storage, contacts: &[NewContact]) -> Vec<Contact> {
        let unit = storage.begin().await.expect("begin");
        let mut created = Vec::new();
        for contact in contacts {
            created.push(unit.create_contact(contact).await.expect("create"));
        }
        unit.commit().await.expect("commit");
        created
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("identity_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn create_assigns_id_and_timestamps() {
        let storage = test_storage().await;
        let created = seed(&storage, &[NewContact::primary(Some("a@x.com"), Some("123"))]).await;
        let contact = &created[0];

        assert_eq!(contact.email.as_deref(), Some("a@x.com"));
        assert_eq!(contact.phone_number.as_deref(), Some("123"));
        assert_eq!(contact.link_precedence, LinkPrecedence::Primary);
        assert_eq!(contact.linked_id, None);
        assert_eq!(contact.created_at, contact.updated_at);
        assert!(contact.deleted_at.is_none());

        let fetched = storage.get_contact(contact.id).await.expect("get");
        assert_eq!(fetched.as_ref(), Some(contact));
    }

    #[tokio::test]
    async fn find_by_identity_matches_either_field() {
        let storage = test_storage().await;
        let created = seed(
            &storage,
            &[
                NewContact::primary(Some("a@x.com"), Some("111")),
                NewContact::primary(Some("b@x.com"), Some("222")),
                NewContact::primary(None, Some("333")),
            ],
        )
        .await;

        let unit = storage.begin().await.expect("begin");
        let found = unit
            .find_by_identity(Some("a@x.com"), Some("333"))
            .await
            .expect("find");
        let ids: Vec<_> = found.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![created[0].id, created[2].id]);

        // An absent field must not match rows where that column is NULL.
        let found = unit.find_by_identity(Some("nobody@x.com"), None).await.expect("find");
        assert!(found.is_empty());
        let found = unit.find_by_identity(None, None).await.expect("find");
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn find_by_ids_or_links_follows_both_directions() {
        let storage = test_storage().await;
        let primary = seed(&storage, &[NewContact::primary(Some("a@x.com"), None)]).await;
        let primary_id = primary[0].id;
        let secondaries = seed(
            &storage,
            &[
                NewContact::secondary(None, Some("1"), primary_id),
                NewContact::secondary(None, Some("2"), primary_id),
            ],
        )
        .await;
        let unrelated = seed(&storage, &[NewContact::primary(Some("z@x.com"), None)]).await;

        let unit = storage.begin().await.expect("begin");
        let found = unit
            .find_by_ids_or_links(&[primary_id])
            .await
            .expect("find");
        let ids: Vec<_> = found.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![primary_id, secondaries[0].id, secondaries[1].id]);

        let found = unit
            .find_by_ids_or_links(&[secondaries[1].id, unrelated[0].id])
            .await
            .expect("find");
        let ids: Vec<_> = found.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![secondaries[1].id, unrelated[0].id]);

        assert!(unit.find_by_ids_or_links(&[]).await.expect("empty").is_empty());
    }

    #[tokio::test]
    async fn demote_rewrites_link_and_refreshes_updated_at() {
        let storage = test_storage().await;
        let created = seed(
            &storage,
            &[
                NewContact::primary(Some("a@x.com"), None),
                NewContact::primary(None, Some("123")),
            ],
        )
        .await;

        let unit = storage.begin().await.expect("begin");
        unit.demote_contact(created[1].id, created[0].id)
            .await
            .expect("demote");
        unit.commit().await.expect("commit");

        let demoted = storage
            .get_contact(created[1].id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(demoted.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(demoted.linked_id, Some(created[0].id));
        assert_eq!(demoted.created_at, created[1].created_at);
        assert!(demoted.updated_at >= created[1].updated_at);
    }

    #[tokio::test]
    async fn demote_missing_contact_fails() {
        let storage = test_storage().await;
        let unit = storage.begin().await.expect("begin");
        let err = unit
            .demote_contact(ContactId(99), ContactId(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("vanished"));
    }

    #[tokio::test]
    async fn soft_deleted_rows_are_invisible_to_units() {
        let storage = test_storage().await;
        let created = seed(&storage, &[NewContact::primary(Some("a@x.com"), Some("1"))]).await;

        assert!(storage.soft_delete_contact(created[0].id).await.expect("delete"));
        assert!(!storage.soft_delete_contact(created[0].id).await.expect("delete again"));

        let unit = storage.begin().await.expect("begin");
        assert!(unit
            .find_by_identity(Some("a@x.com"), None)
            .await
            .expect("find")
            .is_empty());
        assert!(unit
            .find_by_ids_or_links(&[created[0].id])
            .await
            .expect("find")
            .is_empty());
        drop(unit);

        assert!(storage.list_contacts().await.expect("list").is_empty());
        let raw = storage.get_contact(created[0].id).await.expect("get").expect("row");
        assert!(raw.deleted_at.is_some());
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let storage = test_storage().await;

        let unit = storage.begin().await.expect("begin");
        unit.create_contact(&NewContact::primary(Some("a@x.com"), None))
            .await
            .expect("create");
        unit.rollback().await.expect("rollback");

        // Dropping without commit behaves the same way.
        let unit = storage.begin().await.expect("begin");
        unit.create_contact(&NewContact::primary(Some("b@x.com"), None))
            .await
            .expect("create");
        drop(unit);

        assert!(storage.list_contacts().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn readers_wait_for_open_unit() {
        let storage = test_storage().await;

        let unit = storage.begin().await.expect("begin");
        let created = unit
            .create_contact(&NewContact::primary(Some("a@x.com"), None))
            .await
            .expect("create");

        let listed =
            tokio::time::timeout(Duration::from_millis(50), storage.list_contacts()).await;
        assert!(listed.is_err(), "list_contacts must block while a unit is open");
        let fetched =
            tokio::time::timeout(Duration::from_millis(50), storage.get_contact(created.id)).await;
        assert!(fetched.is_err(), "get_contact must block while a unit is open");

        unit.commit().await.expect("commit");
        let rows = storage.list_contacts().await.expect("list");
        assert_eq!(rows, vec![created]);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("identity_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.expect("open");
        seed(&rw, &[NewContact::primary(Some("a@x.com"), None)]).await;
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.expect("open readonly");
        assert_eq!(ro.list_contacts().await.expect("list").len(), 1);

        let result = ro.begin().await;
        assert!(result.is_err());
        assert!(result.err().map(|e| e.to_string()).unwrap_or_default().contains("read-only"));

        let result = ro.soft_delete_contact(ContactId(1)).await;
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
