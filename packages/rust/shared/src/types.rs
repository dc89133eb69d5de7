//! Core domain types for contact identity reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// ContactId
// ---------------------------------------------------------------------------

/// Store-assigned, stable contact identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(pub i64);

impl std::fmt::Display for ContactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for ContactId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// ---------------------------------------------------------------------------
// LinkPrecedence
// ---------------------------------------------------------------------------

/// Whether a contact is the canonical record of its cluster or subordinate to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    Primary,
    Secondary,
}

impl LinkPrecedence {
    /// Storage/wire form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for LinkPrecedence {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            other => Err(format!("unknown link precedence '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// A single persisted contact record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    /// Canonical record of the cluster; `None` iff this record is primary.
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
    /// Immutable; the only ordering used to pick the canonical record.
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker. Deleted rows never reach the reconciler.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }
}

/// Write-side shape of a contact; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
}

impl NewContact {
    /// A brand-new canonical record.
    pub fn primary(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_owned),
            phone_number: phone_number.map(str::to_owned),
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
        }
    }

    /// A subordinate record attached to `primary_id`.
    pub fn secondary(email: Option<&str>, phone_number: Option<&str>, primary_id: ContactId) -> Self {
        Self {
            email: email.map(str::to_owned),
            phone_number: phone_number.map(str::to_owned),
            linked_id: Some(primary_id),
            link_precedence: LinkPrecedence::Secondary,
        }
    }
}

// ---------------------------------------------------------------------------
// TieBreakPolicy
// ---------------------------------------------------------------------------

/// How to choose between contacts that share the earliest `created_at`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreakPolicy {
    /// Keep whichever tied contact comes first in cluster iteration order.
    #[default]
    FirstEncountered,
    /// Prefer the smallest store-assigned id.
    LowestId,
}

// ---------------------------------------------------------------------------
// Request / response envelopes
// ---------------------------------------------------------------------------

/// Identity signature supplied by a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<String>,
    /// Accepts a JSON string or number.
    #[serde(default, deserialize_with = "string_or_number")]
    pub phone_number: Option<String>,
}

impl IdentifyRequest {
    /// Treat empty strings as absent fields.
    pub fn normalized(self) -> Self {
        Self {
            email: self.email.filter(|s| !s.is_empty()),
            phone_number: self.phone_number.filter(|s| !s.is_empty()),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "phoneNumber must be a string or number, got {other}"
        ))),
    }
}

/// The consolidated view of one cluster.
///
/// Field names follow the established wire format of the `/identify` API,
/// including the misspelled `primaryContatctId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactResult {
    #[serde(rename = "primaryContatctId")]
    pub primary_id: ContactId,
    pub emails: Vec<String>,
    #[serde(rename = "phoneNumbers")]
    pub phones: Vec<String>,
    #[serde(rename = "secondaryContactIds")]
    pub secondary_ids: Vec<ContactId>,
}

/// Response envelope: `{ "contact": { ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub contact: ContactResult,
}

impl From<ContactResult> for IdentifyResponse {
    fn from(contact: ContactResult) -> Self {
        Self { contact }
    }
}
