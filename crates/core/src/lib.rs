//! Strata core types shared across the binding layer.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod entity;
pub mod query;

pub use query::{CollectionRef, Direction, Filter, FilterOp, OrderBy, Query};

/// Store-assigned document identifier.
pub type DocId = String;

/// One stored item of a collection: a store-assigned id plus an opaque
/// field map. Identity is the id; content equality is never assumed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: DocId,
    pub fields: Value,
}

impl Record {
    pub fn new(id: impl Into<DocId>, fields: Value) -> Self {
        Self { id: id.into(), fields }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Borrow a top-level field as a string, if present and a string.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }
}

/// Full query result as delivered by a subscription push or a one-shot
/// fetch. Each push supersedes the previous one wholesale; callers never
/// see incremental patches.
pub type Snapshot = Vec<Record>;

/// Collection names used by the application. The binding layer is generic
/// over these; they live here so screens and seed data agree.
pub mod collections {
    pub const USERS: &str = "users";
    pub const MEMBERS: &str = "members";
    pub const VISITORS: &str = "visitors";
    pub const GUARDS: &str = "guards";
    pub const DELIVERIES: &str = "deliveries";
    pub const ALERTS: &str = "alerts";
    pub const COMPLAINTS: &str = "complaints";
    pub const MAINTENANCE_BILLS: &str = "maintenance_bills";
    pub const EVENTS: &str = "events";
    pub const DOCUMENTS: &str = "documents";
    pub const ANNOUNCEMENTS: &str = "announcements";
    pub const POLLS: &str = "polls";
}

// Field names stamped or read by the layer itself. Stored field names keep
// the wire format's camelCase.
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";
pub const CREATED_BY: &str = "createdBy";
pub const ROLE_FIELD: &str = "role";

/// Sentinel key marking a payload value to be replaced with the server
/// clock when the write is applied.
pub const SERVER_TS_KEY: &str = "__serverTimestamp";

/// Placeholder usable as any payload field value; the store resolves it to
/// an RFC3339 string at write time.
pub fn server_timestamp() -> Value {
    serde_json::json!({ SERVER_TS_KEY: true })
}

pub fn is_server_timestamp(v: &Value) -> bool {
    v.get(SERVER_TS_KEY).and_then(|b| b.as_bool()).unwrap_or(false)
}

/// Signed-in identity as reported by the auth provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into(), email: None }
    }
}

/// Authentication state as published by the provider. `Unknown` means the
/// provider has not reported yet; it is distinct from `SignedOut`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuthState {
    #[default]
    Unknown,
    SignedOut,
    SignedIn(Identity),
}

/// Coarse authorization tag driving UI visibility and query scoping.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Resident,
    Admin,
    Security,
}

impl Role {
    /// Parse a stored role tag. The legacy `"user"` tag maps to `Resident`,
    /// and so does anything unrecognized (availability over lockdown; see
    /// DESIGN.md).
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "admin" => Role::Admin,
            "security" => Role::Security,
            "resident" | "user" => Role::Resident,
            _ => Role::Resident,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Resident => "resident",
            Role::Admin => "admin",
            Role::Security => "security",
        }
    }
}

/// Output of the role resolver state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoleState {
    /// Identity not yet known.
    Unresolved,
    /// No signed-in identity.
    SignedOut,
    Resolved { uid: String, role: Role },
}

impl RoleState {
    pub fn role(&self) -> Option<Role> {
        match self {
            RoleState::Resolved { role, .. } => Some(*role),
            _ => None,
        }
    }

    pub fn uid(&self) -> Option<&str> {
        match self {
            RoleState::Resolved { uid, .. } => Some(uid.as_str()),
            _ => None,
        }
    }
}

/// Store-side errors suitable for transport across the SDK boundary.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum StoreError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_tags_parse_with_legacy_fallback() {
        assert_eq!(Role::from_tag("admin"), Role::Admin);
        assert_eq!(Role::from_tag("security"), Role::Security);
        assert_eq!(Role::from_tag("resident"), Role::Resident);
        // Legacy tag written by the original client
        assert_eq!(Role::from_tag("user"), Role::Resident);
        // Unknown tags fall open
        assert_eq!(Role::from_tag("superuser"), Role::Resident);
        assert_eq!(Role::from_tag(""), Role::Resident);
    }

    #[test]
    fn server_timestamp_is_a_detectable_sentinel() {
        let v = server_timestamp();
        assert!(is_server_timestamp(&v));
        assert!(!is_server_timestamp(&serde_json::json!("2024-01-01T00:00:00Z")));
        assert!(!is_server_timestamp(&serde_json::json!({ "other": true })));
    }

    #[test]
    fn record_field_accessors() {
        let r = Record::new("abc", serde_json::json!({ "name": "Asha", "count": 2 }));
        assert_eq!(r.str_field("name"), Some("Asha"));
        assert_eq!(r.str_field("count"), None);
        assert!(r.field("missing").is_none());
    }
}
