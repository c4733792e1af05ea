//! Entity validation schemas.
//!
//! One immutable schema per entity type, shared by every form instance for
//! that entity. A field absent from a schema is never validated and never
//! blocks submission; optional fields simply have no entry.

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::validators::{chain, is_email, is_phone, min_length, required, Validator};

/// Mapping from field name to validator. Built once, cloned cheaply
/// (validators are shared behind `Arc`).
#[derive(Clone, Default)]
pub struct Schema {
    rules: FxHashMap<String, Validator>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, field: &str, validator: Validator) -> Self {
        self.rules.insert(field.to_string(), validator);
        self
    }

    pub fn validator(&self, field: &str) -> Option<&Validator> {
        self.rules.get(field)
    }

    pub fn has(&self, field: &str) -> bool {
        self.rules.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(|k| k.as_str())
    }

    pub(crate) fn rules(&self) -> impl Iterator<Item = (&String, &Validator)> {
        self.rules.iter()
    }

    /// Run one field's validator against a value, if the field has one.
    pub fn check(&self, field: &str, value: &Value) -> Option<String> {
        self.rules.get(field).and_then(|v| v(value))
    }
}

pub fn member() -> Schema {
    Schema::new()
        .rule("name", required("Name is required"))
        .rule(
            "email",
            chain(vec![required("Email is required"), is_email("Enter a valid email address")]),
        )
        .rule(
            "phone",
            chain(vec![
                required("Phone number is required"),
                is_phone("Enter a valid 10-digit phone number"),
            ]),
        )
        .rule("flatNumber", required("Flat number is required"))
}

pub fn visitor() -> Schema {
    Schema::new()
        .rule("name", required("Visitor name is required"))
        .rule("flatNumber", required("Flat number is required"))
        .rule("purpose", required("Purpose of visit is required"))
        // Phone is optional on visitor entries; validated only when given.
        .rule("phone", is_phone("Enter a valid 10-digit phone number"))
}

pub fn guard() -> Schema {
    Schema::new()
        .rule("name", required("Name is required"))
        .rule(
            "phone",
            chain(vec![
                required("Phone number is required"),
                is_phone("Enter a valid 10-digit phone number"),
            ]),
        )
        .rule("shift", required("Shift is required"))
}

pub fn delivery() -> Schema {
    Schema::new()
        .rule("company", required("Company name is required"))
        .rule("flatNumber", required("Flat number is required"))
}

pub fn alert() -> Schema {
    Schema::new()
        .rule("title", required("Title is required"))
        .rule(
            "message",
            chain(vec![
                required("Message is required"),
                min_length(10, "Message must be at least 10 characters"),
            ]),
        )
}

/// Look a schema up by entity tag (used by tooling; screens call the
/// constructors directly).
pub fn by_entity(name: &str) -> Option<Schema> {
    match name {
        "member" => Some(member()),
        "visitor" => Some(visitor()),
        "guard" => Some(guard()),
        "delivery" => Some(delivery()),
        "alert" => Some(alert()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_covers_every_entity() {
        for entity in ["member", "visitor", "guard", "delivery", "alert"] {
            let schema = by_entity(entity).unwrap_or_else(|| panic!("missing schema: {}", entity));
            assert!(schema.fields().count() > 0);
        }
        assert!(by_entity("spaceship").is_none());
    }

    #[test]
    fn member_schema_messages() {
        let schema = member();
        assert_eq!(schema.check("name", &json!("")), Some("Name is required".to_string()));
        assert_eq!(schema.check("email", &json!("")), Some("Email is required".to_string()));
        assert_eq!(
            schema.check("email", &json!("nope")),
            Some("Enter a valid email address".to_string())
        );
        assert_eq!(schema.check("phone", &json!("12")), Some("Enter a valid 10-digit phone number".to_string()));
        assert_eq!(schema.check("name", &json!("Asha")), None);
    }

    #[test]
    fn visitor_phone_is_optional_but_checked_when_present() {
        let schema = visitor();
        assert_eq!(schema.check("phone", &json!("")), None);
        assert!(schema.check("phone", &json!("123")).is_some());
        assert_eq!(schema.check("phone", &json!("9876543210")), None);
    }

    #[test]
    fn unknown_fields_are_never_validated() {
        let schema = delivery();
        assert!(!schema.has("vehicleNumber"));
        assert_eq!(schema.check("vehicleNumber", &json!("")), None);
    }
}
