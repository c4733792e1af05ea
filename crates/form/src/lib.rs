//! Strata form layer: a per-form state machine over a validation schema.
//!
//! Holds field values, per-field errors, and touched marks; mutated only
//! through its own operations and discarded (or reset) when the form goes
//! away. Validation results are data, never errors: nothing in this crate
//! returns `Result`.

#![forbid(unsafe_code)]

pub mod schemas;
pub mod validators;

pub use schemas::Schema;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Value};

/// Outcome of a full-form validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub is_valid: bool,
    pub errors: FxHashMap<String, String>,
}

/// Form session state. `errors` only ever contains keys present in the
/// schema.
pub struct FormController {
    schema: Schema,
    initial: Map<String, Value>,
    values: Map<String, Value>,
    errors: FxHashMap<String, String>,
    touched: FxHashSet<String>,
}

impl FormController {
    pub fn new(schema: Schema, initial: Map<String, Value>) -> Self {
        Self {
            schema,
            values: initial.clone(),
            initial,
            errors: FxHashMap::default(),
            touched: FxHashSet::default(),
        }
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn value(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn error(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(|s| s.as_str())
    }

    pub fn errors(&self) -> &FxHashMap<String, String> {
        &self.errors
    }

    pub fn is_touched(&self, field: &str) -> bool {
        self.touched.contains(field)
    }

    /// Record a field edit. Any existing error on the field clears
    /// immediately regardless of the new value's validity; it reappears
    /// only on the next blur or full validation, so the UI is not thrashed
    /// mid-typing.
    pub fn set_value(&mut self, field: &str, value: impl Into<Value>) {
        self.values.insert(field.to_string(), value.into());
        self.errors.remove(field);
    }

    /// Validate just this field and mark it touched. Fields absent from
    /// the schema are never validated.
    pub fn blur(&mut self, field: &str) {
        self.touched.insert(field.to_string());
        if self.schema.has(field) {
            let value = self.values.get(field).cloned().unwrap_or(Value::Null);
            match self.schema.check(field, &value) {
                Some(message) => {
                    self.errors.insert(field.to_string(), message);
                }
                None => {
                    self.errors.remove(field);
                }
            }
        }
    }

    /// Run every schema validator against current values, replacing the
    /// whole error map. The authoritative check gating submission.
    pub fn validate(&mut self) -> Validation {
        let mut errors = FxHashMap::default();
        for (field, validator) in self.schema.rules() {
            let value = self.values.get(field).cloned().unwrap_or(Value::Null);
            if let Some(message) = validator(&value) {
                errors.insert(field.clone(), message);
            }
        }
        self.errors = errors.clone();
        Validation { is_valid: errors.is_empty(), errors }
    }

    /// Replace values with `data` (or the original initial values when
    /// `None`) and clear errors and touched marks. Serves both "cancel"
    /// and "reuse the form for a different record".
    pub fn reset(&mut self, data: Option<Map<String, Value>>) {
        self.values = data.unwrap_or_else(|| self.initial.clone());
        self.errors.clear();
        self.touched.clear();
    }

    /// Bulk-populate values without going through `set_value`, e.g. when
    /// opening an edit form pre-filled from an existing record.
    pub fn populate(&mut self, data: Map<String, Value>) {
        self.values = data;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::required;
    use serde_json::json;

    fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn name_schema() -> Schema {
        Schema::new().rule("name", required("Name is required"))
    }

    #[test]
    fn change_clears_error_until_next_validation() {
        let mut form = FormController::new(name_schema(), obj(&[("name", json!(""))]));
        form.blur("name");
        assert_eq!(form.error("name"), Some("Name is required"));

        // Editing clears the error even though the value is still invalid.
        form.set_value("name", "A");
        assert_eq!(form.error("name"), None);
        form.set_value("name", "");
        assert_eq!(form.error("name"), None);

        form.blur("name");
        assert_eq!(form.error("name"), Some("Name is required"));
    }

    #[test]
    fn blur_marks_touched_and_validates_only_that_field() {
        let schema = schemas::member();
        let mut form = FormController::new(schema, obj(&[("name", json!("")), ("email", json!(""))]));
        form.blur("name");
        assert!(form.is_touched("name"));
        assert!(!form.is_touched("email"));
        assert_eq!(form.error("name"), Some("Name is required"));
        assert_eq!(form.error("email"), None, "email not validated until its own blur");
    }

    #[test]
    fn blur_on_unknown_field_never_errors() {
        let mut form = FormController::new(name_schema(), Map::new());
        form.blur("nickname");
        assert!(form.is_touched("nickname"));
        assert!(form.errors().is_empty());
    }

    #[test]
    fn validate_replaces_error_map_and_gates_submission() {
        let schema = Schema::new()
            .rule("email", validators::chain(vec![
                required("Email is required"),
                validators::is_email("Enter a valid email address"),
            ]));
        let mut form = FormController::new(schema, obj(&[("email", json!(""))]));

        let v = form.validate();
        assert!(!v.is_valid);
        assert_eq!(v.errors.get("email").map(|s| s.as_str()), Some("Email is required"));

        form.set_value("email", "a@b.com");
        let v = form.validate();
        assert!(v.is_valid);
        assert!(v.errors.is_empty());
        assert!(form.errors().is_empty());
    }

    #[test]
    fn validate_errors_are_exactly_the_failing_schema_fields() {
        let schema = schemas::member();
        let mut form = FormController::new(
            schema,
            obj(&[
                ("name", json!("Asha")),
                ("email", json!("bad-email")),
                ("phone", json!("9876543210")),
                ("flatNumber", json!("")),
                // Not in the schema; must never appear in errors.
                ("notes", json!("")),
            ]),
        );
        let v = form.validate();
        assert!(!v.is_valid);
        let mut failing: Vec<_> = v.errors.keys().map(|s| s.as_str()).collect();
        failing.sort_unstable();
        assert_eq!(failing, vec!["email", "flatNumber"]);
    }

    #[test]
    fn reset_restores_initial_values_and_clears_marks() {
        let initial = obj(&[("name", json!("Asha"))]);
        let mut form = FormController::new(name_schema(), initial);
        form.set_value("name", "");
        form.blur("name");
        assert!(form.error("name").is_some());

        form.reset(None);
        assert_eq!(form.value("name"), Some(&json!("Asha")));
        assert!(form.errors().is_empty());
        assert!(!form.is_touched("name"));

        form.reset(Some(obj(&[("name", json!("Vikram"))])));
        assert_eq!(form.value("name"), Some(&json!("Vikram")));
    }

    #[test]
    fn populate_prefills_for_edit_without_touching_errors() {
        let mut form = FormController::new(name_schema(), Map::new());
        form.blur("name");
        assert!(form.error("name").is_some());

        // Escape hatch: bulk load an existing record's fields.
        form.populate(obj(&[("name", json!("Existing resident"))]));
        assert_eq!(form.value("name"), Some(&json!("Existing resident")));
        // populate is deliberately value-only; a later validate settles errors.
        let v = form.validate();
        assert!(v.is_valid);
    }
}
