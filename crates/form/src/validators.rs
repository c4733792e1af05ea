//! Field validator primitives shared by every entity schema.
//!
//! A validator returns `None` for valid input and a short human-readable
//! message otherwise. Validators are pure and never fail: input they
//! cannot judge is treated as valid, so a false negative is always
//! preferred over blocking the user.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

pub type Validator = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());
static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{10}$").unwrap());

/// Missing, null, blank-string, or empty-array input fails with `message`.
pub fn required(message: &str) -> Validator {
    let message = message.to_string();
    Arc::new(move |v| {
        let empty = match v {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            Value::Array(a) => a.is_empty(),
            _ => false,
        };
        empty.then(|| message.clone())
    })
}

/// Non-empty strings must look like an email address. Empty or non-string
/// input passes; pair with [`required`] when the field is mandatory.
pub fn is_email(message: &str) -> Validator {
    let message = message.to_string();
    Arc::new(move |v| match v.as_str() {
        Some(s) if !s.is_empty() => (!EMAIL_RE.is_match(s)).then(|| message.clone()),
        _ => None,
    })
}

/// Non-empty strings must be a 10-digit phone number.
pub fn is_phone(message: &str) -> Validator {
    let message = message.to_string();
    Arc::new(move |v| match v.as_str() {
        Some(s) if !s.is_empty() => (!PHONE_RE.is_match(s)).then(|| message.clone()),
        _ => None,
    })
}

/// Strings shorter than `min` characters fail. Empty input passes.
pub fn min_length(min: usize, message: &str) -> Validator {
    let message = message.to_string();
    Arc::new(move |v| match v.as_str() {
        Some(s) if !s.is_empty() => (s.chars().count() < min).then(|| message.clone()),
        _ => None,
    })
}

/// Run validators in order; the first failure wins.
pub fn chain(validators: Vec<Validator>) -> Validator {
    Arc::new(move |v| validators.iter().find_map(|check| check(v)))
}
