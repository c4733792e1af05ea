//! Typed per-entity views over records.
//!
//! The binding layer stays generic over raw field maps; these structs give
//! feature modules compile-time field checking at the edge instead.
//! Decoding is lenient on purpose: stored data is externally owned, other
//! clients may omit fields, and unknown fields are ignored.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{DocId, Record};

/// A decoded record: typed data plus the store id it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Doc<T> {
    pub id: DocId,
    pub data: T,
}

impl Record {
    /// Decode this record's fields into a typed view.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Doc<T>, serde_json::Error> {
        let data = serde_json::from_value(self.fields.clone())?;
        Ok(Doc { id: self.id.clone(), data })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Member {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub flat_number: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Visitor {
    pub name: String,
    pub flat_number: String,
    pub purpose: String,
    pub phone: Option<String>,
    pub status: Option<String>,
    pub created_by: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Guard {
    pub name: String,
    pub phone: String,
    pub shift: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Delivery {
    pub company: String,
    pub flat_number: String,
    pub created_by: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub created_by: Option<String>,
    pub created_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn visitor_decodes_from_wire_casing() {
        let r = Record::new(
            "v1",
            json!({
                "name": "Meter reader",
                "flatNumber": "A-101",
                "purpose": "reading",
                "status": "inside",
                "createdBy": "res-asha"
            }),
        );
        let doc = r.decode::<Visitor>().unwrap();
        assert_eq!(doc.id, "v1");
        assert_eq!(doc.data.flat_number, "A-101");
        assert_eq!(doc.data.status.as_deref(), Some("inside"));
        assert_eq!(doc.data.phone, None);
    }

    #[test]
    fn decode_tolerates_missing_and_unknown_fields() {
        let r = Record::new("d1", json!({ "company": "BlueDart", "somethingElse": 42 }));
        let doc = r.decode::<Delivery>().unwrap();
        assert_eq!(doc.data.company, "BlueDart");
        assert_eq!(doc.data.flat_number, "");
        assert!(doc.data.created_at.is_none());
    }

    #[test]
    fn decode_reports_shape_mismatches() {
        // A scalar where an object is expected is an error, not a default.
        let r = Record::new("x", json!("just a string"));
        assert!(r.decode::<Alert>().is_err());
    }
}
