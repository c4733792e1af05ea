//! Serializable query model and the fluent builder screens use to express
//! filter/sort policy.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison applied by a filter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    ArrayContains,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// A filtered/sorted view over one collection. Plain data so it can cross
/// the SDK boundary (and, later, an RPC one) unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter { field: field.to_string(), op: FilterOp::Eq, value: value.into() });
        self
    }

    pub fn where_contains(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op: FilterOp::ArrayContains,
            value: value.into(),
        });
        self
    }

    pub fn order_by_asc(mut self, field: &str) -> Self {
        self.order_by = Some(OrderBy { field: field.to_string(), direction: Direction::Asc });
        self
    }

    pub fn order_by_desc(mut self, field: &str) -> Self {
        self.order_by = Some(OrderBy { field: field.to_string(), direction: Direction::Desc });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }
}

/// Handle naming the collection being bound; the entry point handed to
/// query builders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionRef {
    name: String,
}

impl CollectionRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unfiltered query over the whole collection.
    pub fn all(&self) -> Query {
        Query { collection: self.name.clone(), filters: Vec::new(), order_by: None, limit: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_composes_filters_sort_and_limit() {
        let q = CollectionRef::new("visitors")
            .all()
            .where_eq("flatNumber", "A-101")
            .order_by_desc("createdAt")
            .limit(50);
        assert_eq!(q.collection, "visitors");
        assert_eq!(q.filters.len(), 1);
        assert_eq!(q.filters[0].field, "flatNumber");
        assert_eq!(q.filters[0].op, FilterOp::Eq);
        assert_eq!(q.order_by.as_ref().unwrap().direction, Direction::Desc);
        assert_eq!(q.limit, Some(50));
    }

    #[test]
    fn query_serializes_round_trip() {
        let q = CollectionRef::new("alerts").all().where_eq("status", "active");
        let s = serde_json::to_string(&q).unwrap();
        let back: Query = serde_json::from_str(&s).unwrap();
        assert_eq!(back, q);
    }
}
