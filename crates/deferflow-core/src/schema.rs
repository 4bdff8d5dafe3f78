//! Minimal structural schema support.
//!
//! Only two things ever need to be done with a schema here: gate the
//! *first* projection step of a [`crate::reference::Reference`], and
//! decide whether a job's raw return value "satisfies" the schema during
//! response normalisation. A schema is therefore just a name plus its set
//! of declared field names, rather than a full validating model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A structural description of a job output, used for schema-gated
/// projection and output normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    name: String,
    fields: BTreeSet<String>,
}

impl Schema {
    /// Build a schema from its name and declared field names.
    pub fn new(name: impl Into<String>, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// The schema's name, used in error messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `field` is a declared field of this schema.
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains(field)
    }

    /// The schema's declared field names.
    pub fn fields(&self) -> &BTreeSet<String> {
        &self.fields
    }

    /// Whether a JSON object satisfies this schema: it must be an object
    /// carrying every declared field.
    pub fn is_satisfied_by(&self, value: &serde_json::Value) -> bool {
        match value.as_object() {
            Some(map) => self.fields.iter().all(|f| map.contains_key(f)),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn satisfied_requires_every_declared_field() {
        let schema = Schema::new("Sum", ["sum", "product"]);
        assert!(schema.is_satisfied_by(&json!({"sum": 5, "product": 6})));
        assert!(!schema.is_satisfied_by(&json!({"sum": 5})));
        assert!(!schema.is_satisfied_by(&json!([1, 2])));
    }

    #[test]
    fn has_field_checks_membership() {
        let schema = Schema::new("Sum", ["a", "b"]);
        assert!(schema.has_field("a"));
        assert!(!schema.has_field("c"));
    }
}
