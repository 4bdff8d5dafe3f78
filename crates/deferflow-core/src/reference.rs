//! The symbolic handle to a job's future output, and its resolution
//! algorithm.

use crate::error::ReferenceError;
use crate::schema::Schema;
use crate::store::{Store, Which};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{HashMap, HashSet};

/// The tag written into the `@class` field of a reference's on-disk form,
/// used by the walker to recognise an embedded reference.
pub const CLASS_TAG: &str = "OutputReference";

/// A single projection step: either an object field or a sequence index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    /// A string key, applied to objects.
    Key(String),
    /// An integer index, applied to sequences (or stringified-key objects).
    Index(i64),
}

impl From<&str> for Step {
    fn from(s: &str) -> Self {
        Step::Key(s.to_owned())
    }
}

impl From<String> for Step {
    fn from(s: String) -> Self {
        Step::Key(s)
    }
}

impl From<i64> for Step {
    fn from(i: i64) -> Self {
        Step::Index(i)
    }
}

/// What to do when a reference cannot be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnMissing {
    /// Fail with [`ReferenceError::Unresolved`].
    #[default]
    Error,
    /// Replace the missing reference with `null`.
    None,
    /// Pass the unresolved reference through, re-encoded in its on-disk form.
    Pass,
}

/// A reference to the output of a job, possibly with a chain of
/// attribute/index projections applied.
///
/// Immutable once constructed: every projection method returns a new
/// `Reference` rather than mutating the receiver.
#[derive(Debug, Clone)]
pub struct Reference {
    uuid: String,
    attributes: Vec<Step>,
    output_schema: Option<Schema>,
}

impl Reference {
    /// Construct a bare reference to a uuid's output, with no projections
    /// and no schema.
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            attributes: Vec::new(),
            output_schema: None,
        }
    }

    /// Construct a reference carrying an output schema, which restricts the
    /// legal first projection step.
    pub fn with_schema(uuid: impl Into<String>, schema: Schema) -> Self {
        Self {
            uuid: uuid.into(),
            attributes: Vec::new(),
            output_schema: Some(schema),
        }
    }

    /// The uuid of the job whose output this reference points to.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The chain of projection steps applied so far.
    pub fn attributes(&self) -> &[Step] {
        &self.attributes
    }

    /// The schema attached to this reference, if any.
    pub fn output_schema(&self) -> Option<&Schema> {
        self.output_schema.as_ref()
    }

    /// Project a named field out of the eventual output.
    ///
    /// Never mutates `self`; returns a new reference with `name` appended to
    /// the projection chain. Fails if this is the first projection step and
    /// an output schema is attached that does not declare `name`.
    pub fn field(&self, name: impl Into<String>) -> Result<Self, ReferenceError> {
        let name = name.into();
        self.validate_first_step(&name)?;
        Ok(self.chain(Step::Key(name)))
    }

    /// Project a sequence index out of the eventual output.
    ///
    /// Equivalent to [`Reference::field`] except it appends an [`Step::Index`]
    /// rather than a [`Step::Key`]; only the first step is ever schema-gated,
    /// and an index is never a schema field, so an index used as the first
    /// step against a schema-bearing reference always fails.
    pub fn at(&self, index: i64) -> Result<Self, ReferenceError> {
        if self.attributes.is_empty() && self.output_schema.is_some() {
            return Err(ReferenceError::SchemaProjection {
                field: index.to_string(),
            });
        }
        Ok(self.chain(Step::Index(index)))
    }

    fn validate_first_step(&self, field: &str) -> Result<(), ReferenceError> {
        if self.attributes.is_empty() {
            if let Some(schema) = &self.output_schema {
                if !schema.has_field(field) {
                    return Err(ReferenceError::SchemaProjection {
                        field: field.to_owned(),
                    });
                }
            }
        }
        Ok(())
    }

    fn chain(&self, step: Step) -> Self {
        let mut attributes = self.attributes.clone();
        attributes.push(step);
        Self {
            uuid: self.uuid.clone(),
            attributes,
            output_schema: None,
        }
    }

    /// Return a clone of this reference with its uuid rewritten.
    ///
    /// Used by replace-continuation to re-point a job's output handle at a
    /// successor job's uuid while keeping the same projection chain.
    pub fn with_uuid(&self, uuid: impl Into<String>) -> Self {
        let mut clone = self.clone();
        clone.uuid = uuid.into();
        clone
    }

    /// Rewrite this reference's uuid in place.
    pub fn set_uuid(&mut self, uuid: impl Into<String>) {
        self.uuid = uuid.into();
    }

    /// Serialise this reference to its tagged on-disk form.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("Reference serialisation is infallible")
    }

    /// If `value` is a tagged `OutputReference` record, revive it.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let obj = value.as_object()?;
        let class = obj.get("@class")?.as_str()?;
        if class != CLASS_TAG {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    /// Resolve this reference against a store and/or cache.
    ///
    /// At least one of `store` or a pre-populated `cache` entry for this
    /// reference's uuid must be available when `on_missing` is
    /// [`OnMissing::Error`], otherwise resolution always fails; this mirrors
    /// the source's guard but is not separately enforced here since the
    /// failure path (`Unresolved`) already covers it.
    pub fn resolve(
        &self,
        store: Option<&dyn Store>,
        cache: &mut ResolveCache,
        on_missing: OnMissing,
    ) -> Result<serde_json::Value, ReferenceError> {
        let data = resolve_uuid(&self.uuid, store, cache, on_missing)?;
        apply_projection(&self.uuid, data, &self.attributes)
    }
}

impl PartialEq for Reference {
    /// Two references are equal iff their uuids match and their projection
    /// sequences are elementwise equal. The attached schema does not
    /// participate in equality.
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid && self.attributes == other.attributes
    }
}

impl Eq for Reference {}

impl std::hash::Hash for Reference {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
        self.attributes.hash(state);
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Reference({}", self.uuid)?;
        for step in &self.attributes {
            match step {
                Step::Key(k) => write!(f, ", {k:?}")?,
                Step::Index(i) => write!(f, ", {i}")?,
            }
        }
        write!(f, ")")
    }
}

impl Serialize for Reference {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("@module", "deferflow_core::reference")?;
        map.serialize_entry("@class", CLASS_TAG)?;
        map.serialize_entry("uuid", &self.uuid)?;
        map.serialize_entry("attributes", &self.attributes)?;
        map.serialize_entry("output_schema", &self.output_schema)?;
        map.end()
    }
}

#[derive(Deserialize)]
struct ReferenceRepr {
    uuid: String,
    #[serde(default)]
    attributes: Vec<Step>,
    #[serde(default)]
    output_schema: Option<Schema>,
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let repr = ReferenceRepr::deserialize(deserializer)?;
        Ok(Self {
            uuid: repr.uuid,
            attributes: repr.attributes,
            output_schema: repr.output_schema,
        })
    }
}

/// Per-walk cache of resolved uuid values, plus in-flight tracking for
/// cycle detection.
///
/// Shared across every reference resolved within one walk so that multiple
/// projections of the same output only fetch the store once.
#[derive(Debug, Default)]
pub struct ResolveCache {
    values: HashMap<String, serde_json::Value>,
    in_flight: HashSet<String>,
}

impl ResolveCache {
    /// A fresh, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the cache with a known value, bypassing the store.
    pub fn insert(&mut self, uuid: impl Into<String>, value: serde_json::Value) {
        self.values.insert(uuid.into(), value);
    }

    /// Whether `uuid` currently has a cached (decoded) value.
    pub fn contains(&self, uuid: &str) -> bool {
        self.values.contains_key(uuid)
    }
}

/// Fetch-or-reuse-then-decode a uuid's value, handling cycle detection and
/// `on_missing` policy. Returns the fully decoded (nested-references
/// resolved) value for `uuid`, before any projection is applied.
fn resolve_uuid(
    uuid: &str,
    store: Option<&dyn Store>,
    cache: &mut ResolveCache,
    on_missing: OnMissing,
) -> Result<serde_json::Value, ReferenceError> {
    if cache.in_flight.contains(uuid) {
        return match on_missing {
            OnMissing::Pass => Ok(cache
                .values
                .get(uuid)
                .cloned()
                .unwrap_or(serde_json::Value::Null)),
            OnMissing::Error | OnMissing::None => Err(ReferenceError::Cyclic {
                uuid: uuid.to_owned(),
            }),
        };
    }

    if !cache.values.contains_key(uuid) {
        if let Some(store) = store {
            if let Ok(value) = store.get_output(uuid, Which::Latest, true) {
                cache.values.insert(uuid.to_owned(), value);
            }
        }
    }

    if !cache.values.contains_key(uuid) {
        return match on_missing {
            OnMissing::Error => Err(ReferenceError::Unresolved {
                uuid: uuid.to_owned(),
            }),
            OnMissing::None => Ok(serde_json::Value::Null),
            OnMissing::Pass => Ok(Reference::new(uuid).to_value()),
        };
    }

    cache.in_flight.insert(uuid.to_owned());
    let raw = cache.values.get(uuid).cloned().unwrap_or_default();
    let decoded = crate::walker::find_and_resolve_references(&raw, store, cache, on_missing);
    cache.in_flight.remove(uuid);

    let decoded = decoded?;
    cache.values.insert(uuid.to_owned(), decoded.clone());
    Ok(decoded)
}

/// Apply a chain of projection steps to a fully-decoded value.
fn apply_projection(
    uuid: &str,
    mut value: serde_json::Value,
    steps: &[Step],
) -> Result<serde_json::Value, ReferenceError> {
    for step in steps {
        value = apply_step(value, step).ok_or_else(|| ReferenceError::Projection {
            uuid: uuid.to_owned(),
            step: step.clone(),
        })?;
    }
    Ok(value)
}

fn apply_step(value: serde_json::Value, step: &Step) -> Option<serde_json::Value> {
    match (step, value) {
        (Step::Key(key), serde_json::Value::Object(mut map)) => map.remove(key),
        (Step::Index(index), serde_json::Value::Array(mut arr)) => {
            let i = usize::try_from(*index).ok()?;
            if i < arr.len() {
                Some(arr.swap_remove(i))
            } else {
                None
            }
        }
        (Step::Index(index), serde_json::Value::Object(mut map)) => {
            map.remove(&index.to_string())
        }
        _ => None,
    }
}
