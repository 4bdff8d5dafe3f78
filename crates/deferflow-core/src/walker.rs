//! Recursively finds and resolves [`Reference`]s nested in arbitrary JSON
//! values.

use crate::error::ReferenceError;
use crate::reference::{OnMissing, Reference, ResolveCache};
use crate::store::Store;
use std::collections::{HashMap, HashSet};

/// Walk `value` and collect every embedded [`Reference`], deduplicated.
///
/// Primitives (numbers, strings, booleans, `null`) short-circuit without
/// further traversal. A tagged `OutputReference` record is revived into a
/// `Reference` and is itself a leaf (its own `attributes`/`output_schema`
/// fields are not walked as if they were ordinary data).
pub fn find_references(value: &serde_json::Value) -> HashSet<Reference> {
    let mut found = HashSet::new();
    collect_references(value, &mut found);
    found
}

fn collect_references(value: &serde_json::Value, found: &mut HashSet<Reference>) {
    if let Some(reference) = Reference::from_value(value) {
        found.insert(reference);
        return;
    }

    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                collect_references(item, found);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_references(item, found);
            }
        }
        // numbers, strings, booleans, null: nothing to find
        _ => {}
    }
}

/// Resolve a batch of references, grouping by uuid so that at most one
/// store fetch is issued per distinct uuid.
pub fn resolve_references(
    references: &HashSet<Reference>,
    store: Option<&dyn Store>,
    cache: &mut ResolveCache,
    on_missing: OnMissing,
) -> Result<HashMap<Reference, serde_json::Value>, ReferenceError> {
    let mut resolved = HashMap::with_capacity(references.len());
    for reference in references {
        let value = reference.resolve(store, cache, on_missing)?;
        resolved.insert(reference.clone(), value);
    }
    Ok(resolved)
}

/// Walk `value`, replacing every embedded reference with its resolved
/// value, and return the substituted tree. Trivial inputs (a bare
/// reference, or a primitive) short-circuit.
pub fn find_and_resolve_references(
    value: &serde_json::Value,
    store: Option<&dyn Store>,
    cache: &mut ResolveCache,
    on_missing: OnMissing,
) -> Result<serde_json::Value, ReferenceError> {
    if let Some(reference) = Reference::from_value(value) {
        return reference.resolve(store, cache, on_missing);
    }

    match value {
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(find_and_resolve_references(item, store, cache, on_missing)?);
            }
            Ok(serde_json::Value::Array(out))
        }
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(
                    key.clone(),
                    find_and_resolve_references(item, store, cache, on_missing)?,
                );
            }
            Ok(serde_json::Value::Object(out))
        }
        primitive => Ok(primitive.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::HashMap as StdHashMap;

    /// A store that counts calls to `get_output`, to verify cache
    /// coalescing.
    struct CountingStore {
        data: StdHashMap<String, serde_json::Value>,
        calls: RefCell<usize>,
    }

    impl Store for CountingStore {
        fn get_output(
            &self,
            uuid: &str,
            _which: crate::store::Which,
            _load: bool,
        ) -> Result<serde_json::Value, crate::store::StoreError> {
            *self.calls.borrow_mut() += 1;
            self.data
                .get(uuid)
                .cloned()
                .ok_or_else(|| crate::store::StoreError::NotFound {
                    uuid: uuid.to_owned(),
                })
        }

        fn update(
            &self,
            _record: crate::store::OutputRecord,
            _save: crate::store::SaveSelector,
        ) -> Result<(), crate::store::StoreError> {
            unimplemented!("not exercised in walker tests")
        }
    }

    #[test]
    fn find_references_collects_nested_and_dedupes() {
        let r1 = Reference::new("a").to_value();
        let r2 = Reference::new("a").field("x").unwrap().to_value();
        let value = json!({"one": r1.clone(), "two": [r1, r2.clone()], "three": 3});

        let found = find_references(&value);
        assert_eq!(found.len(), 2);
        assert!(found.contains(&Reference::new("a")));
        assert!(found.contains(&Reference::new("a").field("x").unwrap()));
    }

    #[test]
    fn find_references_short_circuits_primitives() {
        assert!(find_references(&json!(42)).is_empty());
        assert!(find_references(&json!("hello")).is_empty());
        assert!(find_references(&json!(true)).is_empty());
        assert!(find_references(&json!(null)).is_empty());
    }

    #[test]
    fn cache_coalesces_one_fetch_per_uuid() {
        let mut data = StdHashMap::new();
        data.insert("a".to_owned(), json!({"sum": 5, "product": 6}));
        let store = CountingStore {
            data,
            calls: RefCell::new(0),
        };

        let sum = Reference::new("a").field("sum").unwrap();
        let product = Reference::new("a").field("product").unwrap();
        let refs: HashSet<_> = [sum.clone(), product.clone()].into_iter().collect();

        let mut cache = ResolveCache::new();
        let resolved =
            resolve_references(&refs, Some(&store), &mut cache, OnMissing::Error).unwrap();

        assert_eq!(resolved[&sum], json!(5));
        assert_eq!(resolved[&product], json!(6));
        assert_eq!(*store.calls.borrow(), 1);
    }

    #[test]
    fn find_and_resolve_substitutes_in_place() {
        let mut data = StdHashMap::new();
        data.insert("a".to_owned(), json!(42));
        let store = CountingStore {
            data,
            calls: RefCell::new(0),
        };

        let input = json!({"x": Reference::new("a").to_value(), "y": 7});
        let mut cache = ResolveCache::new();
        let resolved =
            find_and_resolve_references(&input, Some(&store), &mut cache, OnMissing::Error)
                .unwrap();

        assert_eq!(resolved, json!({"x": 42, "y": 7}));
    }

    #[test]
    fn nested_reference_in_resolved_output_is_followed() {
        // uuid A's output contains a reference to uuid B.
        let mut data = StdHashMap::new();
        data.insert("A".to_owned(), json!({"link": Reference::new("B").to_value()}));
        data.insert("B".to_owned(), json!(42));
        let store = CountingStore {
            data,
            calls: RefCell::new(0),
        };

        let mut cache = ResolveCache::new();
        let value = Reference::new("A")
            .field("link")
            .unwrap()
            .resolve(Some(&store), &mut cache, OnMissing::Error)
            .unwrap();

        assert_eq!(value, json!(42));
    }

    #[test]
    fn missing_reference_with_none_policy_yields_null() {
        let store = CountingStore {
            data: StdHashMap::new(),
            calls: RefCell::new(0),
        };
        let mut cache = ResolveCache::new();
        let value = Reference::new("missing")
            .resolve(Some(&store), &mut cache, OnMissing::None)
            .unwrap();
        assert_eq!(value, json!(null));
    }

    #[test]
    fn missing_reference_with_error_policy_fails() {
        let store = CountingStore {
            data: StdHashMap::new(),
            calls: RefCell::new(0),
        };
        let mut cache = ResolveCache::new();
        let err = Reference::new("missing")
            .resolve(Some(&store), &mut cache, OnMissing::Error)
            .unwrap_err();
        assert!(matches!(err, ReferenceError::Unresolved { .. }));
    }

    #[test]
    fn missing_reference_with_pass_policy_is_passed_through() {
        let store = CountingStore {
            data: StdHashMap::new(),
            calls: RefCell::new(0),
        };
        let mut cache = ResolveCache::new();
        let value = Reference::new("missing")
            .resolve(Some(&store), &mut cache, OnMissing::Pass)
            .unwrap();
        assert_eq!(Reference::from_value(&value), Some(Reference::new("missing")));
    }

    #[test]
    fn cyclic_reference_fails_under_error_policy() {
        let mut data = StdHashMap::new();
        data.insert("A".to_owned(), json!({"link": Reference::new("B").to_value()}));
        data.insert("B".to_owned(), json!({"link": Reference::new("A").to_value()}));
        let store = CountingStore {
            data,
            calls: RefCell::new(0),
        };

        let mut cache = ResolveCache::new();
        let err = Reference::new("A")
            .resolve(Some(&store), &mut cache, OnMissing::Error)
            .unwrap_err();
        assert!(matches!(err, ReferenceError::Cyclic { .. }));
    }

    #[test]
    fn cyclic_reference_under_pass_policy_returns_partial_value() {
        let mut data = StdHashMap::new();
        data.insert("A".to_owned(), json!({"link": Reference::new("B").to_value()}));
        data.insert("B".to_owned(), json!({"link": Reference::new("A").to_value()}));
        let store = CountingStore {
            data,
            calls: RefCell::new(0),
        };

        let mut cache = ResolveCache::new();
        // Must not panic or infinitely recurse.
        let _ = Reference::new("A").resolve(Some(&store), &mut cache, OnMissing::Pass);
    }
}
