//! End-to-end scenarios exercising the reference, job, and response
//! components together against the in-memory reference store (§8).

use deferflow_core::{
    Job, JobConfig, JobOrFlow, JobReturn, OnMissing, Reference, Registry, ResolveCache, Response,
    Schema, Which,
};
use deferflow_store_memory::MemoryStore;
use serde_json::json;
use std::sync::Arc;

fn registry_with_add_and_compute() -> Registry {
    let registry = Registry::new();
    registry
        .register(
            "math",
            "add",
            Arc::new(|args: &[serde_json::Value], _kwargs: &serde_json::Map<String, serde_json::Value>| {
                let a = args[0].as_f64().ok_or("a not a number")?;
                let b = args[1].as_f64().ok_or("b not a number")?;
                Ok(JobReturn::Value(json!(a + b)))
            }),
        )
        .unwrap();
    registry
        .register(
            "math",
            "compute",
            Arc::new(|args: &[serde_json::Value], _kwargs: &serde_json::Map<String, serde_json::Value>| {
                let a = args[0].as_f64().ok_or("a not a number")?;
                let b = args[1].as_f64().ok_or("b not a number")?;
                Ok(JobReturn::Value(json!({"sum": a + b, "product": a * b})))
            }),
        )
        .unwrap();
    deferflow_core::job::register_builtins(&registry).unwrap();
    registry
}

/// S1: chaining two jobs via a reference to the first job's output.
#[test]
fn s1_chained_jobs_resolve_through_reference() {
    let store = Arc::new(MemoryStore::new());
    let registry = registry_with_add_and_compute();

    let mut j1 = Job::new("math", "add", JobConfig::default()).with_args(vec![json!(1), json!(2)]);
    j1.run(Arc::clone(&store), &registry).unwrap();

    let mut j2 = Job::new("math", "add", JobConfig::default())
        .with_args(vec![j1.output().to_value(), json!(3)]);
    j2.run(Arc::clone(&store), &registry).unwrap();

    let resolved = Reference::new(j2.uuid())
        .resolve(Some(store.as_ref()), &mut ResolveCache::new(), OnMissing::Error)
        .unwrap();
    assert_eq!(resolved, json!(6.0));
}

/// S2: deleting the upstream record and re-running with `OnMissing::None`
/// observes a null input rather than failing resolution.
#[test]
fn s2_missing_upstream_record_resolves_to_null_under_none_policy() {
    let store = Arc::new(MemoryStore::new());
    let registry = registry_with_add_and_compute();

    let mut j1 = Job::new("math", "add", JobConfig::default()).with_args(vec![json!(1), json!(2)]);
    j1.run(Arc::clone(&store), &registry).unwrap();
    store.remove(j1.uuid(), j1.index());

    let config = JobConfig {
        on_missing_references: OnMissing::None,
        ..JobConfig::default()
    };
    let mut j2 = Job::new("math", "add", config)
        .with_args(vec![j1.output().to_value(), json!(3)]);
    // add() on (null, 3) fails inside the callable because `a` is no
    // longer a number - this is the function's own business, not a
    // resolution failure, and demonstrates the null made it through.
    let err = j2.run(store, &registry).unwrap_err();
    assert!(matches!(err, deferflow_core::JobError::Execution { .. }));
}

/// S3: two projections of the same output in one walk issue a single
/// store fetch.
#[test]
fn s3_multiple_projections_share_one_fetch() {
    let store = Arc::new(MemoryStore::new());
    let registry = registry_with_add_and_compute();

    let mut c = Job::new("math", "compute", JobConfig::default())
        .with_args(vec![json!(2), json!(3)]);
    c.run(Arc::clone(&store), &registry).unwrap();

    let sum = c.output().field("sum").unwrap();
    let product = c.output().field("product").unwrap();

    let mut cache = ResolveCache::new();
    let sum_value = sum
        .resolve(Some(store.as_ref()), &mut cache, OnMissing::Error)
        .unwrap();
    let product_value = product
        .resolve(Some(store.as_ref()), &mut cache, OnMissing::Error)
        .unwrap();

    assert_eq!(sum_value, json!(5.0));
    assert_eq!(product_value, json!(6.0));
    // the second resolve reused the cache populated by the first
    assert!(cache.contains(c.uuid()));
}

/// S4: a job replaces itself with a fresh computation; downstream
/// consumers referencing the original uuid observe the replacement's
/// output at the next index, never needing to change their reference.
#[test]
fn s4_replace_continuation_preserves_identity() {
    let store = Arc::new(MemoryStore::new());
    let registry = registry_with_add_and_compute();
    registry
        .register(
            "math",
            "replace_with_compute",
            Arc::new(|_args: &[serde_json::Value], _kwargs: &serde_json::Map<String, serde_json::Value>| {
                let successor = Job::new("math", "compute", JobConfig::default())
                    .with_args(vec![json!(4), json!(5)]);
                Ok(JobReturn::Response(Box::new(
                    Response::new(json!(null)).with_restart(successor),
                )))
            }),
        )
        .unwrap();

    let mut job = Job::new("math", "replace_with_compute", JobConfig::default());
    let original_uuid = job.uuid().to_owned();
    let response = job.run(Arc::clone(&store), &registry).unwrap();

    let JobOrFlow::Job(mut successor) = response.restart.unwrap() else {
        panic!("expected a Job restart");
    };
    assert_eq!(successor.uuid(), original_uuid);
    assert_eq!(successor.index(), 2);
    successor.run(Arc::clone(&store), &registry).unwrap();

    let product = Reference::new(original_uuid.as_str())
        .field("product")
        .unwrap()
        .resolve(Some(store.as_ref()), &mut ResolveCache::new(), OnMissing::Error)
        .unwrap();
    assert_eq!(product, json!(20.0));

    match store.get_output(&original_uuid, Which::Latest, true) {
        Ok(value) => assert_eq!(value["product"], json!(20.0)),
        Err(err) => panic!("expected latest record to exist: {err}"),
    }
}

/// S5: a mixed collection return (a `Response` alongside a bare value)
/// fails normalisation and never reaches the store.
#[test]
fn s5_mixed_response_and_value_return_fails() {
    let store = Arc::new(MemoryStore::new());
    let registry = registry_with_add_and_compute();
    registry
        .register(
            "math",
            "mixed_return",
            Arc::new(|_args: &[serde_json::Value], _kwargs: &serde_json::Map<String, serde_json::Value>| {
                Ok(JobReturn::Many(vec![
                    JobReturn::Response(Box::new(Response::new(json!(1)))),
                    JobReturn::Value(json!(2)),
                ]))
            }),
        )
        .unwrap();

    let mut job = Job::new("math", "mixed_return", JobConfig::default());
    let uuid = job.uuid().to_owned();
    let err = job.run(Arc::clone(&store), &registry).unwrap_err();
    assert!(matches!(
        err,
        deferflow_core::JobError::Response(deferflow_core::ResponseError::MixedResponse)
    ));
    assert!(store.get_output(&uuid, Which::Latest, true).is_err());
}

/// S6: a stored output that itself contains a reference to another uuid
/// is followed transparently during resolution.
#[test]
fn s6_nested_reference_in_stored_output_is_followed() {
    let store = Arc::new(MemoryStore::new());
    let registry = registry_with_add_and_compute();

    let mut b = Job::new("math", "add", JobConfig::default()).with_args(vec![json!(40), json!(2)]);
    b.run(Arc::clone(&store), &registry).unwrap();

    registry
        .register(
            "math",
            "link",
            Arc::new(|_args: &[serde_json::Value], kwargs: &serde_json::Map<String, serde_json::Value>| {
                Ok(JobReturn::Value(json!({"link": kwargs["target"]})))
            }),
        )
        .unwrap();

    let mut a = Job::new("math", "link", JobConfig::default())
        .with_kwargs(serde_json::Map::from_iter([(
            "target".to_owned(),
            b.output().to_value(),
        )]));
    a.run(Arc::clone(&store), &registry).unwrap();

    let value = a
        .output()
        .field("link")
        .unwrap()
        .resolve(Some(store.as_ref()), &mut ResolveCache::new(), OnMissing::Error)
        .unwrap();
    assert_eq!(value, json!(42.0));
}

/// TP6 / schema-gating, exercised end-to-end against a real job output.
#[test]
fn schema_gates_first_projection_step_on_a_real_output() {
    let store = Arc::new(MemoryStore::new());
    let registry = registry_with_add_and_compute();

    let schema = Schema::new("Compute", ["sum", "product"]);
    let mut c = Job::new("math", "compute", JobConfig::default())
        .with_args(vec![json!(2), json!(3)])
        .with_output_schema(schema);
    c.run(store, &registry).unwrap();

    assert!(c.output().field("nonexistent").is_err());
    assert!(c.output().field("sum").unwrap().at(0).is_ok());
}
