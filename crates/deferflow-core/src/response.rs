//! The post-execution control record, and normalisation of a job
//! callable's raw return value into one.

use crate::error::ResponseError;
use crate::flow::Flow;
use crate::job::Job;
use crate::schema::Schema;
use std::collections::BTreeMap;

/// Either a single job or a flow — the two forms `restart`, `detour`, and
/// `addition` may each take.
#[derive(Debug, Clone)]
pub enum JobOrFlow {
    /// A single successor job.
    Job(Box<Job>),
    /// A successor flow.
    Flow(Flow),
}

impl From<Job> for JobOrFlow {
    fn from(job: Job) -> Self {
        JobOrFlow::Job(Box::new(job))
    }
}

impl From<Flow> for JobOrFlow {
    fn from(flow: Flow) -> Self {
        JobOrFlow::Flow(flow)
    }
}

/// What a finished job's callable returns before normalisation. A plain
/// value, an explicit [`Response`], or a collection of either — mixing a
/// `Response` into a collection is rejected by
/// [`Response::from_job_returns`].
#[derive(Debug, Clone)]
pub enum JobReturn {
    /// A bare output value.
    Value(serde_json::Value),
    /// An explicit response, carrying its own directives.
    Response(Box<Response>),
    /// A collection of further returns.
    Many(Vec<JobReturn>),
}

impl PartialEq for JobReturn {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (JobReturn::Value(a), JobReturn::Value(b)) => a == b,
            (JobReturn::Response(a), JobReturn::Response(b)) => a.output == b.output,
            (JobReturn::Many(a), JobReturn::Many(b)) => a == b,
            _ => false,
        }
    }
}

impl From<serde_json::Value> for JobReturn {
    fn from(value: serde_json::Value) -> Self {
        JobReturn::Value(value)
    }
}

impl From<Response> for JobReturn {
    fn from(response: Response) -> Self {
        JobReturn::Response(Box::new(response))
    }
}

/// The post-execution control record produced by a job.
///
/// Modelled as a product of independent, optional directives rather than a
/// sum type, since the directives are orthogonal and can co-occur; mutual
/// exclusion rules (e.g. no `Response` mixed into a collection return) are
/// enforced by [`Response::from_job_returns`], not by this type.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// The value produced by the job (may be `null`).
    pub output: serde_json::Value,
    /// Replace the current job with this successor, preserving output
    /// identity.
    pub restart: Option<JobOrFlow>,
    /// Insert this work ahead of the job's usual successors.
    pub detour: Option<JobOrFlow>,
    /// Insert this work alongside the job's usual successors.
    pub addition: Option<JobOrFlow>,
    /// Auxiliary key/value payload for the runner.
    pub stored_data: Option<BTreeMap<String, serde_json::Value>>,
    /// Halt the job's children.
    pub stop_children: bool,
    /// Halt the enclosing flow.
    pub stop_flow: bool,
}

impl Response {
    /// A bare-output response with no directives.
    pub fn new(output: serde_json::Value) -> Self {
        Self {
            output,
            ..Default::default()
        }
    }

    /// Attach a replace-continuation successor.
    #[must_use]
    pub fn with_restart(mut self, successor: impl Into<JobOrFlow>) -> Self {
        self.restart = Some(successor.into());
        self
    }

    /// Attach a detour successor.
    #[must_use]
    pub fn with_detour(mut self, successor: impl Into<JobOrFlow>) -> Self {
        self.detour = Some(successor.into());
        self
    }

    /// Attach an addition successor.
    #[must_use]
    pub fn with_addition(mut self, successor: impl Into<JobOrFlow>) -> Self {
        self.addition = Some(successor.into());
        self
    }

    /// Attach auxiliary stored data.
    #[must_use]
    pub fn with_stored_data(mut self, data: BTreeMap<String, serde_json::Value>) -> Self {
        self.stored_data = Some(data);
        self
    }

    /// Mark this response as halting the job's children.
    #[must_use]
    pub fn stopping_children(mut self) -> Self {
        self.stop_children = true;
        self
    }

    /// Mark this response as halting the enclosing flow.
    #[must_use]
    pub fn stopping_flow(mut self) -> Self {
        self.stop_flow = true;
        self
    }

    /// Normalise a job callable's raw return value into a `Response`.
    ///
    /// - An explicit `Response` has its `output` schema-applied only when
    ///   it carries no `restart` (a replacement produces the real output
    ///   later, so applying the schema now would be applying it to a
    ///   placeholder).
    /// - A collection containing a `Response` anywhere (including nested)
    ///   fails with [`ResponseError::MixedResponse`].
    /// - Anything else is wrapped as `Response { output: apply_schema(..), ..
    ///   }`.
    pub fn from_job_returns(
        value: JobReturn,
        schema: Option<&Schema>,
    ) -> Result<Response, ResponseError> {
        match value {
            JobReturn::Response(mut response) => {
                if response.restart.is_none() {
                    response.output = apply_schema(response.output, schema)?;
                }
                Ok(*response)
            }
            JobReturn::Many(items) => {
                if contains_response(&items) {
                    return Err(ResponseError::MixedResponse);
                }
                let values = serde_json::Value::Array(flatten_values(items));
                Ok(Response::new(apply_schema(values, schema)?))
            }
            JobReturn::Value(value) => Ok(Response::new(apply_schema(value, schema)?)),
        }
    }
}

fn contains_response(items: &[JobReturn]) -> bool {
    items.iter().any(|item| match item {
        JobReturn::Response(_) => true,
        JobReturn::Many(nested) => contains_response(nested),
        JobReturn::Value(_) => false,
    })
}

fn flatten_values(items: Vec<JobReturn>) -> Vec<serde_json::Value> {
    items
        .into_iter()
        .flat_map(|item| match item {
            JobReturn::Value(value) => vec![value],
            JobReturn::Many(nested) => flatten_values(nested),
            JobReturn::Response(_) => unreachable!("checked by contains_response"),
        })
        .collect()
}

/// Apply a schema to a normalised output value.
fn apply_schema(
    value: serde_json::Value,
    schema: Option<&Schema>,
) -> Result<serde_json::Value, ResponseError> {
    let schema = match schema {
        Some(schema) => schema,
        None => return Ok(value),
    };

    if schema.is_satisfied_by(&value) {
        return Ok(value);
    }

    match value {
        serde_json::Value::Null => Err(ResponseError::MissingOutput {
            schema: schema.name().to_owned(),
        }),
        serde_json::Value::Object(map) => {
            let mut instantiated = serde_json::Map::with_capacity(schema.fields().len());
            for field in schema.fields() {
                instantiated.insert(
                    field.clone(),
                    map.get(field).cloned().unwrap_or(serde_json::Value::Null),
                );
            }
            Ok(serde_json::Value::Object(instantiated))
        }
        _ => Err(ResponseError::SchemaMismatch {
            schema: schema.name().to_owned(),
        }),
    }
}

/// The single-argument identity callable used by replace-continuation's
/// synthetic `store_output` job.
///
/// The job wrapping this callable is always constructed with
/// `resolve_references = false` and `on_missing_references = Pass`, so
/// whatever value it was given — resolved or not — passes through into
/// the store unchanged.
pub fn store_output(
    args: &[serde_json::Value],
    kwargs: &serde_json::Map<String, serde_json::Value>,
) -> Result<JobReturn, String> {
    if let Some(value) = kwargs.get("value") {
        return Ok(JobReturn::Value(value.clone()));
    }
    Ok(JobReturn::Value(
        args.first().cloned().unwrap_or(serde_json::Value::Null),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_value_is_wrapped() {
        let response =
            Response::from_job_returns(JobReturn::Value(json!(42)), None).unwrap();
        assert_eq!(response.output, json!(42));
        assert!(response.restart.is_none());
    }

    #[test]
    fn explicit_response_with_restart_skips_schema() {
        let schema = Schema::new("S", ["a"]);
        let inner = Response::new(json!(null))
            .with_restart(crate::job::Job::new("m", "f", crate::job::JobConfig::default()));
        let response =
            Response::from_job_returns(JobReturn::Response(Box::new(inner)), Some(&schema))
                .unwrap();
        assert_eq!(response.output, json!(null));
        assert!(response.restart.is_some());
    }

    #[test]
    fn explicit_response_without_restart_applies_schema() {
        let schema = Schema::new("S", ["a"]);
        let inner = Response::new(json!({"a": 1}));
        let response =
            Response::from_job_returns(JobReturn::Response(Box::new(inner)), Some(&schema))
                .unwrap();
        assert_eq!(response.output, json!({"a": 1}));
    }

    #[test]
    fn mixed_collection_fails() {
        let items = JobReturn::Many(vec![
            JobReturn::Response(Box::new(Response::new(json!(1)))),
            JobReturn::Value(json!(2)),
        ]);
        let err = Response::from_job_returns(items, None).unwrap_err();
        assert!(matches!(err, ResponseError::MixedResponse));
    }

    #[test]
    fn collection_without_response_is_wrapped_as_array() {
        let items = JobReturn::Many(vec![JobReturn::Value(json!(1)), JobReturn::Value(json!(2))]);
        let response = Response::from_job_returns(items, None).unwrap();
        assert_eq!(response.output, json!([1, 2]));
    }

    #[test]
    fn schema_null_output_fails_missing_output() {
        let schema = Schema::new("S", ["a"]);
        let err =
            Response::from_job_returns(JobReturn::Value(json!(null)), Some(&schema)).unwrap_err();
        assert!(matches!(err, ResponseError::MissingOutput { .. }));
    }

    #[test]
    fn schema_non_object_fails_mismatch() {
        let schema = Schema::new("S", ["a"]);
        let err =
            Response::from_job_returns(JobReturn::Value(json!(42)), Some(&schema)).unwrap_err();
        assert!(matches!(err, ResponseError::SchemaMismatch { .. }));
    }

    #[test]
    fn schema_partial_object_is_instantiated_with_nulls() {
        let schema = Schema::new("S", ["a", "b"]);
        let response =
            Response::from_job_returns(JobReturn::Value(json!({"a": 1})), Some(&schema)).unwrap();
        assert_eq!(response.output, json!({"a": 1, "b": null}));
    }

    #[test]
    fn store_output_returns_value_kwarg() {
        let kwargs = serde_json::Map::from_iter([("value".to_owned(), json!(42))]);
        assert_eq!(
            store_output(&[], &kwargs).unwrap(),
            JobReturn::Value(json!(42))
        );
    }

    #[test]
    fn store_output_falls_back_to_first_positional_arg() {
        let kwargs = serde_json::Map::new();
        assert_eq!(
            store_output(&[json!("hi")], &kwargs).unwrap(),
            JobReturn::Value(json!("hi"))
        );
    }
}
