//! Typed error taxonomy for the deferred-execution core.
//!
//! Each component that can fail owns a dedicated enum here rather than
//! erasing into `Box<dyn Error>`; [`JobError`] wraps the others so that
//! `Job::run` has a single return type.

use thiserror::Error;

/// Errors raised while constructing or resolving a [`crate::reference::Reference`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReferenceError {
    /// The store (and cache) had no record for the referenced uuid, and the
    /// resolution policy was [`crate::reference::OnMissing::Error`].
    #[error("could not resolve reference - {uuid} not in store or cache")]
    Unresolved {
        /// The uuid that could not be resolved.
        uuid: String,
    },

    /// A projection step failed on the resolved value.
    #[error("failed to project {step:?} out of resolved value for {uuid}")]
    Projection {
        /// The uuid whose value was being projected.
        uuid: String,
        /// The step that could not be applied.
        step: crate::reference::Step,
    },

    /// The reference carries an output schema, and the first projection step
    /// is not one of the schema's declared fields.
    #[error("schema does not declare field '{field}'")]
    SchemaProjection {
        /// The rejected field name.
        field: String,
    },

    /// Resolving this reference re-entered a uuid already being resolved on
    /// the same cache, i.e. a cycle across job outputs.
    #[error("cyclic reference detected while resolving {uuid}")]
    Cyclic {
        /// The uuid at which the cycle was detected.
        uuid: String,
    },

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}

/// Errors raised while normalising a job's return value into a
/// [`crate::response::Response`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResponseError {
    /// The output did not satisfy the declared output schema, and is not a
    /// map that the schema could be instantiated from.
    #[error("expected output to satisfy schema '{schema}' but got a non-object value")]
    SchemaMismatch {
        /// Name of the schema that rejected the value.
        schema: String,
    },

    /// An output schema was declared but the job produced no output.
    #[error("expected output of schema '{schema}' but no output was returned")]
    MissingOutput {
        /// Name of the schema that required an output.
        schema: String,
    },

    /// A `Response` was returned alongside other bare values in a collection.
    #[error("a Response cannot be returned in combination with other outputs")]
    MixedResponse,
}

/// Errors raised while binding a job's callable at run time.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    /// `(source, name)` is already bound to a callable.
    #[error("callable '{name}' is already registered for source '{source}'")]
    AlreadyRegistered {
        /// The function source (module path) under which registration was attempted.
        source: String,
        /// The function name under which registration was attempted.
        name: String,
    },

    /// No callable is registered for `(source, name)`.
    #[error("no callable named '{name}' registered for source '{source}'")]
    NotFound {
        /// The function source that was searched.
        source: String,
        /// The function name that was searched.
        name: String,
    },
}

/// Errors raised while applying a dict-mod update (§4.3) to a job's keyword
/// arguments.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DictModError {
    /// The declarative update referenced an operator this crate does not
    /// implement.
    #[error("unknown dict-mod operator '{operator}'")]
    UnknownOperator {
        /// The unrecognised operator name.
        operator: String,
    },

    /// `path` did not resolve to a container of the shape the operator
    /// expects (e.g. `push` against a non-array).
    #[error("dict-mod path {path:?} does not resolve to a compatible value")]
    BadPath {
        /// The path that failed to resolve.
        path: Vec<String>,
    },
}

/// Errors raised by [`crate::job::Job::run`].
#[derive(Debug, Error)]
pub enum JobError {
    /// Reference resolution failed.
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// Response normalisation failed.
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// The store failed during output persistence.
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    /// `function_source` names neither a registered module function nor a
    /// maker, so no callable could be found at all.
    #[error("no callable named '{name}' could be found for source '{source}'")]
    CallableNotFound {
        /// The function source that was searched.
        source: String,
        /// The function name that was searched.
        name: String,
    },

    /// The bound callable ran and returned an error of its own.
    #[error("job callable failed: {message}")]
    Execution {
        /// The callable's own error message.
        message: String,
    },

    /// A dict-mod update applied to the job's kwargs failed.
    #[error(transparent)]
    DictMod(#[from] DictModError),
}
