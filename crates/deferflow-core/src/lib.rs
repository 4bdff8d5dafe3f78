//! Deferred-execution and reference-resolution core of a workflow
//! orchestration library.
//!
//! Users declare computations as parameterised, deferred function calls
//! ([`job::Job`]) that can be composed into [`flow::Flow`]s. Jobs reference
//! each other's future outputs symbolically ([`reference::Reference`]); at
//! execution time those references are resolved against a
//! [`store::Store`] and substituted for their concrete values. A job may,
//! when it runs, return [`response::Response`] directives that modify the
//! workflow dynamically: inserting new work, replacing itself with a
//! refined subflow, or halting siblings.
//!
//! This crate does not itself schedule work across machines, transport
//! values between processes, or provide a persistence backend — see
//! [`store::Store`] and the `deferflow-store-memory` crate for a reference
//! implementation used only in this crate's own tests.

pub mod current;
pub mod dict_mod;
pub mod error;
pub mod flow;
pub mod job;
pub mod reference;
pub mod registry;
pub mod response;
pub mod schema;
pub mod store;
pub mod walker;

pub use current::{current as current_job, current_store, CurrentJob, CurrentJobGuard};
pub use dict_mod::DictMod;
pub use error::{DictModError, JobError, ReferenceError, RegistryError, ResponseError};
pub use flow::Flow;
pub use job::{Job, JobConfig, Maker};
pub use reference::{OnMissing, Reference, ResolveCache, Step};
pub use registry::Registry;
pub use response::{JobOrFlow, JobReturn, Response};
pub use schema::Schema;
pub use store::{OutputRecord, SaveSelector, Store, StoreError, Which};
