//! The store interface consumed (but not implemented) by this crate.
//!
//! A real deployment backs this trait with a durable, concurrently
//! accessible key/value service. This crate only depends on the contract;
//! the `deferflow-store-memory` crate provides an in-memory implementation
//! used by this crate's own tests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Which generation of a uuid's output to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Which {
    /// The highest-index record currently stored for the uuid.
    Latest,
    /// A specific generation.
    Index(u32),
}

/// Controls which parts of an output are marked for extended persistence.
///
/// Mirrors the source's `data` selector: either persist nothing extra,
/// persist the whole output, or persist a named subset of it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveSelector {
    /// Do not mark anything for extended persistence.
    #[default]
    None,
    /// Mark the entire output.
    All,
    /// Mark only the named top-level keys/type-tags.
    Keys(Vec<String>),
}

/// A persisted job record, as written by [`crate::job::Job::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// The job uuid this record belongs to.
    pub uuid: String,
    /// The generation (starts at 1, bumped by replace-continuation).
    pub index: u32,
    /// The job's (already schema-applied) output.
    pub output: serde_json::Value,
    /// RFC 3339 timestamp of completion.
    pub completed_at: String,
    /// Opaque metadata propagated from the job.
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Failure modes of a [`Store`] implementation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// No record exists for the requested uuid (and index, if given).
    #[error("no output found for uuid '{uuid}'")]
    NotFound {
        /// The uuid that was requested.
        uuid: String,
    },

    /// The store's backing medium failed (I/O, network, serialization...).
    #[error("store backend failed: {message}")]
    Backend {
        /// A human-readable description of the backend failure.
        message: String,
    },
}

/// The persistent output store, keyed by `(uuid, index)`.
///
/// Implementations must tolerate concurrent reads and writes, and a
/// [`Which::Latest`] read must observe the highest-index record present at
/// the moment of the query.
pub trait Store: Send + Sync {
    /// Fetch a job's output.
    ///
    /// `load`: when `true`, any extended-persistence payload should be
    /// inlined into the returned value rather than left as a reference to
    /// external storage. This
    /// crate's in-memory reference store has no extended-storage tier, so
    /// `load` is accepted but has no effect there.
    fn get_output(&self, uuid: &str, which: Which, load: bool) -> Result<serde_json::Value, StoreError>;

    /// Upsert a record keyed by `(record.uuid, record.index)`.
    fn update(&self, record: OutputRecord, save: SaveSelector) -> Result<(), StoreError>;
}
