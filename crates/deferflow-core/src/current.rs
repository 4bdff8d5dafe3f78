//! The ambient "current job" slot.
//!
//! While a job's callable is executing, code it calls into (most notably a
//! maker building a [`crate::flow::Flow`]) needs to discover which job is
//! "currently running" without it being threaded through every call site
//! explicitly. The slot is scoped to the calling thread and guarded by RAII
//! so it cannot be left set after the job finishes, panics, or unwinds.
//!
//! When a job's [`crate::job::JobConfig::expose_store`] is set, the store
//! handle it is running against is published alongside its identity, per
//! §6; holding it as an owned `Arc<dyn Store>` (rather than a borrowed
//! reference) keeps this slot's contents `'static` without resorting to
//! unsafe scoped-reference tricks.

use crate::store::Store;
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static CURRENT_JOB: RefCell<Option<CurrentJob>> = const { RefCell::new(None) };
}

/// The identity of the job currently executing on this thread, and
/// optionally the store it is running against.
#[derive(Clone)]
pub struct CurrentJob {
    uuid: String,
    index: u32,
    store: Option<Arc<dyn Store>>,
}

impl std::fmt::Debug for CurrentJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurrentJob")
            .field("uuid", &self.uuid)
            .field("index", &self.index)
            .field("store_exposed", &self.store.is_some())
            .finish()
    }
}

impl CurrentJob {
    /// Build a handle from the job's uuid and output generation, with no
    /// store published.
    pub fn new(uuid: impl Into<String>, index: u32) -> Self {
        Self {
            uuid: uuid.into(),
            index,
            store: None,
        }
    }

    /// Build a handle that also publishes the store the job is running
    /// against (`config.expose_store`).
    pub fn with_store(uuid: impl Into<String>, index: u32, store: Arc<dyn Store>) -> Self {
        Self {
            uuid: uuid.into(),
            index,
            store: Some(store),
        }
    }

    /// The currently running job's uuid.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The currently running job's output generation.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The store published alongside this job, if `expose_store` was set.
    pub fn store(&self) -> Option<&Arc<dyn Store>> {
        self.store.as_ref()
    }
}

/// RAII guard that clears the current-job slot when dropped.
///
/// Holding the guard across a panic still clears the slot, since `Drop` runs
/// during unwinding; this prevents a stale "current job" leaking into
/// whatever the thread runs next (e.g. a test harness reusing the thread).
pub struct CurrentJobGuard {
    _private: (),
}

impl Drop for CurrentJobGuard {
    fn drop(&mut self) {
        CURRENT_JOB.with(|cell| {
            *cell.borrow_mut() = None;
        });
    }
}

/// Set the current job for the duration of the returned guard's lifetime.
///
/// # Panics
///
/// Panics if a current job is already set on this thread; jobs do not nest
/// (a job's callable runs to completion, including any maker call, before
/// the slot is cleared).
pub fn enter(job: CurrentJob) -> CurrentJobGuard {
    CURRENT_JOB.with(|cell| {
        let mut slot = cell.borrow_mut();
        assert!(slot.is_none(), "a current job is already set on this thread");
        *slot = Some(job);
    });
    CurrentJobGuard { _private: () }
}

/// The current job, if one is set on this thread.
pub fn current() -> Option<CurrentJob> {
    CURRENT_JOB.with(|cell| cell.borrow().clone())
}

/// The store published alongside the current job, if one is set on this
/// thread and was run with `config.expose_store`.
pub fn current_store() -> Option<Arc<dyn Store>> {
    current().and_then(|job| job.store.clone())
}
