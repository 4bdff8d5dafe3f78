//! A reference [`Store`] implementation backed by an in-process
//! `Mutex<HashMap<...>>`.
//!
//! This is not a production persistence layer — it exists purely to
//! exercise the `Store` contract in `deferflow-core`'s own tests, and to
//! give downstream crates (a future distributed manager, a future CLI) a
//! reference implementation to imitate.

use deferflow_core::{OutputRecord, SaveSelector, Store, StoreError, Which};
use std::collections::HashMap;
use std::sync::Mutex;

/// An in-memory `Store`, keyed by `(uuid, index)`.
///
/// `Which::Latest` reads return the highest-index record present for the
/// uuid at the moment of the query, satisfying the ordering guarantee
/// `Store` implementations must uphold.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(String, u32), OutputRecord>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of records currently held, across all uuids.
    pub fn len(&self) -> usize {
        self.records.lock().expect("store lock poisoned").len()
    }

    /// Whether the store currently holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove the record at `(uuid, index)`, if present. Used by tests to
    /// exercise `OnMissing` policies (S2).
    pub fn remove(&self, uuid: &str, index: u32) -> Option<OutputRecord> {
        self.records
            .lock()
            .expect("store lock poisoned")
            .remove(&(uuid.to_owned(), index))
    }
}

impl Store for MemoryStore {
    fn get_output(&self, uuid: &str, which: Which, _load: bool) -> Result<serde_json::Value, StoreError> {
        let records = self.records.lock().expect("store lock poisoned");
        let index = match which {
            Which::Latest => records
                .keys()
                .filter(|(u, _)| u == uuid)
                .map(|(_, index)| *index)
                .max()
                .ok_or_else(|| StoreError::NotFound {
                    uuid: uuid.to_owned(),
                })?,
            Which::Index(index) => index,
        };
        records
            .get(&(uuid.to_owned(), index))
            .map(|record| record.output.clone())
            .ok_or_else(|| StoreError::NotFound {
                uuid: uuid.to_owned(),
            })
    }

    fn update(&self, record: OutputRecord, _save: SaveSelector) -> Result<(), StoreError> {
        let mut records = self.records.lock().expect("store lock poisoned");
        records.insert((record.uuid.clone(), record.index), record);
        Ok(())
    }
}
