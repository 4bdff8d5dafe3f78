//! Process-global registry of job callables (§5 "Callable binding").
//!
//! The source language binds a job's callable at run time via
//! `import_module`/`getattr`, so any function reachable by dotted path is
//! automatically a valid job target. A statically typed target has no
//! equivalent late-binding hook, so this crate asks callers to register
//! callables up front, keyed by the same `(source, name)` pair the job
//! record already carries. Registration can fail eagerly at construction
//! time instead of only at job-run time, which is strictly more than the
//! source offers.

use crate::error::RegistryError;
use crate::response::JobReturn;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A job callable: takes the job's (already reference-resolved) positional
/// and keyword arguments and returns a [`JobReturn`], or fails with a
/// human-readable message.
pub type Callable = Arc<
    dyn Fn(&[serde_json::Value], &serde_json::Map<String, serde_json::Value>) -> Result<JobReturn, String>
        + Send
        + Sync,
>;

/// Maps `(function_source, function_name)` to a bound [`Callable`].
///
/// Clone is cheap: it shares the underlying map via an `Arc`-guarded lock,
/// so a `Registry` can be handed to every job without copying its contents.
#[derive(Clone, Default)]
pub struct Registry {
    callables: Arc<RwLock<HashMap<(String, String), Callable>>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `(source, name)` to `callable`.
    ///
    /// Fails if the pair is already registered, so a misconfigured registry
    /// is caught at setup time rather than silently shadowing a callable.
    pub fn register(
        &self,
        source: impl Into<String>,
        name: impl Into<String>,
        callable: Callable,
    ) -> Result<(), RegistryError> {
        let source = source.into();
        let name = name.into();
        let mut callables = self.callables.write().expect("registry lock poisoned");
        if callables.contains_key(&(source.clone(), name.clone())) {
            return Err(RegistryError::AlreadyRegistered { source, name });
        }
        callables.insert((source, name), callable);
        Ok(())
    }

    /// Look up the callable bound to `(source, name)`.
    pub fn get(&self, source: &str, name: &str) -> Result<Callable, RegistryError> {
        let callables = self.callables.read().expect("registry lock poisoned");
        callables
            .get(&(source.to_owned(), name.to_owned()))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                source: source.to_owned(),
                name: name.to_owned(),
            })
    }

    /// Whether `(source, name)` is currently bound.
    pub fn contains(&self, source: &str, name: &str) -> bool {
        let callables = self.callables.read().expect("registry lock poisoned");
        callables.contains_key(&(source.to_owned(), name.to_owned()))
    }

    /// Eagerly check that `(source, name)` is bound, without retrieving the
    /// callable.
    ///
    /// The source language only fails an unbound callable at run time
    /// (`import_module`/`getattr` happen inside `Job.run`); this lets a
    /// caller that builds a `Job` from a `Registry` it controls fail at
    /// construction time instead, which the source never offered (§9
    /// "Reflection-based callable lookup becomes a process-global
    /// registry").
    pub fn resolve(&self, source: &str, name: &str) -> Result<(), RegistryError> {
        if self.contains(source, name) {
            Ok(())
        } else {
            Err(RegistryError::NotFound {
                source: source.to_owned(),
                name: name.to_owned(),
            })
        }
    }
}
