//! The deferred call abstraction: identity, inputs, runtime execution
//! pipeline, and output persistence (§4.3).

use crate::current::{self, CurrentJob};
use crate::dict_mod::{self, DictMod};
use crate::error::{DictModError, JobError};
use crate::reference::{OnMissing, Reference, ResolveCache};
use crate::registry::Registry;
use crate::response::{store_output, JobOrFlow, Response};
use crate::schema::Schema;
use crate::store::{OutputRecord, SaveSelector, Store};
use crate::walker;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// A configured-callable value usable as a job's `function_source` (§9
/// GLOSSARY, "Maker").
///
/// The Rust analogue of a stateful decorated callable: it carries its own
/// state (closed over by the implementor) and exposes methods selectable
/// by name, mirroring the source's ability to pass an already-configured
/// object as the thing a job invokes.
pub trait Maker: Send + Sync {
    /// A display name for the maker, used as the job's default `name`.
    fn name(&self) -> &str;

    /// Invoke `method` on this maker with resolved positional and keyword
    /// arguments.
    fn invoke(
        &self,
        method: &str,
        args: &[serde_json::Value],
        kwargs: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<crate::response::JobReturn, String>;

    /// Apply an update to this maker's own stored kwargs, optionally
    /// recursing into nested makers it may hold. The default
    /// implementation is a no-op, since most makers are immutable once
    /// constructed.
    fn update_kwargs(
        &self,
        _updates: &serde_json::Value,
        _dict_mod: bool,
        _nested: bool,
    ) -> Result<(), String> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Maker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Maker({})", self.name())
    }
}

/// The origin of a job's callable: either a module-path string resolved
/// against the process-wide [`Registry`] at run time, or an owned
/// configured-callable ("maker") passed in directly.
#[derive(Clone)]
pub enum FunctionSource {
    /// A module-path selector, looked up in a [`Registry`] at run time.
    Module(String),
    /// An owned, already-configured callable.
    Maker(Arc<dyn Maker>),
}

impl std::fmt::Debug for FunctionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionSource::Module(source) => write!(f, "Module({source:?})"),
            FunctionSource::Maker(maker) => write!(f, "Maker({:?})", maker.name()),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Crate-level configuration for a job's execution pipeline (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// If `false`, raw [`Reference`] values are passed into the callable
    /// verbatim instead of being resolved.
    #[serde(default = "default_true")]
    pub resolve_references: bool,
    /// Policy used by the Reference Walker when resolution fails.
    #[serde(default)]
    pub on_missing_references: OnMissing,
    /// Opaque configuration forwarded to the dispatch manager; never
    /// interpreted by this crate.
    #[serde(default)]
    pub manager_config: serde_json::Map<String, serde_json::Value>,
    /// If `true`, the store handle is also published on the ambient slot
    /// during execution.
    #[serde(default)]
    pub expose_store: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            resolve_references: true,
            on_missing_references: OnMissing::default(),
            manager_config: serde_json::Map::new(),
            expose_store: false,
        }
    }
}

const JOB_CLASS_TAG: &str = "Job";
const FLOW_CLASS_TAG: &str = "Flow";

/// A single edge of [`Job::graph`]: the projection paths of every
/// reference this job's inputs hold against one upstream uuid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    /// The upstream job's uuid.
    pub uuid: String,
    /// Every projection chain (as a display string) used against that
    /// uuid by this job's inputs.
    pub paths: Vec<String>,
}

/// A deferred, parameterised function call (§3 "Job").
#[derive(Clone)]
pub struct Job {
    function_source: FunctionSource,
    function_name: String,
    function_args: Vec<serde_json::Value>,
    function_kwargs: serde_json::Map<String, serde_json::Value>,
    output_schema: Option<Schema>,
    uuid: String,
    index: u32,
    name: String,
    data: SaveSelector,
    metadata: BTreeMap<String, serde_json::Value>,
    config: JobConfig,
    host: Option<String>,
    output: Reference,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("uuid", &self.uuid)
            .field("index", &self.index)
            .field("name", &self.name)
            .field("function_source", &self.function_source)
            .field("function_name", &self.function_name)
            .finish_non_exhaustive()
    }
}

impl Job {
    /// Build a job whose callable is looked up by `(function_source,
    /// function_name)` in the [`Registry`] at run time.
    pub fn new(
        function_source: impl Into<String>,
        function_name: impl Into<String>,
        config: JobConfig,
    ) -> Self {
        let function_name = function_name.into();
        Self::build(
            FunctionSource::Module(function_source.into()),
            function_name.clone(),
            function_name,
            config,
        )
    }

    /// Build a job whose callable is an already-configured [`Maker`].
    pub fn with_maker(
        maker: Arc<dyn Maker>,
        function_name: impl Into<String>,
        config: JobConfig,
    ) -> Self {
        let name = maker.name().to_owned();
        Self::build(FunctionSource::Maker(maker), function_name.into(), name, config)
    }

    fn build(
        function_source: FunctionSource,
        function_name: String,
        name: String,
        config: JobConfig,
    ) -> Self {
        let uuid = Uuid::new_v4().to_string();
        Self {
            function_source,
            function_name,
            function_args: Vec::new(),
            function_kwargs: serde_json::Map::new(),
            output_schema: None,
            uuid: uuid.clone(),
            index: 1,
            name,
            data: SaveSelector::default(),
            metadata: BTreeMap::new(),
            config,
            host: None,
            output: Reference::new(uuid),
        }
    }

    /// Attach positional arguments, warning if any embeds a bare `Job`/`Flow`
    /// value rather than its `.output()` reference.
    #[must_use]
    pub fn with_args(mut self, args: Vec<serde_json::Value>) -> Self {
        for arg in &args {
            warn_if_bare_job_or_flow(arg);
        }
        self.function_args = args;
        self
    }

    /// Attach keyword arguments, warning if any embeds a bare `Job`/`Flow`
    /// value rather than its `.output()` reference.
    #[must_use]
    pub fn with_kwargs(mut self, kwargs: serde_json::Map<String, serde_json::Value>) -> Self {
        for value in kwargs.values() {
            warn_if_bare_job_or_flow(value);
        }
        self.function_kwargs = kwargs;
        self
    }

    /// Attach an output schema, restricting the legal first projection
    /// step of this job's `.output()` reference.
    #[must_use]
    pub fn with_output_schema(mut self, schema: Schema) -> Self {
        self.output = Reference::with_schema(self.uuid.clone(), schema.clone());
        self.output_schema = Some(schema);
        self
    }

    /// Override the job's display name (defaults to the maker's name or
    /// the function name).
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the extended-persistence selector for this job's output.
    #[must_use]
    pub fn with_data(mut self, data: SaveSelector) -> Self {
        self.data = data;
        self
    }

    /// Attach opaque metadata, propagated to the persisted output record.
    #[must_use]
    pub fn with_metadata(mut self, metadata: BTreeMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Record the uuid of the enclosing flow.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// This job's unique identifier.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// This job's output generation. Starts at 1; bumped by
    /// replace-continuation.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// This job's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The reference pointing to this job's future output.
    ///
    /// Invariant: `self.output().uuid() == self.uuid()` always holds (TP2).
    pub fn output(&self) -> &Reference {
        &self.output
    }

    /// This job's declared output schema, if any.
    pub fn output_schema(&self) -> Option<&Schema> {
        self.output_schema.as_ref()
    }

    /// This job's keyword arguments.
    pub fn function_kwargs(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.function_kwargs
    }

    /// This job's positional arguments.
    pub fn function_args(&self) -> &[serde_json::Value] {
        &self.function_args
    }

    /// The `(source, name)` pair identifying this job's callable, where
    /// `source` is either the module path or the maker's name.
    pub fn function_identity(&self) -> (String, &str) {
        let source = match &self.function_source {
            FunctionSource::Module(source) => source.clone(),
            FunctionSource::Maker(maker) => maker.name().to_owned(),
        };
        (source, &self.function_name)
    }

    /// This job's extended-persistence selector.
    pub fn data(&self) -> &SaveSelector {
        &self.data
    }

    /// This job's opaque metadata bag.
    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    /// This job's execution configuration.
    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// The uuid of the enclosing flow, if this job was built as part of
    /// one.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Every distinct reference discovered in `function_args` and
    /// `function_kwargs`.
    pub fn input_references(&self) -> std::collections::HashSet<Reference> {
        let mut found = walker::find_references(&self.args_value());
        found.extend(walker::find_references(&self.kwargs_value()));
        found
    }

    /// The uuids of [`Job::input_references`].
    pub fn input_uuids(&self) -> std::collections::HashSet<String> {
        self.input_references()
            .into_iter()
            .map(|r| r.uuid().to_owned())
            .collect()
    }

    /// [`Job::input_references`] grouped by uuid.
    ///
    /// Returns the groups silently; does not emit any diagnostic output.
    pub fn input_references_grouped(&self) -> BTreeMap<String, Vec<Reference>> {
        let mut groups: BTreeMap<String, Vec<Reference>> = BTreeMap::new();
        for reference in self.input_references() {
            groups
                .entry(reference.uuid().to_owned())
                .or_default()
                .push(reference);
        }
        groups
    }

    /// A single-node, multi-edge view of this job's upstream dependencies:
    /// one [`GraphEdge`] per distinct referenced uuid, carrying every
    /// projection path used against it.
    pub fn graph(&self) -> Vec<GraphEdge> {
        self.input_references_grouped()
            .into_iter()
            .map(|(uuid, refs)| GraphEdge {
                uuid,
                paths: refs.iter().map(ToString::to_string).collect(),
            })
            .collect()
    }

    fn args_value(&self) -> serde_json::Value {
        serde_json::Value::Array(self.function_args.clone())
    }

    fn kwargs_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.function_kwargs.clone())
    }

    /// Apply a shallow merge (or, if `dict_mod` is set, the declarative
    /// dict-mod language) to `function_kwargs`, gated by a substring match
    /// on `name` and/or an exact match on `(source, name)` callable
    /// identity (§4.3 "Update operations").
    pub fn update_kwargs(
        &mut self,
        updates: &serde_json::Value,
        name_filter: Option<&str>,
        function_filter: Option<(&str, &str)>,
        dict_mod: bool,
    ) -> Result<(), JobError> {
        if !self.matches_filters(name_filter, function_filter) {
            return Ok(());
        }

        if dict_mod {
            let mods = parse_dict_mods(updates)?;
            let updated = dict_mod::apply_all(&self.kwargs_value(), &mods)?;
            self.function_kwargs = updated
                .as_object()
                .cloned()
                .ok_or(DictModError::BadPath { path: Vec::new() })?;
        } else if let Some(updates) = updates.as_object() {
            for (key, value) in updates {
                self.function_kwargs.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    /// Delegate [`Job::update_kwargs`] semantics into this job's maker, if
    /// it has one, optionally recursing into nested makers the maker
    /// itself may hold.
    pub fn update_maker_kwargs(
        &mut self,
        updates: &serde_json::Value,
        name_filter: Option<&str>,
        class_filter: Option<&str>,
        nested: bool,
        dict_mod: bool,
    ) -> Result<(), JobError> {
        let FunctionSource::Maker(maker) = &self.function_source else {
            return Ok(());
        };
        if let Some(name_filter) = name_filter {
            if !self.name.contains(name_filter) {
                return Ok(());
            }
        }
        if let Some(class_filter) = class_filter {
            if maker.name() != class_filter {
                return Ok(());
            }
        }
        maker
            .update_kwargs(updates, dict_mod, nested)
            .map_err(|message| JobError::Execution { message })
    }

    fn matches_filters(
        &self,
        name_filter: Option<&str>,
        function_filter: Option<(&str, &str)>,
    ) -> bool {
        if let Some(name_filter) = name_filter {
            if !self.name.contains(name_filter) {
                return false;
            }
        }
        if let Some((source, name)) = function_filter {
            let (own_source, own_name) = self.function_identity();
            if own_source != source || own_name != name {
                return false;
            }
        }
        true
    }

    /// Run this job's full execution pipeline against `store` and
    /// `registry` (§4.3 "`run(store) -> Response`").
    ///
    /// Publishes `self` as the current job for the duration of the call —
    /// also publishing `store` itself when `config.expose_store` is set
    /// (§6) — resolves references in the inputs (unless disabled), binds
    /// and invokes the callable, normalises its return value, rewrites a
    /// `restart` via replace-continuation, and persists the resulting
    /// output — clearing the ambient slot on every exit path.
    ///
    /// `store` is an owned, cheaply-cloned handle rather than a borrowed
    /// reference so it can be published on the ambient slot without
    /// resorting to unsafe scoped-reference tricks.
    pub fn run(&mut self, store: Arc<dyn Store>, registry: &Registry) -> Result<Response, JobError> {
        let current = if self.config.expose_store {
            CurrentJob::with_store(self.uuid.clone(), self.index, Arc::clone(&store))
        } else {
            CurrentJob::new(self.uuid.clone(), self.index)
        };
        let _guard = current::enter(current);
        let span = tracing::info_span!(
            "job.run",
            uuid = %self.uuid,
            index = self.index,
            name = %self.name
        );
        let _entered = span.enter();

        let response = self.run_body(store.as_ref(), registry)?;
        Ok(response)
    }

    fn run_body(&mut self, store: &dyn Store, registry: &Registry) -> Result<Response, JobError> {
        let (args_value, kwargs_value) = if self.config.resolve_references {
            tracing::debug!("resolving input references");
            let mut cache = ResolveCache::new();
            let args = walker::find_and_resolve_references(
                &self.args_value(),
                Some(store),
                &mut cache,
                self.config.on_missing_references,
            )?;
            let kwargs = walker::find_and_resolve_references(
                &self.kwargs_value(),
                Some(store),
                &mut cache,
                self.config.on_missing_references,
            )?;
            (args, kwargs)
        } else {
            (self.args_value(), self.kwargs_value())
        };

        let args_vec = args_value.as_array().cloned().unwrap_or_default();
        let kwargs_map = kwargs_value.as_object().cloned().unwrap_or_default();

        tracing::debug!("dispatching to callable");
        let raw_return = match &self.function_source {
            FunctionSource::Maker(maker) => maker
                .invoke(&self.function_name, &args_vec, &kwargs_map)
                .map_err(|message| JobError::Execution { message })?,
            FunctionSource::Module(source) => {
                let callable = registry.get(source, &self.function_name).map_err(|_| {
                    JobError::CallableNotFound {
                        source: source.clone(),
                        name: self.function_name.clone(),
                    }
                })?;
                callable(&args_vec, &kwargs_map).map_err(|message| JobError::Execution { message })?
            }
        };

        let mut response = Response::from_job_returns(raw_return, self.output_schema.as_ref())?;

        if let Some(restart) = response.restart.take() {
            response.restart = Some(self.prepare_restart(restart));
        }

        tracing::debug!("persisting output");
        let record = OutputRecord {
            uuid: self.uuid.clone(),
            index: self.index,
            output: response.output.clone(),
            completed_at: chrono::Utc::now().to_rfc3339(),
            metadata: self.metadata.clone(),
        };
        store.update(record, self.data.clone())?;

        Ok(response)
    }

    /// Rewrite a `restart` successor so it continues this job's identity
    /// (§4.3 "Replace-continuation").
    ///
    /// - A `Flow` with a designated output gets a synthetic trailing
    ///   `store_output` job appended, bound to this job's uuid at the next
    ///   index.
    /// - A single `Job` has its uuid and index rewritten directly, with
    ///   metadata merged (this job's metadata wins on conflict) and the
    ///   output schema inherited if the successor declares none.
    fn prepare_restart(&self, restart: JobOrFlow) -> JobOrFlow {
        let next_index = self.index + 1;
        match restart {
            JobOrFlow::Job(mut job) => {
                job.uuid = self.uuid.clone();
                job.index = next_index;
                job.output.set_uuid(self.uuid.clone());
                let mut metadata = job.metadata.clone();
                metadata.extend(self.metadata.clone());
                job.metadata = metadata;
                if job.output_schema.is_none() {
                    if let Some(schema) = &self.output_schema {
                        job = Box::new(job.with_output_schema(schema.clone()));
                    }
                }
                JobOrFlow::Job(job)
            }
            JobOrFlow::Flow(mut flow) => {
                if let Some(output) = flow.output().cloned() {
                    let mut terminal = store_output_job(
                        self.uuid.clone(),
                        next_index,
                        output.to_value(),
                        self.config.manager_config.clone(),
                    );
                    terminal.metadata = self.metadata.clone();
                    terminal.output_schema = self.output_schema.clone();
                    if let Some(schema) = &self.output_schema {
                        terminal.output = Reference::with_schema(self.uuid.clone(), schema.clone());
                    }
                    flow.push(terminal);
                }
                JobOrFlow::Flow(flow)
            }
        }
    }
}

fn parse_dict_mods(updates: &serde_json::Value) -> Result<Vec<DictMod>, DictModError> {
    match updates {
        serde_json::Value::Array(items) => items.iter().map(DictMod::from_value).collect(),
        single => Ok(vec![DictMod::from_value(single)?]),
    }
}

fn warn_if_bare_job_or_flow(value: &serde_json::Value) {
    if contains_bare_job_or_flow(value) {
        tracing::warn!(
            "job input contains a bare Job/Flow value; did you mean to pass its .output() reference?"
        );
    }
}

fn contains_bare_job_or_flow(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(class) = map.get("@class").and_then(serde_json::Value::as_str) {
                if class == JOB_CLASS_TAG || class == FLOW_CLASS_TAG {
                    return true;
                }
            }
            map.values().any(contains_bare_job_or_flow)
        }
        serde_json::Value::Array(items) => items.iter().any(contains_bare_job_or_flow),
        _ => false,
    }
}

/// Builds the synthetic `store_output` job used by replace-continuation's
/// `Flow` branch (§4.4): `resolve_references=false`/`on_missing=PASS` so
/// the designated output passes through into the store literally, with
/// only `manager_config` carried over from the replaced job's config —
/// not its resolution flags, which would defeat the point of this
/// primitive.
///
/// This is the one construction site for a `store_output` job; callers
/// that need one directly (e.g. tests) should use it too rather than
/// hand-rolling the config.
pub fn store_output_job(
    uuid: impl Into<String>,
    index: u32,
    value: serde_json::Value,
    manager_config: serde_json::Map<String, serde_json::Value>,
) -> Job {
    let config = JobConfig {
        resolve_references: false,
        on_missing_references: OnMissing::Pass,
        manager_config,
        ..JobConfig::default()
    };
    let mut job = Job::new("deferflow_core::response", "store_output", config)
        .with_kwargs(serde_json::Map::from_iter([("value".to_owned(), value)]));
    let uuid = uuid.into();
    job.uuid = uuid.clone();
    job.index = index;
    job.output = Reference::new(uuid);
    job
}

/// Register the built-in `store_output` callable under the module path
/// used by replace-continuation's synthetic terminal job.
pub fn register_builtins(registry: &Registry) -> Result<(), crate::error::RegistryError> {
    registry.register(
        "deferflow_core::response",
        "store_output",
        Arc::new(|args: &[serde_json::Value], kwargs: &serde_json::Map<String, serde_json::Value>| {
            store_output(args, kwargs)
        }),
    )
}
