//! Named local operations the device may invoke, the custom-action handler
//! registry, and the bookkeeping that gates invocations on resource loads.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Arguments an operation is invoked with.
#[derive(Debug, Clone, PartialEq)]
pub enum Args {
    None,
    /// The `params` of a `callJsFunction` frame.
    Value(Value),
    /// Tokens resolved from an inline button handler.
    Positional(Vec<String>),
    /// A file chosen through a popup's file input.
    File(PathBuf),
}

impl Args {
    pub fn from_params(params: Option<Value>) -> Self {
        match params {
            None | Some(Value::Null) => Args::None,
            Some(value) => Args::Value(value),
        }
    }

    /// The `index`-th argument rendered as text.
    pub fn text(&self, index: usize) -> Option<String> {
        match self {
            Args::None => None,
            Args::Value(Value::Array(items)) => items.get(index).map(value_text),
            Args::Value(value) => (index == 0).then(|| value_text(value)),
            Args::Positional(tokens) => tokens.get(index).cloned(),
            Args::File(path) => (index == 0).then(|| path.display().to_string()),
        }
    }

    pub fn first(&self) -> Option<String> {
        self.text(0)
    }

    /// The first argument as a list index (`"2"`, `2` and `2.0` all work).
    pub fn index(&self) -> Option<usize> {
        let text = self.first()?;
        let text = text.trim().trim_matches(|c| c == '\'' || c == '"');
        text.parse::<usize>()
            .ok()
            .or_else(|| text.parse::<f64>().ok().filter(|n| *n >= 0.0).map(|n| n as usize))
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("no operation named `{0}`")]
    NotFound(String),
    #[error("operation `{name}` failed: {source}")]
    Failed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type Operation<C> = Box<dyn FnMut(&mut C, Args) -> Result<()> + Send>;
pub type CustomHandler<C> = Box<dyn FnMut(&mut C, &str, Value) -> Result<()> + Send>;

/// Operation name -> callable. Replaces looking functions up by name in a
/// global scope.
pub struct Registry<C> {
    operations: BTreeMap<String, Operation<C>>,
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self {
            operations: BTreeMap::new(),
        }
    }
}

impl<C> Registry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) an operation.
    pub fn register<F>(&mut self, name: &str, operation: F)
    where
        F: FnMut(&mut C, Args) -> Result<()> + Send + 'static,
    {
        self.operations.insert(name.to_string(), Box::new(operation));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    pub fn call(&mut self, ctx: &mut C, name: &str, args: Args) -> Result<(), InvokeError> {
        let operation = self
            .operations
            .get_mut(name)
            .ok_or_else(|| InvokeError::NotFound(name.to_string()))?;
        operation(ctx, args).map_err(|source| InvokeError::Failed {
            name: name.to_string(),
            source,
        })
    }
}

/// Handlers for `custom` frames, keyed by exact action or by action suffix.
pub struct CustomHandlers<C> {
    exact: BTreeMap<String, CustomHandler<C>>,
    suffix: Vec<(String, CustomHandler<C>)>,
}

impl<C> Default for CustomHandlers<C> {
    fn default() -> Self {
        Self {
            exact: BTreeMap::new(),
            suffix: Vec::new(),
        }
    }
}

impl<C> CustomHandlers<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&mut self, action: &str, handler: F)
    where
        F: FnMut(&mut C, &str, Value) -> Result<()> + Send + 'static,
    {
        self.exact.insert(action.to_string(), Box::new(handler));
    }

    pub fn on_suffix<F>(&mut self, suffix: &str, handler: F)
    where
        F: FnMut(&mut C, &str, Value) -> Result<()> + Send + 'static,
    {
        self.suffix.retain(|(existing, _)| existing != suffix);
        self.suffix.push((suffix.to_string(), Box::new(handler)));
    }

    /// Returns `Ok(false)` when no handler claims the action.
    pub fn dispatch(&mut self, ctx: &mut C, action: &str, data: Value) -> Result<bool> {
        if let Some(handler) = self.exact.get_mut(action) {
            handler(ctx, action, data)?;
            return Ok(true);
        }
        if let Some((_, handler)) = self
            .suffix
            .iter_mut()
            .find(|(suffix, _)| action.len() > suffix.len() && action.ends_with(suffix.as_str()))
        {
            handler(ctx, action, data)?;
            return Ok(true);
        }
        Ok(false)
    }
}

pub type ScriptInstaller<C> = fn(&mut Registry<C>, &mut CustomHandlers<C>);

/// Maps a script's file name to the native operations it provides.
pub struct ScriptCatalog<C> {
    scripts: BTreeMap<String, ScriptInstaller<C>>,
}

impl<C> Default for ScriptCatalog<C> {
    fn default() -> Self {
        Self {
            scripts: BTreeMap::new(),
        }
    }
}

impl<C> ScriptCatalog<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide(&mut self, file_name: &str, installer: ScriptInstaller<C>) {
        self.scripts.insert(file_name.to_string(), installer);
    }

    pub fn install(
        &self,
        path: &str,
        registry: &mut Registry<C>,
        customs: &mut CustomHandlers<C>,
    ) -> bool {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        match self.scripts.get(file_name) {
            Some(installer) => {
                installer(registry, customs);
                true
            }
            None => false,
        }
    }
}

/// Invocation parked until the pending set drains.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredCall {
    pub name: String,
    pub params: Option<Value>,
}

/// Script loads in flight plus the invocations waiting on them.
#[derive(Debug, Default)]
pub struct PendingResources {
    in_flight: BTreeSet<String>,
    deferred: VecDeque<DeferredCall>,
}

impl PendingResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the same path is already loading; the caller
    /// then shares that load instead of starting another.
    pub fn begin(&mut self, path: &str) -> bool {
        self.in_flight.insert(path.to_string())
    }

    /// Marks a load finished (successfully or not). Once nothing is left in
    /// flight, every deferred call is released in arrival order.
    pub fn finish(&mut self, path: &str) -> Vec<DeferredCall> {
        self.in_flight.remove(path);
        if self.in_flight.is_empty() {
            self.deferred.drain(..).collect()
        } else {
            Vec::new()
        }
    }

    pub fn defer(&mut self, call: DeferredCall) {
        self.deferred.push_back(call);
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }
}

/// Reduces any resource path to `/<file name>`; directories are discarded.
pub fn normalize_resource_path(path: &str) -> String {
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() => format!("/{name}"),
        _ => path.to_string(),
    }
}

#[async_trait]
pub trait ResourceFetcher: Send + Sync + 'static {
    async fn fetch(&self, path: &str) -> Result<String>;
}

/// Loads scripts and stylesheets from the device's web root.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base: Url,
}

impl HttpFetcher {
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base).with_context(|| format!("invalid base url: {base}"))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base,
        })
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, path: &str) -> Result<String> {
        let url = self
            .base
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("invalid resource path: {path}"))?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("failed to fetch {url}"))?
            .error_for_status()
            .with_context(|| format!("device refused {url}"))?;
        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Counter {
        calls: Vec<String>,
    }

    #[test]
    fn registry_reports_missing_operations() {
        let mut registry: Registry<Counter> = Registry::new();
        registry.register("loadFileList", |ctx, _| {
            ctx.calls.push("loadFileList".into());
            Ok(())
        });
        registry.register("broken", |_, _| anyhow::bail!("no monitor"));

        let mut ctx = Counter::default();
        assert!(registry.call(&mut ctx, "loadFileList", Args::None).is_ok());
        assert!(matches!(
            registry.call(&mut ctx, "window.alert", Args::None),
            Err(InvokeError::NotFound(_))
        ));
        assert!(matches!(
            registry.call(&mut ctx, "broken", Args::None),
            Err(InvokeError::Failed { .. })
        ));
        assert_eq!(ctx.calls, ["loadFileList"]);
    }

    #[test]
    fn custom_handlers_prefer_exact_matches() {
        let mut handlers: CustomHandlers<Counter> = CustomHandlers::new();
        handlers.on("LocalMessagesData", |ctx, action, _| {
            ctx.calls.push(format!("exact:{action}"));
            Ok(())
        });
        handlers.on_suffix("SettingsData", |ctx, action, _| {
            ctx.calls.push(format!("suffix:{action}"));
            Ok(())
        });

        let mut ctx = Counter::default();
        assert!(handlers.dispatch(&mut ctx, "LocalMessagesData", json!("[]")).expect("ok"));
        assert!(handlers.dispatch(&mut ctx, "parolaSettingsData", json!("{}")).expect("ok"));
        assert!(!handlers.dispatch(&mut ctx, "SettingsData", json!("{}")).expect("ok"));
        assert!(!handlers.dispatch(&mut ctx, "weather", Value::Null).expect("ok"));
        assert_eq!(ctx.calls, ["exact:LocalMessagesData", "suffix:parolaSettingsData"]);
    }

    #[test]
    fn deferred_calls_wait_for_every_load() {
        let mut pending = PendingResources::new();
        assert!(pending.begin("/espTicker32.js"));
        assert!(pending.begin("/FSmanager.js"));
        assert!(!pending.begin("/FSmanager.js"));
        pending.defer(DeferredCall {
            name: "isEspTicker32Loaded".into(),
            params: None,
        });

        assert!(pending.finish("/espTicker32.js").is_empty());
        assert_eq!(pending.deferred_len(), 1);
        let released = pending.finish("/FSmanager.js");
        assert_eq!(released.len(), 1);
        assert!(pending.is_empty());
        assert!(pending.finish("/FSmanager.js").is_empty());
    }

    #[test]
    fn resource_paths_are_flattened() {
        assert_eq!(normalize_resource_path("/SYS/espTicker32.js"), "/espTicker32.js");
        assert_eq!(normalize_resource_path("ticker.css"), "/ticker.css");
        assert_eq!(normalize_resource_path("/assets/"), "/assets/");
    }

    #[test]
    fn args_render_as_text() {
        let args = Args::from_params(Some(json!(["Main", "Settings", 3])));
        assert_eq!(args.text(1).as_deref(), Some("Settings"));
        assert_eq!(args.text(2).as_deref(), Some("3"));
        assert_eq!(Args::from_params(Some(json!(2))).index(), Some(2));
        assert_eq!(Args::Positional(vec!["'4'".into()]).index(), Some(4));
        assert_eq!(Args::from_params(Some(Value::Null)), Args::None);
    }

    #[test]
    fn catalog_installs_by_file_name() {
        fn install(registry: &mut Registry<Counter>, _: &mut CustomHandlers<Counter>) {
            registry.register("isFSmanagerLoaded", |_, _| Ok(()));
        }
        let mut catalog: ScriptCatalog<Counter> = ScriptCatalog::new();
        catalog.provide("FSmanager.js", install);
        let mut registry: Registry<Counter> = Registry::new();
        let mut customs: CustomHandlers<Counter> = CustomHandlers::new();
        assert!(catalog.install("/FSmanager.js", &mut registry, &mut customs));
        assert!(registry.contains("isFSmanagerLoaded"));
        assert!(!catalog.install("/other.js", &mut registry, &mut customs));
    }
}
