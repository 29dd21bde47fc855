use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::{
    Handler, Output,
    module::{ExportStrategy, Module, ModuleLoader, default_strategies, extract_handler},
    reference::HandlerReference,
};
use crate::{
    error::{DriverError, HandlerError},
    value::Value,
};

/// Directory searched for packages while walking up from the resolution root.
pub const MODULES_DIR: &str = "rhai_modules";

const PACKAGE_ENTRY: &str = "index";

/// Process-wide memo of resolved handlers. Append-only; entries live until
/// the cache is dropped.
#[derive(Default)]
pub struct HandlerCache {
    handlers: DashMap<String, Arc<dyn Handler>>,
}

impl HandlerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(key).map(|h| h.value().clone())
    }

    pub fn insert(&self, key: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(key.into(), handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// One step of module resolution.
#[async_trait]
pub trait ModuleSource: Send + Sync {
    async fn locate(&self, reference: &HandlerReference, root: &Path) -> Result<Arc<dyn Module>, DriverError>;
}

// -----------------------------------------------------------------------------
// Sources
// -----------------------------------------------------------------------------

/// Resolves the module as a path relative to the root, probing loader
/// extensions in order.
pub struct LocalFiles {
    loaders: Vec<Arc<dyn ModuleLoader>>,
}

impl LocalFiles {
    pub fn new(loaders: Vec<Arc<dyn ModuleLoader>>) -> Self {
        Self { loaders }
    }
}

#[async_trait]
impl ModuleSource for LocalFiles {
    async fn locate(&self, reference: &HandlerReference, root: &Path) -> Result<Arc<dyn Module>, DriverError> {
        load_probed(&self.loaders, &root.join(&reference.module)).await
    }
}

/// Walks up from the root looking for `rhai_modules/<package>`.
pub struct ModuleRoots {
    loaders: Vec<Arc<dyn ModuleLoader>>,
}

impl ModuleRoots {
    pub fn new(loaders: Vec<Arc<dyn ModuleLoader>>) -> Self {
        Self { loaders }
    }
}

#[async_trait]
impl ModuleSource for ModuleRoots {
    async fn locate(&self, reference: &HandlerReference, root: &Path) -> Result<Arc<dyn Module>, DriverError> {
        let package = reference.package();
        if package.is_empty() || package.starts_with('.') {
            return Err(DriverError::ModuleNotFound(reference.module.clone()));
        }
        for dir in root.ancestors() {
            let package_dir = dir.join(MODULES_DIR).join(package);
            if !is_dir(&package_dir).await {
                continue;
            }
            let entry = package_dir.join(reference.package_subpath().unwrap_or(PACKAGE_ENTRY));
            trace!(path = %entry.display(), "found package");
            return load_probed(&self.loaders, &entry).await;
        }
        Err(DriverError::ModuleNotFound(reference.module.clone()))
    }
}

/// Modules registered in-process under a name.
#[derive(Default, Clone)]
pub struct StaticModules {
    modules: Arc<DashMap<String, Arc<dyn Module>>>,
}

impl StaticModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, module: impl Module + 'static) {
        self.modules.insert(name.into(), Arc::new(module));
    }
}

#[async_trait]
impl ModuleSource for StaticModules {
    async fn locate(&self, reference: &HandlerReference, _: &Path) -> Result<Arc<dyn Module>, DriverError> {
        self.modules
            .get(&reference.module)
            .map(|m| m.value().clone())
            .ok_or_else(|| DriverError::ModuleNotFound(reference.module.clone()))
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

async fn load_probed(loaders: &[Arc<dyn ModuleLoader>], base: &Path) -> Result<Arc<dyn Module>, DriverError> {
    for loader in loaders {
        for ext in loader.extensions() {
            let mut candidate = base.as_os_str().to_owned();
            candidate.push(".");
            candidate.push(ext);
            let candidate = PathBuf::from(candidate);
            if is_file(&candidate).await {
                debug!(path = %candidate.display(), "loading handler module");
                return loader.load(&candidate).await;
            }
        }
    }
    Err(DriverError::ModuleNotFound(base.display().to_string()))
}

// -----------------------------------------------------------------------------
// Resolver
// -----------------------------------------------------------------------------

/// Resolved function as handed to the pipelines.
struct ResolvedHandler {
    name: String,
    inner: Arc<dyn Handler>,
}

#[async_trait]
impl Handler for ResolvedHandler {
    async fn call(&self, input: Value) -> Result<Output, HandlerError> {
        trace!(function = %self.name, "invoking handler");
        self.inner.call(input).await
    }
}

/// Turns handler references into cached handlers.
pub struct Resolver {
    root: PathBuf,
    sources: Vec<Arc<dyn ModuleSource>>,
    strategies: Vec<Box<dyn ExportStrategy>>,
    cache: Arc<HandlerCache>,
}

impl Resolver {
    /// Resolver over local files and module roots, loading with `loader`.
    pub fn new(root: impl Into<PathBuf>, loader: Arc<dyn ModuleLoader>) -> Self {
        let loaders = vec![loader];
        Self::empty(root)
            .with_source(LocalFiles::new(loaders.clone()))
            .with_source(ModuleRoots::new(loaders))
    }

    /// Resolver with no sources; every lookup fails until one is added.
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sources: Vec::new(),
            strategies: default_strategies(),
            cache: Arc::new(HandlerCache::new()),
        }
    }

    /// Appends a source, tried after the existing ones.
    pub fn with_source(mut self, source: impl ModuleSource + 'static) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    pub fn with_cache(mut self, cache: Arc<HandlerCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache(&self) -> &Arc<HandlerCache> {
        &self.cache
    }

    pub async fn resolve(&self, raw: &str) -> Result<Arc<dyn Handler>, DriverError> {
        let reference = HandlerReference::parse(raw)?;
        let absolute = self.root.join(raw).to_string_lossy().into_owned();
        if let Some(cached) = self.cache.get(&absolute).or_else(|| self.cache.get(raw)) {
            return Ok(cached);
        }

        let module = self.locate(&reference).await?;
        let export_path = reference.export_segments();
        let inner = extract_handler(&self.strategies, module.as_ref(), export_path.as_deref())?;

        let handler: Arc<dyn Handler> = Arc::new(ResolvedHandler {
            name: raw.to_string(),
            inner,
        });
        self.cache.insert(absolute, handler.clone());
        self.cache.insert(raw, handler.clone());
        debug!(function = %raw, "resolved handler");
        Ok(handler)
    }

    async fn locate(&self, reference: &HandlerReference) -> Result<Arc<dyn Module>, DriverError> {
        let mut first_err = None;
        for source in &self.sources {
            match source.locate(reference, &self.root).await {
                Ok(module) => return Ok(module),
                Err(err) => {
                    trace!(function = %reference, error = %err, "module source missed");
                    first_err.get_or_insert(err);
                }
            }
        }
        Err(first_err.unwrap_or_else(|| DriverError::ModuleNotFound(reference.module.clone())))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::handler::{StaticModule, handler_fn};

    fn counting(counter: Arc<AtomicUsize>) -> Arc<dyn Handler> {
        handler_fn(move |input: Value| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Output::Value(input))
            }
        })
    }

    fn resolver_with(name: &str, module: StaticModule) -> Resolver {
        let modules = StaticModules::new();
        modules.insert(name, module);
        Resolver::empty("/nonexistent").with_source(modules)
    }

    #[tokio::test]
    async fn bare_reference_calls_default_export_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = resolver_with("function", StaticModule::new().with_default(counting(calls.clone())));

        let handler = resolver.resolve("function").await.unwrap();
        let out = handler.call(Value::from("arg")).await.unwrap();

        assert!(matches!(out, Output::Value(Value::String(ref s)) if s == "arg"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dotted_reference_calls_named_export_once() {
        let named = Arc::new(AtomicUsize::new(0));
        let default = Arc::new(AtomicUsize::new(0));
        let resolver = resolver_with(
            "function",
            StaticModule::new()
                .with_function("fnname", counting(named.clone()))
                .with_default(counting(default.clone())),
        );

        let handler = resolver.resolve("function.fnname").await.unwrap();
        handler.call(Value::Null).await.unwrap();

        assert_eq!(named.load(Ordering::SeqCst), 1);
        assert_eq!(default.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_reference_is_an_error() {
        let resolver = Resolver::empty(".");
        let err = resolver.resolve("").await.err().unwrap();
        assert_eq!(err.to_string(), "function name is empty");
    }

    #[tokio::test]
    async fn module_without_export_is_invalid() {
        let resolver = resolver_with("function", StaticModule::new());
        let err = resolver.resolve("function").await.err().unwrap();
        assert_eq!(err.to_string(), "invalid handler module");
    }

    #[tokio::test]
    async fn missing_module_reports_first_source_error() {
        let resolver = resolver_with("other", StaticModule::new())
            .with_source(LocalFiles::new(Vec::new()));
        let err = resolver.resolve("missing").await.err().unwrap();
        assert!(matches!(err, DriverError::ModuleNotFound(ref m) if m == "missing"));
    }

    #[tokio::test]
    async fn resolutions_are_cached_under_both_keys() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = resolver_with("function", StaticModule::new().with_default(counting(calls)));

        let first = resolver.resolve("function").await.unwrap();
        let second = resolver.resolve("function").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.cache().len(), 2);
        assert!(resolver.cache().get("function").is_some());
        assert!(resolver.cache().get("/nonexistent/function").is_some());
    }
}
