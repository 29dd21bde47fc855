use std::{collections::HashMap, path::Path, sync::Arc};

use async_trait::async_trait;

use super::Handler;
use crate::{error::DriverError, value::Value};

/// A symbol exposed by a loaded module.
#[derive(Clone)]
pub enum Export {
    Function(Arc<dyn Handler>),
    Value(Value),
}

impl Export {
    fn callable(self) -> Option<Arc<dyn Handler>> {
        match self {
            Export::Function(f) => Some(f),
            Export::Value(_) => None,
        }
    }
}

/// Symbol table of a loaded handler module.
pub trait Module: Send + Sync {
    /// Looks up a (possibly nested) exported symbol.
    fn export(&self, path: &[&str]) -> Option<Export>;

    fn default_export(&self) -> Option<Export> {
        None
    }

    /// The module itself, when it evaluates to a function.
    fn callable(&self) -> Option<Arc<dyn Handler>> {
        None
    }
}

/// Turns a module file into a [`Module`].
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// File extensions handled by this loader, without the leading dot.
    fn extensions(&self) -> &[&'static str];

    async fn load(&self, path: &Path) -> Result<Arc<dyn Module>, DriverError>;
}

// -----------------------------------------------------------------------------
// Export extraction chain
// -----------------------------------------------------------------------------

/// One way of locating the handler inside a module. Strategies are tried in
/// order and the first callable wins.
pub trait ExportStrategy: Send + Sync {
    fn extract(&self, module: &dyn Module, export_path: Option<&[&str]>) -> Option<Arc<dyn Handler>>;
}

/// The dotted export path from the reference.
pub struct ExportPath;

/// The module's default export, unless it also exports `handler`.
pub struct DefaultExport;

/// The module itself.
pub struct CallableModule;

/// An exported `handler` when the reference names no export.
pub struct HandlerExport;

pub const HANDLER_EXPORT: &str = "handler";

impl ExportStrategy for ExportPath {
    fn extract(&self, module: &dyn Module, export_path: Option<&[&str]>) -> Option<Arc<dyn Handler>> {
        module.export(export_path?)?.callable()
    }
}

impl ExportStrategy for DefaultExport {
    fn extract(&self, module: &dyn Module, _: Option<&[&str]>) -> Option<Arc<dyn Handler>> {
        if module.export(&[HANDLER_EXPORT]).is_some() {
            return None;
        }
        module.default_export()?.callable()
    }
}

impl ExportStrategy for CallableModule {
    fn extract(&self, module: &dyn Module, _: Option<&[&str]>) -> Option<Arc<dyn Handler>> {
        module.callable()
    }
}

impl ExportStrategy for HandlerExport {
    fn extract(&self, module: &dyn Module, export_path: Option<&[&str]>) -> Option<Arc<dyn Handler>> {
        if export_path.is_some() {
            return None;
        }
        module.export(&[HANDLER_EXPORT])?.callable()
    }
}

pub fn default_strategies() -> Vec<Box<dyn ExportStrategy>> {
    vec![
        Box::new(ExportPath),
        Box::new(DefaultExport),
        Box::new(CallableModule),
        Box::new(HandlerExport),
    ]
}

pub fn extract_handler(
    strategies: &[Box<dyn ExportStrategy>],
    module: &dyn Module,
    export_path: Option<&[&str]>,
) -> Result<Arc<dyn Handler>, DriverError> {
    strategies
        .iter()
        .find_map(|s| s.extract(module, export_path))
        .ok_or(DriverError::InvalidHandlerModule)
}

// -----------------------------------------------------------------------------
// In-process modules
// -----------------------------------------------------------------------------

/// Module assembled in Rust, for handlers compiled into the host binary.
#[derive(Default, Clone)]
pub struct StaticModule {
    exports: HashMap<String, Export>,
    default: Option<Export>,
    callable: Option<Arc<dyn Handler>>,
}

impl StaticModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an export under a dotted path, e.g. `resolvers.hero`.
    pub fn with_export(mut self, path: &str, export: Export) -> Self {
        self.exports.insert(path.to_string(), export);
        self
    }

    pub fn with_function(self, path: &str, handler: Arc<dyn Handler>) -> Self {
        self.with_export(path, Export::Function(handler))
    }

    pub fn with_default(mut self, handler: Arc<dyn Handler>) -> Self {
        self.default = Some(Export::Function(handler));
        self
    }

    pub fn callable(mut self, handler: Arc<dyn Handler>) -> Self {
        self.callable = Some(handler);
        self
    }
}

impl Module for StaticModule {
    fn export(&self, path: &[&str]) -> Option<Export> {
        self.exports.get(&path.join(".")).cloned()
    }

    fn default_export(&self) -> Option<Export> {
        self.default.clone()
    }

    fn callable(&self) -> Option<Arc<dyn Handler>> {
        self.callable.clone()
    }
}
