//! Rhai handler modules.
//!
//! A `.rhai` file is compiled and its body evaluated once when loaded. Public
//! script functions and top-level variables become the module's exports, `main`
//! is the default export, and a body that evaluates to a function pointer makes
//! the module itself callable. Scripts run on the blocking pool.

use std::{
    collections::{HashMap, HashSet},
    io::Write,
    path::Path,
    sync::Arc,
};

use async_trait::async_trait;
use futures::{FutureExt, future::BoxFuture};
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, FnAccess, FnPtr, Map, Scope, AST};

use super::{
    Handler, Output,
    module::{Export, Module, ModuleLoader},
};
use crate::{
    env::Environment,
    error::{DriverError, HandlerError},
    stdio::StdioMux,
    value::Value,
};

const EXTENSIONS: &[&str] = &["rhai"];
const DEFAULT_EXPORT: &str = "main";

/// Loads `.rhai` handler modules.
pub struct RhaiLoader {
    engine: Arc<Engine>,
}

impl RhaiLoader {
    /// `print` goes to the stdout channel, `debug` to stderr, and scripts read
    /// the environment through `env(key)`.
    pub fn new(env: Arc<dyn Environment>, stdio: &StdioMux) -> Self {
        let mut engine = Engine::new();
        let stdout = stdio.stdout();
        let stderr = stdio.stderr();
        engine
            .on_print(move |text| {
                let _ = stdout.clone().write_all(format!("{text}\n").as_bytes());
            })
            .on_debug(move |text, source, pos| {
                let line = match source {
                    Some(source) => format!("{source} @ {pos:?} | {text}\n"),
                    None => format!("{pos:?} | {text}\n"),
                };
                let _ = stderr.clone().write_all(line.as_bytes());
            })
            .register_fn("env", move |key: &str| -> Dynamic {
                env.get(key).map(Dynamic::from).unwrap_or(Dynamic::UNIT)
            });
        Self {
            engine: Arc::new(engine),
        }
    }
}

#[async_trait]
impl ModuleLoader for RhaiLoader {
    fn extensions(&self) -> &[&'static str] {
        EXTENSIONS
    }

    async fn load(&self, path: &Path) -> Result<Arc<dyn Module>, DriverError> {
        let load_err = |reason: String| DriverError::ModuleLoad {
            path: path.display().to_string(),
            reason,
        };
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| load_err(e.to_string()))?;
        let engine = self.engine.clone();
        let module = tokio::task::spawn_blocking(move || RhaiModule::evaluate(engine, &source))
            .await
            .map_err(|e| load_err(e.to_string()))?
            .map_err(load_err)?;
        Ok(Arc::new(module))
    }
}

// -----------------------------------------------------------------------------
// Module
// -----------------------------------------------------------------------------

struct Script {
    engine: Arc<Engine>,
    ast: AST,
    /// Parameter counts of every script function, by name.
    arities: HashMap<String, Vec<usize>>,
}

pub struct RhaiModule {
    script: Arc<Script>,
    functions: HashSet<String>,
    globals: HashMap<String, Dynamic>,
    body: Dynamic,
}

impl RhaiModule {
    fn evaluate(engine: Arc<Engine>, source: &str) -> Result<Self, String> {
        let ast = engine.compile(source).map_err(|e| e.to_string())?;
        let mut scope = Scope::new();
        let body = engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map_err(|e| e.to_string())?;

        let mut arities: HashMap<String, Vec<usize>> = HashMap::new();
        let mut functions = HashSet::new();
        for f in ast.iter_functions() {
            arities.entry(f.name.to_string()).or_default().push(f.params.len());
            if f.access != FnAccess::Private {
                functions.insert(f.name.to_string());
            }
        }
        let globals = scope
            .iter()
            .map(|(name, _, value)| (name.to_string(), value))
            .collect();

        Ok(Self {
            script: Arc::new(Script { engine, ast, arities }),
            functions,
            globals,
            body: body.flatten(),
        })
    }

    fn function(&self, target: Target) -> Arc<dyn Handler> {
        Arc::new(RhaiFunction {
            script: self.script.clone(),
            target,
        })
    }

    fn export_dynamic(&self, value: Dynamic) -> Export {
        let value = value.flatten();
        if value.is::<FnPtr>() {
            Export::Function(self.function(Target::Ptr(value.cast::<FnPtr>())))
        } else {
            Export::Value(to_value(value))
        }
    }
}

impl Module for RhaiModule {
    fn export(&self, path: &[&str]) -> Option<Export> {
        let (first, rest) = path.split_first()?;
        if rest.is_empty() && self.functions.contains(*first) {
            return Some(Export::Function(self.function(Target::Named(first.to_string()))));
        }
        let mut current = self.globals.get(*first)?.clone();
        for segment in rest {
            let map = current.flatten().try_cast::<Map>()?;
            current = map.get(*segment)?.clone();
        }
        Some(self.export_dynamic(current))
    }

    fn default_export(&self) -> Option<Export> {
        self.export(&[DEFAULT_EXPORT])
    }

    fn callable(&self) -> Option<Arc<dyn Handler>> {
        self.body
            .clone()
            .try_cast::<FnPtr>()
            .map(|ptr| self.function(Target::Ptr(ptr)))
    }
}

// -----------------------------------------------------------------------------
// Invocation
// -----------------------------------------------------------------------------

#[derive(Clone)]
enum Target {
    Named(String),
    Ptr(FnPtr),
}

impl Script {
    fn accepts_input(&self, name: &str, curried: usize) -> bool {
        match self.arities.get(name) {
            Some(arities) if arities.contains(&(curried + 1)) => true,
            Some(arities) => !arities.contains(&curried),
            None => true,
        }
    }

    fn call(&self, target: &Target, input: Option<Dynamic>) -> Result<Dynamic, Box<EvalAltResult>> {
        let (name, curried) = match target {
            Target::Named(name) => (name.as_str(), 0),
            Target::Ptr(ptr) => (ptr.fn_name(), ptr.curry().len()),
        };
        let args: Vec<Dynamic> = match input {
            Some(input) if self.accepts_input(name, curried) => vec![input],
            _ => Vec::new(),
        };
        match target {
            Target::Ptr(ptr) => ptr.call(&self.engine, &self.ast, args),
            Target::Named(_) => self.engine.call_fn_with_options(
                CallFnOptions::new().eval_ast(false),
                &mut Scope::new(),
                &self.ast,
                name,
                args,
            ),
        }
    }
}

struct RhaiFunction {
    script: Arc<Script>,
    target: Target,
}

#[async_trait]
impl Handler for RhaiFunction {
    async fn call(&self, input: Value) -> Result<Output, HandlerError> {
        run(self.script.clone(), self.target.clone(), Some(input)).await
    }
}

fn run(script: Arc<Script>, target: Target, input: Option<Value>) -> BoxFuture<'static, Result<Output, HandlerError>> {
    async move {
        let blocking = script.clone();
        let result = tokio::task::spawn_blocking(move || blocking.call(&target, input.map(to_dynamic)))
            .await
            .map_err(|e| HandlerError::new(e.to_string()))?;
        let value = result.map_err(|e| script_error(&e))?.flatten();
        if value.is::<FnPtr>() {
            let ptr = value.cast::<FnPtr>();
            return Ok(Output::Callable(Box::new(move || run(script, Target::Ptr(ptr), None))));
        }
        Ok(Output::Value(to_value(value)))
    }
    .boxed()
}

fn script_error(err: &EvalAltResult) -> HandlerError {
    match err.unwrap_inner() {
        EvalAltResult::ErrorRuntime(thrown, _) => {
            let thrown = thrown.clone().flatten();
            if let Some(map) = thrown.clone().try_cast::<Map>() {
                if let Some(message) = map.get("message") {
                    return HandlerError::new(message.to_string());
                }
            }
            HandlerError::new(thrown.to_string())
        }
        other => HandlerError::new(other.to_string()),
    }
}

// -----------------------------------------------------------------------------
// Dynamic <-> Value
// -----------------------------------------------------------------------------

pub fn to_value(d: Dynamic) -> Value {
    let d = d.flatten();
    if d.is_unit() {
        return Value::Null;
    }
    if let Ok(b) = d.as_bool() {
        return Value::Bool(b);
    }
    if let Ok(i) = d.as_int() {
        return Value::Int(i);
    }
    if let Ok(f) = d.as_float() {
        return Value::Float(f);
    }
    if let Ok(c) = d.as_char() {
        return Value::String(c.to_string());
    }
    if d.is_string() {
        return d.into_string().map(Value::String).unwrap_or_default();
    }
    if d.is_blob() {
        return d.into_blob().map(Value::Bytes).unwrap_or_default();
    }
    if d.is_array() {
        return d
            .into_array()
            .map(|items| Value::Array(items.into_iter().map(to_value).collect()))
            .unwrap_or_default();
    }
    if let Some(map) = d.clone().try_cast::<Map>() {
        return Value::Object(map.into_iter().map(|(k, v)| (k.to_string(), to_value(v))).collect());
    }
    // timestamps, function pointers and custom types have no wire form
    Value::Null
}

pub fn to_dynamic(v: Value) -> Dynamic {
    match v {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from_bool(b),
        Value::Int(i) => Dynamic::from_int(i),
        Value::UInt(u) => match i64::try_from(u) {
            Ok(i) => Dynamic::from_int(i),
            Err(_) => Dynamic::from_float(u as f64),
        },
        Value::Float(f) => Dynamic::from_float(f),
        Value::String(s) => Dynamic::from(s),
        Value::Bytes(bytes) => Dynamic::from_blob(bytes),
        Value::Array(items) => Dynamic::from_array(items.into_iter().map(to_dynamic).collect()),
        Value::Object(map) => Dynamic::from_map(
            map.into_iter()
                .map(|(k, v)| (k.into(), to_dynamic(v)))
                .collect::<Map>(),
        ),
    }
}
