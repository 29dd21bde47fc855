//! Handler contract, module model and handler-reference resolution.
//!
//! A handler reference such as `handlers/hero@resolvers.hero` is resolved by
//! the [`Resolver`] into an [`Arc<dyn Handler>`]: module sources locate and
//! load the module, then an ordered chain of export strategies picks the
//! function. Results are cached for the life of the process.

use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use futures::{future::BoxFuture, stream::BoxStream};

use crate::{error::HandlerError, value::Value};

pub mod module;
pub mod reference;
pub mod resolver;
pub mod script;

pub use module::{Export, ExportStrategy, Module, ModuleLoader, StaticModule};
pub use reference::HandlerReference;
pub use resolver::{HandlerCache, LocalFiles, ModuleRoots, ModuleSource, Resolver, StaticModules};
pub use script::RhaiLoader;

/// A user function invocable by the driver.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, input: Value) -> Result<Output, HandlerError>;
}

/// Zero-argument callable returned in place of a value.
pub type Thunk = Box<dyn FnOnce() -> BoxFuture<'static, Result<Output, HandlerError>> + Send>;

/// Whatever a handler produced.
pub enum Output {
    Value(Value),
    /// Invoked by the pipeline to obtain the final value.
    Callable(Thunk),
    /// Emitted item by item by `SubscriptionListen`.
    Stream(BoxStream<'static, Result<Value, HandlerError>>),
}

impl Output {
    /// Invokes callables until a value or a stream remains.
    pub async fn settle(self) -> Result<Output, HandlerError> {
        let mut out = self;
        loop {
            match out {
                Output::Callable(thunk) => out = thunk().await?,
                other => return Ok(other),
            }
        }
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Output::Callable(_) => f.write_str("Callable"),
            Output::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Value> for Output {
    fn from(v: Value) -> Self {
        Output::Value(v)
    }
}

/// Adapts an async closure into a [`Handler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Output, HandlerError>> + Send,
{
    async fn call(&self, input: Value) -> Result<Output, HandlerError> {
        (self.0)(input).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Output, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
