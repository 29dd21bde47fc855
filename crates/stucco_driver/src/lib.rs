//! Rhai language runtime for the stucco GraphQL engine.
//!
//! The engine runs this crate's server as a subprocess (or talks to it over
//! HTTP) and delegates field resolution, type resolution, scalar coercion and
//! secret injection to handlers referenced by name. A call flows through:
//!
//! * [`value`]: wire `Value` <-> native [`Value`] codec
//! * [`model`]: GraphQL operation/selection/path reconstruction
//! * [`handler`]: handler-reference resolution and module loading
//! * [`pipeline`]: decode -> input -> resolve -> invoke -> normalize -> encode
//! * [`server`]: gRPC host with health, handshake, stdio fan-out and profiling
//! * [`auth`] and [`http`]: authorization and the HTTP transport

pub mod auth;
pub mod config;
pub mod env;
pub mod error;
pub mod handler;
pub mod http;
pub mod model;
pub mod pipeline;
pub mod profiler;
pub mod proto;
pub mod server;
pub mod stdio;
pub mod value;

pub use config::ServerConfig;
pub use error::{DriverError, HandlerError};
pub use handler::{Handler, Output, Resolver};
pub use server::{PluginServer, ServerHandle, ServerState};
pub use stdio::{Sink, StdioMux};
pub use value::Value;
