//! Generic per-operation request pipeline.
//!
//! Every driver method runs the same steps: check the message type, decode,
//! build the handler input, resolve the handler, invoke it, normalize what it
//! returned and encode the response. Any failure along the way becomes an
//! error-only response; nothing is surfaced as a transport error.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use prost::Message;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use tracing::{debug, warn};

use crate::{
    env::Environment,
    error::{DriverError, error_message},
    handler::{Handler, Output, Resolver, RhaiLoader},
    proto,
    stdio::StdioMux,
    value::{Value, marshal_opt},
};

mod authorize;
mod field;
mod resolve_type;
mod scalar;
mod secrets;
mod subscription;

pub use authorize::Authorize;
pub use field::FieldResolve;
pub use resolve_type::{InterfaceResolveType, UnionResolveType};
pub use scalar::{ScalarParse, ScalarSerialize};
pub use secrets::SetSecrets;
pub use subscription::SubscriptionConnect;

pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// Unary operations, named after their request/response messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter)]
pub enum OperationKind {
    FieldResolve,
    InterfaceResolveType,
    UnionResolveType,
    ScalarParse,
    ScalarSerialize,
    SetSecrets,
    SubscriptionConnect,
    Authorize,
}

impl OperationKind {
    pub fn request_message(&self) -> String {
        format!("{self}Request")
    }

    pub fn response_message(&self) -> String {
        format!("{self}Response")
    }

    pub fn request_content_type(&self) -> String {
        format!("{PROTOBUF_CONTENT_TYPE};message={}", self.request_message())
    }

    pub fn response_content_type(&self) -> String {
        format!("{PROTOBUF_CONTENT_TYPE};message={}", self.response_message())
    }

    /// Parses `application/x-protobuf;message=<Kind>Request`.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mut parts = content_type.split(';').map(str::trim);
        if !parts.next()?.eq_ignore_ascii_case(PROTOBUF_CONTENT_TYPE) {
            return None;
        }
        parts
            .filter_map(|param| param.split_once('='))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("message"))
            .and_then(|(_, message)| message.trim().trim_matches('"').strip_suffix("Request"))
            .and_then(|kind| kind.parse().ok())
    }
}

/// One driver operation: its wire types and how native values map onto them.
pub trait Operation: Send + Sync + 'static {
    const KIND: OperationKind;

    type Request: Message + Default + Send + 'static;
    type Response: Message + Default + Send + 'static;

    /// Handler reference carried by the request.
    fn function(req: &Self::Request) -> &str;

    fn input(req: &Self::Request) -> Result<Value, DriverError>;

    /// Builds the response from the settled handler result.
    fn respond(output: Value) -> Result<Self::Response, DriverError>;

    fn error_response(err: proto::Error) -> Self::Response;

    /// Handler that bypasses resolution.
    fn fixed_handler(_env: &Arc<dyn Environment>) -> Option<Arc<dyn Handler>> {
        None
    }
}

pub(crate) fn function_name(function: &Option<proto::Function>) -> &str {
    function.as_ref().map(|f| f.name.as_str()).unwrap_or_default()
}

/// Runs operations against a resolver.
#[derive(Clone)]
pub struct Pipeline {
    resolver: Arc<Resolver>,
    env: Arc<dyn Environment>,
}

impl Pipeline {
    pub fn new(resolver: Arc<Resolver>, env: Arc<dyn Environment>) -> Self {
        Self { resolver, env }
    }

    /// Pipeline resolving `.rhai` handlers under `root`.
    pub fn rhai(root: impl Into<PathBuf>, env: Arc<dyn Environment>, stdio: &StdioMux) -> Self {
        let loader = Arc::new(RhaiLoader::new(env.clone(), stdio));
        Self::new(Arc::new(Resolver::new(root, loader)), env)
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Runs an already decoded request.
    pub async fn run<O: Operation>(&self, req: O::Request) -> O::Response {
        let function = O::function(&req).to_string();
        debug!(operation = %O::KIND, %function, "driver call");
        match self.try_run::<O>(req).await {
            Ok(response) => response,
            Err(err) => {
                warn!(operation = %O::KIND, %function, error = %err, "driver call failed");
                O::error_response(proto::Error::new(error_message(&err)))
            }
        }
    }

    /// Checks the message type, decodes `body`, runs it and encodes the result.
    pub async fn run_encoded<O: Operation>(&self, content_type: &str, body: &[u8]) -> Vec<u8> {
        let response = match decode::<O>(content_type, body) {
            Ok(req) => self.run::<O>(req).await,
            Err(err) => {
                warn!(operation = %O::KIND, error = %err, "rejected driver request");
                O::error_response(proto::Error::new(error_message(&err)))
            }
        };
        response.encode_to_vec()
    }

    /// Dispatches an encoded request by kind.
    pub async fn dispatch(&self, kind: OperationKind, content_type: &str, body: &[u8]) -> Vec<u8> {
        match kind {
            OperationKind::FieldResolve => self.run_encoded::<FieldResolve>(content_type, body).await,
            OperationKind::InterfaceResolveType => {
                self.run_encoded::<InterfaceResolveType>(content_type, body).await
            }
            OperationKind::UnionResolveType => self.run_encoded::<UnionResolveType>(content_type, body).await,
            OperationKind::ScalarParse => self.run_encoded::<ScalarParse>(content_type, body).await,
            OperationKind::ScalarSerialize => self.run_encoded::<ScalarSerialize>(content_type, body).await,
            OperationKind::SetSecrets => self.run_encoded::<SetSecrets>(content_type, body).await,
            OperationKind::SubscriptionConnect => {
                self.run_encoded::<SubscriptionConnect>(content_type, body).await
            }
            OperationKind::Authorize => self.run_encoded::<Authorize>(content_type, body).await,
        }
    }

    async fn try_run<O: Operation>(&self, req: O::Request) -> Result<O::Response, DriverError> {
        let input = O::input(&req)?;
        let handler = self.handler::<O>(&req).await?;
        let output = match handler.call(input).await?.settle().await? {
            Output::Value(value) => value,
            // streams are only consumed by SubscriptionListen
            _ => Value::Null,
        };
        O::respond(output)
    }

    pub(crate) async fn handler<O: Operation>(&self, req: &O::Request) -> Result<Arc<dyn Handler>, DriverError> {
        match O::fixed_handler(&self.env) {
            Some(handler) => Ok(handler),
            None => self.resolver.resolve(O::function(req)).await,
        }
    }
}

fn decode<O: Operation>(content_type: &str, body: &[u8]) -> Result<O::Request, DriverError> {
    if OperationKind::from_content_type(content_type) != Some(O::KIND) {
        return Err(DriverError::InvalidContentType(content_type.to_string()));
    }
    Ok(O::Request::decode(body)?)
}

// -----------------------------------------------------------------------------
// output normalization
// -----------------------------------------------------------------------------

/// A handler result split into its payload and error.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Normalized {
    pub value: Option<Value>,
    pub error: Option<String>,
}

impl Normalized {
    pub fn error_proto(&self) -> Option<proto::Error> {
        self.error.as_deref().map(proto::Error::new)
    }

    /// Wire payload; absent values are `nil` unless the result is error-only.
    pub fn wire_value(&self) -> Option<proto::Value> {
        if self.error.is_some() && self.value.is_none() {
            return None;
        }
        Some(marshal_opt(self.value.as_ref()))
    }
}

/// Accepts a bare value or a record carrying `value_key` and/or `error`.
pub(crate) fn normalize(output: Value, value_key: &str) -> Normalized {
    match output {
        Value::Object(mut map) if is_record(&map, value_key) => Normalized {
            value: map.remove(value_key),
            error: map.remove("error").and_then(error_text),
        },
        other => Normalized {
            value: Some(other),
            error: None,
        },
    }
}

fn is_record(map: &BTreeMap<String, Value>, value_key: &str) -> bool {
    map.contains_key(value_key) || map.contains_key("error")
}

/// Error payloads may be a message or an object with a `message` field.
fn error_text(error: Value) -> Option<String> {
    let text = match error {
        Value::Null => return None,
        Value::String(s) => s,
        Value::Object(mut map) => match map.remove("message") {
            Some(Value::String(s)) => s,
            Some(other) => serde_json::Value::from(other).to_string(),
            None => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, serde_json::Value::from(v))).collect(),
            )
            .to_string(),
        },
        other => serde_json::Value::from(other).to_string(),
    };
    Some(if text.is_empty() { "unknown error".to_string() } else { text })
}


#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn content_types_round_trip_for_every_kind() {
        for kind in OperationKind::iter() {
            assert_eq!(OperationKind::from_content_type(&kind.request_content_type()), Some(kind));
        }
        assert_eq!(
            OperationKind::FieldResolve.response_content_type(),
            "application/x-protobuf;message=FieldResolveResponse"
        );
    }

    #[test]
    fn content_type_parsing_is_lenient_on_whitespace_and_case() {
        assert_eq!(
            OperationKind::from_content_type("Application/X-Protobuf; message=\"ScalarParseRequest\""),
            Some(OperationKind::ScalarParse)
        );
        assert_eq!(OperationKind::from_content_type("application/json"), None);
        assert_eq!(OperationKind::from_content_type("application/x-protobuf;message=Nope"), None);
        assert_eq!(OperationKind::from_content_type("application/x-protobuf"), None);
    }

    #[test]
    fn bare_values_are_responses() {
        assert_eq!(
            normalize(Value::from("data"), "response"),
            Normalized { value: Some(Value::from("data")), error: None }
        );
    }

    #[test]
    fn records_split_value_and_error() {
        let record = Value::object([
            ("response", Some(Value::Int(1))),
            ("error", Some(Value::object([("message", Some(Value::from("boom")))]))),
        ]);
        assert_eq!(
            normalize(record, "response"),
            Normalized { value: Some(Value::Int(1)), error: Some("boom".into()) }
        );

        let error_only = Value::object([("error", Some(Value::from("boom")))]);
        assert_eq!(normalize(error_only, "type"), Normalized { value: None, error: Some("boom".into()) });
    }

    #[test]
    fn objects_without_record_keys_are_plain_values() {
        let hero = Value::object([("name", Some(Value::from("Batman")))]);
        assert_eq!(normalize(hero.clone(), "response").value, Some(hero));
    }

    #[test]
    fn null_error_is_no_error() {
        let record = Value::object([("response", Some(Value::Int(1))), ("error", Some(Value::Null))]);
        assert_eq!(normalize(record, "response").error, None);
    }
}
