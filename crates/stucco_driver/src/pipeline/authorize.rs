use super::{Operation, OperationKind, function_name, normalize};
use crate::{
    error::DriverError,
    proto::{self, AuthorizeRequest, AuthorizeResponse},
    value::{Value, unmarshal_map, unmarshal_opt},
};

/// Lets handlers veto an operation before the engine executes it. The handler
/// returns a bool, or `{response: bool, error}`.
pub struct Authorize;

impl Operation for Authorize {
    const KIND: OperationKind = OperationKind::Authorize;

    type Request = AuthorizeRequest;
    type Response = AuthorizeResponse;

    fn function(req: &Self::Request) -> &str {
        function_name(&req.function)
    }

    fn input(req: &Self::Request) -> Result<Value, DriverError> {
        Ok(Value::object([
            ("query", Some(Value::from(req.query.as_str()))),
            ("operationName", (!req.operation_name.is_empty()).then(|| Value::from(req.operation_name.as_str()))),
            ("variableValues", Some(Value::Object(unmarshal_map(&req.variable_values, None)))),
            ("protocol", unmarshal_opt(req.protocol.as_ref(), None)),
        ]))
    }

    fn respond(output: Value) -> Result<Self::Response, DriverError> {
        let normalized = normalize(output, "response");
        Ok(AuthorizeResponse {
            response: matches!(normalized.value, Some(Value::Bool(true))),
            error: normalized.error_proto(),
        })
    }

    fn error_response(err: proto::Error) -> Self::Response {
        AuthorizeResponse {
            response: false,
            error: Some(err),
        }
    }
}
