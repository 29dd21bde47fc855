use super::{Operation, OperationKind, function_name, normalize};
use crate::{
    error::DriverError,
    model::ResolveInfo,
    proto::{self, FieldResolveRequest, FieldResolveResponse},
    value::{Value, unmarshal_map, unmarshal_opt},
};

pub struct FieldResolve;

impl Operation for FieldResolve {
    const KIND: OperationKind = OperationKind::FieldResolve;

    type Request = FieldResolveRequest;
    type Response = FieldResolveResponse;

    fn function(req: &Self::Request) -> &str {
        function_name(&req.function)
    }

    fn input(req: &Self::Request) -> Result<Value, DriverError> {
        let info = req.info.as_ref().ok_or(DriverError::InfoRequired)?;
        let (info, vars) = ResolveInfo::build(info)?;
        let vars = Some(&vars);
        Ok(Value::object([
            ("source", unmarshal_opt(req.source.as_ref(), vars)),
            ("arguments", Some(Value::Object(unmarshal_map(&req.arguments, vars)))),
            ("info", Some(Value::from(&info))),
            ("protocol", unmarshal_opt(req.protocol.as_ref(), vars)),
            ("subscriptionPayload", unmarshal_opt(req.subscription_payload.as_ref(), vars)),
        ]))
    }

    fn respond(output: Value) -> Result<Self::Response, DriverError> {
        let normalized = normalize(output, "response");
        Ok(FieldResolveResponse {
            response: normalized.wire_value(),
            error: normalized.error_proto(),
        })
    }

    fn error_response(err: proto::Error) -> Self::Response {
        FieldResolveResponse {
            response: None,
            error: Some(err),
        }
    }
}
