use super::{Operation, OperationKind, function_name, normalize};
use crate::{
    error::DriverError,
    proto::{self, ScalarParseRequest, ScalarParseResponse, ScalarSerializeRequest, ScalarSerializeResponse},
    value::{Value, unmarshal_opt},
};

fn scalar_input(value: Option<&proto::Value>) -> Value {
    Value::object([("value", unmarshal_opt(value, None))])
}

fn scalar_output(output: Value) -> (Option<proto::Value>, Option<proto::Error>) {
    let normalized = normalize(output, "response");
    (normalized.wire_value(), normalized.error_proto())
}

pub struct ScalarParse;

impl Operation for ScalarParse {
    const KIND: OperationKind = OperationKind::ScalarParse;

    type Request = ScalarParseRequest;
    type Response = ScalarParseResponse;

    fn function(req: &Self::Request) -> &str {
        function_name(&req.function)
    }

    fn input(req: &Self::Request) -> Result<Value, DriverError> {
        Ok(scalar_input(req.value.as_ref()))
    }

    fn respond(output: Value) -> Result<Self::Response, DriverError> {
        let (value, error) = scalar_output(output);
        Ok(ScalarParseResponse { value, error })
    }

    fn error_response(err: proto::Error) -> Self::Response {
        ScalarParseResponse {
            value: None,
            error: Some(err),
        }
    }
}

pub struct ScalarSerialize;

impl Operation for ScalarSerialize {
    const KIND: OperationKind = OperationKind::ScalarSerialize;

    type Request = ScalarSerializeRequest;
    type Response = ScalarSerializeResponse;

    fn function(req: &Self::Request) -> &str {
        function_name(&req.function)
    }

    fn input(req: &Self::Request) -> Result<Value, DriverError> {
        Ok(scalar_input(req.value.as_ref()))
    }

    fn respond(output: Value) -> Result<Self::Response, DriverError> {
        let (value, error) = scalar_output(output);
        Ok(ScalarSerializeResponse { value, error })
    }

    fn error_response(err: proto::Error) -> Self::Response {
        ScalarSerializeResponse {
            value: None,
            error: Some(err),
        }
    }
}
