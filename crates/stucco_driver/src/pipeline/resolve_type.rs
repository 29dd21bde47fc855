use super::{Operation, OperationKind, function_name, normalize};
use crate::{
    error::DriverError,
    model::{InfoMessage, ResolveInfo},
    proto::{self, InterfaceResolveTypeRequest, InterfaceResolveTypeResponse, UnionResolveTypeRequest, UnionResolveTypeResponse},
    value::{Value, unmarshal_opt},
};

fn type_input<I: InfoMessage>(value: Option<&proto::Value>, info: Option<&I>) -> Result<Value, DriverError> {
    let info = info.ok_or(DriverError::InfoRequired)?;
    let (info, vars) = ResolveInfo::build(info)?;
    Ok(Value::object([
        ("value", unmarshal_opt(value, Some(&vars))),
        ("info", Some(Value::from(&info))),
    ]))
}

/// `(type, error)` from a handler result; a type name is required unless an
/// error accompanies it.
fn resolved_type(output: Value) -> Result<(Option<proto::TypeRef>, Option<proto::Error>), DriverError> {
    let normalized = normalize(output, "type");
    let name = match &normalized.value {
        Some(Value::String(name)) if !name.is_empty() => Some(name.clone()),
        _ => None,
    };
    if name.is_none() && normalized.error.is_none() {
        return Err(DriverError::EmptyType);
    }
    Ok((name.map(proto::TypeRef::named), normalized.error_proto()))
}

pub struct InterfaceResolveType;

impl Operation for InterfaceResolveType {
    const KIND: OperationKind = OperationKind::InterfaceResolveType;

    type Request = InterfaceResolveTypeRequest;
    type Response = InterfaceResolveTypeResponse;

    fn function(req: &Self::Request) -> &str {
        function_name(&req.function)
    }

    fn input(req: &Self::Request) -> Result<Value, DriverError> {
        type_input(req.value.as_ref(), req.info.as_ref())
    }

    fn respond(output: Value) -> Result<Self::Response, DriverError> {
        let (r#type, error) = resolved_type(output)?;
        Ok(InterfaceResolveTypeResponse { r#type, error })
    }

    fn error_response(err: proto::Error) -> Self::Response {
        InterfaceResolveTypeResponse {
            r#type: None,
            error: Some(err),
        }
    }
}

pub struct UnionResolveType;

impl Operation for UnionResolveType {
    const KIND: OperationKind = OperationKind::UnionResolveType;

    type Request = UnionResolveTypeRequest;
    type Response = UnionResolveTypeResponse;

    fn function(req: &Self::Request) -> &str {
        function_name(&req.function)
    }

    fn input(req: &Self::Request) -> Result<Value, DriverError> {
        type_input(req.value.as_ref(), req.info.as_ref())
    }

    fn respond(output: Value) -> Result<Self::Response, DriverError> {
        let (r#type, error) = resolved_type(output)?;
        Ok(UnionResolveTypeResponse { r#type, error })
    }

    fn error_response(err: proto::Error) -> Self::Response {
        UnionResolveTypeResponse {
            r#type: None,
            error: Some(err),
        }
    }
}
