use std::collections::HashMap;

use futures::{
    StreamExt,
    future,
    stream::{self, BoxStream},
};
use tracing::{debug, warn};

use super::{Operation, OperationKind, Pipeline, function_name, normalize};
use crate::{
    error::{DriverError, error_message},
    handler::Output,
    model::{build_operation, variable_table},
    proto::{self, SubscriptionConnectRequest, SubscriptionConnectResponse, SubscriptionListenMessage, SubscriptionListenRequest},
    value::{Value, marshal, unmarshal_map, unmarshal_opt},
};

fn subscription_input(
    query: &str,
    variable_values: &HashMap<String, proto::Value>,
    operation_name: &str,
    protocol: Option<&proto::Value>,
) -> Vec<(&'static str, Option<Value>)> {
    vec![
        ("query", Some(Value::from(query))),
        ("variableValues", Some(Value::Object(unmarshal_map(variable_values, None)))),
        ("operationName", (!operation_name.is_empty()).then(|| Value::from(operation_name))),
        ("protocol", unmarshal_opt(protocol, None)),
    ]
}

pub struct SubscriptionConnect;

impl Operation for SubscriptionConnect {
    const KIND: OperationKind = OperationKind::SubscriptionConnect;

    type Request = SubscriptionConnectRequest;
    type Response = SubscriptionConnectResponse;

    fn function(req: &Self::Request) -> &str {
        function_name(&req.function)
    }

    fn input(req: &Self::Request) -> Result<Value, DriverError> {
        Ok(Value::object(subscription_input(
            &req.query,
            &req.variable_values,
            &req.operation_name,
            req.protocol.as_ref(),
        )))
    }

    fn respond(output: Value) -> Result<Self::Response, DriverError> {
        let normalized = normalize(output, "response");
        Ok(SubscriptionConnectResponse {
            response: normalized.wire_value(),
            error: normalized.error_proto(),
        })
    }

    fn error_response(err: proto::Error) -> Self::Response {
        SubscriptionConnectResponse {
            response: None,
            error: Some(err),
        }
    }
}

fn listen_input(req: &SubscriptionListenRequest) -> Result<Value, DriverError> {
    let vars = variable_table(req.operation.as_ref(), &req.variable_values);
    let operation = req
        .operation
        .as_ref()
        .map(|op| build_operation(op, &vars))
        .transpose()?;
    let mut entries = subscription_input(
        &req.query,
        &req.variable_values,
        &req.operation_name,
        req.protocol.as_ref(),
    );
    entries.push(("operation", operation.as_ref().map(Value::from)));
    Ok(Value::object(entries))
}

fn error_message_frame(message: String) -> SubscriptionListenMessage {
    SubscriptionListenMessage {
        next: false,
        payload: None,
        error: Some(proto::Error::new(message)),
    }
}

impl Pipeline {
    /// Runs a `SubscriptionListen` handler. Every item it yields becomes a
    /// `next` message; an error is sent once and ends the stream.
    pub async fn listen(&self, req: SubscriptionListenRequest) -> BoxStream<'static, SubscriptionListenMessage> {
        let function = function_name(&req.function).to_string();
        debug!(operation = "SubscriptionListen", %function, "driver call");
        match self.start_listen(req).await {
            Ok(messages) => messages,
            Err(err) => {
                warn!(operation = "SubscriptionListen", %function, error = %err, "driver call failed");
                stream::once(future::ready(error_message_frame(error_message(&err)))).boxed()
            }
        }
    }

    async fn start_listen(
        &self,
        req: SubscriptionListenRequest,
    ) -> Result<BoxStream<'static, SubscriptionListenMessage>, DriverError> {
        let input = listen_input(&req)?;
        let handler = self.resolver().resolve(function_name(&req.function)).await?;
        let items = match handler.call(input).await?.settle().await? {
            Output::Stream(items) => items,
            Output::Value(Value::Array(items)) => stream::iter(items.into_iter().map(Ok)).boxed(),
            Output::Value(value) => stream::iter([Ok(value)]).boxed(),
            Output::Callable(_) => stream::empty().boxed(),
        };
        let messages = items.scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            let message = match item {
                Ok(value) => SubscriptionListenMessage {
                    next: true,
                    payload: Some(marshal(&value)),
                    error: None,
                },
                Err(err) => {
                    *failed = true;
                    error_message_frame(error_message(&DriverError::from(err)))
                }
            };
            future::ready(Some(message))
        });
        Ok(messages.boxed())
    }
}
