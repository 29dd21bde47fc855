use std::sync::Arc;

use async_trait::async_trait;

use super::{Operation, OperationKind};
use crate::{
    env::{self, Environment},
    error::{DriverError, HandlerError},
    handler::{Handler, Output},
    proto::{self, SetSecretsRequest, SetSecretsResponse},
    value::Value,
};

/// Writes every secret into the environment. Later calls overwrite.
struct WriteSecrets {
    env: Arc<dyn Environment>,
}

#[async_trait]
impl Handler for WriteSecrets {
    async fn call(&self, input: Value) -> Result<Output, HandlerError> {
        if let Some(secrets) = input.as_object() {
            let secrets: Vec<_> = secrets
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str().unwrap_or_default()))
                .collect();
            // nothing is written unless every entry is valid
            for (key, value) in &secrets {
                env::validate(key, value).map_err(HandlerError::new)?;
            }
            for (key, value) in &secrets {
                self.env.set(key, value).map_err(HandlerError::new)?;
            }
            tracing::debug!(count = secrets.len(), "secrets updated");
        }
        Ok(Output::Value(Value::Null))
    }
}

pub struct SetSecrets;

impl Operation for SetSecrets {
    const KIND: OperationKind = OperationKind::SetSecrets;

    type Request = SetSecretsRequest;
    type Response = SetSecretsResponse;

    fn function(_: &Self::Request) -> &str {
        "SetSecrets"
    }

    fn input(req: &Self::Request) -> Result<Value, DriverError> {
        Ok(Value::Object(
            req.secrets
                .iter()
                .map(|s| (s.key.clone(), Value::from(s.value.as_str())))
                .collect(),
        ))
    }

    fn respond(_: Value) -> Result<Self::Response, DriverError> {
        Ok(SetSecretsResponse::default())
    }

    fn error_response(err: proto::Error) -> Self::Response {
        SetSecretsResponse { error: Some(err) }
    }

    fn fixed_handler(env: &Arc<dyn Environment>) -> Option<Arc<dyn Handler>> {
        Some(Arc::new(WriteSecrets { env: env.clone() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::MapEnv,
        handler::handler_fn,
        pipeline::test_support::pipeline_with_env,
        proto::Secret,
    };

    #[tokio::test]
    async fn secrets_are_written_without_resolution() {
        let env = Arc::new(MapEnv::new());
        let never = handler_fn(|_| async { Err(HandlerError::new("resolved")) });
        let pipeline = pipeline_with_env("unused", never, env.clone());

        let response = pipeline
            .run::<SetSecrets>(SetSecretsRequest {
                secrets: vec![
                    Secret { key: "TOKEN".into(), value: "a".into() },
                    Secret { key: "OTHER".into(), value: "b".into() },
                ],
            })
            .await;
        assert!(response.error.is_none());
        assert_eq!(env.get("TOKEN").as_deref(), Some("a"));

        pipeline
            .run::<SetSecrets>(SetSecretsRequest {
                secrets: vec![Secret { key: "TOKEN".into(), value: "c".into() }],
            })
            .await;
        assert_eq!(env.get("TOKEN").as_deref(), Some("c"));
        assert_eq!(env.get("OTHER").as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn invalid_secret_names_are_response_errors() {
        let env = Arc::new(MapEnv::new());
        let never = handler_fn(|_| async { Err(HandlerError::new("resolved")) });
        let pipeline = pipeline_with_env("unused", never, env.clone());

        let response = pipeline
            .run::<SetSecrets>(SetSecretsRequest {
                secrets: vec![
                    Secret { key: "GOOD".into(), value: "a".into() },
                    Secret { key: "A=B".into(), value: "b".into() },
                ],
            })
            .await;
        assert_eq!(response.error.unwrap().msg, "invalid secret name \"A=B\"");
        assert_eq!(env.get("GOOD"), None);

        let response = pipeline
            .run::<SetSecrets>(SetSecretsRequest {
                secrets: vec![Secret { key: String::new(), value: "x".into() }],
            })
            .await;
        assert_eq!(response.error.unwrap().msg, "secret name is empty");
    }

    #[tokio::test]
    async fn process_environment_rejects_without_panicking() {
        let never = handler_fn(|_| async { Err(HandlerError::new("resolved")) });
        let pipeline = pipeline_with_env("unused", never, Arc::new(crate::env::ProcessEnv));

        let response = tokio::spawn(async move {
            pipeline
                .run::<SetSecrets>(SetSecretsRequest {
                    secrets: vec![Secret { key: "A=B".into(), value: "v".into() }],
                })
                .await
        })
        .await
        .unwrap();
        assert!(response.error.is_some());
    }
}
