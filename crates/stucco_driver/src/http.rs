//! HTTP transport for serverless hosting.
//!
//! Every request is a `POST` whose `content-type` names the request message,
//! `application/x-protobuf;message=FieldResolveRequest`. The body is the
//! encoded message and the response carries the encoded response message.
//! TLS is expected to be terminated in front of this transport; client
//! certificates arrive in the `x-stucco-client-cert` header.

use std::{future::Future, sync::Arc};

use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::{
    auth::{self, AuthRequest, Authorizer},
    config::ServerConfig,
    error::DriverError,
    pipeline::{OperationKind, Pipeline},
};

pub const FORBIDDEN: &str = "FORBIDDEN";

struct HttpState {
    pipeline: Pipeline,
    authorizer: Option<Arc<dyn Authorizer>>,
}

/// Router answering on every path.
pub fn router(pipeline: Pipeline, authorizer: Option<Arc<dyn Authorizer>>, body_limit: usize) -> Router {
    Router::new()
        .fallback(handle)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(Arc::new(HttpState { pipeline, authorizer }))
}

async fn handle(State(state): State<Arc<HttpState>>, method: Method, headers: HeaderMap, body: Bytes) -> Response {
    if method != Method::POST {
        return (StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response();
    }
    if let Some(authorizer) = &state.authorizer {
        if !authorizer.authorize(&AuthRequest::from_headers(&headers)).await {
            return (StatusCode::FORBIDDEN, FORBIDDEN).into_response();
        }
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let Some(kind) = OperationKind::from_content_type(content_type) else {
        debug!(content_type, "unsupported content type");
        let message = DriverError::InvalidContentType(content_type.to_string()).to_string();
        return (StatusCode::BAD_REQUEST, message).into_response();
    };

    let encoded = state.pipeline.dispatch(kind, content_type, &body).await;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, kind.response_content_type())],
        encoded,
    )
        .into_response()
}

/// Serves the HTTP transport on the configured address until `shutdown`
/// resolves.
pub async fn serve(
    config: &ServerConfig,
    pipeline: Pipeline,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DriverError> {
    let authorizer = auth::from_config(&config.auth)?;
    let app = router(pipeline, authorizer, config.max_message_size);
    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!(local_addr = %listener.local_addr()?, "http transport serving");
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    Ok(())
}
