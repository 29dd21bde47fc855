use thiserror::Error;

/// Errors raised by the driver itself. The `Display` strings are what ends up
/// in a response's `error.msg`, so they are part of the wire contract.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("\"{0}\" is not a valid content-type")]
    InvalidContentType(String),

    #[error("info is required")]
    InfoRequired,

    #[error("function name is empty")]
    EmptyFunctionName,

    #[error("invalid handler module")]
    InvalidHandlerModule,

    #[error("type cannot be empty")]
    EmptyType,

    #[error("selection must be either a field or a fragment")]
    InvalidSelection,

    #[error("cannot find module '{0}'")]
    ModuleNotFound(String),

    #[error("failed to load module {path}: {reason}")]
    ModuleLoad { path: String, reason: String },

    #[error("{0}")]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Decode(#[from] prost::DecodeError),

    #[error("tls requires root ca, private key and certificate chain; missing {0}")]
    PartialTls(String),

    #[error("api key cannot be empty")]
    EmptyApiKey,

    #[error("tls error: {0}")]
    Tls(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),
}

/// Failure reported by user handler code. Only the message crosses the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Message copied into a response error field; never empty.
pub(crate) fn error_message(err: &DriverError) -> String {
    let msg = err.to_string();
    if msg.is_empty() { "unknown error".to_string() } else { msg }
}
