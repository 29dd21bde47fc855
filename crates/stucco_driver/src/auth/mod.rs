//! Request authorization shared by the gRPC host and the HTTP transport.
//!
//! Checks are independent and composed with [`AnyOf`]: a request is allowed
//! when any configured check passes. A failed check is a `false`, never an
//! error.

use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderMap;
use rustls::pki_types::CertificateDer;

use crate::{
    config::{AuthConfig, read_pem},
    error::DriverError,
};

pub mod api_key;
pub mod cert;

pub use api_key::ApiKeyAuth;
pub use cert::{CertAuth, ChainVerifier, WebPkiVerifier};

/// What an authorizer may look at.
#[derive(Debug, Clone, Copy)]
pub struct AuthRequest<'a> {
    pub headers: &'a HeaderMap,
    /// Peer chain from the TLS handshake, end entity first. Empty without TLS.
    pub peer_certs: &'a [CertificateDer<'static>],
}

impl<'a> AuthRequest<'a> {
    pub fn from_headers(headers: &'a HeaderMap) -> Self {
        Self {
            headers,
            peer_certs: &[],
        }
    }
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, req: &AuthRequest<'_>) -> bool;
}

/// Passes when any inner authorizer passes.
pub struct AnyOf {
    authorizers: Vec<Arc<dyn Authorizer>>,
}

impl AnyOf {
    pub fn new(authorizers: Vec<Arc<dyn Authorizer>>) -> Self {
        Self { authorizers }
    }
}

#[async_trait]
impl Authorizer for AnyOf {
    async fn authorize(&self, req: &AuthRequest<'_>) -> bool {
        for authorizer in &self.authorizers {
            if authorizer.authorize(req).await {
                return true;
            }
        }
        false
    }
}

/// Builds the authorizer described by `config`; `None` when nothing is
/// configured and requests are open.
pub fn from_config(config: &AuthConfig) -> Result<Option<Arc<dyn Authorizer>>, DriverError> {
    let mut authorizers: Vec<Arc<dyn Authorizer>> = Vec::new();
    if let Some(ca) = &config.ca {
        let verifier = WebPkiVerifier::from_pem(&read_pem(ca)?)?;
        authorizers.push(Arc::new(CertAuth::new(Some(Arc::new(verifier))).with_debug(config.debug)));
    }
    if let Some(key) = &config.api_key {
        authorizers.push(Arc::new(ApiKeyAuth::new(key.clone())?.with_debug(config.debug)));
    }
    Ok(match authorizers.len() {
        0 => None,
        1 => authorizers.pop(),
        _ => Some(Arc::new(AnyOf::new(authorizers))),
    })
}
