use async_trait::async_trait;
use http::header::AUTHORIZATION;
use tracing::warn;

use super::{AuthRequest, Authorizer};
use crate::error::DriverError;

pub const API_KEY_HEADER: &str = "x-stucco-api-key";

const BEARER: &str = "bearer ";

/// Shared-secret check against `x-stucco-api-key` or `Authorization: Bearer`.
#[derive(Clone)]
pub struct ApiKeyAuth {
    key: String,
    debug: bool,
}

impl std::fmt::Debug for ApiKeyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyAuth").field("key", &"***").finish()
    }
}

impl ApiKeyAuth {
    pub fn new(key: impl Into<String>) -> Result<Self, DriverError> {
        let key = key.into();
        if key.is_empty() {
            return Err(DriverError::EmptyApiKey);
        }
        Ok(Self { key, debug: false })
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    fn presented<'a>(&self, req: &AuthRequest<'a>) -> Option<&'a str> {
        if let Some(key) = req.headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
            return Some(key.trim());
        }
        let auth = req.headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
        let prefix = auth.get(..BEARER.len())?;
        prefix
            .eq_ignore_ascii_case(BEARER)
            .then(|| auth[BEARER.len()..].trim())
    }
}

#[async_trait]
impl Authorizer for ApiKeyAuth {
    async fn authorize(&self, req: &AuthRequest<'_>) -> bool {
        let ok = self
            .presented(req)
            .is_some_and(|presented| constant_time_eq(presented, &self.key));
        if !ok && self.debug {
            warn!("api key rejected");
        }
        ok
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
