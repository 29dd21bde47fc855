use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use moka::future::Cache;
use rustls::{
    RootCertStore,
    crypto::ring,
    pki_types::{CertificateDer, UnixTime},
    server::{WebPkiClientVerifier, danger::ClientCertVerifier},
};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{AuthRequest, Authorizer};
use crate::error::DriverError;

/// Forwarded client certificate, for TLS terminated in front of the HTTP transport.
pub const CLIENT_CERT_HEADER: &str = "x-stucco-client-cert";

/// Positive verifications are reused within this window.
pub const CACHE_WINDOW: Duration = Duration::from_secs(5 * 60);

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// Verifies a certificate chain against a trust store.
pub trait ChainVerifier: Send + Sync {
    fn verify(&self, end_entity: &CertificateDer<'static>, intermediates: &[CertificateDer<'static>]) -> Result<(), String>;
}

/// rustls/webpki client certificate verification.
pub struct WebPkiVerifier {
    inner: Arc<dyn ClientCertVerifier>,
}

impl WebPkiVerifier {
    pub fn from_pem(ca_pem: &[u8]) -> Result<Self, DriverError> {
        let mut roots = RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut &*ca_pem) {
            let cert = cert.map_err(|e| DriverError::Tls(format!("invalid CA bundle: {e}")))?;
            roots
                .add(cert)
                .map_err(|e| DriverError::Tls(format!("invalid CA certificate: {e}")))?;
        }
        if roots.is_empty() {
            return Err(DriverError::Tls("CA bundle contains no certificates".into()));
        }
        let inner = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::new(ring::default_provider()))
            .build()
            .map_err(|e| DriverError::Tls(e.to_string()))?;
        Ok(Self { inner })
    }
}

impl ChainVerifier for WebPkiVerifier {
    fn verify(&self, end_entity: &CertificateDer<'static>, intermediates: &[CertificateDer<'static>]) -> Result<(), String> {
        self.inner
            .verify_client_cert(end_entity, intermediates, UnixTime::now())
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

type CacheKey = (Uuid, [u8; 32], u64);

/// Client certificate check. Uses the TLS peer chain when there is one and
/// the forwarded certificate header otherwise.
pub struct CertAuth {
    id: Uuid,
    verifier: Option<Arc<dyn ChainVerifier>>,
    verified: Cache<CacheKey, ()>,
    debug: bool,
}

impl CertAuth {
    /// Without a verifier every certificate is rejected.
    pub fn new(verifier: Option<Arc<dyn ChainVerifier>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            verifier,
            verified: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(CACHE_WINDOW)
                .build(),
            debug: false,
        }
    }

    pub fn from_pem(ca_pem: &[u8]) -> Result<Self, DriverError> {
        Ok(Self::new(Some(Arc::new(WebPkiVerifier::from_pem(ca_pem)?))))
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    fn reject(&self, reason: &str) -> bool {
        if self.debug {
            warn!(reason, "client certificate rejected");
        }
        false
    }

    /// Verifies `end_entity`, reusing a positive result from the current window.
    pub async fn verify(&self, end_entity: &CertificateDer<'static>, intermediates: &[CertificateDer<'static>]) -> bool {
        let Some(verifier) = &self.verifier else {
            return self.reject("no certificate authority configured");
        };
        let key = (self.id, Sha256::digest(end_entity.as_ref()).into(), time_bucket());
        if self.verified.get(&key).await.is_some() {
            debug!("client certificate verified from cache");
            return true;
        }
        match verifier.verify(end_entity, intermediates) {
            Ok(()) => {
                self.verified.insert(key, ()).await;
                true
            }
            Err(reason) => self.reject(&reason),
        }
    }
}

#[async_trait]
impl Authorizer for CertAuth {
    async fn authorize(&self, req: &AuthRequest<'_>) -> bool {
        if let Some((end_entity, intermediates)) = req.peer_certs.split_first() {
            return self.verify(end_entity, intermediates).await;
        }
        let forwarded = req
            .headers
            .get(CLIENT_CERT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_forwarded_cert);
        match forwarded {
            Some(cert) => self.verify(&cert, &[]).await,
            None => self.reject("no client certificate presented"),
        }
    }
}

fn time_bucket() -> u64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    now.as_secs() / CACHE_WINDOW.as_secs()
}

/// Parses a forwarded certificate. Proxies often drop the PEM markers or fold
/// the body onto one line, so the base64 payload is extracted and re-wrapped.
pub fn parse_forwarded_cert(value: &str) -> Option<CertificateDer<'static>> {
    let body = match (value.find(PEM_BEGIN), value.find(PEM_END)) {
        (Some(begin), Some(end)) if begin < end => &value[begin + PEM_BEGIN.len()..end],
        _ => value,
    };
    let payload: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    if payload.is_empty() {
        return None;
    }
    let mut pem = String::with_capacity(payload.len() + 64);
    pem.push_str(PEM_BEGIN);
    pem.push('\n');
    for line in payload.as_bytes().chunks(64) {
        pem.push_str(std::str::from_utf8(line).ok()?);
        pem.push('\n');
    }
    pem.push_str(PEM_END);
    pem.push('\n');
    rustls_pemfile::certs(&mut pem.as_bytes()).next()?.ok()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::HeaderMap;

    use super::*;

    const CA: &str = include_str!("../../tests/fixtures/ca.pem");
    const OTHER_CA: &str = include_str!("../../tests/fixtures/other_ca.pem");
    const CLIENT: &str = include_str!("../../tests/fixtures/client.pem");

    fn client_cert() -> CertificateDer<'static> {
        parse_forwarded_cert(CLIENT).unwrap()
    }

    struct Counting {
        inner: WebPkiVerifier,
        calls: AtomicUsize,
    }

    impl ChainVerifier for Counting {
        fn verify(&self, cert: &CertificateDer<'static>, intermediates: &[CertificateDer<'static>]) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.verify(cert, intermediates)
        }
    }

    #[tokio::test]
    async fn issuer_ca_accepts_the_certificate() {
        let auth = CertAuth::from_pem(CA.as_bytes()).unwrap();
        assert!(auth.verify(&client_cert(), &[]).await);
    }

    #[tokio::test]
    async fn unrelated_ca_rejects_the_certificate() {
        let auth = CertAuth::from_pem(OTHER_CA.as_bytes()).unwrap().with_debug(true);
        assert!(!auth.verify(&client_cert(), &[]).await);
    }

    #[tokio::test]
    async fn second_verification_is_cached() {
        let counting = Arc::new(Counting {
            inner: WebPkiVerifier::from_pem(CA.as_bytes()).unwrap(),
            calls: AtomicUsize::new(0),
        });
        let auth = CertAuth::new(Some(counting.clone()));

        assert!(auth.verify(&client_cert(), &[]).await);
        assert!(auth.verify(&client_cert(), &[]).await);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let counting = Arc::new(Counting {
            inner: WebPkiVerifier::from_pem(OTHER_CA.as_bytes()).unwrap(),
            calls: AtomicUsize::new(0),
        });
        let auth = CertAuth::new(Some(counting.clone()));

        assert!(!auth.verify(&client_cert(), &[]).await);
        assert!(!auth.verify(&client_cert(), &[]).await);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_ca_always_rejects() {
        let auth = CertAuth::new(None);
        assert!(!auth.verify(&client_cert(), &[]).await);
    }

    #[tokio::test]
    async fn forwarded_header_is_accepted_without_markers() {
        let auth = CertAuth::from_pem(CA.as_bytes()).unwrap();
        let raw: String = CLIENT
            .lines()
            .filter(|l| !l.starts_with("-----"))
            .collect();
        let mut headers = HeaderMap::new();
        headers.insert(CLIENT_CERT_HEADER, raw.parse().unwrap());

        assert!(auth.authorize(&AuthRequest::from_headers(&headers)).await);
    }

    #[tokio::test]
    async fn forwarded_header_on_one_line_is_accepted() {
        let auth = CertAuth::from_pem(CA.as_bytes()).unwrap();
        let folded = CLIENT.replace('\n', " ");
        let mut headers = HeaderMap::new();
        headers.insert(CLIENT_CERT_HEADER, folded.trim().parse().unwrap());

        assert!(auth.authorize(&AuthRequest::from_headers(&headers)).await);
    }

    #[tokio::test]
    async fn no_certificate_denies() {
        let auth = CertAuth::from_pem(CA.as_bytes()).unwrap();
        assert!(!auth.authorize(&AuthRequest::from_headers(&HeaderMap::new())).await);
    }

    #[test]
    fn garbage_is_not_a_certificate() {
        assert!(parse_forwarded_cert("").is_none());
        assert!(parse_forwarded_cert("not base64 !!").is_none());
    }
}
