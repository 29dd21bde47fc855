//! gRPC plugin host.
//!
//! [`PluginServer`] wires the driver service, the go-plugin controller and the
//! health service onto one tonic server. Its lifecycle is observable through a
//! [`ServerState`] watch channel:
//!
//! ```text
//! Created -> Bound -> Serving -> ShuttingDown -> Stopped
//! ```

use std::{
    fmt,
    io::{self, Write},
    net::SocketAddr,
    sync::Arc,
};

use futures::{StreamExt, stream::BoxStream};
use rustls::pki_types::CertificateDer;
use strum_macros::Display;
use tokio::{
    net::TcpListener,
    sync::{Notify, watch},
    task::JoinHandle,
};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::{
    Request, Response, Status,
    transport::{Certificate, Identity, Server, ServerTlsConfig},
};
use tonic_health::ServingStatus;
use tracing::{debug, info, warn};

use crate::{
    auth::{self, AuthRequest, Authorizer},
    config::{ServerConfig, read_pem},
    error::DriverError,
    pipeline::{
        Authorize, FieldResolve, InterfaceResolveType, Operation, Pipeline, ScalarParse, ScalarSerialize,
        SetSecrets, SubscriptionConnect, UnionResolveType,
    },
    profiler::Profiler,
    proto::{
        self, ByteStream, ByteStreamRequest,
        driver_server::{Driver, DriverServer},
        plugin::{
            self as controller,
            grpc_controller_server::{GrpcController, GrpcControllerServer},
        },
    },
    stdio::{StdStream, StdioMux},
};

/// Health component reported as serving.
pub const HEALTH_SERVICE: &str = "plugin";

/// go-plugin handshake: core protocol version, app protocol version, network,
/// address, protocol.
pub fn handshake_line(addr: SocketAddr) -> String {
    format!("1|1|tcp|127.0.0.1:{}|grpc\n", addr.port())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ServerState {
    Created,
    Bound,
    Serving,
    ShuttingDown,
    Stopped,
}

// -----------------------------------------------------------------------------
// credentials
// -----------------------------------------------------------------------------

pub enum Credentials {
    Insecure,
    MutualTls {
        root_ca: Vec<u8>,
        private_key: Vec<u8>,
        cert: Vec<u8>,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insecure => f.write_str("Insecure"),
            Self::MutualTls { .. } => f.write_str("MutualTls"),
        }
    }
}

/// Plugin mode is always plaintext on loopback. Otherwise TLS needs the root
/// CA, the private key and the certificate chain together.
pub fn select_credentials(config: &ServerConfig) -> Result<Credentials, DriverError> {
    if config.plugin {
        return Ok(Credentials::Insecure);
    }
    match (&config.root_ca, &config.private_key, &config.cert) {
        (None, None, None) => Ok(Credentials::Insecure),
        (Some(root_ca), Some(private_key), Some(cert)) => Ok(Credentials::MutualTls {
            root_ca: read_pem(root_ca)?,
            private_key: read_pem(private_key)?,
            cert: read_pem(cert)?,
        }),
        (root_ca, private_key, cert) => {
            let missing: Vec<&str> = [
                ("root ca", root_ca.is_none()),
                ("private key", private_key.is_none()),
                ("certificate chain", cert.is_none()),
            ]
            .into_iter()
            .filter_map(|(name, absent)| absent.then_some(name))
            .collect();
            Err(DriverError::PartialTls(missing.join(", ")))
        }
    }
}

// -----------------------------------------------------------------------------
// driver service
// -----------------------------------------------------------------------------

#[derive(Clone)]
struct DriverService {
    pipeline: Pipeline,
    stdio: StdioMux,
    profiler: Profiler,
    authorizer: Option<Arc<dyn Authorizer>>,
}

type ResponseStream<T> = BoxStream<'static, Result<T, Status>>;

impl DriverService {
    async fn check<T>(&self, request: &Request<T>) -> Result<(), Status> {
        let Some(authorizer) = &self.authorizer else {
            return Ok(());
        };
        let headers = request.metadata().clone().into_headers();
        let peer_certs = request.peer_certs();
        let chain: &[CertificateDer<'static>] = peer_certs.as_deref().map(Vec::as_slice).unwrap_or_default();
        if authorizer.authorize(&AuthRequest { headers: &headers, peer_certs: chain }).await {
            Ok(())
        } else {
            Err(Status::permission_denied("FORBIDDEN"))
        }
    }

    async fn unary<O: Operation>(&self, request: Request<O::Request>) -> Result<Response<O::Response>, Status> {
        self.check(&request).await?;
        let req = request.into_inner();
        let function = O::function(&req).to_string();
        let response = self.profiler.measure(&function, self.pipeline.run::<O>(req)).await;
        Ok(Response::new(response))
    }

    fn byte_stream(&self, stream: StdStream) -> ResponseStream<ByteStream> {
        debug!(%stream, "stdio subscriber attached");
        ReceiverStream::new(self.stdio.subscribe(stream))
            .map(|data| Ok(ByteStream { data: data.to_vec() }))
            .boxed()
    }
}

#[tonic::async_trait]
impl Driver for DriverService {
    async fn field_resolve(
        &self,
        request: Request<proto::FieldResolveRequest>,
    ) -> Result<Response<proto::FieldResolveResponse>, Status> {
        self.unary::<FieldResolve>(request).await
    }

    async fn interface_resolve_type(
        &self,
        request: Request<proto::InterfaceResolveTypeRequest>,
    ) -> Result<Response<proto::InterfaceResolveTypeResponse>, Status> {
        self.unary::<InterfaceResolveType>(request).await
    }

    async fn union_resolve_type(
        &self,
        request: Request<proto::UnionResolveTypeRequest>,
    ) -> Result<Response<proto::UnionResolveTypeResponse>, Status> {
        self.unary::<UnionResolveType>(request).await
    }

    async fn scalar_parse(
        &self,
        request: Request<proto::ScalarParseRequest>,
    ) -> Result<Response<proto::ScalarParseResponse>, Status> {
        self.unary::<ScalarParse>(request).await
    }

    async fn scalar_serialize(
        &self,
        request: Request<proto::ScalarSerializeRequest>,
    ) -> Result<Response<proto::ScalarSerializeResponse>, Status> {
        self.unary::<ScalarSerialize>(request).await
    }

    async fn set_secrets(
        &self,
        request: Request<proto::SetSecretsRequest>,
    ) -> Result<Response<proto::SetSecretsResponse>, Status> {
        self.unary::<SetSecrets>(request).await
    }

    type StdoutStream = ResponseStream<ByteStream>;

    async fn stdout(&self, request: Request<ByteStreamRequest>) -> Result<Response<Self::StdoutStream>, Status> {
        self.check(&request).await?;
        Ok(Response::new(self.byte_stream(StdStream::Stdout)))
    }

    type StderrStream = ResponseStream<ByteStream>;

    async fn stderr(&self, request: Request<ByteStreamRequest>) -> Result<Response<Self::StderrStream>, Status> {
        self.check(&request).await?;
        Ok(Response::new(self.byte_stream(StdStream::Stderr)))
    }

    async fn subscription_connect(
        &self,
        request: Request<proto::SubscriptionConnectRequest>,
    ) -> Result<Response<proto::SubscriptionConnectResponse>, Status> {
        self.unary::<SubscriptionConnect>(request).await
    }

    type SubscriptionListenStream = ResponseStream<proto::SubscriptionListenMessage>;

    async fn subscription_listen(
        &self,
        request: Request<proto::SubscriptionListenRequest>,
    ) -> Result<Response<Self::SubscriptionListenStream>, Status> {
        self.check(&request).await?;
        let messages = self.pipeline.listen(request.into_inner()).await;
        Ok(Response::new(messages.map(Ok).boxed()))
    }

    async fn authorize(
        &self,
        request: Request<proto::AuthorizeRequest>,
    ) -> Result<Response<proto::AuthorizeResponse>, Status> {
        self.unary::<Authorize>(request).await
    }
}

struct Controller {
    shutdown: Arc<Notify>,
}

#[tonic::async_trait]
impl GrpcController for Controller {
    async fn shutdown(&self, _: Request<controller::Empty>) -> Result<Response<controller::Empty>, Status> {
        info!("shutdown requested by host");
        self.shutdown.notify_one();
        Ok(Response::new(controller::Empty {}))
    }
}

// -----------------------------------------------------------------------------
// lifecycle
// -----------------------------------------------------------------------------

pub struct PluginServer {
    config: ServerConfig,
    credentials: Credentials,
    service: DriverService,
    state: watch::Sender<ServerState>,
}

impl PluginServer {
    /// Fails on configuration that must never reach a listening socket:
    /// partial TLS material or an empty API key.
    pub fn new(config: ServerConfig, pipeline: Pipeline, stdio: StdioMux) -> Result<Self, DriverError> {
        let credentials = select_credentials(&config)?;
        let authorizer = auth::from_config(&config.auth)?;
        let profiler = Profiler::new(config.profile, stdio.stderr());
        let (state, _) = watch::channel(ServerState::Created);
        Ok(Self {
            config,
            credentials,
            service: DriverService {
                pipeline,
                stdio,
                profiler,
                authorizer,
            },
            state,
        })
    }

    pub fn state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    pub async fn bind(self) -> Result<BoundServer, DriverError> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let local_addr = listener.local_addr()?;
        self.state.send_replace(ServerState::Bound);
        debug!(%local_addr, credentials = ?self.credentials, "driver bound");
        Ok(BoundServer {
            server: self,
            listener,
            local_addr,
        })
    }
}

pub struct BoundServer {
    server: PluginServer,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> watch::Receiver<ServerState> {
        self.server.state()
    }

    /// Emits the handshake in plugin mode and starts serving in the background.
    pub async fn serve(self) -> Result<ServerHandle, DriverError> {
        let Self {
            server,
            listener,
            local_addr,
        } = self;
        let PluginServer {
            config,
            credentials,
            service,
            state,
        } = server;

        let mut builder = Server::builder();
        if let Credentials::MutualTls {
            root_ca,
            private_key,
            cert,
        } = credentials
        {
            let tls = ServerTlsConfig::new()
                .identity(Identity::from_pem(cert, private_key))
                .client_ca_root(Certificate::from_pem(root_ca));
            builder = builder.tls_config(tls)?;
        }

        let (mut health, health_service) = tonic_health::server::health_reporter();
        health.set_service_status(HEALTH_SERVICE, ServingStatus::Serving).await;

        let shutdown = Arc::new(Notify::new());
        let stdio = service.stdio.clone();
        let driver = DriverServer::new(service)
            .max_decoding_message_size(config.max_message_size)
            .max_encoding_message_size(config.max_message_size);
        let router = builder
            .add_service(health_service)
            .add_service(driver)
            .add_service(GrpcControllerServer::new(Controller {
                shutdown: shutdown.clone(),
            }));

        if config.plugin {
            stdio.write_original(StdStream::Stdout, handshake_line(local_addr).as_bytes())?;
            // stderr reaches the host through the Stderr stream
            stdio.replace_original(StdStream::Stderr, Box::new(io::sink()));
        }

        state.send_replace(ServerState::Serving);
        info!(%local_addr, plugin = config.plugin, "driver serving");

        let signal = {
            let shutdown = shutdown.clone();
            let state = state.clone();
            let stdio = stdio.clone();
            async move {
                shutdown.notified().await;
                state.send_replace(ServerState::ShuttingDown);
                // stdio streams never end on their own and would hold the drain open
                stdio.close_subscribers();
            }
        };
        let task_state = state.clone();
        let task = tokio::spawn(async move {
            let served = router
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
                .await;
            if let Err(err) = served {
                let _ = io::stderr().write_all(format!("driver server failed: {err}\n").as_bytes());
            }
            task_state.send_replace(ServerState::Stopped);
        });

        Ok(ServerHandle {
            local_addr,
            shutdown,
            state,
            task,
        })
    }
}

/// A serving driver.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Arc<Notify>,
    state: watch::Sender<ServerState>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Requests a graceful stop without waiting for it.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Resolves once the server has stopped, however it was stopped.
    pub async fn stopped(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == ServerState::Stopped).await;
    }

    /// Stops accepting calls and resolves once in-flight calls have drained.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
    }

    /// Resolves when the server stops, e.g. after a controller shutdown.
    pub async fn wait(self) {
        if let Err(err) = self.task.await {
            warn!(error = %err, "driver server task failed");
        }
    }
}
