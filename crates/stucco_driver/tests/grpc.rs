mod common;

use std::{io::Write, time::Duration};

use common::*;
use stucco_driver::{
    PluginServer, ServerConfig, ServerHandle, ServerState, StdioMux, Value,
    config::AuthConfig,
    proto::{
        ByteStreamRequest, FieldResolveResponse,
        driver_client::DriverClient,
        plugin::{Empty, grpc_controller_client::GrpcControllerClient},
    },
    stdio::StdStream,
    value::unmarshal_opt,
};
use tokio::time::timeout;
use tonic::{
    Code, Request,
    transport::{Certificate, Channel, ClientTlsConfig, Identity},
};
use tonic_health::pb::{HealthCheckRequest, health_check_response::ServingStatus, health_client::HealthClient};

async fn start(root: &std::path::Path, config: ServerConfig, stdio: StdioMux) -> ServerHandle {
    let server = PluginServer::new(config, pipeline(root, &stdio), stdio).unwrap();
    server.bind().await.unwrap().serve().await.unwrap()
}

async fn client(handle: &ServerHandle) -> DriverClient<Channel> {
    DriverClient::connect(format!("http://{}", handle.local_addr())).await.unwrap()
}

fn response_value(response: FieldResolveResponse) -> Value {
    assert!(response.error.is_none(), "unexpected error {:?}", response.error);
    unmarshal_opt(response.response.as_ref(), None).unwrap()
}

#[tokio::test]
async fn resolves_hero_and_sidekick() {
    let dir = handler_dir();
    let handle = start(dir.path(), ServerConfig::default(), quiet_stdio()).await;
    let mut driver = client(&handle).await;

    let hero = response_value(driver.field_resolve(hero_request()).await.unwrap().into_inner());
    assert_eq!(hero.get("name"), Some(&Value::from("Batman")));
    assert_eq!(hero.get("sidekick"), Some(&Value::from("Robin")));

    let sidekick = response_value(driver.field_resolve(sidekick_request()).await.unwrap().into_inner());
    assert_eq!(sidekick, Value::object([("name", Some(Value::from("Robin")))]));

    drop(driver);
    handle.stop().await;
}

#[tokio::test]
async fn handler_failures_are_response_errors() {
    let dir = handler_dir();
    let handle = start(dir.path(), ServerConfig::default(), quiet_stdio()).await;
    let mut driver = client(&handle).await;

    let mut missing_info = hero_request();
    missing_info.info = None;
    let response = driver.field_resolve(missing_info).await.unwrap().into_inner();
    assert_eq!(response.error.unwrap().msg, "info is required");

    let response = driver
        .field_resolve(field_request("nowhere", "hero"))
        .await
        .unwrap()
        .into_inner();
    assert!(response.response.is_none());
    assert!(!response.error.unwrap().msg.is_empty());

    drop(driver);
    handle.stop().await;
}

#[tokio::test]
async fn health_reports_plugin_serving() {
    let dir = handler_dir();
    let handle = start(dir.path(), ServerConfig::default(), quiet_stdio()).await;

    let channel = Channel::from_shared(format!("http://{}", handle.local_addr()))
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut health = HealthClient::new(channel);
    let status = health
        .check(HealthCheckRequest {
            service: "plugin".into(),
        })
        .await
        .unwrap()
        .into_inner()
        .status;
    assert_eq!(status, ServingStatus::Serving as i32);

    drop(health);
    handle.stop().await;
}

#[tokio::test]
async fn stdout_is_streamed_to_subscribers() {
    let dir = handler_dir();
    let stdio = quiet_stdio();
    let handle = start(dir.path(), ServerConfig::default(), stdio.clone()).await;
    let mut driver = client(&handle).await;

    let mut stream = driver.stdout(ByteStreamRequest {}).await.unwrap().into_inner();
    assert_eq!(stdio.subscriber_count(StdStream::Stdout), 1);

    let response = driver.field_resolve(field_request("hero.chatty", "chatty")).await.unwrap().into_inner();
    assert_eq!(response_value(response), Value::from("done"));

    let chunk = timeout(Duration::from_secs(5), stream.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(chunk.data, b"hello from rhai\n");

    drop(stream);
    drop(driver);
    handle.stop().await;
}

#[tokio::test]
async fn stop_ends_open_stdio_streams() {
    let dir = handler_dir();
    let stdio = quiet_stdio();
    let handle = start(dir.path(), ServerConfig::default(), stdio.clone()).await;
    let state = handle.state();
    let mut driver = client(&handle).await;

    let mut stdout = driver.stdout(ByteStreamRequest {}).await.unwrap().into_inner();
    let mut stderr = driver.stderr(ByteStreamRequest {}).await.unwrap().into_inner();

    timeout(Duration::from_secs(10), handle.stop()).await.unwrap();
    assert_eq!(*state.borrow(), ServerState::Stopped);
    assert_eq!(stdio.subscriber_count(StdStream::Stdout), 0);
    assert!(matches!(stdout.message().await, Ok(None) | Err(_)));
    assert!(matches!(stderr.message().await, Ok(None) | Err(_)));
}

#[tokio::test]
async fn plugin_mode_prints_the_handshake_and_silences_stderr() {
    let dir = handler_dir();
    let out = Captured::default();
    let err = Captured::default();
    let stdio = StdioMux::with_originals(Box::new(out.clone()), Box::new(err.clone()));
    let config = ServerConfig {
        plugin: true,
        ..Default::default()
    };

    let handle = start(dir.path(), config, stdio.clone()).await;
    assert_eq!(out.text(), format!("1|1|tcp|127.0.0.1:{}|grpc\n", handle.local_addr().port()));

    stdio.stderr().write_all(b"engine log\n").unwrap();
    assert_eq!(err.text(), "");

    handle.stop().await;
}

#[tokio::test]
async fn lifecycle_states_are_observable() {
    let dir = handler_dir();
    let stdio = quiet_stdio();
    let server = PluginServer::new(ServerConfig::default(), pipeline(dir.path(), &stdio), stdio).unwrap();
    let state = server.state();
    assert_eq!(*state.borrow(), ServerState::Created);

    let bound = server.bind().await.unwrap();
    assert_eq!(*state.borrow(), ServerState::Bound);

    let handle = bound.serve().await.unwrap();
    assert_eq!(*state.borrow(), ServerState::Serving);

    handle.stop().await;
    assert_eq!(*state.borrow(), ServerState::Stopped);
}

#[tokio::test]
async fn controller_shutdown_stops_the_server() {
    let dir = handler_dir();
    let handle = start(dir.path(), ServerConfig::default(), quiet_stdio()).await;
    let state = handle.state();

    let mut controller = GrpcControllerClient::connect(format!("http://{}", handle.local_addr()))
        .await
        .unwrap();
    controller.shutdown(Empty {}).await.unwrap();
    drop(controller);

    timeout(Duration::from_secs(10), handle.wait()).await.unwrap();
    assert_eq!(*state.borrow(), ServerState::Stopped);
}

#[tokio::test]
async fn api_key_guards_driver_calls() {
    let dir = handler_dir();
    let config = ServerConfig {
        auth: AuthConfig {
            api_key: Some("xyz".into()),
            ..Default::default()
        },
        ..Default::default()
    };
    let handle = start(dir.path(), config, quiet_stdio()).await;
    let mut driver = client(&handle).await;

    let status = driver.field_resolve(hero_request()).await.unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    let mut request = Request::new(hero_request());
    request.metadata_mut().insert("x-stucco-api-key", "xyz".parse().unwrap());
    let hero = response_value(driver.field_resolve(request).await.unwrap().into_inner());
    assert_eq!(hero.get("name"), Some(&Value::from("Batman")));

    let mut request = Request::new(hero_request());
    request.metadata_mut().insert("authorization", "Bearer xyz".parse().unwrap());
    assert!(driver.field_resolve(request).await.is_ok());

    drop(driver);
    handle.stop().await;
}

#[test]
fn partial_tls_refuses_to_start() {
    let stdio = quiet_stdio();
    let config = ServerConfig {
        root_ca: Some(CA.into()),
        ..Default::default()
    };
    let pipeline = pipeline(std::path::Path::new("."), &stdio);
    assert!(PluginServer::new(config, pipeline, stdio).is_err());
}

#[tokio::test]
async fn mutual_tls_with_peer_certificate_auth() {
    let dir = handler_dir();
    let config = ServerConfig {
        root_ca: Some(CA.into()),
        private_key: Some(KEY.into()),
        cert: Some(CERT.into()),
        auth: AuthConfig {
            ca: Some(CA.into()),
            ..Default::default()
        },
        ..Default::default()
    };
    let handle = start(dir.path(), config, quiet_stdio()).await;

    let tls = ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(CA))
        .identity(Identity::from_pem(CERT, KEY))
        .domain_name("localhost");
    let channel = Channel::from_shared(format!("https://127.0.0.1:{}", handle.local_addr().port()))
        .unwrap()
        .tls_config(tls)
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut driver = DriverClient::new(channel);

    let hero = response_value(driver.field_resolve(hero_request()).await.unwrap().into_inner());
    assert_eq!(hero.get("name"), Some(&Value::from("Batman")));

    drop(driver);
    handle.stop().await;
}
