//! End-to-end startup over real sockets on the loopback interface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

use bpms_core::{EndpointConfig, ServerConfig};
use bpms_server::{
    BindCause, BootstrapError, DeviceProtocol, Listener, ProtocolContext, RegistrationRequest, Transport,
};

fn loopback_config(dir: &std::path::Path) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.coap = EndpointConfig::new("127.0.0.1", 0);
    config.coaps = EndpointConfig::new("127.0.0.1", 0);
    config.web.host = Some("127.0.0.1".to_string());
    config.web.port = 0;
    config.store.data_dir = dir.join("data");
    config.rpk.public_key_file = dir.join("server_pub.der");
    config
}

async fn free_tcp_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn free_udp_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.local_addr().unwrap().port()
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

#[tokio::test]
async fn test_occupied_device_port_leaves_web_unbound() {
    let dir = tempfile::tempdir().unwrap();
    let occupant = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let web_port = free_tcp_port().await;

    let mut config = loopback_config(dir.path());
    config.coap.port = occupant.local_addr().unwrap().port();
    config.web.port = web_port;

    match bpms_server::bootstrap(&config).await {
        Err(BootstrapError::Startup(e)) => {
            assert_eq!(e.listener(), Listener::Coap);
            assert_eq!(e.cause(), BindCause::AddressInUse);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("startup succeeded on an occupied port"),
    }

    // Nothing listens on the management port.
    assert!(TcpStream::connect(("127.0.0.1", web_port)).await.is_err());
    TcpListener::bind(("127.0.0.1", web_port)).await.unwrap();
}

#[tokio::test]
async fn test_occupied_web_port_releases_device_sockets() {
    let dir = tempfile::tempdir().unwrap();
    let occupant = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let coap_port = free_udp_port().await;
    let coaps_port = free_udp_port().await;

    let mut config = loopback_config(dir.path());
    config.coap.port = coap_port;
    config.coaps.port = coaps_port;
    config.web.port = occupant.local_addr().unwrap().port();

    let err = bpms_server::bootstrap(&config).await.err().unwrap();
    match err {
        BootstrapError::Startup(e) => assert_eq!(e.listener(), Listener::Web),
        other => panic!("unexpected error: {other}"),
    }

    UdpSocket::bind(("127.0.0.1", coap_port)).await.unwrap();
    UdpSocket::bind(("127.0.0.1", coaps_port)).await.unwrap();
}

#[tokio::test]
async fn test_invalid_configuration_fails_before_binding() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = loopback_config(dir.path());
    config.rpk.allow_demo_key = false;

    let err = bpms_server::bootstrap(&config).await.err().unwrap();
    assert!(matches!(err, BootstrapError::Config(_)));
    assert!(!dir.path().join("data").exists());
}

#[tokio::test]
async fn test_unreachable_backend_fails_before_binding() {
    let dir = tempfile::tempdir().unwrap();
    let web_port = free_tcp_port().await;
    let mut config = loopback_config(dir.path());
    config.web.port = web_port;
    config.redis.url = Some("redis://127.0.0.1:1".to_string());
    config.redis.connect_timeout_secs = 2;

    let err = bpms_server::bootstrap(&config).await.err().unwrap();
    assert_eq!(err.subsystem(), "store");
    assert!(err.remedy().is_some());
    assert!(TcpStream::connect(("127.0.0.1", web_port)).await.is_err());
}

/// Registers the endpoint named by the datagram and acknowledges it.
struct RegisteringProtocol;

#[async_trait]
impl DeviceProtocol for RegisteringProtocol {
    async fn handle_datagram(
        &self,
        ctx: &ProtocolContext,
        _transport: Transport,
        peer: SocketAddr,
        datagram: &[u8],
    ) -> Option<Vec<u8>> {
        let endpoint = String::from_utf8_lossy(datagram).to_string();
        ctx.registrations
            .register(RegistrationRequest {
                endpoint,
                address: peer,
                lifetime_secs: 300,
                lwm2m_version: "1.1".to_string(),
                binding: "U".to_string(),
                objects: Vec::new(),
            })
            .await
            .ok()
            .map(|registration| registration.id.into_bytes())
    }
}

#[tokio::test]
async fn test_running_server_serves_both_surfaces() {
    let dir = tempfile::tempdir().unwrap();
    let config = loopback_config(dir.path());

    let server = bpms_server::bootstrap_with(&config, Arc::new(RegisteringProtocol))
        .await
        .unwrap();
    assert_eq!(server.mode(), "raw-public-key");
    assert!(server.uri().starts_with("http://127.0.0.1:"));
    assert!(!server.is_announced());
    assert!(dir.path().join("server_pub.der").exists());

    let health = http_get(server.web_addr(), "/health").await;
    assert!(health.starts_with("HTTP/1.1 200"));
    assert!(health.contains("healthy"));

    let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    device.send_to(b"meter-1", server.coap_addr()).await.unwrap();
    let mut buf = [0u8; 64];
    let (len, _) = tokio::time::timeout(Duration::from_secs(5), device.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert!(len > 0);

    let client = http_get(server.web_addr(), "/api/clients/meter-1").await;
    assert!(client.starts_with("HTTP/1.1 200"));
    assert!(client.contains("meter-1"));

    let coap_addr = server.coap_addr();
    server.shutdown().await;
    UdpSocket::bind(coap_addr).await.unwrap();
}
