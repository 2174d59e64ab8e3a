//! Device-facing endpoint.
//!
//! The endpoint owns the plaintext and secure UDP sockets and hands every
//! datagram to a [`DeviceProtocol`]. Message codec, session handling and
//! the registration state machine live behind that trait.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use bpms_identity::ServerIdentity;
use bpms_model::ObjectModelProvider;
use bpms_store::SecurityStore;

use crate::registration::RegistrationService;

/// Largest datagram accepted on either socket.
const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Plain,
    Secure,
}

impl Transport {
    pub fn name(self) -> &'static str {
        match self {
            Self::Plain => "coap",
            Self::Secure => "coaps",
        }
    }
}

/// Everything a protocol implementation may consult.
#[derive(Clone)]
pub struct ProtocolContext {
    /// Handshake credentials for the secure transport.
    pub identity: Arc<ServerIdentity>,
    /// Per-client credential lookup.
    pub security: Arc<dyn SecurityStore>,
    pub registrations: RegistrationService,
    pub models: Arc<dyn ObjectModelProvider>,
}

/// Device protocol engine seam.
#[async_trait]
pub trait DeviceProtocol: Send + Sync {
    /// Handles one datagram and optionally returns a reply for the peer.
    async fn handle_datagram(
        &self,
        ctx: &ProtocolContext,
        transport: Transport,
        peer: SocketAddr,
        datagram: &[u8],
    ) -> Option<Vec<u8>>;
}

/// Default engine: logs and drops every datagram.
#[derive(Debug, Default, Clone, Copy)]
pub struct DroppingProtocol;

#[async_trait]
impl DeviceProtocol for DroppingProtocol {
    async fn handle_datagram(
        &self,
        _ctx: &ProtocolContext,
        transport: Transport,
        peer: SocketAddr,
        datagram: &[u8],
    ) -> Option<Vec<u8>> {
        debug!(
            transport = transport.name(),
            %peer,
            len = datagram.len(),
            "No device protocol engine installed, dropping datagram"
        );
        None
    }
}

/// Bound device sockets, not yet serving.
#[derive(Debug)]
pub struct DeviceEndpoint {
    coap: UdpSocket,
    coaps: UdpSocket,
}

impl DeviceEndpoint {
    pub fn new(coap: UdpSocket, coaps: UdpSocket) -> Self {
        Self { coap, coaps }
    }

    pub fn coap_addr(&self) -> std::io::Result<SocketAddr> {
        self.coap.local_addr()
    }

    pub fn coaps_addr(&self) -> std::io::Result<SocketAddr> {
        self.coaps.local_addr()
    }

    /// Starts one receive loop per socket. Loops stop on the shutdown signal.
    pub fn serve(
        self,
        ctx: ProtocolContext,
        protocol: Arc<dyn DeviceProtocol>,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<(&'static str, JoinHandle<()>)> {
        let Self { coap, coaps } = self;
        vec![
            (
                Transport::Plain.name(),
                spawn_receiver(
                    coap,
                    Transport::Plain,
                    ctx.clone(),
                    Arc::clone(&protocol),
                    shutdown.subscribe(),
                ),
            ),
            (
                Transport::Secure.name(),
                spawn_receiver(coaps, Transport::Secure, ctx, protocol, shutdown.subscribe()),
            ),
        ]
    }
}

fn spawn_receiver(
    socket: UdpSocket,
    transport: Transport,
    ctx: ProtocolContext,
    protocol: Arc<dyn DeviceProtocol>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        if let Ok(addr) = socket.local_addr() {
            info!(transport = transport.name(), %addr, "Device listener started");
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!(transport = transport.name(), "Device listener received shutdown signal");
                    break;
                }
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, peer)) => {
                            let reply = protocol.handle_datagram(&ctx, transport, peer, &buf[..len]).await;
                            if let Some(reply) = reply {
                                if let Err(e) = socket.send_to(&reply, peer).await {
                                    warn!(transport = transport.name(), %peer, "Failed to send reply: {}", e);
                                }
                            }
                        }
                        Err(e) => {
                            error!(transport = transport.name(), "Receive error: {}", e);
                        }
                    }
                }
            }
        }

        debug!(transport = transport.name(), "Device listener exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bpms_core::ModelsConfig;
    use bpms_identity::rpk;
    use bpms_model::StaticModelProvider;
    use bpms_store::{FileRegistrationStore, FileSecurityStore};

    struct Echo {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl DeviceProtocol for Echo {
        async fn handle_datagram(
            &self,
            _ctx: &ProtocolContext,
            transport: Transport,
            _peer: SocketAddr,
            datagram: &[u8],
        ) -> Option<Vec<u8>> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            let mut reply = transport.name().as_bytes().to_vec();
            reply.extend_from_slice(datagram);
            Some(reply)
        }
    }

    fn context(dir: &std::path::Path) -> ProtocolContext {
        ProtocolContext {
            identity: Arc::new(ServerIdentity::RawPublicKey(rpk::demo_key().unwrap())),
            security: Arc::new(FileSecurityStore::open(dir.join("security.json")).unwrap()),
            registrations: RegistrationService::new(Arc::new(
                FileRegistrationStore::open(dir.join("registrations.json")).unwrap(),
            )),
            models: Arc::new(StaticModelProvider::from_config(&ModelsConfig::default()).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_datagrams_reach_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = DeviceEndpoint::new(
            UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            UdpSocket::bind("127.0.0.1:0").await.unwrap(),
        );
        let coaps_addr = endpoint.coaps_addr().unwrap();

        let protocol = Arc::new(Echo {
            seen: AtomicUsize::new(0),
        });
        let (shutdown_tx, _) = broadcast::channel(1);
        let tasks = endpoint.serve(context(dir.path()), protocol.clone(), &shutdown_tx);

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"ping", coaps_addr).await.unwrap();
        let mut buf = [0u8; 64];
        let (len, _) = tokio::time::timeout(std::time::Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"coapsping");
        assert_eq!(protocol.seen.load(Ordering::SeqCst), 1);

        shutdown_tx.send(()).unwrap();
        for (_, task) in tasks {
            task.await.unwrap();
        }
    }
}
