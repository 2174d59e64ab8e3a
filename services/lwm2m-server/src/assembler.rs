//! Server assembly.
//!
//! Listeners bind strictly in order: plaintext device socket, secure device
//! socket, management HTTP. A failure at any step drops what is already bound
//! and returns before anything is spawned, so a failed assembly never leaves a
//! reachable port behind.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{lookup_host, TcpListener, UdpSocket};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use bpms_core::{EndpointConfig, ServerConfig};
use bpms_identity::ServerIdentity;
use bpms_model::ObjectModelProvider;
use bpms_store::Stores;

use crate::discovery::{AnnouncedPorts, Announcer};
use crate::error::{BindCause, Listener, StartupError};
use crate::management;
use crate::protocol::{DeviceEndpoint, DeviceProtocol, ProtocolContext};
use crate::registration::RegistrationService;
use crate::state::{AppState, ServerSecurityView};

/// How often expired registrations are swept.
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(10);
/// Grace period for each task during shutdown.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ServerAssembler;

impl ServerAssembler {
    /// Binds every listener and starts the server.
    pub async fn assemble(
        config: &ServerConfig,
        identity: ServerIdentity,
        stores: Stores,
        models: Arc<dyn ObjectModelProvider>,
        protocol: Arc<dyn DeviceProtocol>,
    ) -> Result<RunningServer, StartupError> {
        let coap = bind_udp(Listener::Coap, &config.coap).await?;
        let coaps = bind_udp(Listener::Coaps, &config.coaps).await?;
        let web = match bind_tcp(Listener::Web, &config.web.endpoint()).await {
            Ok(web) => web,
            Err(e) => {
                drop(coaps);
                drop(coap);
                return Err(e);
            }
        };

        let endpoint = DeviceEndpoint::new(coap, coaps);
        let coap_addr = local_addr(Listener::Coap, &config.coap, endpoint.coap_addr())?;
        let coaps_addr = local_addr(Listener::Coaps, &config.coaps, endpoint.coaps_addr())?;
        let web_addr = local_addr(Listener::Web, &config.web.endpoint(), web.local_addr())?;

        let identity = Arc::new(identity);
        let security = stores.security();
        let registrations = RegistrationService::new(stores.registration());

        let (device_shutdown, _) = broadcast::channel(1);
        let (web_shutdown, _) = broadcast::channel(1);
        let (exit_tx, exits) = mpsc::unbounded_channel();

        let ctx = ProtocolContext {
            identity: Arc::clone(&identity),
            security: Arc::clone(&security),
            registrations: registrations.clone(),
            models: Arc::clone(&models),
        };
        let mut device_tasks: Vec<(&'static str, JoinHandle<()>)> = endpoint
            .serve(ctx, protocol, &device_shutdown)
            .into_iter()
            .map(|(name, task)| (name, supervise(name, task, exit_tx.clone())))
            .collect();
        device_tasks.push((
            "expiry",
            supervise(
                "expiry",
                spawn_expiry_sweeper(registrations.clone(), device_shutdown.subscribe()),
                exit_tx.clone(),
            ),
        ));

        let state = Arc::new(AppState {
            security,
            registrations,
            models,
            server_security: ServerSecurityView::from_identity(&identity),
            backend: stores.kind(),
            api_token: config.web.api_token.clone(),
        });
        let web_task = supervise("web", spawn_web(web, state, web_shutdown.subscribe()), exit_tx);

        let uri = management_uri(web_addr);
        info!("Web server started at {}", uri);

        let announcer = if config.discovery.publish {
            Announcer::publish(
                &config.discovery.instance_name,
                AnnouncedPorts {
                    web: web_addr.port(),
                    coap: coap_addr.port(),
                    coaps: coaps_addr.port(),
                },
            )
        } else {
            None
        };

        Ok(RunningServer {
            coap_addr,
            coaps_addr,
            web_addr,
            uri,
            mode: identity.mode().to_string(),
            device_shutdown,
            web_shutdown,
            web_task: Some(web_task),
            device_tasks,
            announcer,
            exits,
        })
    }
}

async fn resolve(listener: Listener, endpoint: &EndpointConfig) -> Result<SocketAddr, StartupError> {
    let target = endpoint.bind_target();
    let unresolved = |source: io::Error| StartupError::bind(listener, &target, BindCause::UnresolvedHost, source);

    let mut addrs = lookup_host(target.as_str()).await.map_err(unresolved)?;
    addrs.next().ok_or_else(|| {
        unresolved(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no address found for {target}"),
        ))
    })
}

fn bind_failed(listener: Listener, endpoint: &EndpointConfig, source: io::Error) -> StartupError {
    let cause = BindCause::from_io(&source);
    error!(listener = %listener, addr = %endpoint.bind_target(), "Bind failed: {}", source);
    StartupError::bind(listener, endpoint.bind_target(), cause, source)
}

async fn bind_udp(listener: Listener, endpoint: &EndpointConfig) -> Result<UdpSocket, StartupError> {
    let addr = resolve(listener, endpoint).await?;
    UdpSocket::bind(addr)
        .await
        .map_err(|e| bind_failed(listener, endpoint, e))
}

async fn bind_tcp(listener: Listener, endpoint: &EndpointConfig) -> Result<TcpListener, StartupError> {
    let addr = resolve(listener, endpoint).await?;
    TcpListener::bind(addr)
        .await
        .map_err(|e| bind_failed(listener, endpoint, e))
}

fn local_addr(
    listener: Listener,
    endpoint: &EndpointConfig,
    addr: io::Result<SocketAddr>,
) -> Result<SocketAddr, StartupError> {
    addr.map_err(|e| bind_failed(listener, endpoint, e))
}

/// Externally reachable management URI for a bound address.
pub fn management_uri(addr: SocketAddr) -> String {
    match addr.ip() {
        ip if ip.is_unspecified() => format!("http://localhost:{}/", addr.port()),
        IpAddr::V6(ip) => format!("http://[{}]:{}/", ip, addr.port()),
        IpAddr::V4(ip) => format!("http://{}:{}/", ip, addr.port()),
    }
}

fn spawn_web(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let app = management::router(state);
    tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.recv().await;
            debug!("Web server received shutdown signal");
        };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
            error!("Web server error: {}", e);
        }
    })
}

fn spawn_expiry_sweeper(
    registrations: RegistrationService,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = interval.tick() => {
                    match registrations.remove_expired().await {
                        Ok(0) => {}
                        Ok(n) => debug!(removed = n, "Expired registrations removed"),
                        Err(e) => warn!("Expiry sweep failed: {}", e),
                    }
                }
            }
        }
    })
}

/// Reports the task name on `exits` once the task ends.
fn supervise(
    name: &'static str,
    task: JoinHandle<()>,
    exits: mpsc::UnboundedSender<&'static str>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = task.await {
            error!(task = name, "Task failed: {}", e);
        }
        let _ = exits.send(name);
    })
}

/// A started server. Dropping it without [`RunningServer::shutdown`] leaves
/// the listener tasks running.
pub struct RunningServer {
    coap_addr: SocketAddr,
    coaps_addr: SocketAddr,
    web_addr: SocketAddr,
    uri: String,
    mode: String,
    device_shutdown: broadcast::Sender<()>,
    web_shutdown: broadcast::Sender<()>,
    web_task: Option<JoinHandle<()>>,
    device_tasks: Vec<(&'static str, JoinHandle<()>)>,
    announcer: Option<Announcer>,
    exits: mpsc::UnboundedReceiver<&'static str>,
}

impl RunningServer {
    pub fn coap_addr(&self) -> SocketAddr {
        self.coap_addr
    }

    pub fn coaps_addr(&self) -> SocketAddr {
        self.coaps_addr
    }

    pub fn web_addr(&self) -> SocketAddr {
        self.web_addr
    }

    /// Management URI, as logged at startup.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Credential mode of the secure listener.
    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn is_announced(&self) -> bool {
        self.announcer.is_some()
    }

    /// Resolves with the name of the first task that ends.
    pub async fn wait(&mut self) -> Option<&'static str> {
        self.exits.recv().await
    }

    /// Stops the management listener, then the device endpoint, then the announcer.
    pub async fn shutdown(mut self) {
        info!("Shutting down server");

        let _ = self.web_shutdown.send(());
        if let Some(task) = self.web_task.take() {
            await_task("web", task).await;
        }

        let _ = self.device_shutdown.send(());
        for (name, task) in self.device_tasks.drain(..) {
            await_task(name, task).await;
        }

        if let Some(announcer) = self.announcer.take() {
            announcer.shutdown();
        }

        info!("Server shutdown complete");
    }
}

async fn await_task(name: &str, task: JoinHandle<()>) {
    match tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, task).await {
        Ok(Ok(())) => debug!("{} task completed", name),
        Ok(Err(e)) => warn!("{} task failed: {}", name, e),
        Err(_) => warn!("{} task timed out during shutdown", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_management_uri() {
        assert_eq!(management_uri("0.0.0.0:8080".parse().unwrap()), "http://localhost:8080/");
        assert_eq!(management_uri("127.0.0.1:9000".parse().unwrap()), "http://127.0.0.1:9000/");
        assert_eq!(management_uri("[::1]:8080".parse().unwrap()), "http://[::1]:8080/");
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        let endpoint = EndpointConfig::new("no-such-host.invalid", 0);
        let err = bind_udp(Listener::Coap, &endpoint).await.unwrap_err();
        assert_eq!(err.cause(), BindCause::UnresolvedHost);
        assert_eq!(err.listener(), Listener::Coap);
    }
}
