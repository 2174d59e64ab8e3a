//! DNS-SD announcement of the server endpoints.
//!
//! Purely informational: every failure is logged and the server keeps running.

use std::collections::HashMap;

use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::{debug, info, warn};

pub const WEB_SERVICE_TYPE: &str = "_http._tcp.local.";
pub const COAP_SERVICE_TYPE: &str = "_coap._udp.local.";
pub const COAPS_SERVICE_TYPE: &str = "_coaps._udp.local.";

/// Ports to announce.
#[derive(Debug, Clone, Copy)]
pub struct AnnouncedPorts {
    pub web: u16,
    pub coap: u16,
    pub coaps: u16,
}

pub struct Announcer {
    daemon: ServiceDaemon,
    registered: Vec<String>,
}

impl Announcer {
    /// Publishes the three services. Returns `None` if the daemon could not start.
    pub fn publish(instance_name: &str, ports: AnnouncedPorts) -> Option<Self> {
        let daemon = match ServiceDaemon::new() {
            Ok(daemon) => daemon,
            Err(e) => {
                warn!("Service discovery unavailable: {}", e);
                return None;
            }
        };

        let host_name = format!("{instance_name}.local.");
        let mut registered = Vec::new();
        for (service_type, port) in [
            (WEB_SERVICE_TYPE, ports.web),
            (COAP_SERVICE_TYPE, ports.coap),
            (COAPS_SERVICE_TYPE, ports.coaps),
        ] {
            let service = ServiceInfo::new(
                service_type,
                instance_name,
                &host_name,
                "",
                port,
                HashMap::<String, String>::new(),
            )
            .map(ServiceInfo::enable_addr_auto);

            let result = service.and_then(|service| {
                let fullname = service.get_fullname().to_string();
                daemon.register(service).map(|_| fullname)
            });
            match result {
                Ok(fullname) => {
                    debug!(service = %fullname, port, "Service announced");
                    registered.push(fullname);
                }
                Err(e) => warn!(service_type, port, "Failed to announce service: {}", e),
            }
        }

        info!(instance = instance_name, services = registered.len(), "Service discovery started");
        Some(Self { daemon, registered })
    }

    /// Withdraws the announcements and stops the daemon.
    pub fn shutdown(self) {
        for fullname in &self.registered {
            if let Err(e) = self.daemon.unregister(fullname) {
                debug!(service = %fullname, "Failed to withdraw service: {}", e);
            }
        }
        if let Err(e) = self.daemon.shutdown() {
            warn!("Failed to stop service discovery: {}", e);
        }
    }
}
