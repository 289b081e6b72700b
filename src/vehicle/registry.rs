use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, error, info, trace, warn};

use crate::messaging::command::Command;
use crate::messaging::config::ProtocolConfig;
use crate::messaging::datagram::DatagramHeader;
use crate::messaging::leases::LeaseTable;
use crate::messaging::peer::PeerTasks;
use crate::messaging::ticket::Ticket;
use crate::messaging::transport::{DatagramHandler, Transport};
use crate::vehicle::messages::{encode_reply, encode_request, Reply, Request, ServiceEntry};

/// A discovery peer. Vehicle services announce themselves periodically and are forgotten when
///  they stop doing so; clients list them, and ask the registry to introduce them to a vehicle
///  they can not reach directly.
pub struct UdpVehicleRegistry {
    config: Arc<ProtocolConfig>,
    transport: Arc<dyn Transport>,
    services: RwLock<LeaseTable<String>>,
}

impl UdpVehicleRegistry {
    pub fn new(config: Arc<ProtocolConfig>, transport: Arc<dyn Transport>) -> Arc<UdpVehicleRegistry> {
        Arc::new(UdpVehicleRegistry {
            services: RwLock::new(LeaseTable::new(config.lease_budget)),
            config,
            transport,
        })
    }

    pub fn start(self: &Arc<Self>) -> PeerTasks {
        info!("starting vehicle registry on {:?}", self.transport.local_addr());
        let registry = self.clone();
        PeerTasks::spawn(self.transport.clone(), self.clone(), async move { registry.run_sweep_loop().await })
    }

    async fn run_sweep_loop(&self) {
        let mut heartbeat = interval(self.config.registration_interval);
        loop {
            heartbeat.tick().await;
            self.sweep().await;
        }
    }

    pub async fn sweep(&self) {
        for addr in self.services.write().await.sweep() {
            info!("vehicle service {:?} stopped announcing itself - removing", addr);
        }
    }

    /// the live services, sorted by name and address
    pub async fn services(&self) -> Vec<ServiceEntry> {
        let mut services: Vec<(String, SocketAddr)> = self.services.read().await
            .entries()
            .map(|(addr, name)| (name.clone(), *addr))
            .collect();
        services.sort();

        services.into_iter()
            .map(|(name, addr)| ServiceEntry {
                name,
                host: addr.ip().to_string(),
                port: addr.port() as i32,
            })
            .collect()
    }

    async fn on_request(&self, request: Request, ticket: Ticket, from: SocketAddr) {
        match request {
            Request::Register { name } => {
                if self.services.write().await.renew(from, name.clone()) {
                    info!("vehicle service {:?} registered as {}", from, name);
                }
            }
            Request::List => {
                if ticket.is_none() {
                    trace!("list request from {:?} without ticket - ignoring", from);
                    return;
                }
                let reply = Reply::Services(self.services().await);
                match encode_reply(&self.config, Command::List, ticket, &reply) {
                    Ok(datagram) => {
                        if let Err(e) = self.transport.send_unreliable(from, &datagram).await {
                            error!("error sending service list to {:?}: {}", from, e);
                        }
                    }
                    Err(e) => error!("could not encode service list: {}", e),
                }
            }
            Request::Connect { host, port } => self.forward_connect(&host, port, ticket, from).await,
            other => warn!("registry does not handle {:?} from {:?} - ignoring", other.command(), from),
        }
    }

    /// Tells the vehicle the client's address as the registry sees it, with the client's ticket.
    async fn forward_connect(&self, host: &str, port: i32, ticket: Ticket, client: SocketAddr) {
        let vehicle = match (host.parse::<IpAddr>(), u16::try_from(port)) {
            (Ok(ip), Ok(port)) => SocketAddr::new(ip, port),
            _ => {
                warn!("invalid vehicle address {}:{} in connect request - ignoring", host, port);
                return;
            }
        };
        if !self.services.read().await.contains(&vehicle) {
            debug!("connect request for unknown vehicle {:?} - forwarding anyway", vehicle);
        }

        let forwarded = Request::Connect { host: client.ip().to_string(), port: client.port() as i32 };
        match encode_request(&self.config, ticket, &forwarded) {
            Ok(datagram) => {
                if let Err(e) = self.transport.send_unreliable(vehicle, &datagram).await {
                    error!("error forwarding connect request to {:?}: {}", vehicle, e);
                }
            }
            Err(e) => error!("could not encode connect request: {}", e),
        }
    }
}

#[async_trait]
impl DatagramHandler for UdpVehicleRegistry {
    async fn on_datagram(&self, datagram: &[u8], from: SocketAddr) {
        let mut buf = datagram;
        let header = match DatagramHeader::try_deser(&mut buf) {
            Ok(header) => header,
            Err(e) => {
                warn!("dropping malformed datagram from {:?}: {}", from, e);
                return;
            }
        };
        match Request::try_deser(header.command, &mut buf) {
            Ok(request) => self.on_request(request, header.ticket, from).await,
            Err(e) => warn!("dropping {:?} datagram from {:?}: {}", header.command, from, e),
        }
    }

    async fn on_ticket_timeout(&self, ticket: Ticket, to: SocketAddr) {
        debug!("unexpected timeout for ticket {} to {:?}", ticket, to);
    }
}
