use std::cmp::min;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::messaging::config::ProtocolConfig;
use crate::messaging::ticket::Ticket;
use crate::messaging::transport::{DatagramHandler, Transport};

/// [Transport] on a single UDP socket.
///
/// Every ticketed send gets its own retransmission task which resends the datagram with
///  exponentially growing delays and reports a timeout to the registered handler once the
///  overall ticket timeout has passed.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    config: Arc<ProtocolConfig>,
    cancel_sender: broadcast::Sender<()>,
    retransmissions: Arc<Mutex<FxHashMap<Ticket, JoinHandle<()>>>>,
    handler: Arc<RwLock<Option<Arc<dyn DatagramHandler>>>>,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr, config: Arc<ProtocolConfig>) -> anyhow::Result<UdpTransport> {
        config.validate()?;

        let socket = UdpSocket::bind(addr).await?;
        info!("bound UDP socket to {:?}", socket.local_addr()?);

        let (cancel_sender, _) = broadcast::channel(1);

        Ok(UdpTransport {
            socket: Arc::new(socket),
            config,
            cancel_sender,
            retransmissions: Default::default(),
            handler: Default::default(),
        })
    }

    pub fn num_retransmissions(&self) -> usize {
        self.retransmissions.lock().unwrap().len()
    }

    fn spawn_retransmission(&self, to: SocketAddr, ticket: Ticket, datagram: Bytes) -> JoinHandle<()> {
        let socket = self.socket.clone();
        let config = self.config.clone();
        let retransmissions = self.retransmissions.clone();
        let handler = self.handler.clone();

        tokio::spawn(async move {
            let deadline = Instant::now() + config.ticket_timeout;

            for attempt in 1..=config.retry_count {
                let delay = retry_delay(&config, attempt);
                if Instant::now() + delay >= deadline {
                    break;
                }
                time::sleep(delay).await;

                trace!("resending ticket {} to {:?} (attempt {})", ticket, to, attempt);
                if let Err(e) = socket.send_to(&datagram, to).await {
                    debug!("error resending ticket {} to {:?}: {}", ticket, to, e);
                }
            }
            time::sleep_until(deadline).await;

            // a concurrent complete_ticket either aborted us before this point, or finds nothing
            if retransmissions.lock().unwrap().remove(&ticket).is_none() {
                return;
            }

            debug!("ticket {} to {:?} timed out", ticket, to);
            let handler = handler.read().await.clone();
            match handler {
                Some(handler) => handler.on_ticket_timeout(ticket, to).await,
                None => warn!("ticket {} timed out, but there is no handler to notify", ticket),
            }
        })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
            .expect("UdpSocket should have an initialized local addr")
    }

    async fn send_unreliable(&self, to: SocketAddr, datagram: &[u8]) -> anyhow::Result<()> {
        trace!("sending {} bytes to {:?}", datagram.len(), to);
        self.socket.send_to(datagram, to).await?;
        Ok(())
    }

    async fn send_ticketed(&self, to: SocketAddr, ticket: Ticket, datagram: &[u8]) -> anyhow::Result<()> {
        trace!("sending ticket {} to {:?}", ticket, to);
        self.socket.send_to(datagram, to).await?;

        // hold the lock while spawning so the task can not look for its entry before it exists
        let mut retransmissions = self.retransmissions.lock().unwrap();
        let handle = self.spawn_retransmission(to, ticket, Bytes::copy_from_slice(datagram));
        if let Some(prev) = retransmissions.insert(ticket, handle) {
            warn!("ticket {} was sent twice - dropping the first retransmission", ticket);
            prev.abort();
        }
        Ok(())
    }

    fn complete_ticket(&self, ticket: Ticket) {
        if let Some(handle) = self.retransmissions.lock().unwrap().remove(&ticket) {
            trace!("ticket {} complete - stopping retransmission", ticket);
            handle.abort();
        }
    }

    async fn broadcast(&self, to: &[SocketAddr], datagram: &[u8]) {
        for addr in to {
            if let Err(e) = self.send_unreliable(*addr, datagram).await {
                error!("error sending UDP datagram to {:?}: {}", addr, e);
            }
        }
    }

    async fn recv_loop(&self, handler: Arc<dyn DatagramHandler>) -> anyhow::Result<()> {
        *self.handler.write().await = Some(handler.clone());

        // one byte of slack to detect datagrams exceeding the maximum
        let mut buf = vec![0u8; self.config.max_datagram_size + 1];
        let mut cancel_receiver = self.cancel_sender.subscribe();

        debug!("starting UDP receive loop on {:?}", self.local_addr());

        loop {
            tokio::select! {
                r = self.socket.recv_from(&mut buf) => {
                    match r {
                        Ok((len, from)) => {
                            if len > self.config.max_datagram_size {
                                warn!("received a datagram from {:?} exceeding the maximum of {} bytes - skipping", from, self.config.max_datagram_size);
                                continue;
                            }
                            trace!("received {} bytes from {:?}", len, from);
                            handler.on_datagram(&buf[..len], from).await;
                        }
                        Err(e) => {
                            // e.g. ICMP port unreachable surfacing on some platforms: not fatal
                            debug!("error receiving from datagram socket: {}", e);
                        }
                    }
                }
                _ = cancel_receiver.recv() => break,
            }
        }

        debug!("UDP receive loop on {:?} finished", self.local_addr());
        Ok(())
    }

    fn cancel_recv_loop(&self) {
        if let Err(err) = self.cancel_sender.send(()) {
            warn!(?err, "error canceling receive loop");
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        for (_, handle) in self.retransmissions.lock().unwrap().drain() {
            handle.abort();
        }
    }
}

/// delay before the n-th resend, counting from 1
pub fn retry_delay(config: &ProtocolConfig, attempt: u32) -> Duration {
    let mut delay = config.initial_retry_delay;
    for _ in 1..attempt {
        delay = min(delay * 2, config.max_retry_delay);
    }
    delay
}
