use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

use crate::messaging::ticket::Ticket;

/// The datagram layer underneath the vehicle protocol.
///
/// Plain sends are fire-and-forget. Ticketed sends are retried by the transport until either the
///  protocol layer reports the ticket complete via [Transport::complete_ticket] (because a
///  response arrived), or the retry budget and timeout are exhausted, in which case the transport
///  calls [DatagramHandler::on_ticket_timeout] exactly once.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn local_addr(&self) -> SocketAddr;

    async fn send_unreliable(&self, to: SocketAddr, datagram: &[u8]) -> anyhow::Result<()>;

    async fn send_ticketed(&self, to: SocketAddr, ticket: Ticket, datagram: &[u8]) -> anyhow::Result<()>;

    fn complete_ticket(&self, ticket: Ticket);

    /// Sends the same datagram to each of the destinations independently. Failures for one
    ///  destination do not affect the others, and they are logged rather than returned.
    async fn broadcast(&self, to: &[SocketAddr], datagram: &[u8]);

    async fn recv_loop(&self, handler: Arc<dyn DatagramHandler>) -> anyhow::Result<()>;

    fn cancel_recv_loop(&self);
}

/// This trait decouples the transport from what happens to a datagram once it is received.
///
/// It is passed around as an `Arc<dyn ...>` to minimize dependencies of [Transport] implementations.
#[async_trait]
pub trait DatagramHandler: Send + Sync {
    async fn on_datagram(&self, datagram: &[u8], from: SocketAddr);

    async fn on_ticket_timeout(&self, ticket: Ticket, to: SocketAddr);
}
