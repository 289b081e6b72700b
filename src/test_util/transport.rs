use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use crate::messaging::datagram::DatagramHeader;
use crate::messaging::ticket::Ticket;
use crate::messaging::transport::{DatagramHandler, Transport};
use crate::vehicle::messages::Request;

/// A single datagram handed to a [TrackingTransport]. Broadcasts are recorded once per destination.
#[derive(Debug, Clone, PartialEq)]
pub struct SentDatagram {
    pub to: SocketAddr,
    /// `Some` for ticketed sends, `None` for unreliable sends and broadcasts
    pub ticketed: Option<Ticket>,
    pub datagram: Bytes,
}

impl SentDatagram {
    pub fn header(&self) -> DatagramHeader {
        let mut buf = self.datagram.as_ref();
        DatagramHeader::try_deser(&mut buf)
            .expect("datagram should have a valid header")
    }

    /// decodes the datagram as a request, for datagrams sent by a client or a service announcing itself
    pub fn request(&self) -> (Ticket, Request) {
        let mut buf = self.datagram.as_ref();
        let header = DatagramHeader::try_deser(&mut buf)
            .expect("datagram should have a valid header");
        let request = Request::try_deser(header.command, &mut buf)
            .expect("datagram should contain a valid request");
        (header.ticket, request)
    }
}

/// A [Transport] that records datagrams instead of sending them. Its receive loop does nothing
///  but wait to be cancelled, so tests feed datagrams to handlers directly.
pub struct TrackingTransport {
    myself: SocketAddr,
    sent: Mutex<Vec<SentDatagram>>,
    completed: Mutex<Vec<Ticket>>,
    failing: AtomicBool,
    cancelled: Notify,
}

impl TrackingTransport {
    pub fn new(myself: SocketAddr) -> Arc<TrackingTransport> {
        Arc::new(TrackingTransport {
            myself,
            sent: Default::default(),
            completed: Default::default(),
            failing: AtomicBool::new(false),
            cancelled: Notify::new(),
        })
    }

    /// make all subsequent sends fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentDatagram> {
        self.sent.lock().unwrap().clone()
    }

    pub fn take_sent(&self) -> Vec<SentDatagram> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn completed_tickets(&self) -> Vec<Ticket> {
        self.completed.lock().unwrap().clone()
    }

    fn record(&self, to: SocketAddr, ticketed: Option<Ticket>, datagram: &[u8]) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("simulated send failure");
        }
        self.sent.lock().unwrap().push(SentDatagram {
            to,
            ticketed,
            datagram: Bytes::copy_from_slice(datagram),
        });
        Ok(())
    }
}

#[async_trait]
impl Transport for TrackingTransport {
    fn local_addr(&self) -> SocketAddr {
        self.myself
    }

    async fn send_unreliable(&self, to: SocketAddr, datagram: &[u8]) -> anyhow::Result<()> {
        self.record(to, None, datagram)
    }

    async fn send_ticketed(&self, to: SocketAddr, ticket: Ticket, datagram: &[u8]) -> anyhow::Result<()> {
        self.record(to, Some(ticket), datagram)
    }

    fn complete_ticket(&self, ticket: Ticket) {
        self.completed.lock().unwrap().push(ticket);
    }

    async fn broadcast(&self, to: &[SocketAddr], datagram: &[u8]) {
        for addr in to {
            let _ = self.record(*addr, None, datagram);
        }
    }

    async fn recv_loop(&self, _handler: Arc<dyn DatagramHandler>) -> anyhow::Result<()> {
        self.cancelled.notified().await;
        Ok(())
    }

    fn cancel_recv_loop(&self) {
        self.cancelled.notify_waiters();
    }
}
