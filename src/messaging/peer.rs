use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::messaging::transport::{DatagramHandler, Transport};

/// The background tasks of a running protocol peer: the transport's receive loop and the peer's
///  periodic task. Dropping this (or calling [PeerTasks::shutdown]) stops both.
pub struct PeerTasks {
    transport: Arc<dyn Transport>,
    recv_loop: JoinHandle<()>,
    periodic: JoinHandle<()>,
}

impl PeerTasks {
    pub fn spawn(
        transport: Arc<dyn Transport>,
        handler: Arc<dyn DatagramHandler>,
        periodic: impl Future<Output = ()> + Send + 'static,
    ) -> PeerTasks {
        let t = transport.clone();
        let recv_loop = tokio::spawn(async move {
            match t.recv_loop(handler).await {
                Ok(()) => info!("shutting down receiver"),
                Err(e) => error!("receive loop failed: {}", e),
            }
        });

        PeerTasks {
            transport,
            recv_loop,
            periodic: tokio::spawn(periodic),
        }
    }

    pub fn shutdown(self) {
        // the actual work is done in drop()
    }
}

impl Drop for PeerTasks {
    fn drop(&mut self) {
        self.transport.cancel_recv_loop();
        self.periodic.abort();
        self.recv_loop.abort();
    }
}
