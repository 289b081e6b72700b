use std::sync::Arc;

use tokio::sync::mpsc;

use crate::vehicle::events::VehicleEvent;
use crate::vehicle::listeners::VehicleListener;

/// A [VehicleListener] that forwards every event into an unbounded channel.
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<VehicleEvent>,
}

impl ChannelListener {
    pub fn new() -> (Arc<ChannelListener>, mpsc::UnboundedReceiver<VehicleEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(ChannelListener { sender }), receiver)
    }
}

impl VehicleListener for ChannelListener {
    fn on_event(&self, event: &VehicleEvent) {
        // a test that stopped receiving does not care
        let _ = self.sender.send(event.clone());
    }
}
