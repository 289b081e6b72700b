use std::time::Duration;
use anyhow::bail;

#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// period of both the client's listener registrations and the service's lease sweep
    pub registration_interval: Duration,
    /// number of sweeps a subscription survives without being renewed
    pub lease_budget: u32,

    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// resends of a ticketed datagram after the initial send
    pub retry_count: u32,
    /// Overall time a ticketed request may take, measured from the initial send. When it elapses
    ///  without a response, the request fails with a timeout.
    pub ticket_timeout: Duration,

    pub initial_datagram_size: usize,
    /// hard limit: encoding a datagram longer than this fails locally
    pub max_datagram_size: usize,

    /// maximum image payload bytes per fragment
    pub max_fragment_payload: usize,
    pub max_image_fragments: usize,
    /// Image fragments whose sequence number is at most this far behind the sequence currently
    ///  being reassembled are considered late arrivals and dropped. Anything further off is
    ///  treated as a new stream, e.g. from a restarted service.
    pub stale_sequence_window: u32,

    /// name announced to registries
    pub service_name: String,
}

impl ProtocolConfig {
    pub fn new() -> ProtocolConfig {
        ProtocolConfig {
            registration_interval: Duration::from_millis(1000),
            lease_budget: 5,
            initial_retry_delay: Duration::from_millis(200),
            max_retry_delay: Duration::from_millis(1600),
            retry_count: 4,
            ticket_timeout: Duration::from_secs(10),
            initial_datagram_size: 512,
            max_datagram_size: 4096,
            max_fragment_payload: 512,
            max_image_fragments: 1024,
            stale_sequence_window: 16,
            service_name: "Vehicle".to_string(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.registration_interval.is_zero() {
            bail!("registration interval must be positive");
        }
        if self.lease_budget == 0 {
            bail!("lease budget must be positive");
        }
        if self.ticket_timeout < self.initial_retry_delay {
            bail!("ticket timeout is shorter than the first retry delay");
        }
        if self.max_retry_delay < self.initial_retry_delay {
            bail!("max retry delay is shorter than the initial retry delay");
        }
        if self.max_datagram_size < self.initial_datagram_size {
            bail!("max datagram size is smaller than the initial datagram size");
        }
        // fragment header: token (2 + 2 bytes), ticket, sequence, total, index, length
        if self.max_fragment_payload == 0 || self.max_fragment_payload + 4 + 8 + 16 > self.max_datagram_size {
            bail!("fragment payload of {} bytes does not fit a datagram of {} bytes", self.max_fragment_payload, self.max_datagram_size);
        }
        if self.max_image_fragments == 0 || self.max_image_fragments > i32::MAX as usize {
            bail!("max image fragments must be between 1 and {}", i32::MAX);
        }
        if self.stale_sequence_window >= i32::MAX as u32 {
            bail!("stale sequence window must be smaller than half the sequence space");
        }
        Ok(())
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig::new()
    }
}
