use std::net::SocketAddr;

use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::messaging::command::EventCategory;

/// Peers with a countdown of remaining sweeps, plus an arbitrary value per peer.
///
/// Renewing sets the countdown to the full budget. Each sweep decrements it, and a sweep that
///  finds the countdown already at zero evicts the peer. So a lease that is not renewed survives
///  `budget` sweeps and is gone after sweep `budget + 1`.
pub struct LeaseTable<V> {
    budget: u32,
    leases: FxHashMap<SocketAddr, (u32, V)>,
}

impl <V> LeaseTable<V> {
    pub fn new(budget: u32) -> LeaseTable<V> {
        LeaseTable {
            budget,
            leases: FxHashMap::default(),
        }
    }

    /// returns `true` if the peer had no lease before
    pub fn renew(&mut self, peer: SocketAddr, value: V) -> bool {
        self.leases.insert(peer, (self.budget, value))
            .is_none()
    }

    pub fn sweep(&mut self) -> Vec<SocketAddr> {
        let mut evicted = Vec::new();
        self.leases.retain(|peer, (remaining, _)| {
            if *remaining == 0 {
                evicted.push(*peer);
                false
            }
            else {
                *remaining -= 1;
                true
            }
        });
        evicted
    }

    pub fn contains(&self, peer: &SocketAddr) -> bool {
        self.leases.contains_key(peer)
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub fn peers(&self) -> Vec<SocketAddr> {
        self.leases.keys().cloned().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&SocketAddr, &V)> {
        self.leases.iter().map(|(peer, (_, value))| (peer, value))
    }
}

/// The service's subscriptions, with a separate lock per event category so that traffic in one
///  category does not contend with another.
pub struct SubscriptionLeases {
    tables: Vec<RwLock<LeaseTable<()>>>,
}

impl SubscriptionLeases {
    pub fn new(budget: u32) -> SubscriptionLeases {
        SubscriptionLeases {
            tables: EventCategory::ALL.iter()
                .map(|_| RwLock::new(LeaseTable::new(budget)))
                .collect(),
        }
    }

    pub async fn renew(&self, category: EventCategory, peer: SocketAddr) {
        if self.tables[category.index()].write().await.renew(peer, ()) {
            debug!("new {:?} subscription from {:?}", category, peer);
        }
    }

    pub async fn sweep(&self) -> Vec<(EventCategory, SocketAddr)> {
        let mut evicted = Vec::new();
        for category in EventCategory::ALL {
            for peer in self.tables[category.index()].write().await.sweep() {
                debug!("{:?} subscription from {:?} expired", category, peer);
                evicted.push((category, peer));
            }
        }
        evicted
    }

    pub async fn subscribers(&self, category: EventCategory) -> Vec<SocketAddr> {
        self.tables[category.index()].read().await.peers()
    }

    pub async fn is_subscribed(&self, category: EventCategory, peer: &SocketAddr) -> bool {
        self.tables[category.index()].read().await.contains(peer)
    }
}
