pub mod command;
pub mod config;
pub mod correlator;
pub mod datagram;
pub mod error;
pub mod fragments;
pub mod leases;
pub mod peer;
pub mod ticket;
pub mod transport;
pub mod udp_transport;
