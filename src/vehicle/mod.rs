pub mod adapter;
pub mod client;
pub mod data;
pub mod events;
pub mod listeners;
pub mod messages;
pub mod registry;
pub mod server;
pub mod service;
pub mod simple_vehicle;

#[cfg(test)]
mod tests;
