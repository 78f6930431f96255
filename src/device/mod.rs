pub mod bridge;
pub mod btle;
pub mod catalog;
pub mod connection;
pub mod constants;
pub mod decoder;
pub mod monitor;
pub mod scan;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;
