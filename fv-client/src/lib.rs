pub mod addresses;
pub mod client;
pub mod config;
pub mod session;
pub mod shared;

pub use client::{ClientHandle, NetworkClient};
pub use config::ClientConfig;
