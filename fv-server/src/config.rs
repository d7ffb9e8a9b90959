use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_PORT: u16 = 9876;

#[derive(Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    pub max_connections: usize,
    /// Seconds an unreferenced player record may sit idle before it becomes
    /// collectible (see `PlayerRegistry::is_collectible`).
    pub idle_sweep_secs: u64,
    pub keep_alive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            address: format!("0.0.0.0:{}", DEFAULT_PORT),
            max_connections: 256,
            idle_sweep_secs: 300,
            keep_alive_secs: 60,
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> ServerConfig {
        serdeconv::from_toml_file(path).expect("Error loading server configuration file")
    }
}
