use serde::{Deserialize, Serialize};
use std::path::Path;

/// Matches `fv-server`'s `DEFAULT_PORT`; the two binaries live in separate
/// crates so this is a deliberate small duplication rather than a dependency
/// from client to server.
pub const DEFAULT_PORT: u16 = 9876;

#[derive(Serialize, Deserialize)]
pub struct ClientConfig {
    /// Hosts to try, each optionally `host:port`. Tried round-robin with
    /// exponential backoff (see `fv_client::addresses::AddressList`).
    pub hosts: Vec<String>,
    pub keep_alive_secs: u64,
    /// Where the server-assigned player id is persisted across process
    /// restarts so a relaunch can `RECONNECT` instead of `NEW_PLAYER`.
    pub saved_id_path: String,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            hosts: vec![format!("127.0.0.1:{}", DEFAULT_PORT)],
            keep_alive_secs: 60,
            saved_id_path: "fv-client-id.txt".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> ClientConfig {
        serdeconv::from_toml_file(path).expect("Error loading client configuration file")
    }
}

/// Reads a previously saved player id, if the file exists and parses.
pub fn load_saved_id<P: AsRef<Path>>(path: P) -> Option<u64> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

pub fn save_id<P: AsRef<Path>>(path: P, id: u64) {
    let _ = std::fs::write(path, id.to_string());
}
