use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:80";
/// Browsers connect to `ws://<host>:81/`.
pub const DEFAULT_WS_ADDR: &str = "0.0.0.0:81";
pub const DEFAULT_ROTATION_SECS: u64 = 10;
pub const DEFAULT_ACK_TIMEOUT_SECS: u64 = 5;
/// Reported as the size of the file system in listings.
pub const DEFAULT_FS_CAPACITY: u64 = 1_441_792;

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub http_addr: SocketAddr,
    pub ws_addr: SocketAddr,
    /// Root of the device file system: settings, local messages, web assets.
    pub data_dir: PathBuf,
    pub rotation_interval: Duration,
    /// How long a pushed `callJsFunction` may stay unanswered.
    pub ack_timeout: Duration,
    pub fs_capacity: u64,
    pub per_client_buffer: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 80)),
            ws_addr: SocketAddr::from(([0, 0, 0, 0], 81)),
            data_dir: PathBuf::from("data"),
            rotation_interval: Duration::from_secs(DEFAULT_ROTATION_SECS),
            ack_timeout: Duration::from_secs(DEFAULT_ACK_TIMEOUT_SECS),
            fs_capacity: DEFAULT_FS_CAPACITY,
            per_client_buffer: 64,
        }
    }
}

impl DeviceConfig {
    /// Defaults for a device rooted at `data_dir`, listening on ephemeral
    /// loopback ports.
    pub fn local(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ws_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Scan period for unanswered invocations.
    pub fn recycle_interval(&self) -> Duration {
        (self.ack_timeout / 5).max(Duration::from_millis(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_browser_ports() {
        let config = DeviceConfig::default();
        assert_eq!(config.http_addr, DEFAULT_HTTP_ADDR.parse().expect("addr"));
        assert_eq!(config.ws_addr, DEFAULT_WS_ADDR.parse().expect("addr"));
        assert_eq!(config.ack_timeout, Duration::from_secs(5));
        assert_eq!(config.recycle_interval(), Duration::from_secs(1));
    }

    #[test]
    fn local_config_binds_ephemeral_loopback_ports() {
        let config = DeviceConfig::local("/tmp/ticker");
        assert_eq!(config.ws_addr.port(), 0);
        assert!(config.http_addr.ip().is_loopback());
        assert_eq!(config.data_dir, PathBuf::from("/tmp/ticker"));
    }
}
