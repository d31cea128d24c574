//! Unix datagram socket transport.
//!
//! Binds a datagram socket at a configured filesystem path and dispatches
//! every received datagram as one frame. A stale socket file left by a
//! previous run is removed before binding.

use async_trait::async_trait;
use tokio::net::UnixDatagram;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use squall_core::config::parse_plugin_config;
use squall_core::error::ConfigError;
use squall_core::plugin::{FrameDispatcher, PluginDone, Transport};

fn default_max_buffer_size() -> usize {
    16384
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocketConfig {
    #[serde(default)]
    path: String,
    #[serde(default = "default_max_buffer_size")]
    max_buffer_size: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            max_buffer_size: default_max_buffer_size(),
        }
    }
}

pub struct SocketTransport {
    conf: SocketConfig,
}

impl SocketTransport {
    pub fn new() -> Self {
        Self {
            conf: SocketConfig::default(),
        }
    }
}

impl Default for SocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn configure(&mut self, config: serde_yaml::Value) -> Result<(), ConfigError> {
        let conf: SocketConfig = parse_plugin_config(config)?;
        if conf.path.is_empty() {
            return Err(ConfigError::InvalidFields {
                fields: "path".into(),
            });
        }
        self.conf = conf;
        Ok(())
    }

    async fn run(&self, shutdown: CancellationToken, frames: FrameDispatcher, done: PluginDone) {
        let path = std::path::Path::new(&self.conf.path);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                error!(path = %self.conf.path, error = %e, "failed removing stale socket file");
                done.signal().await;
                return;
            }
        }

        let socket = match UnixDatagram::bind(path) {
            Ok(socket) => socket,
            Err(e) => {
                error!(path = %self.conf.path, error = %e, "failed binding unix socket");
                done.signal().await;
                return;
            }
        };
        info!(path = %self.conf.path, "socket transport listening");

        let mut buf = vec![0u8; self.conf.max_buffer_size];
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = socket.recv(&mut buf) => match received {
                    Ok(n) => frames.dispatch(&buf[..n]).await,
                    Err(e) => {
                        error!(path = %self.conf.path, error = %e, "socket receive failed");
                        done.signal().await;
                        break;
                    }
                },
            }
        }

        let _ = std::fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_requires_path() {
        let mut transport = SocketTransport::new();
        let err = transport.configure(serde_yaml::Value::Null).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFields { .. }));
    }

    #[test]
    fn test_configure_parses_fields() {
        let mut transport = SocketTransport::new();
        let blob: serde_yaml::Value =
            serde_yaml::from_str("path: /tmp/squall.sock\nmaxBufferSize: 1024").unwrap();
        transport.configure(blob).unwrap();
        assert_eq!(transport.conf.path, "/tmp/squall.sock");
        assert_eq!(transport.conf.max_buffer_size, 1024);
    }

    #[test]
    fn test_configure_defaults_buffer_size() {
        let mut transport = SocketTransport::new();
        let blob: serde_yaml::Value = serde_yaml::from_str("path: /tmp/squall.sock").unwrap();
        transport.configure(blob).unwrap();
        assert_eq!(transport.conf.max_buffer_size, 16384);
    }
}
