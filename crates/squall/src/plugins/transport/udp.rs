//! UDP datagram transport.
//!
//! Binds a UDP socket and dispatches every received datagram as one frame.

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use squall_core::config::parse_plugin_config;
use squall_core::error::ConfigError;
use squall_core::plugin::{FrameDispatcher, PluginDone, Transport};

fn default_address() -> String {
    "127.0.0.1:8642".to_string()
}

fn default_max_buffer_size() -> usize {
    16384
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct UdpConfig {
    #[serde(default = "default_address")]
    address: String,
    #[serde(default = "default_max_buffer_size")]
    max_buffer_size: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            max_buffer_size: default_max_buffer_size(),
        }
    }
}

pub struct UdpTransport {
    conf: UdpConfig,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self {
            conf: UdpConfig::default(),
        }
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn configure(&mut self, config: serde_yaml::Value) -> Result<(), ConfigError> {
        self.conf = parse_plugin_config(config)?;
        Ok(())
    }

    async fn run(&self, shutdown: CancellationToken, frames: FrameDispatcher, done: PluginDone) {
        let socket = match UdpSocket::bind(self.conf.address.as_str()).await {
            Ok(socket) => socket,
            Err(e) => {
                error!(address = %self.conf.address, error = %e, "failed binding udp socket");
                done.signal().await;
                return;
            }
        };
        info!(address = %self.conf.address, "udp transport listening");

        let mut buf = vec![0u8; self.conf.max_buffer_size];
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok((n, _peer)) => frames.dispatch(&buf[..n]).await,
                    Err(e) => {
                        error!(address = %self.conf.address, error = %e, "udp receive failed");
                        done.signal().await;
                        break;
                    }
                },
            }
        }
    }
}
