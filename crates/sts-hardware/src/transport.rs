//! Explicitly owned transport context.
//!
//! A session opens one [`TransportContext`], hands the links it produces to
//! the drivers, and closes it when the session ends. Nothing in the workspace
//! keeps transport state in statics.
//!
//! | interface | stream |
//! |---|---|
//! | LAN  | TCP socket to the instrument |
//! | USB  | serial port (`tokio-serial`) |
//! | GPIB | TCP socket to a GPIB-Ethernet bridge, addressed with `++addr` |

use crate::scpi::ScpiLink;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use sts_core::config::{EndpointConfig, InstrumentsConfig, TimeoutConfig};
use sts_core::device::supports_interface;
use sts_core::{DeviceKind, StsError, StsResult};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;
use tokio::time::timeout;
use tokio_serial::SerialPortBuilderExt;

/// Timeout for establishing a TCP connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Owner of every open instrument link of a session.
pub struct TransportContext {
    instruments: InstrumentsConfig,
    command_timeout: Duration,
    links: Mutex<HashMap<DeviceKind, Arc<ScpiLink>>>,
}

impl TransportContext {
    /// Create a context for the configured endpoints. No link is opened yet.
    pub fn open(instruments: InstrumentsConfig, timeouts: &TimeoutConfig) -> Self {
        tracing::info!("Transport context opened");
        Self {
            instruments,
            command_timeout: timeouts.command(),
            links: Mutex::new(HashMap::new()),
        }
    }

    /// Endpoint configured for a device.
    pub fn endpoint(&self, kind: DeviceKind) -> &EndpointConfig {
        self.instruments.endpoint(kind)
    }

    /// Link to a device, opened on first use.
    pub async fn link(&self, kind: DeviceKind) -> StsResult<Arc<ScpiLink>> {
        let mut links = self.links.lock().await;
        if let Some(link) = links.get(&kind) {
            return Ok(link.clone());
        }
        let link = Arc::new(self.connect(kind).await?);
        links.insert(kind, link.clone());
        Ok(link)
    }

    /// Drop the link to one device.
    pub async fn release(&self, kind: DeviceKind) {
        if self.links.lock().await.remove(&kind).is_some() {
            tracing::debug!(device = %kind, "Link released");
        }
    }

    /// Number of open links.
    pub async fn open_links(&self) -> usize {
        self.links.lock().await.len()
    }

    /// Close every link.
    pub async fn close(&self) {
        let mut links = self.links.lock().await;
        let count = links.len();
        links.clear();
        tracing::info!(links = count, "Transport context closed");
    }

    async fn connect(&self, kind: DeviceKind) -> StsResult<ScpiLink> {
        let endpoint = self.instruments.endpoint(kind).clone();
        if !supports_interface(kind, endpoint.interface()) {
            return Err(StsError::connection(
                kind,
                format!("{} is not a supported interface", endpoint.interface()),
            ));
        }
        tracing::info!(device = %kind, %endpoint, "Connecting");

        let link = match endpoint {
            EndpointConfig::Lan { host, port } => {
                let stream = tcp_connect(kind, &host, port).await?;
                // Santec instruments terminate LAN commands with CR only.
                ScpiLink::new(kind, stream).with_terminator("\r")
            }
            EndpointConfig::Gpib {
                bridge_host,
                bridge_port,
                address,
            } => {
                let mut stream = tcp_connect(kind, &bridge_host, bridge_port).await?;
                let setup = format!("++mode 1\n++addr {address}\n++auto 1\n++eos 1\n");
                stream.write_all(setup.as_bytes()).await.map_err(|e| {
                    StsError::connection(kind, format!("GPIB bridge setup failed: {e}"))
                })?;
                ScpiLink::new(kind, stream).with_terminator("\r\n")
            }
            EndpointConfig::Usb { port, baud_rate } => {
                let path = port.clone();
                let serial = spawn_blocking(move || {
                    tokio_serial::new(&path, baud_rate)
                        .data_bits(tokio_serial::DataBits::Eight)
                        .parity(tokio_serial::Parity::None)
                        .stop_bits(tokio_serial::StopBits::One)
                        .flow_control(tokio_serial::FlowControl::None)
                        .open_native_async()
                })
                .await
                .map_err(|e| StsError::connection(kind, format!("serial open task failed: {e}")))?
                .map_err(|e| StsError::connection(kind, format!("failed to open {port}: {e}")))?;
                ScpiLink::new(kind, serial).with_terminator("\r")
            }
        };
        Ok(link.with_timeout(self.command_timeout))
    }
}

async fn tcp_connect(kind: DeviceKind, host: &str, port: u16) -> StsResult<TcpStream> {
    let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
        .await
        .map_err(|_| StsError::connection(kind, format!("connection timeout to {host}:{port}")))?
        .map_err(|e| StsError::connection(kind, format!("failed to connect to {host}:{port}: {e}")))?;
    stream
        .set_nodelay(true)
        .map_err(|e| StsError::connection(kind, e.to_string()))?;
    Ok(stream)
}
