//! Line-oriented command link.
//!
//! All three instruments speak line-terminated ASCII. A [`ScpiLink`] owns one
//! byte stream (TCP socket, serial port or GPIB bridge socket), serializes
//! access through a mutex and bounds every response read.

use std::sync::Arc;
use std::time::Duration;
use sts_core::{DeviceKind, InstrumentStatus, StsError, StsResult};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Byte stream a link can run over.
pub trait LinkIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> LinkIo for T {}

type DynStream = Box<dyn LinkIo>;
type SharedStream = Arc<Mutex<BufReader<DynStream>>>;

/// Default response timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Async command/response link to one instrument.
pub struct ScpiLink {
    device: DeviceKind,
    stream: SharedStream,
    timeout: Duration,
    write_terminator: &'static str,
    read_terminator: u8,
}

impl std::fmt::Debug for ScpiLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScpiLink")
            .field("device", &self.device)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ScpiLink {
    /// Wrap an already opened stream.
    pub fn new<S: LinkIo + 'static>(device: DeviceKind, stream: S) -> Self {
        Self {
            device,
            stream: Arc::new(Mutex::new(BufReader::new(Box::new(stream)))),
            timeout: DEFAULT_TIMEOUT,
            write_terminator: "\r\n",
            read_terminator: b'\n',
        }
    }

    /// Set the response timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the terminator appended to every command. Responses are read up to
    /// its last byte.
    pub fn with_terminator(mut self, terminator: &'static str) -> Self {
        self.write_terminator = terminator;
        self.read_terminator = terminator.bytes().last().unwrap_or(b'\n');
        self
    }

    /// Device the link talks to.
    pub fn device(&self) -> DeviceKind {
        self.device
    }

    /// Send a command without expecting a response.
    pub async fn write(&self, command: &str) -> StsResult<()> {
        let mut stream = self.stream.lock().await;
        tracing::debug!(device = %self.device, command, "write");
        self.send(&mut stream, command).await
    }

    /// Send a query and read one line of response.
    pub async fn query(&self, query: &str) -> StsResult<String> {
        let mut stream = self.stream.lock().await;

        // Stale bytes from an earlier timed-out exchange would be read as our answer.
        let stale = stream.buffer().len();
        if stale > 0 {
            tracing::debug!(device = %self.device, stale, "Discarding buffered bytes");
            stream.consume(stale);
        }

        tracing::debug!(device = %self.device, query, "query");
        self.send(&mut stream, query).await?;

        let mut response = Vec::new();
        let result = timeout(
            self.timeout,
            stream.read_until(self.read_terminator, &mut response),
        )
        .await;
        match result {
            Ok(Ok(0)) => Err(self.failure(
                InstrumentStatus::CommunicationFailure,
                format!("connection closed while waiting for '{query}'"),
            )),
            Ok(Ok(_)) => {
                let trimmed = String::from_utf8_lossy(&response).trim().to_string();
                tracing::debug!(device = %self.device, response = %trimmed, "response");
                Ok(trimmed)
            }
            Ok(Err(e)) => Err(self.failure(
                InstrumentStatus::IoException,
                format!("read failed for '{query}': {e}"),
            )),
            Err(_) => Err(self.failure(
                InstrumentStatus::TimeOut,
                format!("no response to '{query}' within {} ms", self.timeout.as_millis()),
            )),
        }
    }

    /// Query a floating point value.
    pub async fn query_f64(&self, query: &str) -> StsResult<f64> {
        let response = self.query(query).await?;
        parse_f64(&response).ok_or_else(|| {
            self.failure(
                InstrumentStatus::DeviceError,
                format!("'{response}' is not a number (query '{query}')"),
            )
        })
    }

    /// Query an integer value.
    pub async fn query_i64(&self, query: &str) -> StsResult<i64> {
        let response = self.query(query).await?;
        response.trim().parse::<i64>().map_err(|_| {
            self.failure(
                InstrumentStatus::DeviceError,
                format!("'{response}' is not an integer (query '{query}')"),
            )
        })
    }

    /// Query a comma separated list of numbers.
    pub async fn query_list(&self, query: &str) -> StsResult<Vec<f64>> {
        let response = self.query(query).await?;
        parse_list(&response).ok_or_else(|| {
            self.failure(
                InstrumentStatus::CountMismatch,
                format!("malformed list in response to '{query}'"),
            )
        })
    }

    async fn send(&self, stream: &mut BufReader<DynStream>, command: &str) -> StsResult<()> {
        let line = format!("{command}{}", self.write_terminator);
        let io = async {
            stream.get_mut().write_all(line.as_bytes()).await?;
            stream.get_mut().flush().await
        };
        match timeout(self.timeout, io).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(self.failure(
                InstrumentStatus::IoException,
                format!("write of '{command}' failed: {e}"),
            )),
            Err(_) => Err(self.failure(
                InstrumentStatus::TimeOut,
                format!("write of '{command}' timed out"),
            )),
        }
    }

    fn failure(&self, status: InstrumentStatus, message: String) -> StsError {
        StsError::device(self.device, status, message)
    }
}

/// Parse a number, tolerating a leading `+`.
pub fn parse_f64(text: &str) -> Option<f64> {
    text.trim().trim_start_matches('+').parse::<f64>().ok()
}

/// Parse a comma separated list of numbers. An empty string is an empty list.
pub fn parse_list(text: &str) -> Option<Vec<f64>> {
    let text = text.trim();
    if text.is_empty() {
        return Some(Vec::new());
    }
    text.split(',').map(parse_f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn query_writes_terminated_command_and_reads_line() {
        let (mut host, device) = tokio::io::duplex(256);
        let link = ScpiLink::new(DeviceKind::Tsl, device);

        let responder = tokio::spawn(async move {
            let mut buf = vec![0u8; 64];
            let n = host.read(&mut buf).await.unwrap();
            host.write_all(b"1550.000\r\n").await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let value = link.query_f64(":WAV?").await.unwrap();
        assert_eq!(value, 1550.0);
        assert_eq!(responder.await.unwrap(), ":WAV?\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_times_out() {
        let (_host, device) = tokio::io::duplex(256);
        let link = ScpiLink::new(DeviceKind::Mpm, device).with_timeout(Duration::from_millis(100));
        let err = link.query("STAT?").await.unwrap_err();
        assert!(matches!(
            err,
            StsError::Device {
                device: DeviceKind::Mpm,
                status: InstrumentStatus::TimeOut,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn closed_stream_is_communication_failure() {
        let (host, device) = tokio::io::duplex(256);
        let link = ScpiLink::new(DeviceKind::Spu, device);
        drop(host);
        let err = link.query("SAMP:STAT?").await.unwrap_err();
        assert_eq!(err.device_kind(), Some(DeviceKind::Spu));
    }

    #[test]
    fn lists_parse() {
        assert_eq!(parse_list("1,+2.5,-3E-1"), Some(vec![1.0, 2.5, -0.3]));
        assert_eq!(parse_list(""), Some(vec![]));
        assert_eq!(parse_list("1,x"), None);
    }
}
