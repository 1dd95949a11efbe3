use crate::error::{DeviceError, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// One read from the line transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    /// A complete line, stripped of its terminator and telnet NUL padding
    Line(String),
    /// The peer closed the connection; fatal to the transport
    Eof,
}

/// Newline-delimited text transport over a TCP stream
///
/// Knows nothing about the protocol spoken on top of it: it opens the
/// stream, writes terminated lines, and reads lines under a deadline.
pub struct LineTransport {
    identifier: &'static str,
    reader: BufReader<OwnedReadHalf>,
    writer: Option<OwnedWriteHalf>,
}

impl LineTransport {
    /// Open a stream to `addr`, bounded by `open_timeout`
    pub async fn open(
        addr: &str,
        open_timeout: Duration,
        identifier: &'static str,
    ) -> Result<Self> {
        tracing::debug!("{} - connecting to {}", identifier, addr);
        let stream = timeout(open_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| DeviceError::Timeout("transport open"))?
            .map_err(|e| DeviceError::Connection(format!("failed to connect to {}: {}", addr, e)))?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            identifier,
            reader: BufReader::new(read_half),
            writer: Some(write_half),
        })
    }

    /// Send one command line, appending the terminator
    pub async fn send(&mut self, line: &str) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(DeviceError::Closed)?;
        tracing::debug!("{} - sending {}", self.identifier, line);
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one full line, or fail with `Timeout` when the deadline elapses
    ///
    /// Peer close is reported as `LineRead::Eof`, a distinguished signal the
    /// caller must treat as fatal rather than as an empty read.
    pub async fn receive(&mut self, read_timeout: Duration) -> Result<LineRead> {
        let mut buf = String::new();
        match timeout(read_timeout, self.reader.read_line(&mut buf)).await {
            Err(_) => Err(DeviceError::Timeout("line read")),
            Ok(Err(e)) => Err(DeviceError::Io(e)),
            Ok(Ok(0)) => {
                tracing::debug!("{} - peer closed the connection", self.identifier);
                Ok(LineRead::Eof)
            }
            Ok(Ok(_)) => {
                // Telnet servers pad with NULs; strip them with the terminator.
                let line: String = buf
                    .trim_end_matches(['\r', '\n'])
                    .chars()
                    .filter(|&c| c != '\0')
                    .collect();
                tracing::debug!("{} - received {}", self.identifier, line);
                Ok(LineRead::Line(line))
            }
        }
    }

    /// Close the transport; idempotent
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }
}
