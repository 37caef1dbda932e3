//! TCP transport
//!
//! Line-oriented text over a TCP socket. A reader task splits inbound bytes
//! into lines and classifies each one; writes are serialized by a mutex on
//! the write half.

use super::{Inbound, Transport};
use async_trait::async_trait;
use beamctl_core::{ConnectionError, ControlError, DeviceMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// TCP connection to a device
pub struct TcpTransport {
    address: String,
    writer: Mutex<OwnedWriteHalf>,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl TcpTransport {
    /// Connect to `host:port`, failing after `timeout`
    pub async fn connect(
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<(Self, Inbound), ConnectionError> {
        let address = format!("{}:{}", host, port);
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ConnectionError::FailedToConnect {
                    address,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ConnectionError::ConnectionTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        };
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        let reader_connected = connected.clone();
        let reader_address = address.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        tracing::debug!("<< {}", line);
                        if tx.send(DeviceMessage::from_line(&line)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Connection to {} closed by device", reader_address);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Read from {} failed: {}", reader_address, e);
                        break;
                    }
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
        });

        tracing::info!("Connected to {}", address);
        Ok((
            Self {
                address,
                writer: Mutex::new(write_half),
                connected,
                reader,
            },
            rx,
        ))
    }

    /// Remote address of this connection
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, text: &str) -> Result<(), ControlError> {
        if !self.is_connected() {
            return Err(ControlError::ConnectionLost);
        }
        tracing::debug!(">> {}", text);
        let mut writer = self.writer.lock().await;
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ControlError::Transport {
                reason: e.to_string(),
            })?;
        writer.flush().await.map_err(|e| ControlError::Transport {
            reason: e.to_string(),
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_round_trip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            let received = String::from_utf8_lossy(&buf[..n]).to_string();
            socket.write_all(b"ok\r\n").await.unwrap();
            received
        });

        let (transport, mut inbound) =
            TcpTransport::connect("127.0.0.1", port, Duration::from_secs(2))
                .await
                .unwrap();
        transport.send("$X").await.unwrap();

        assert_eq!(inbound.recv().await, Some(DeviceMessage::raw("ok\n")));
        assert_eq!(server.await.unwrap(), "$X\n");
    }
}
