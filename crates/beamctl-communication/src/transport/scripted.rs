//! Scripted transport
//!
//! An in-process device stand-in: every sent line is recorded and handed to
//! a responder closure whose returned messages are queued as inbound
//! traffic. Used by tests and dry runs.

use super::{Inbound, Transport};
use async_trait::async_trait;
use beamctl_core::{ControlError, DeviceMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

type Responder = Box<dyn FnMut(&str) -> Vec<DeviceMessage> + Send>;

/// Transport answering from a script instead of a device
#[derive(Clone)]
pub struct ScriptedTransport {
    sent: Arc<Mutex<Vec<String>>>,
    inbound: Arc<Mutex<Option<mpsc::UnboundedSender<DeviceMessage>>>>,
    responder: Arc<Mutex<Responder>>,
}

impl ScriptedTransport {
    /// Create a transport whose replies come from `responder`
    pub fn new<F>(responder: F) -> (Self, Inbound)
    where
        F: FnMut(&str) -> Vec<DeviceMessage> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                inbound: Arc::new(Mutex::new(Some(tx))),
                responder: Arc::new(Mutex::new(Box::new(responder))),
            },
            rx,
        )
    }

    /// Create a transport that never answers
    pub fn silent() -> (Self, Inbound) {
        Self::new(|_| Vec::new())
    }

    /// Every line sent so far, in order
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Forget the recorded lines
    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    /// Replace the responder
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&str) -> Vec<DeviceMessage> + Send + 'static,
    {
        *self.responder.lock() = Box::new(responder);
    }

    /// Queue an unsolicited inbound message
    pub fn inject(&self, message: DeviceMessage) {
        if let Some(tx) = self.inbound.lock().as_ref() {
            let _ = tx.send(message);
        }
    }

    /// Drop the inbound channel so readers observe a closed connection
    pub fn disconnect(&self) {
        self.inbound.lock().take();
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, text: &str) -> Result<(), ControlError> {
        let tx = self
            .inbound
            .lock()
            .clone()
            .ok_or(ControlError::ConnectionLost)?;
        self.sent.lock().push(text.to_string());
        let replies = {
            let mut responder = self.responder.lock();
            (&mut **responder)(text)
        };
        for reply in replies {
            let _ = tx.send(reply);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inbound.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_replies() {
        let (transport, mut inbound) =
            ScriptedTransport::new(|line| vec![DeviceMessage::raw(format!("echo {}\n", line))]);
        transport.send("M5").await.unwrap();
        assert_eq!(transport.sent(), vec!["M5".to_string()]);
        assert_eq!(inbound.recv().await, Some(DeviceMessage::raw("echo M5\n")));

        transport.disconnect();
        assert!(!transport.is_connected());
        assert!(transport.send("M3").await.is_err());
        assert_eq!(inbound.recv().await, None);
    }
}
