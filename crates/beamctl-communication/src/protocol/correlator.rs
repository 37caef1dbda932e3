//! Response correlator
//!
//! Routes inbound device messages to the single request waiting for them.
//! An exchange holds the inbound receiver for its whole lifetime, so at
//! most one request listens at a time and its listener is gone before its
//! result is delivered. Terminal conditions are checked in this order:
//!
//! 1. Fatal notification
//! 2. Error notification
//! 3. Matcher verdict
//! 4. Inactivity timeout

use super::matcher::{ExchangeOptions, ResponseMatcher, Verdict};
use crate::transport::{Inbound, Transport};
use beamctl_core::{ControlError, DeviceMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Default inactivity timeout for a request
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Callback receiving progress notifications
pub type ProgressListener = Arc<dyn Fn(&DeviceMessage) + Send + Sync>;

/// Correlates requests with their responses on one connection
pub struct ResponseCorrelator {
    transport: Arc<dyn Transport>,
    inbound: Mutex<Inbound>,
    progress: parking_lot::RwLock<Option<ProgressListener>>,
    default_timeout: Duration,
}

impl ResponseCorrelator {
    /// Create a correlator over a transport and its inbound channel
    pub fn new(transport: Arc<dyn Transport>, inbound: Inbound) -> Self {
        Self {
            transport,
            inbound: Mutex::new(inbound),
            progress: parking_lot::RwLock::new(None),
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Override the timeout used when a request does not set one
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Install the progress listener, replacing any previous one
    pub fn set_progress_listener(&self, listener: Option<ProgressListener>) {
        *self.progress.write() = listener;
    }

    /// The transport this correlator sends through
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Send without waiting for a response
    pub async fn send_only(&self, text: &str) -> Result<(), ControlError> {
        self.transport.send(text).await
    }

    /// Send the matcher's command and wait for its terminal response
    pub async fn exchange<M>(
        &self,
        mut matcher: M,
        options: ExchangeOptions,
    ) -> Result<M::Output, ControlError>
    where
        M: ResponseMatcher,
    {
        let mut inbound = self.inbound.lock().await;
        discard_pending(&mut inbound, false)?;

        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let mut retries = 0u32;
        self.transport.send(&matcher.command()).await?;

        loop {
            let message = match tokio::time::timeout(timeout, inbound.recv()).await {
                Err(_) => {
                    return Err(ControlError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
                Ok(None) => return Err(ControlError::ConnectionLost),
                Ok(Some(message)) => message,
            };

            if let Some(err) = failure_of(&message) {
                return Err(err);
            }
            if let DeviceMessage::Progress(_) = message {
                if let Some(listener) = self.progress.read().clone() {
                    listener(&message);
                }
                continue;
            }

            match matcher.on_message(&message) {
                Verdict::Pending => {}
                Verdict::Done(output) => return Ok(output),
                Verdict::Fail(err) => return Err(err),
                Verdict::Retry(err) => {
                    if retries >= options.retry.max_retries {
                        return Err(err);
                    }
                    retries += 1;
                    tracing::warn!(
                        "Retrying command ({}/{}) after: {}",
                        retries,
                        options.retry.max_retries,
                        err
                    );
                    tokio::time::sleep(options.retry.backoff).await;
                    discard_pending(&mut inbound, true)?;
                    matcher.reset();
                    self.transport.send(&matcher.command()).await?;
                }
                Verdict::Resend => {
                    matcher.reset();
                    self.transport.send(&matcher.command()).await?;
                }
            }
        }
    }
}

fn failure_of(message: &DeviceMessage) -> Option<ControlError> {
    match message {
        DeviceMessage::Fatal(_) => {
            tracing::error!("Fatal device notification: {}", message.text());
            Some(ControlError::Fatal {
                payload: message.text(),
            })
        }
        DeviceMessage::Error(_) => Some(ControlError::DeviceError {
            response: message.text(),
        }),
        _ => None,
    }
}

/// Drop messages nobody is waiting for
///
/// With `fail_on_error`, a failure notification among them still ends the
/// current request.
fn discard_pending(inbound: &mut Inbound, fail_on_error: bool) -> Result<(), ControlError> {
    while let Ok(message) = inbound.try_recv() {
        if fail_on_error {
            if let Some(err) = failure_of(&message) {
                return Err(err);
            }
        }
        tracing::debug!("Discarding unsolicited message: {:?}", message);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::matcher::{AnyReply, RawOk, RetryPolicy};
    use crate::transport::ScriptedTransport;
    use serde_json::json;

    fn correlator(transport: &ScriptedTransport, inbound: Inbound) -> ResponseCorrelator {
        ResponseCorrelator::new(Arc::new(transport.clone()), inbound)
    }

    #[tokio::test]
    async fn test_fatal_beats_matcher() {
        let (transport, inbound) = ScriptedTransport::new(|_| {
            vec![
                DeviceMessage::Fatal(json!({"status": "fatal", "info": "halted"})),
                DeviceMessage::raw("ok\n"),
            ]
        });
        let correlator = correlator(&transport, inbound);
        let result = correlator
            .exchange(AnyReply::new("$X"), ExchangeOptions::default())
            .await;
        assert_eq!(
            result,
            Err(ControlError::Fatal {
                payload: "halted".into()
            })
        );
    }

    #[tokio::test]
    async fn test_error_notification_rejects() {
        let (transport, inbound) = ScriptedTransport::new(|_| {
            vec![DeviceMessage::Error(json!({"status": "error", "error": "BUSY"}))]
        });
        let correlator = correlator(&transport, inbound);
        let result = correlator
            .exchange(RawOk::new("M5"), ExchangeOptions::default())
            .await;
        assert!(matches!(result, Err(ControlError::DeviceError { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_uses_override() {
        let (transport, inbound) = ScriptedTransport::silent();
        let correlator = correlator(&transport, inbound);
        let result = correlator
            .exchange(RawOk::new("$X"), ExchangeOptions::with_timeout(500))
            .await;
        assert_eq!(result, Err(ControlError::Timeout { timeout_ms: 500 }));
    }

    #[tokio::test]
    async fn test_stale_messages_are_not_attributed() {
        let (transport, inbound) = ScriptedTransport::new(|cmd| {
            vec![DeviceMessage::raw(format!("reply to {}\n", cmd))]
        });
        transport.inject(DeviceMessage::raw("late reply\n"));
        let correlator = correlator(&transport, inbound);
        let reply = correlator
            .exchange(AnyReply::new("G1X1"), ExchangeOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, DeviceMessage::raw("reply to G1X1\n"));
    }

    #[tokio::test]
    async fn test_progress_goes_to_listener() {
        let (transport, inbound) = ScriptedTransport::new(|_| {
            vec![
                DeviceMessage::Progress(json!({"status": "uploading", "sent": 10})),
                DeviceMessage::raw("ok\n"),
            ]
        });
        let correlator = correlator(&transport, inbound);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        correlator.set_progress_listener(Some(Arc::new(move |m: &DeviceMessage| {
            sink.lock().push(m.clone())
        })));
        let text = correlator
            .exchange(RawOk::new("$X"), ExchangeOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "ok\n");
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_is_capped() {
        struct AlwaysRetry;
        impl ResponseMatcher for AlwaysRetry {
            type Output = ();
            fn command(&mut self) -> String {
                "$HZ".into()
            }
            fn on_message(&mut self, _: &DeviceMessage) -> Verdict<()> {
                Verdict::Retry(ControlError::DeviceReset {
                    response: "ER:RESET".into(),
                })
            }
        }

        let (transport, inbound) =
            ScriptedTransport::new(|_| vec![DeviceMessage::raw("ER:RESET\n")]);
        let correlator = correlator(&transport, inbound);
        let result = correlator
            .exchange(
                AlwaysRetry,
                ExchangeOptions::default().retry(RetryPolicy::new(2, 100)),
            )
            .await;
        assert!(matches!(result, Err(ControlError::DeviceReset { .. })));
        assert_eq!(transport.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_closed_stream_is_connection_lost() {
        let (transport, inbound) = ScriptedTransport::silent();
        let correlator = correlator(&transport, inbound);
        let sender = transport.clone();
        let waiter = correlator.exchange(AnyReply::new("?"), ExchangeOptions::default());
        let (result, _) = tokio::join!(waiter, async move { sender.disconnect() });
        assert_eq!(result, Err(ControlError::ConnectionLost));
    }
}
