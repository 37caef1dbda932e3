//! Response matchers
//!
//! A matcher owns the command text of one request and decides, message by
//! message, whether the request has finished. The correlator handles
//! transport failures, timeouts and retry budgets; matchers only interpret
//! device text.

use beamctl_core::{ControlError, DeviceMessage};
use std::time::Duration;

/// Outcome of feeding one message to a matcher
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict<T> {
    /// Keep waiting
    Pending,
    /// Request finished successfully
    Done(T),
    /// Request failed; do not retry
    Fail(ControlError),
    /// Recoverable failure; resend after the backoff while budget remains
    Retry(ControlError),
    /// Resend immediately without consuming retry budget
    Resend,
}

/// Recognises the terminal response of one command
pub trait ResponseMatcher: Send {
    /// Value produced on success
    type Output: Send;

    /// Text to send; re-read before every resend
    fn command(&mut self) -> String;

    /// Inspect one inbound reply or raw chunk
    fn on_message(&mut self, message: &DeviceMessage) -> Verdict<Self::Output>;

    /// Forget accumulated state before a resend
    fn reset(&mut self) {}
}

/// Retry budget for [`Verdict::Retry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of resends
    pub max_retries: u32,
    /// Delay before each resend
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Never resend
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        backoff: Duration::ZERO,
    };

    /// Resend up to `max_retries` times after `backoff_ms`
    pub const fn new(max_retries: u32, backoff_ms: u64) -> Self {
        Self {
            max_retries,
            backoff: Duration::from_millis(backoff_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::NONE
    }
}

/// Per-request options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExchangeOptions {
    /// Inactivity timeout; the correlator default applies when `None`
    pub timeout: Option<Duration>,
    /// Retry budget
    pub retry: RetryPolicy,
}

impl ExchangeOptions {
    /// Options with an explicit inactivity timeout
    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            timeout: Some(Duration::from_millis(timeout_ms)),
            retry: RetryPolicy::NONE,
        }
    }

    /// Attach a retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Accumulates raw text and splits it into lines
///
/// The final element of [`RawBuffer::lines`] is the unterminated trailing
/// fragment (possibly empty).
#[derive(Debug, Default, Clone)]
pub struct RawBuffer {
    text: String,
}

impl RawBuffer {
    /// Append the raw text of `message`
    ///
    /// Line transports classify a JSON line such as `{"z_pos":12.5}` as a
    /// structured reply; objects are kept as one compact JSON line. Other
    /// messages are ignored.
    pub fn push(&mut self, message: &DeviceMessage) {
        match message {
            DeviceMessage::Raw(text) => self.text.push_str(text),
            DeviceMessage::Reply(value @ serde_json::Value::Object(_)) => {
                self.text.push_str(&value.to_string());
                self.text.push('\n');
            }
            _ => {}
        }
    }

    /// Lines received so far, split on `\n` or `\r\n`
    pub fn lines(&self) -> Vec<&str> {
        self.text
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .collect()
    }

    /// Whether some line equals `token` exactly
    pub fn has_line(&self, token: &str) -> bool {
        self.lines().iter().any(|line| *line == token)
    }

    /// Whether some line contains `needle`
    pub fn any_line_contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }

    /// Keep only the unterminated trailing fragment
    pub fn keep_tail(&mut self) {
        let tail = self.text.rsplit('\n').next().unwrap_or_default().to_string();
        self.text = tail;
    }

    /// Whole accumulated text
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Discard everything
    pub fn clear(&mut self) {
        self.text.clear();
    }
}

/// Resolves with the first reply or raw chunk
pub struct AnyReply {
    command: String,
}

impl AnyReply {
    /// Wait for any response to `command`
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl ResponseMatcher for AnyReply {
    type Output = DeviceMessage;

    fn command(&mut self) -> String {
        self.command.clone()
    }

    fn on_message(&mut self, message: &DeviceMessage) -> Verdict<DeviceMessage> {
        Verdict::Done(message.clone())
    }
}

/// Resolves with the reply whose `status` is `ok`
///
/// Other replies are collected. With a retry budget, each non-ok reply asks
/// the correlator to resend (used by status polling).
pub struct OkReply {
    command: String,
    retry_on_other: bool,
    collected: Vec<DeviceMessage>,
}

impl OkReply {
    /// Wait for an `ok` reply to `command`
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            retry_on_other: false,
            collected: Vec::new(),
        }
    }

    /// Re-poll whenever a non-ok reply arrives
    pub fn repoll(mut self) -> Self {
        self.retry_on_other = true;
        self
    }
}

impl ResponseMatcher for OkReply {
    type Output = serde_json::Value;

    fn command(&mut self) -> String {
        self.command.clone()
    }

    fn on_message(&mut self, message: &DeviceMessage) -> Verdict<serde_json::Value> {
        if let DeviceMessage::Reply(value) = message {
            if value.get("status").and_then(|s| s.as_str()) == Some("ok") {
                return Verdict::Done(value.clone());
            }
        }
        self.collected.push(message.clone());
        if self.retry_on_other {
            Verdict::Retry(ControlError::DeviceError {
                response: message.text(),
            })
        } else {
            Verdict::Pending
        }
    }
}

/// Resolves on a raw line equal to `ok`, rejects on a line starting with `error:`
pub struct RawOk {
    command: String,
    buffer: RawBuffer,
}

impl RawOk {
    /// Wait for a raw `ok` line after `command`
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            buffer: RawBuffer::default(),
        }
    }
}

impl ResponseMatcher for RawOk {
    type Output = String;

    fn command(&mut self) -> String {
        self.command.clone()
    }

    fn on_message(&mut self, message: &DeviceMessage) -> Verdict<String> {
        self.buffer.push(message);
        if self.buffer.has_line("ok") {
            return Verdict::Done(self.buffer.as_str().to_string());
        }
        if self.buffer.lines().iter().any(|l| l.starts_with("error:")) {
            return Verdict::Fail(ControlError::DeviceError {
                response: self.buffer.as_str().to_string(),
            });
        }
        Verdict::Pending
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_buffer_lines() {
        let mut buffer = RawBuffer::default();
        buffer.push(&DeviceMessage::raw("DEBUG: a\r\nok\r\nLN"));
        assert_eq!(buffer.lines(), vec!["DEBUG: a", "ok", "LN"]);
        assert!(buffer.has_line("ok"));
        buffer.keep_tail();
        assert_eq!(buffer.as_str(), "LN");
        buffer.push(&DeviceMessage::raw("3 0\n"));
        assert!(buffer.has_line("LN3 0"));
    }

    #[test]
    fn test_raw_ok_splits_chunks() {
        let mut matcher = RawOk::new("$X");
        assert_eq!(matcher.on_message(&DeviceMessage::raw("o")), Verdict::Pending);
        assert_eq!(
            matcher.on_message(&DeviceMessage::raw("k\n")),
            Verdict::Done("ok\n".to_string())
        );

        let mut matcher = RawOk::new("$X");
        assert!(matches!(
            matcher.on_message(&DeviceMessage::raw("error:9\n")),
            Verdict::Fail(ControlError::DeviceError { .. })
        ));
    }

    #[test]
    fn test_ok_reply_repoll() {
        let mut matcher = OkReply::new("play report").repoll();
        assert!(matches!(
            matcher.on_message(&DeviceMessage::Reply(json!({"status": "busy"}))),
            Verdict::Retry(_)
        ));
        let done = matcher.on_message(&DeviceMessage::Reply(json!({"status": "ok", "st_id": 0})));
        assert_eq!(done, Verdict::Done(json!({"status": "ok", "st_id": 0})));
    }
}
