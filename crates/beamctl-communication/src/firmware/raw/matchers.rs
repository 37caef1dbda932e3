//! Response matchers of the raw dialect

use super::session::SessionState;
use crate::protocol::checksum::frame_line;
use crate::protocol::matcher::{RawBuffer, ResponseMatcher, Verdict};
use beamctl_core::{ControlError, DeviceMessage};
use parking_lot::Mutex;
use regex::{Captures, Regex};
use std::sync::Arc;

fn reset_error(response: &str) -> ControlError {
    ControlError::DeviceReset {
        response: response.to_string(),
    }
}

fn device_error(response: &str) -> ControlError {
    ControlError::DeviceError {
        response: response.to_string(),
    }
}

/// Line-check framed command
///
/// Frames the command with the session's current sequence number and waits
/// for `LN<seq> 0` / `L<seq> 0`. `ERL<n>` moves the sequence to `n` and
/// asks for an immediate resend; any other `ER` line asks for a budgeted
/// resend. `ER:RESET` and `error:` are always fatal to the request.
pub struct LineCheck {
    command: String,
    state: Arc<Mutex<SessionState>>,
    buffer: RawBuffer,
}

impl LineCheck {
    /// Frame `command` using the sequence stored in `state`
    pub fn new(command: impl Into<String>, state: Arc<Mutex<SessionState>>) -> Self {
        Self {
            command: command.into(),
            state,
            buffer: RawBuffer::default(),
        }
    }
}

impl ResponseMatcher for LineCheck {
    type Output = String;

    fn command(&mut self) -> String {
        let seq = self.state.lock().line_check.sequence;
        frame_line(seq, &self.command)
    }

    fn on_message(&mut self, message: &DeviceMessage) -> Verdict<String> {
        if !matches!(message, DeviceMessage::Raw(_)) {
            return Verdict::Pending;
        }
        self.buffer.push(message);
        let text = self.buffer.as_str().to_string();
        if text.contains("ER:RESET") {
            return Verdict::Fail(reset_error(&text));
        }
        if text.contains("error:") {
            return Verdict::Fail(device_error(&text));
        }

        let all = self.buffer.lines();
        let last = all.len().saturating_sub(1);
        let lines: Vec<&str> = all
            .iter()
            .enumerate()
            .filter(|(i, line)| !line.starts_with("DEBUG:") || *i == last)
            .map(|(_, line)| *line)
            .collect();

        let mut state = self.state.lock();
        let seq = state.line_check.sequence;
        let done_ln = format!("LN{} 0", seq);
        let done_l = format!("L{} 0", seq);
        if lines
            .iter()
            .any(|l| l.starts_with(&done_ln) || l.starts_with(&done_l))
        {
            state.line_check.sequence += 1;
            return Verdict::Done(text);
        }

        // Only terminated lines can carry a resend request.
        let complete = &lines[..lines.len().saturating_sub(1)];
        if let Some(corrected) = complete.iter().find_map(|l| parse_erl(l)) {
            tracing::warn!("Line check resync: N{} -> N{}", seq, corrected);
            state.line_check.sequence = corrected;
            return Verdict::Resend;
        }
        if complete.iter().any(|l| l.starts_with("ER")) {
            return Verdict::Retry(device_error(&text));
        }
        Verdict::Pending
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }
}

fn parse_erl(line: &str) -> Option<u32> {
    line.strip_prefix("ERL")?
        .split(' ')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// Homing: any line containing `ok` completes
///
/// Reset markers and `error:` ask for a resend with a cleared buffer.
pub struct Home {
    command: &'static str,
    buffer: RawBuffer,
}

impl Home {
    /// Wait for `command` to finish homing
    pub fn new(command: &'static str) -> Self {
        Self {
            command,
            buffer: RawBuffer::default(),
        }
    }
}

impl ResponseMatcher for Home {
    type Output = ();

    fn command(&mut self) -> String {
        self.command.to_string()
    }

    fn on_message(&mut self, message: &DeviceMessage) -> Verdict<()> {
        self.buffer.push(message);
        let incoming = message.text();
        let seen = |needle: &str| incoming.contains(needle) || self.buffer.any_line_contains(needle);

        if seen("ER:RESET") || seen("DEBUG: RESET") {
            return Verdict::Retry(reset_error(self.buffer.as_str()));
        }
        if seen("error:") {
            return Verdict::Retry(device_error(self.buffer.as_str()));
        }
        if self.buffer.any_line_contains("ok") {
            return Verdict::Done(());
        }
        self.buffer.keep_tail();
        Verdict::Pending
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Line-check enable/disable handshake
pub struct LineCheckToggle {
    command: &'static str,
    ack: &'static str,
    buffer: RawBuffer,
}

impl LineCheckToggle {
    /// `$@`, acknowledged by `CTRL LINECHECK_ENABLED` or `ok`
    pub fn enable() -> Self {
        Self {
            command: "$@",
            ack: "CTRL LINECHECK_ENABLED",
            buffer: RawBuffer::default(),
        }
    }

    /// `M172`, acknowledged by `CTRL LINECHECK_DISABLED` or `ok`
    pub fn disable() -> Self {
        Self {
            command: "M172",
            ack: "CTRL LINECHECK_DISABLED",
            buffer: RawBuffer::default(),
        }
    }
}

impl ResponseMatcher for LineCheckToggle {
    type Output = ();

    fn command(&mut self) -> String {
        self.command.to_string()
    }

    fn on_message(&mut self, message: &DeviceMessage) -> Verdict<()> {
        self.buffer.push(message);
        if self.buffer.has_line(self.ack) || self.buffer.has_line("ok") {
            return Verdict::Done(());
        }
        let incoming = message.text();
        if incoming.contains("ER:RESET") || self.buffer.any_line_contains("ER:RESET") {
            return Verdict::Retry(reset_error(self.buffer.as_str()));
        }
        if incoming.contains("error:") {
            return Verdict::Retry(device_error(&incoming));
        }
        self.buffer.keep_tail();
        Verdict::Pending
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Auto-focus: waits for a literal `ok` line, failing on reset or error
pub struct AutoFocus {
    command: &'static str,
    buffer: RawBuffer,
}

impl AutoFocus {
    /// Wait for `command` to finish focusing
    pub fn new(command: &'static str) -> Self {
        Self {
            command,
            buffer: RawBuffer::default(),
        }
    }
}

impl ResponseMatcher for AutoFocus {
    type Output = ();

    fn command(&mut self) -> String {
        self.command.to_string()
    }

    fn on_message(&mut self, message: &DeviceMessage) -> Verdict<()> {
        self.buffer.push(message);
        if self.buffer.has_line("ok") {
            return Verdict::Done(());
        }
        let incoming = message.text();
        if incoming.contains("ER:RESET") || self.buffer.any_line_contains("ER:RESET") {
            return Verdict::Fail(reset_error(&incoming));
        }
        if incoming.contains("error:") {
            return Verdict::Fail(device_error(&incoming));
        }
        self.buffer.keep_tail();
        Verdict::Pending
    }
}

/// Parser applied to the captures of a query pattern
pub type CaptureParser<T> = fn(&Captures<'_>) -> Result<T, ControlError>;

/// Query answered by `ok` plus one line matching a fixed pattern
///
/// A missing or malformed payload is a hard failure; reset markers and
/// `error:` ask for a resend.
pub struct Query<T> {
    command: &'static str,
    pattern: &'static Regex,
    parse: CaptureParser<T>,
    buffer: RawBuffer,
}

impl<T> Query<T> {
    /// Send `command` and parse the first line matching `pattern`
    pub fn new(command: &'static str, pattern: &'static Regex, parse: CaptureParser<T>) -> Self {
        Self {
            command,
            pattern,
            parse,
            buffer: RawBuffer::default(),
        }
    }
}

impl<T: Send> ResponseMatcher for Query<T> {
    type Output = T;

    fn command(&mut self) -> String {
        self.command.to_string()
    }

    fn on_message(&mut self, message: &DeviceMessage) -> Verdict<T> {
        self.buffer.push(message);
        if self.buffer.has_line("ok") {
            let lines = self.buffer.lines();
            let captures = lines.iter().find_map(|line| self.pattern.captures(line));
            return match captures {
                Some(caps) => match (self.parse)(&caps) {
                    Ok(value) => Verdict::Done(value),
                    Err(e) => Verdict::Fail(e),
                },
                None => Verdict::Fail(ControlError::parse(format!(
                    "no response to {} matched {}",
                    self.command,
                    self.pattern.as_str()
                ))),
            };
        }
        let incoming = message.text();
        if incoming.contains("ER:RESET") || self.buffer.any_line_contains("ER:RESET") {
            return Verdict::Retry(reset_error(self.buffer.as_str()));
        }
        if incoming.contains("error:") {
            return Verdict::Retry(device_error(&incoming));
        }
        Verdict::Pending
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Height measurement: `ok` plus a JSON line carrying `z_pos`
pub struct MeasureHeight {
    command: String,
    buffer: RawBuffer,
}

impl MeasureHeight {
    /// Measure with `command`
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            buffer: RawBuffer::default(),
        }
    }

    /// Extract `z_pos` from the first line mentioning it
    pub fn parse_z(lines: &[&str]) -> Result<f64, ControlError> {
        let line = lines
            .iter()
            .find(|line| line.contains("z_pos"))
            .ok_or_else(|| ControlError::parse("height response has no z_pos"))?;
        let value: serde_json::Value = serde_json::from_str(line.trim())
            .map_err(|e| ControlError::parse(format!("invalid height payload: {}", e)))?;
        match value.get("z_pos") {
            Some(serde_json::Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| ControlError::parse("z_pos is not finite")),
            Some(serde_json::Value::String(s)) => s
                .parse()
                .map_err(|_| ControlError::parse(format!("z_pos is not a number: {}", s))),
            _ => Err(ControlError::parse("z_pos is missing or not a number")),
        }
    }
}

impl ResponseMatcher for MeasureHeight {
    type Output = f64;

    fn command(&mut self) -> String {
        self.command.clone()
    }

    fn on_message(&mut self, message: &DeviceMessage) -> Verdict<f64> {
        self.buffer.push(message);
        if self.buffer.has_line("ok") {
            return match Self::parse_z(&self.buffer.lines()) {
                Ok(z) => Verdict::Done(z),
                Err(e) => Verdict::Fail(e),
            };
        }
        if self.buffer.as_str().contains("error:") {
            let code = error_code(self.buffer.as_str());
            tracing::warn!("Height measurement error code {}", code.unwrap_or(0));
            return Verdict::Retry(device_error(self.buffer.as_str()));
        }
        Verdict::Pending
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Numeric code of the first `error:<n>` marker
pub fn error_code(text: &str) -> Option<u32> {
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"error:(\d+)").expect("invalid regex pattern"));
    re.captures(text)?.get(1)?.as_str().parse().ok()
}
