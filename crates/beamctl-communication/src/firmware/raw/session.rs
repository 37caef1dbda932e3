//! Raw-mode session
//!
//! Owns the connection's [`SessionState`] and implements every raw-mode
//! operation on top of the response correlator. Raw-only operations check
//! the mode before doing anything else, so a mode error never sends bytes.

use super::commands::{self, Completion, FcodeVersion, HomeTarget, MoveArgs, Output, RawCommand};
use super::matchers::{AutoFocus, Home, LineCheck, LineCheckToggle, MeasureHeight, Query};
use super::queries::{self, DoorStatus, Position, ProbePosition};
use crate::firmware::report::DeviceReport;
use crate::protocol::correlator::ResponseCorrelator;
use crate::protocol::matcher::{AnyReply, ExchangeOptions, OkReply, RawOk, RetryPolicy};
use beamctl_core::{ConnectionMode, ControlError, DeviceMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Settle delay after entering raw mode
pub const RAW_MODE_SETTLE_MS: u64 = 3000;
/// Inactivity timeout of homing and queries
pub const RAW_QUERY_TIMEOUT_MS: u64 = 10_000;
/// Default auto-focus timeout
pub const AUTO_FOCUS_TIMEOUT_MS: u64 = 20_000;
/// Default height measurement timeout
pub const MEASURE_HEIGHT_TIMEOUT_MS: u64 = 120_000;
/// Status report timeout
pub const REPORT_TIMEOUT_MS: u64 = 3000;

const HOME_RETRY: RetryPolicy = RetryPolicy::new(5, 1000);
const TOGGLE_RETRY: RetryPolicy = RetryPolicy::new(5, 200);
const QUERY_RETRY: RetryPolicy = RetryPolicy::new(5, 200);
const MEASURE_RETRY: RetryPolicy = RetryPolicy::new(5, 1000);
const LINE_CHECK_RETRY: RetryPolicy = RetryPolicy::new(5, 0);
const REPORT_RETRY: RetryPolicy = RetryPolicy::new(3, 0);

/// Line-check sub-state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCheckState {
    /// Whether commands are framed
    pub enabled: bool,
    /// Sequence number of the next framed command
    pub sequence: u32,
}

impl Default for LineCheckState {
    fn default() -> Self {
        Self {
            enabled: false,
            sequence: 1,
        }
    }
}

/// Mutable protocol state of one connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Current connection mode
    pub mode: ConnectionMode,
    /// Line-check sub-state
    pub line_check: LineCheckState,
    /// Whether XY homing has completed since the session started
    pub homed: bool,
}

/// Raw-mode protocol driver for one connection
pub struct RawSession {
    correlator: ResponseCorrelator,
    state: Arc<Mutex<SessionState>>,
    settle: Duration,
}

impl RawSession {
    /// Create a session in normal mode
    pub fn new(correlator: ResponseCorrelator) -> Self {
        Self {
            correlator,
            state: Arc::new(Mutex::new(SessionState::default())),
            settle: Duration::from_millis(RAW_MODE_SETTLE_MS),
        }
    }

    /// Override the settle delay after mode switches
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Snapshot of the session state
    pub fn state(&self) -> SessionState {
        self.state.lock().clone()
    }

    /// Current connection mode
    pub fn mode(&self) -> ConnectionMode {
        self.state.lock().mode
    }

    /// Whether commands are currently line-check framed
    pub fn line_check_enabled(&self) -> bool {
        self.state.lock().line_check.enabled
    }

    /// Whether XY homing completed in this session
    pub fn is_homed(&self) -> bool {
        self.state.lock().homed
    }

    /// Restore defaults after a fatal disconnect
    pub fn reset_state(&self) {
        *self.state.lock() = SessionState::default();
    }

    /// Correlator used by this session
    pub fn correlator(&self) -> &ResponseCorrelator {
        &self.correlator
    }

    fn ensure_mode(&self, expected: ConnectionMode) -> Result<(), ControlError> {
        let actual = self.state.lock().mode;
        if actual != expected {
            return Err(ControlError::mode(expected, actual));
        }
        Ok(())
    }

    fn ensure_raw(&self) -> Result<(), ControlError> {
        self.ensure_mode(ConnectionMode::Raw)
    }

    /// Run one raw command, framed when line check is enabled
    pub async fn run(&self, command: RawCommand) -> Result<String, ControlError> {
        self.ensure_raw()?;
        if command.line_check && self.line_check_enabled() {
            return self
                .correlator
                .exchange(
                    LineCheck::new(command.text, self.state.clone()),
                    ExchangeOptions::default().retry(LINE_CHECK_RETRY),
                )
                .await;
        }
        match command.completion {
            Completion::AnyReply => self
                .correlator
                .exchange(AnyReply::new(command.text), ExchangeOptions::default())
                .await
                .map(|reply| reply.text()),
            Completion::RawOk => {
                self.correlator
                    .exchange(RawOk::new(command.text), ExchangeOptions::default())
                    .await
            }
        }
    }

    // Mode switching

    /// Enter raw mode and wait for the controller to settle
    pub async fn enter_raw_mode(&self) -> Result<DeviceMessage, ControlError> {
        self.enter_sub_task(ConnectionMode::Raw).await
    }

    /// Enter a sub-task mode and wait for the controller to settle
    pub async fn enter_sub_task(&self, mode: ConnectionMode) -> Result<DeviceMessage, ControlError> {
        let name = mode
            .task_name()
            .ok_or_else(|| ControlError::mode(ConnectionMode::Raw, mode))?;
        let reply = self
            .correlator
            .exchange(AnyReply::new(format!("task {}", name)), ExchangeOptions::default())
            .await?;
        tokio::time::sleep(self.settle).await;
        self.state.lock().mode = mode;
        tracing::info!("Entered {} mode", mode);
        Ok(reply)
    }

    /// Quit the current sub-task and return to normal mode
    pub async fn end_sub_task(&self) -> Result<DeviceMessage, ControlError> {
        {
            let mut state = self.state.lock();
            state.mode = ConnectionMode::Normal;
            state.line_check = LineCheckState::default();
        }
        tracing::info!("Leaving sub-task");
        self.correlator
            .exchange(AnyReply::new("task quit"), ExchangeOptions::default())
            .await
    }

    // Motion

    /// Home X and Y
    pub async fn home(&self) -> Result<(), ControlError> {
        self.home_target(HomeTarget::Xy).await?;
        self.state.lock().homed = true;
        Ok(())
    }

    /// Home the Z axis
    pub async fn home_z(&self) -> Result<(), ControlError> {
        self.home_target(HomeTarget::Z).await
    }

    /// Home to the camera position
    pub async fn home_camera(&self) -> Result<(), ControlError> {
        self.home_target(HomeTarget::Camera).await
    }

    async fn home_target(&self, target: HomeTarget) -> Result<(), ControlError> {
        self.ensure_raw()?;
        self.correlator
            .exchange(
                Home::new(target.command()),
                ExchangeOptions::with_timeout(RAW_QUERY_TIMEOUT_MS).retry(HOME_RETRY),
            )
            .await
    }

    /// Clear an alarm lock
    pub async fn unlock(&self) -> Result<String, ControlError> {
        self.ensure_raw()?;
        self.correlator
            .exchange(RawOk::new("$X"), ExchangeOptions::default())
            .await
    }

    /// Linear move
    pub async fn move_to(&self, args: MoveArgs) -> Result<String, ControlError> {
        self.run(args.command()).await
    }

    /// Relative Z move
    pub async fn move_z_rel(&self, z: f64) -> Result<String, ControlError> {
        self.run(commands::move_z_rel(z)).await
    }

    /// Z move relative to the last homed height
    pub async fn move_z_rel_to_last_home(&self, z: f64) -> Result<String, ControlError> {
        self.run(commands::move_z_rel_to_last_home(z)).await
    }

    // Line check

    /// Enable line-check framing; the sequence restarts at 1
    pub async fn start_line_check(&self) -> Result<(), ControlError> {
        self.ensure_raw()?;
        self.correlator
            .exchange(
                LineCheckToggle::enable(),
                ExchangeOptions::with_timeout(RAW_QUERY_TIMEOUT_MS).retry(TOGGLE_RETRY),
            )
            .await?;
        self.state.lock().line_check = LineCheckState {
            enabled: true,
            sequence: 1,
        };
        tracing::debug!("Line check enabled");
        Ok(())
    }

    /// Disable line-check framing
    pub async fn end_line_check(&self) -> Result<(), ControlError> {
        self.ensure_raw()?;
        self.correlator
            .exchange(
                LineCheckToggle::disable(),
                ExchangeOptions::with_timeout(RAW_QUERY_TIMEOUT_MS).retry(TOGGLE_RETRY),
            )
            .await?;
        self.state.lock().line_check = LineCheckState::default();
        tracing::debug!("Line check disabled");
        Ok(())
    }

    // Outputs

    /// Switch an output on or off
    pub async fn set_output(
        &self,
        output: Output,
        on: bool,
        fcode: FcodeVersion,
    ) -> Result<String, ControlError> {
        self.run(output.command(on, fcode)).await
    }

    /// Laser on/off with optional power
    pub async fn set_laser(&self, on: bool, power: Option<f64>) -> Result<String, ControlError> {
        self.run(commands::laser(on, power)).await
    }

    /// Make the current position the job origin
    pub async fn set_origin(&self, fcode: FcodeVersion) -> Result<String, ControlError> {
        self.run(commands::set_origin(fcode)).await
    }

    /// Release the motors with a single command
    pub async fn loose_motor(&self, fcode: FcodeVersion) -> Result<String, ControlError> {
        self.run(commands::loose_motor(fcode)).await
    }

    /// Release the motors on firmware without the single-command release
    ///
    /// Drops the idle-lock setting, pulses `B12`, then restores the setting.
    pub async fn loose_motor_legacy(&self) -> Result<String, ControlError> {
        self.ensure_raw()?;
        self.correlator
            .exchange(AnyReply::new("$1=0"), ExchangeOptions::default())
            .await?;
        self.run(RawCommand {
            text: "B12".to_string(),
            completion: Completion::AnyReply,
            line_check: true,
        })
        .await?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.correlator
            .exchange(AnyReply::new("$1=255"), ExchangeOptions::default())
            .await
            .map(|reply| reply.text())
    }

    // Probing

    /// Run auto-focus and wait for it to finish
    pub async fn auto_focus(&self, fcode: FcodeVersion, timeout_ms: u64) -> Result<(), ControlError> {
        self.ensure_raw()?;
        self.correlator
            .exchange(
                AutoFocus::new(commands::auto_focus(fcode)),
                ExchangeOptions::with_timeout(timeout_ms),
            )
            .await
    }

    /// Last probe result
    pub async fn probe_position(&self) -> Result<ProbePosition, ControlError> {
        self.query("M136P254", queries::probe_pattern(), queries::parse_probe)
            .await
    }

    /// Position at the last homing
    pub async fn last_position(&self) -> Result<Position, ControlError> {
        self.query("M136P255", queries::last_pos_pattern(), queries::parse_position)
            .await
    }

    /// Current machine or work position from a status query
    pub async fn state_position(&self) -> Result<Position, ControlError> {
        self.query("?", queries::state_pos_pattern(), queries::parse_position)
            .await
    }

    /// Door and cover sensor states
    pub async fn door_status(&self) -> Result<DoorStatus, ControlError> {
        self.query("M136P179", queries::door_pattern(), queries::parse_door)
            .await
    }

    async fn query<T: Send>(
        &self,
        command: &'static str,
        pattern: &'static regex::Regex,
        parse: super::matchers::CaptureParser<T>,
    ) -> Result<T, ControlError> {
        self.ensure_raw()?;
        self.correlator
            .exchange(
                Query::new(command, pattern, parse),
                ExchangeOptions::with_timeout(RAW_QUERY_TIMEOUT_MS).retry(QUERY_RETRY),
            )
            .await
    }

    /// Measure the material height, optionally from a base Z
    pub async fn measure_height(
        &self,
        base_z: Option<f64>,
        timeout_ms: u64,
    ) -> Result<f64, ControlError> {
        self.ensure_raw()?;
        let command = commands::measure_height(base_z);
        if self.line_check_enabled() {
            let response = self
                .correlator
                .exchange(
                    LineCheck::new(command, self.state.clone()),
                    ExchangeOptions::with_timeout(timeout_ms).retry(LINE_CHECK_RETRY),
                )
                .await?;
            let lines: Vec<&str> = response.lines().collect();
            return MeasureHeight::parse_z(&lines);
        }
        self.correlator
            .exchange(
                MeasureHeight::new(command),
                ExchangeOptions::with_timeout(timeout_ms).retry(MEASURE_RETRY),
            )
            .await
    }

    // Normal mode

    /// Machine status report
    pub async fn report(&self) -> Result<DeviceReport, ControlError> {
        let reply = self
            .correlator
            .exchange(
                OkReply::new("play report").repoll(),
                ExchangeOptions::with_timeout(REPORT_TIMEOUT_MS).retry(REPORT_RETRY),
            )
            .await?;
        DeviceReport::from_reply(&reply)
    }

    /// Whether the door sensor reports open
    pub async fn door_open(&self) -> Result<bool, ControlError> {
        self.ensure_mode(ConnectionMode::Normal)?;
        let reply = self
            .correlator
            .exchange(OkReply::new("play get_door_open"), ExchangeOptions::default())
            .await?;
        match reply.get("value") {
            Some(serde_json::Value::String(s)) => Ok(s == "1"),
            Some(serde_json::Value::Number(n)) => Ok(n.as_i64() == Some(1)),
            Some(serde_json::Value::Bool(b)) => Ok(*b),
            _ => Err(ControlError::parse("door reply has no value")),
        }
    }

    /// Device identification
    pub async fn device_info(&self) -> Result<DeviceMessage, ControlError> {
        self.ensure_mode(ConnectionMode::Normal)?;
        self.correlator
            .exchange(AnyReply::new("deviceinfo"), ExchangeOptions::default())
            .await
    }

    /// Kick a stuck task off the device
    pub async fn kick(&self) -> Result<DeviceMessage, ControlError> {
        self.correlator
            .exchange(AnyReply::new("kick"), ExchangeOptions::default())
            .await
    }

    /// Whether the device still runs the task this connection opened
    ///
    /// Any failure counts as not alive.
    pub async fn check_task_alive(&self) -> bool {
        match self
            .correlator
            .exchange(AnyReply::new(" "), ExchangeOptions::default())
            .await
        {
            Ok(reply) => !reply.text().contains("KICKED"),
            Err(e) => {
                tracing::debug!("Task liveness check failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;
    use serde_json::json;

    fn session(transport: &ScriptedTransport, inbound: crate::transport::Inbound) -> RawSession {
        let correlator = ResponseCorrelator::new(Arc::new(transport.clone()), inbound);
        RawSession::new(correlator).with_settle(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_raw_only_operations_fail_fast_in_normal_mode() {
        let (transport, inbound) = ScriptedTransport::new(|_| vec![DeviceMessage::raw("ok\n")]);
        let session = session(&transport, inbound);

        let err = session.move_to(MoveArgs::xy(1.0, 2.0)).await.unwrap_err();
        assert_eq!(err, ControlError::mode(ConnectionMode::Raw, ConnectionMode::Normal));
        assert!(session.home().await.is_err());
        assert!(session.start_line_check().await.is_err());
        assert!(session.set_laser(false, Some(0.0)).await.is_err());
        assert!(session.probe_position().await.is_err());
        assert!(session.measure_height(None, 1000).await.is_err());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_raw_mode_waits_for_settle() {
        let (transport, inbound) = ScriptedTransport::new(|_| vec![DeviceMessage::reply_text("ok")]);
        let correlator = ResponseCorrelator::new(Arc::new(transport.clone()), inbound);
        let session = RawSession::new(correlator);

        let start = tokio::time::Instant::now();
        session.enter_raw_mode().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(RAW_MODE_SETTLE_MS));
        assert_eq!(session.mode(), ConnectionMode::Raw);
        assert_eq!(transport.sent(), vec!["task raw".to_string()]);

        session.end_sub_task().await.unwrap();
        assert_eq!(session.mode(), ConnectionMode::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_home_resends_after_reset_markers() {
        let mut calls = 0;
        let (transport, inbound) = ScriptedTransport::new(move |cmd| {
            if cmd.starts_with("task") {
                return vec![DeviceMessage::reply_text("ok")];
            }
            calls += 1;
            if calls <= 3 {
                vec![DeviceMessage::raw("ER:RESET\n")]
            } else {
                vec![DeviceMessage::raw("ok\n")]
            }
        });
        let session = session(&transport, inbound);
        session.enter_raw_mode().await.unwrap();
        transport.clear_sent();

        session.home().await.unwrap();
        assert_eq!(transport.sent(), vec!["raw home".to_string(); 4]);
        assert!(session.is_homed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_home_gives_up_after_budget() {
        let (transport, inbound) = ScriptedTransport::new(|cmd| {
            if cmd.starts_with("task") {
                vec![DeviceMessage::reply_text("ok")]
            } else {
                vec![DeviceMessage::raw("error:8\n")]
            }
        });
        let session = session(&transport, inbound);
        session.enter_raw_mode().await.unwrap();
        transport.clear_sent();

        let err = session.home_z().await.unwrap_err();
        assert!(matches!(err, ControlError::DeviceError { .. }));
        assert_eq!(transport.sent().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_line_check_erl_resync() {
        let (transport, inbound) = ScriptedTransport::new(|cmd| {
            if cmd.starts_with("task") {
                return vec![DeviceMessage::reply_text("ok")];
            }
            match cmd {
                "$@" => vec![DeviceMessage::raw("CTRL LINECHECK_ENABLED\n")],
                c if c.starts_with("N1") => vec![DeviceMessage::raw("ERL3\n")],
                c if c.starts_with("N3") => vec![DeviceMessage::raw("LN3 0\n")],
                _ => vec![DeviceMessage::raw("ER\n")],
            }
        });
        let session = session(&transport, inbound);
        session.enter_raw_mode().await.unwrap();
        session.start_line_check().await.unwrap();
        assert_eq!(session.state().line_check.sequence, 1);
        transport.clear_sent();

        session.move_to(MoveArgs::xy(5.0, 5.0)).await.unwrap();
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].starts_with("N1G1F6000X5Y5*"));
        assert!(sent[1].starts_with("N3G1F6000X5Y5*"));
        assert_eq!(session.state().line_check.sequence, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotary_v1_is_never_framed() {
        let (transport, inbound) = ScriptedTransport::new(|cmd| {
            if cmd.starts_with("task") {
                vec![DeviceMessage::reply_text("ok")]
            } else if cmd == "$@" {
                vec![DeviceMessage::raw("ok\n")]
            } else {
                vec![DeviceMessage::raw("ok\n")]
            }
        });
        let session = session(&transport, inbound);
        session.enter_raw_mode().await.unwrap();
        session.start_line_check().await.unwrap();
        transport.clear_sent();

        session
            .set_output(Output::Rotary, false, FcodeVersion::V1)
            .await
            .unwrap();
        assert_eq!(transport.sent(), vec!["R0".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queries_parse_payloads() {
        let (transport, inbound) = ScriptedTransport::new(|cmd| match cmd {
            "task raw" => vec![DeviceMessage::reply_text("ok")],
            "M136P254" => vec![DeviceMessage::raw("[PRB:1.5,-2,30.25,0:1]\nok\n")],
            "M136P179" => vec![DeviceMessage::raw(
                "Interlock: 1, Bottom cover: 0, Back cover: 0, Remote interlock: 0\nok\n",
            )],
            "M136P255" => vec![DeviceMessage::raw("ok\n")],
            _ => vec![],
        });
        let session = session(&transport, inbound);
        session.enter_raw_mode().await.unwrap();

        let probe = session.probe_position().await.unwrap();
        assert_eq!(probe.position.x, 1.5);
        assert_eq!(probe.position.y, -2.0);
        assert!(probe.did_af);

        let door = session.door_status().await.unwrap();
        assert!(door.is_open());

        let err = session.last_position().await.unwrap_err();
        assert!(matches!(err, ControlError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_report_repolls_until_ok() {
        let mut polls = 0;
        let (transport, inbound) = ScriptedTransport::new(move |_| {
            polls += 1;
            if polls < 3 {
                vec![DeviceMessage::Reply(json!({"status": "busy"}))]
            } else {
                vec![DeviceMessage::Reply(
                    json!({"status": "ok", "device_status": {"st_id": 0}}),
                )]
            }
        });
        let session = session(&transport, inbound);
        let report = session.report().await.unwrap();
        assert!(report.is_idle());
        assert_eq!(transport.sent().len(), 3);
    }
}
