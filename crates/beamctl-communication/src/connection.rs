//! Device connection
//!
//! Ties a transport, the response correlator, the raw-mode session and the
//! command queue together. Every operation is submitted to the queue, so
//! callers on different tasks never interleave commands on the wire.

use crate::firmware::raw::{
    DoorStatus, FcodeVersion, MoveArgs, Output, Position, ProbePosition, RawSession,
    SessionState,
};
use crate::firmware::report::DeviceReport;
use crate::protocol::correlator::{ProgressListener, ResponseCorrelator};
use crate::protocol::queue::CommandQueue;
use crate::transport::{Inbound, TcpTransport, Transport};
use beamctl_core::{ConnectionError, ConnectionMode, ControlError, DeviceMessage};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Queued, mode-aware access to one device
pub struct DeviceConnection {
    transport: Arc<dyn Transport>,
    session: Arc<RawSession>,
    queue: CommandQueue,
}

impl DeviceConnection {
    /// Open a TCP connection to a device
    ///
    /// `request_timeout` applies to every request that does not carry its
    /// own timeout.
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let (transport, inbound) = TcpTransport::connect(host, port, connect_timeout).await?;
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let correlator =
            ResponseCorrelator::new(transport.clone(), inbound).with_default_timeout(request_timeout);
        Ok(Self::with_session(transport, RawSession::new(correlator)))
    }

    /// Wrap an already open transport
    pub fn from_transport(transport: Arc<dyn Transport>, inbound: Inbound) -> Self {
        Self::with_session(transport.clone(), RawSession::new(ResponseCorrelator::new(transport, inbound)))
    }

    /// Wrap a preconfigured session
    pub fn with_session(transport: Arc<dyn Transport>, session: RawSession) -> Self {
        Self {
            transport,
            session: Arc::new(session),
            queue: CommandQueue::new(),
        }
    }

    /// Whether the transport is still connected
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Snapshot of the session state
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Current connection mode
    pub fn mode(&self) -> ConnectionMode {
        self.session.mode()
    }

    /// Forward progress notifications to `listener`
    pub fn set_progress_listener(&self, listener: Option<ProgressListener>) {
        self.session.correlator().set_progress_listener(listener);
    }

    /// The command queue of this connection
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Drop queued work and restore default session state
    ///
    /// Called after the transport reports a fatal disconnect.
    pub fn reset_state(&self) {
        self.queue.clear();
        self.session.reset_state();
        tracing::info!("Connection state reset");
    }

    fn queued<F, Fut, T>(&self, op: F) -> impl Future<Output = Result<T, ControlError>> + Send
    where
        F: FnOnce(Arc<RawSession>) -> Fut,
        Fut: Future<Output = Result<T, ControlError>> + Send + 'static,
        T: Send + 'static,
    {
        self.queue.submit(op(self.session.clone()))
    }

    /// Make the connection usable for normal-mode commands
    ///
    /// Quits a sub-task left open by an earlier session.
    pub async fn select(&self) -> Result<(), ControlError> {
        self.queued(|s| async move {
            let mode = s.mode();
            if mode.is_sub_task() {
                tracing::info!("Quitting stale {} sub-task", mode);
                s.end_sub_task().await?;
            }
            Ok(())
        })
        .await
    }

    pub async fn enter_raw_mode(&self) -> Result<DeviceMessage, ControlError> {
        self.queued(|s| async move { s.enter_raw_mode().await }).await
    }

    pub async fn enter_sub_task(&self, mode: ConnectionMode) -> Result<DeviceMessage, ControlError> {
        self.queued(move |s| async move { s.enter_sub_task(mode).await })
            .await
    }

    pub async fn end_sub_task(&self) -> Result<DeviceMessage, ControlError> {
        self.queued(|s| async move { s.end_sub_task().await }).await
    }

    pub async fn report(&self) -> Result<DeviceReport, ControlError> {
        self.queued(|s| async move { s.report().await }).await
    }

    pub async fn door_open(&self) -> Result<bool, ControlError> {
        self.queued(|s| async move { s.door_open().await }).await
    }

    pub async fn device_info(&self) -> Result<DeviceMessage, ControlError> {
        self.queued(|s| async move { s.device_info().await }).await
    }

    pub async fn kick(&self) -> Result<DeviceMessage, ControlError> {
        self.queued(|s| async move { s.kick().await }).await
    }

    pub async fn check_task_alive(&self) -> bool {
        self.queued(|s| async move { Ok(s.check_task_alive().await) })
            .await
            .unwrap_or(false)
    }

    pub async fn home(&self) -> Result<(), ControlError> {
        self.queued(|s| async move { s.home().await }).await
    }

    pub async fn home_z(&self) -> Result<(), ControlError> {
        self.queued(|s| async move { s.home_z().await }).await
    }

    pub async fn home_camera(&self) -> Result<(), ControlError> {
        self.queued(|s| async move { s.home_camera().await }).await
    }

    pub async fn unlock(&self) -> Result<String, ControlError> {
        self.queued(|s| async move { s.unlock().await }).await
    }

    pub async fn start_line_check(&self) -> Result<(), ControlError> {
        self.queued(|s| async move { s.start_line_check().await }).await
    }

    pub async fn end_line_check(&self) -> Result<(), ControlError> {
        self.queued(|s| async move { s.end_line_check().await }).await
    }

    pub async fn move_to(&self, args: MoveArgs) -> Result<String, ControlError> {
        self.queued(move |s| async move { s.move_to(args).await }).await
    }

    pub async fn move_z_rel(&self, z: f64) -> Result<String, ControlError> {
        self.queued(move |s| async move { s.move_z_rel(z).await }).await
    }

    pub async fn move_z_rel_to_last_home(&self, z: f64) -> Result<String, ControlError> {
        self.queued(move |s| async move { s.move_z_rel_to_last_home(z).await })
            .await
    }

    pub async fn set_output(
        &self,
        output: Output,
        on: bool,
        fcode: FcodeVersion,
    ) -> Result<String, ControlError> {
        self.queued(move |s| async move { s.set_output(output, on, fcode).await })
            .await
    }

    pub async fn set_laser(&self, on: bool, power: Option<f64>) -> Result<String, ControlError> {
        self.queued(move |s| async move { s.set_laser(on, power).await })
            .await
    }

    pub async fn set_origin(&self, fcode: FcodeVersion) -> Result<String, ControlError> {
        self.queued(move |s| async move { s.set_origin(fcode).await })
            .await
    }

    /// Release the motors, using the legacy sequence when `single_command` is false
    pub async fn loose_motor(
        &self,
        fcode: FcodeVersion,
        single_command: bool,
    ) -> Result<String, ControlError> {
        self.queued(move |s| async move {
            if single_command {
                s.loose_motor(fcode).await
            } else {
                s.loose_motor_legacy().await
            }
        })
        .await
    }

    pub async fn auto_focus(&self, fcode: FcodeVersion, timeout_ms: u64) -> Result<(), ControlError> {
        self.queued(move |s| async move { s.auto_focus(fcode, timeout_ms).await })
            .await
    }

    pub async fn probe_position(&self) -> Result<ProbePosition, ControlError> {
        self.queued(|s| async move { s.probe_position().await }).await
    }

    pub async fn last_position(&self) -> Result<Position, ControlError> {
        self.queued(|s| async move { s.last_position().await }).await
    }

    pub async fn state_position(&self) -> Result<Position, ControlError> {
        self.queued(|s| async move { s.state_position().await }).await
    }

    pub async fn door_status(&self) -> Result<DoorStatus, ControlError> {
        self.queued(|s| async move { s.door_status().await }).await
    }

    pub async fn measure_height(
        &self,
        base_z: Option<f64>,
        timeout_ms: u64,
    ) -> Result<f64, ControlError> {
        self.queued(move |s| async move { s.measure_height(base_z, timeout_ms).await })
            .await
    }
}
