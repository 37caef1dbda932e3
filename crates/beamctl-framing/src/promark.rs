//! Galvo framing for Promark markers
//!
//! Promark devices trace the outline themselves: the host uploads the
//! framing task, corrects the field for the red aiming dot and starts the
//! firmware's framing loop. No raw mode or line check is involved.
//!
//! Working state is shared with two background tasks:
//! - a watcher that forces idle when the galvo backend disconnects
//! - a monitor that polls the report of rotary runs, which end on their own

use crate::geometry::Point;
use crate::polygon::TargetPolygon;
use crate::rotary::RotaryInfo;
use async_trait::async_trait;
use beamctl_communication::DeviceReport;
use beamctl_core::{ControlError, Error, EventDispatcher, FramingError, FramingEvent};
use beamctl_settings::{Field, GalvoParameters, PromarkStore, RedDot};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Delay before the "connecting" message is dismissed
const CLOSE_MESSAGE_DELAY: Duration = Duration::from_secs(1);

/// Report polling period of rotary runs
const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Connection events of the galvo backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GalvoEvent {
    Connected,
    Disconnected,
}

/// Galvo device operations used for framing
#[async_trait]
pub trait GalvoBackend: Send + Sync {
    /// Current device status
    async fn report(&self) -> Result<DeviceReport, ControlError>;

    /// Place the marking field of a `width` mm work area
    async fn set_field(&self, width: f64, field: Field) -> Result<(), ControlError>;

    async fn set_galvo_parameters(&self, parameters: GalvoParameters) -> Result<(), ControlError>;

    /// Upload a firmware-ready framing task
    async fn upload_task(&self, blob: &str) -> Result<(), ControlError>;

    /// Start tracing the rectangle spanned by two opposite corners
    async fn start_framing(
        &self,
        corners: [Point; 2],
        rotary: Option<RotaryInfo>,
    ) -> Result<(), ControlError>;

    async fn stop_framing(&self) -> Result<(), ControlError>;

    /// Whether the firmware can frame with the rotary engaged
    fn supports_rotary(&self) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<GalvoEvent>;
}

/// Shift the field by the red-dot offset and scale the galvo axes
pub fn apply_red_dot(
    red_dot: RedDot,
    field: Field,
    parameters: GalvoParameters,
) -> (Field, GalvoParameters) {
    let field = Field {
        offset_x: field.offset_x + red_dot.offset_x,
        offset_y: field.offset_y + red_dot.offset_y,
        ..field
    };
    let mut parameters = parameters;
    parameters.x.scale *= red_dot.scale_x;
    parameters.y.scale *= red_dot.scale_y;
    (field, parameters)
}

struct Status {
    working: AtomicBool,
    events: EventDispatcher,
}

impl Status {
    fn set_working(&self, working: bool) {
        self.working.store(working, Ordering::SeqCst);
        self.events.publish(FramingEvent::StatusChanged(working));
    }

    /// Go idle if working; false when already idle
    fn finish(&self) -> bool {
        if self.working.swap(false, Ordering::SeqCst) {
            self.events.publish(FramingEvent::StatusChanged(false));
            true
        } else {
            false
        }
    }
}

/// Framing session of one Promark device
pub struct PromarkFramer {
    backend: Arc<dyn GalvoBackend>,
    calibration: PromarkStore,
    workarea_width: f64,
    rotary: Option<RotaryInfo>,
    status: Arc<Status>,
    applied: AtomicBool,
    watcher: Mutex<Option<JoinHandle<()>>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl PromarkFramer {
    pub fn new(
        backend: Arc<dyn GalvoBackend>,
        calibration: PromarkStore,
        workarea_width: f64,
        rotary: Option<RotaryInfo>,
        events: EventDispatcher,
    ) -> Self {
        Self {
            backend,
            calibration,
            workarea_width,
            rotary,
            status: Arc::new(Status {
                working: AtomicBool::new(false),
                events,
            }),
            applied: AtomicBool::new(false),
            watcher: Mutex::new(None),
            monitor: Mutex::new(None),
        }
    }

    pub fn is_working(&self) -> bool {
        self.status.working.load(Ordering::SeqCst)
    }

    /// Whether the red-dot correction is currently on the device
    pub fn has_applied_correction(&self) -> bool {
        self.applied.load(Ordering::SeqCst)
    }

    /// Start framing `polygon`
    ///
    /// Returns `Ok(false)` when the call was ignored: a run is already in
    /// progress or the firmware cannot frame with the rotary.
    pub async fn start(
        &self,
        polygon: &TargetPolygon,
        blob: Option<&str>,
        no_rotation: bool,
    ) -> Result<bool, Error> {
        self.watch_disconnect();

        if self.is_working() {
            return Ok(false);
        }
        let rotary = if no_rotation { None } else { self.rotary };
        if rotary.is_some() && !self.backend.supports_rotary() {
            tracing::warn!("Galvo firmware does not support rotary framing");
            return Ok(false);
        }
        let corners = match (polygon.points.first(), polygon.points.get(2)) {
            (Some(a), Some(b)) => [*a, *b],
            _ => return Err(FramingError::NoContent.into()),
        };

        self.status.set_working(true);
        if let Err(e) = self.begin(corners, blob, rotary).await {
            self.status.finish();
            return Err(e);
        }

        let events = self.status.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(CLOSE_MESSAGE_DELAY).await;
            events.publish(FramingEvent::CloseMessage);
        });

        if rotary.is_some() {
            self.spawn_monitor();
        }
        Ok(true)
    }

    async fn begin(
        &self,
        corners: [Point; 2],
        blob: Option<&str>,
        rotary: Option<RotaryInfo>,
    ) -> Result<(), Error> {
        let report = self.backend.report().await?;
        if !report.is_idle() {
            return Err(FramingError::DeviceNotReady {
                state_id: report.st_id,
            }
            .into());
        }

        if !self.applied.load(Ordering::SeqCst) {
            self.status
                .events
                .publish(FramingEvent::Message("Connecting".to_string()));
            if let Some(red_dot) = self.calibration.red_dot {
                let (field, parameters) = apply_red_dot(
                    red_dot,
                    self.calibration.field,
                    self.calibration.galvo_parameters,
                );
                self.backend.set_field(self.workarea_width, field).await?;
                self.backend.set_galvo_parameters(parameters).await?;
            }
            self.applied.store(true, Ordering::SeqCst);
        }

        if let Some(blob) = blob {
            self.backend.upload_task(blob).await?;
        }
        self.backend.start_framing(corners, rotary).await?;
        tracing::info!(
            "Galvo framing started ({:.1}, {:.1}) to ({:.1}, {:.1})",
            corners[0].x,
            corners[0].y,
            corners[1].x,
            corners[1].y
        );
        Ok(())
    }

    fn watch_disconnect(&self) {
        let mut watcher = self.watcher.lock();
        if watcher.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let mut rx = self.backend.subscribe();
        let status = self.status.clone();
        *watcher = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(GalvoEvent::Disconnected) => {
                        if status.finish() {
                            tracing::warn!("Galvo backend disconnected while framing");
                        }
                    }
                    Ok(GalvoEvent::Connected) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    fn spawn_monitor(&self) {
        let backend = self.backend.clone();
        let status = self.status.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(MONITOR_INTERVAL).await;
                if !status.working.load(Ordering::SeqCst) {
                    break;
                }
                match backend.report().await {
                    Ok(report) if report.is_finished() => {
                        tracing::info!("Rotary framing finished (state {})", report.st_id);
                        status.finish();
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!("Report poll failed: {}", e),
                }
            }
        });
        if let Some(old) = self.monitor.lock().replace(handle) {
            old.abort();
        }
    }

    /// Stop the current run
    pub async fn stop(&self) -> Result<(), Error> {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
        if !self.is_working() {
            return Ok(());
        }
        self.backend.stop_framing().await?;
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.abort();
        }
        self.status.finish();
        Ok(())
    }

    /// Put the stored field and galvo parameters back on the device
    pub async fn reset_params(&self) -> Result<(), Error> {
        if !self.applied.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if self.calibration.red_dot.is_some() {
            self.backend
                .set_field(self.workarea_width, self.calibration.field)
                .await?;
            self.backend
                .set_galvo_parameters(self.calibration.galvo_parameters)
                .await?;
        }
        Ok(())
    }
}

impl Drop for PromarkFramer {
    fn drop(&mut self) {
        for handle in [self.watcher.get_mut().take(), self.monitor.get_mut().take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamctl_settings::AxisCorrection;

    #[test]
    fn test_apply_red_dot() {
        let red_dot = RedDot {
            offset_x: 1.5,
            offset_y: -0.5,
            scale_x: 1.1,
            scale_y: 0.9,
        };
        let field = Field {
            offset_x: 2.0,
            offset_y: 3.0,
            angle: 0.25,
        };
        let (field, parameters) = apply_red_dot(red_dot, field, GalvoParameters::default());

        assert_eq!(field.offset_x, 3.5);
        assert_eq!(field.offset_y, 2.5);
        assert_eq!(field.angle, 0.25);
        assert!((parameters.x.scale - 110.0).abs() < 1e-9);
        assert!((parameters.y.scale - 90.0).abs() < 1e-9);
        assert_eq!(parameters.x.bulge, AxisCorrection::default().bulge);
    }

    #[test]
    fn test_red_dot_on_neutral_field() {
        let red_dot = RedDot {
            offset_x: 1.0,
            offset_y: 2.0,
            scale_x: 1.1,
            scale_y: 0.9,
        };
        let field = Field {
            offset_x: 0.0,
            offset_y: 0.0,
            angle: 0.0,
        };
        let mut parameters = GalvoParameters::default();
        parameters.x.scale = 100.0;
        parameters.y.scale = 100.0;

        let (field, parameters) = apply_red_dot(red_dot, field, parameters);
        assert_eq!(field.offset_x, 1.0);
        assert_eq!(field.offset_y, 2.0);
        assert!((parameters.x.scale - 110.0).abs() < 1e-9);
        assert!((parameters.y.scale - 90.0).abs() < 1e-9);
    }
}
