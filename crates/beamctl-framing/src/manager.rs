//! Framing orchestrator
//!
//! Moves the head (or the galvo red dot) along the outline of the job so the
//! operator can check placement before cutting. A raw-mode run goes through
//! these phases:
//!
//! - Computing: target polygon from the document, cached per kind
//! - Initializing: device selection, idle check, rotary and low-power setup
//! - SettingUp: raw mode, homing or job origin, line check, outputs off
//! - Tracing: indicator on, traversal with optional door checks
//! - TearingDown: restore outputs and leave raw mode, always attempted once
//!   raw mode is active
//!
//! `stop_framing` only raises a flag; the run checks it between commands, so
//! a command already on the wire completes before the run stops.

use crate::geometry::Point;
use crate::interlock::InterlockPolicy;
use crate::options;
use crate::polygon::{compute_polygon, FramingKind, GeometrySource, PolygonCache, PolygonContext, TargetPolygon};
use crate::promark::{GalvoBackend, PromarkFramer};
use crate::rotary::{rotary_info, RotaryInfo};
use beamctl_communication::{DeviceConnection, MoveArgs, Output};
use beamctl_core::{
    ConnectionMode, ControlError, Error, EventDispatcher, FramingError, FramingEvent, FramingPhase,
};
use beamctl_settings::{DeviceProfile, FramingSettings, PromarkStore};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Warning key for a polygon that leaves the work area
pub const WARN_OUT_OF_BOUNDS: &str = "framing-out-of-bounds";
/// Warning key for an empty document
pub const WARN_NO_CONTENT: &str = "no-element-to-frame";
/// Warning key for low-power preview problems
pub const WARN_LOW_LASER: &str = "low-laser-warning";

/// Per-run overrides of the framing settings
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FramingOptions {
    /// Low-power preview in percent
    pub low_power: Option<f64>,
    /// Repeat the outline until stopped
    pub loop_mode: Option<bool>,
}

/// Outputs switched on by the current run
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct EnabledInfo {
    twenty_four_v: bool,
    line_check: bool,
    rotary: bool,
}

/// Head position after compensation
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct HeadPosition {
    x: f64,
    y: f64,
    a: f64,
}

#[derive(Debug, Default)]
struct Run {
    points: Vec<Point>,
    rotary: Option<RotaryInfo>,
    /// Laser power for the preview in firmware units (0..=1000)
    low_power: f64,
    loop_mode: bool,
    interlock: InterlockPolicy,
    enabled: EnabledInfo,
    cur: HeadPosition,
}

/// Why a run stopped early
enum Halt {
    Interrupted,
    Failed(Error),
}

impl From<ControlError> for Halt {
    fn from(e: ControlError) -> Self {
        Halt::Failed(e.into())
    }
}

impl From<FramingError> for Halt {
    fn from(e: FramingError) -> Self {
        Halt::Failed(e.into())
    }
}

enum Driver {
    Raw(Arc<DeviceConnection>),
    Promark(Arc<PromarkFramer>),
}

/// Framing orchestrator of one device
pub struct FramingManager {
    driver: Driver,
    profile: DeviceProfile,
    settings: FramingSettings,
    source: Arc<dyn GeometrySource>,
    events: EventDispatcher,
    job_origin: Option<Point>,
    working: AtomicBool,
    interrupted: AtomicBool,
    phase: Mutex<FramingPhase>,
    cache: Mutex<PolygonCache>,
}

fn job_origin_of(profile: &DeviceProfile, settings: &FramingSettings) -> Option<Point> {
    if !settings.enable_job_origin || !profile.job_origin_supported() {
        return None;
    }
    settings.job_origin.map(|o| Point::new(o.x, o.y))
}

impl FramingManager {
    /// Orchestrator driving a raw-mode device
    pub fn raw(
        connection: Arc<DeviceConnection>,
        profile: DeviceProfile,
        settings: FramingSettings,
        source: Arc<dyn GeometrySource>,
    ) -> Self {
        Self::with_driver(Driver::Raw(connection), profile, settings, source, EventDispatcher::default())
    }

    /// Orchestrator driving a Promark galvo device
    pub fn promark(
        backend: Arc<dyn GalvoBackend>,
        calibration: PromarkStore,
        profile: DeviceProfile,
        settings: FramingSettings,
        source: Arc<dyn GeometrySource>,
    ) -> Self {
        let events = EventDispatcher::default();
        let framer = PromarkFramer::new(
            backend,
            calibration,
            profile.workarea.width,
            rotary_info(&profile, &settings, None),
            events.clone(),
        );
        Self::with_driver(Driver::Promark(Arc::new(framer)), profile, settings, source, events)
    }

    fn with_driver(
        driver: Driver,
        profile: DeviceProfile,
        settings: FramingSettings,
        source: Arc<dyn GeometrySource>,
        events: EventDispatcher,
    ) -> Self {
        let job_origin = job_origin_of(&profile, &settings);
        Self {
            driver,
            profile,
            settings,
            source,
            events,
            job_origin,
            working: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            phase: Mutex::new(FramingPhase::Idle),
            cache: Mutex::new(PolygonCache::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FramingEvent> {
        self.events.subscribe()
    }

    pub fn is_working(&self) -> bool {
        match &self.driver {
            Driver::Raw(_) => self.working.load(Ordering::SeqCst),
            Driver::Promark(framer) => framer.is_working(),
        }
    }

    pub fn phase(&self) -> FramingPhase {
        *self.phase.lock()
    }

    /// Kinds this device can frame
    pub fn framing_options(&self) -> Vec<FramingKind> {
        options::framing_options(&self.profile, &self.settings)
    }

    /// Drop cached polygons after the document changed
    pub fn invalidate_cache(&self) {
        self.cache.lock().invalidate();
    }

    /// Run one framing pass
    ///
    /// Returns true when the outline was traced to the end (or, on galvo
    /// devices, when framing started). Failures are published as events.
    pub async fn start_framing(&self, kind: FramingKind, options: FramingOptions) -> bool {
        match &self.driver {
            Driver::Raw(conn) => self.run_raw(conn, kind, options).await,
            Driver::Promark(framer) => self.run_promark(framer, kind).await,
        }
    }

    /// Ask the current run to stop
    pub async fn stop_framing(&self) {
        match &self.driver {
            Driver::Raw(_) => {
                if self.working.load(Ordering::SeqCst) {
                    tracing::info!("Framing stop requested");
                    self.interrupted.store(true, Ordering::SeqCst);
                }
            }
            Driver::Promark(framer) => {
                if let Err(e) = framer.stop().await {
                    tracing::warn!("Failed to stop galvo framing: {}", e);
                }
            }
        }
    }

    /// Release the device when the operator leaves framing
    pub async fn end_session(&self) -> Result<(), Error> {
        match &self.driver {
            Driver::Raw(conn) => {
                if !self.is_working() && conn.mode().is_sub_task() {
                    conn.end_sub_task().await?;
                }
            }
            Driver::Promark(framer) => framer.reset_params().await?,
        }
        Ok(())
    }

    // Events

    fn set_working(&self, working: bool) {
        self.working.store(working, Ordering::SeqCst);
        self.events.publish(FramingEvent::StatusChanged(working));
    }

    fn set_phase(&self, phase: FramingPhase) {
        *self.phase.lock() = phase;
        tracing::info!("Framing phase: {}", phase);
        self.events.publish(FramingEvent::PhaseChanged(phase));
    }

    fn message(&self, text: impl Into<String>) {
        self.events.publish(FramingEvent::Message(text.into()));
    }

    fn warning(&self, key: &str, text: impl Into<String>) {
        self.events.publish(FramingEvent::Warning {
            key: key.to_string(),
            text: text.into(),
        });
    }

    fn checkpoint(&self) -> Result<(), Halt> {
        if self.interrupted.load(Ordering::SeqCst) {
            Err(Halt::Interrupted)
        } else {
            Ok(())
        }
    }

    fn report_halt(&self, halt: Halt) {
        match halt {
            Halt::Interrupted => tracing::info!("Framing interrupted"),
            Halt::Failed(Error::Framing(FramingError::NoContent)) => {
                self.warning(WARN_NO_CONTENT, "Add content first");
            }
            Halt::Failed(Error::Framing(e @ FramingError::SafetyInterlock { .. })) => {
                tracing::warn!("{}", e);
                self.events.publish(FramingEvent::Alert(e.to_string()));
            }
            Halt::Failed(e) => {
                tracing::error!("Framing failed: {}", e);
                self.events
                    .publish(FramingEvent::Alert(format!("Failed to start framing: {}", e)));
            }
        }
    }

    // Computing

    fn polygon_context(&self) -> PolygonContext {
        PolygonContext {
            workarea_width: self.profile.workarea.width,
            workarea_height: self.profile.workarea.height,
            job_origin: self.job_origin,
            rotary_y: rotary_info(&self.profile, &self.settings, self.job_origin).map(|r| r.y),
        }
    }

    async fn polygon(&self, kind: FramingKind) -> TargetPolygon {
        let ctx = self.polygon_context();
        let cacheable = !self.source.has_variable_text();
        let cached = if cacheable {
            self.cache.lock().get(kind, &ctx)
        } else {
            None
        };
        if let Some(hit) = cached {
            tracing::debug!("Using cached {} polygon", kind);
            return hit;
        }
        let polygon = compute_polygon(kind, self.source.as_ref(), &ctx).await;
        if cacheable {
            self.cache.lock().insert(polygon.clone(), &ctx);
        }
        polygon
    }

    /// Traceable polygon, clamped into the work area
    fn accept(&self, polygon: TargetPolygon) -> Result<TargetPolygon, FramingError> {
        if !polygon.is_traceable() {
            return Err(FramingError::NoContent);
        }
        if polygon.is_out_of_bounds {
            self.warning(WARN_OUT_OF_BOUNDS, "Object outside moving area");
            return Ok(polygon.clamped());
        }
        Ok(polygon)
    }

    async fn prepare(&self, kind: FramingKind) -> Result<TargetPolygon, Halt> {
        self.set_phase(FramingPhase::Computing);
        self.message("Calculating task");
        let polygon = self.polygon(kind).await;
        self.checkpoint()?;
        Ok(self.accept(polygon)?)
    }

    // Galvo

    async fn run_promark(&self, framer: &PromarkFramer, kind: FramingKind) -> bool {
        if framer.is_working() {
            return false;
        }
        self.set_phase(FramingPhase::Computing);
        self.message("Calculating task");
        let polygon = self.polygon(kind).await;
        self.set_phase(FramingPhase::Idle);

        let polygon = match self.accept(polygon) {
            Ok(polygon) => polygon,
            Err(e) => {
                self.events.publish(FramingEvent::CloseMessage);
                self.report_halt(Halt::Failed(e.into()));
                return false;
            }
        };
        let blob = self.source.task_blob().await;
        match framer
            .start(&polygon, blob.as_deref(), kind == FramingKind::RotateAxis)
            .await
        {
            Ok(started) => started,
            Err(e) => {
                self.events.publish(FramingEvent::CloseMessage);
                self.report_halt(Halt::Failed(e));
                false
            }
        }
    }

    // Raw mode

    async fn run_raw(
        &self,
        conn: &DeviceConnection,
        kind: FramingKind,
        options: FramingOptions,
    ) -> bool {
        if self
            .working
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Framing already running");
            return false;
        }
        self.interrupted.store(false, Ordering::SeqCst);
        self.events.publish(FramingEvent::StatusChanged(true));

        let completed = match self.prepare(kind).await {
            Ok(polygon) => {
                let mut run = Run {
                    points: polygon.points,
                    ..Default::default()
                };
                let result = self.drive(conn, &mut run, options).await;
                self.tear_down(conn, &run).await;
                match result {
                    Ok(()) => true,
                    Err(halt) => {
                        self.report_halt(halt);
                        false
                    }
                }
            }
            Err(halt) => {
                self.report_halt(halt);
                false
            }
        };

        self.events.publish(FramingEvent::CloseMessage);
        self.set_phase(FramingPhase::Idle);
        self.set_working(false);
        completed
    }

    async fn drive(
        &self,
        conn: &DeviceConnection,
        run: &mut Run,
        options: FramingOptions,
    ) -> Result<(), Halt> {
        self.initialize(conn, run, options).await?;
        self.checkpoint()?;
        self.set_up(conn, run).await?;
        self.checkpoint()?;
        self.trace(conn, run).await
    }

    async fn initialize(
        &self,
        conn: &DeviceConnection,
        run: &mut Run,
        options: FramingOptions,
    ) -> Result<(), Halt> {
        self.set_phase(FramingPhase::Initializing);
        conn.select().await?;
        let report = conn.report().await?;
        if !report.is_idle() {
            return Err(FramingError::DeviceNotReady {
                state_id: report.st_id,
            }
            .into());
        }
        self.checkpoint()?;

        self.message(format!("Connecting to {}", self.profile.name));
        run.enabled = EnabledInfo::default();
        run.cur = HeadPosition::default();
        run.rotary = rotary_info(&self.profile, &self.settings, self.job_origin);
        run.loop_mode = options.loop_mode.unwrap_or(self.settings.loop_mode);
        run.interlock = InterlockPolicy::for_traversal(self.profile.interlock_zone(), &run.points);

        let percent = options.low_power.unwrap_or(self.settings.low_power);
        run.low_power = self.low_power_value(conn, percent).await;
        Ok(())
    }

    /// Preview power in firmware units; warns instead of failing
    async fn low_power_value(&self, conn: &DeviceConnection, percent: f64) -> f64 {
        if percent <= 0.0 {
            return 0.0;
        }
        if !self.profile.add_ons.low_power_preview {
            self.warning(WARN_LOW_LASER, "Low-power preview is not available on this device");
            return 0.0;
        }
        let value = (percent * 10.0).clamp(0.0, 1000.0);
        match conn.door_open().await {
            Ok(true) => self.warning(WARN_LOW_LASER, "The door is open"),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("Failed to read door state: {}", e);
                self.warning(WARN_LOW_LASER, "Failed to get door status");
            }
        }
        value
    }

    async fn set_up(&self, conn: &DeviceConnection, run: &mut Run) -> Result<(), Halt> {
        self.set_phase(FramingPhase::SettingUp);
        let fcode = self.profile.fcode_version;
        let ador = self.profile.family.is_ador();

        if conn.mode() != ConnectionMode::Raw {
            self.message("Entering raw mode");
            conn.enter_raw_mode().await?;
        }
        self.checkpoint()?;
        self.message("Exiting rotary mode");
        conn.set_output(Output::Rotary, false, fcode).await?;

        self.message("Homing");
        if ador && run.rotary.is_some() {
            conn.home_z().await?;
        }
        if self.job_origin.is_some() {
            conn.unlock().await?;
            conn.set_origin(fcode).await?;
        } else if !conn.state().homed {
            conn.home().await?;
        }
        self.checkpoint()?;

        if self.profile.line_check_supported() {
            conn.start_line_check().await?;
            run.enabled.line_check = true;
        }

        self.message("Turning off fan");
        conn.set_output(Output::Fan, false, fcode).await?;
        self.message("Turning off air pump");
        conn.set_output(Output::AirPump, false, fcode).await?;
        if !ador {
            conn.set_output(Output::WaterPump, false, fcode).await?;
        }
        self.events.publish(FramingEvent::CloseMessage);

        if let Some(rotary) = run.rotary {
            self.checkpoint()?;
            if ador {
                if let Some(first) = run.points.first().copied() {
                    let target = MoveArgs {
                        x: Some(first.x),
                        ..Default::default()
                    };
                    self.move_head(conn, run, target, false).await?;
                }
                let target = MoveArgs {
                    y: Some(rotary.y),
                    ..Default::default()
                };
                self.move_head(conn, run, target, false).await?;
                conn.move_z_rel_to_last_home(0.0).await?;
            } else {
                let x = self.job_origin.map(|o| o.x).unwrap_or(0.0);
                self.move_head(conn, run, MoveArgs::xy(x, rotary.y), false)
                    .await?;
            }
            conn.set_output(Output::Rotary, true, fcode).await?;
            run.cur.a = rotary.y;
            run.enabled.rotary = true;
        }
        Ok(())
    }

    async fn trace(&self, conn: &DeviceConnection, run: &mut Run) -> Result<(), Halt> {
        self.set_phase(FramingPhase::Tracing);
        let fcode = self.profile.fcode_version;
        let Some(first) = run.points.first().copied() else {
            return Ok(());
        };

        if self.profile.add_ons.red_light {
            conn.set_output(Output::RedLight, false, fcode).await?;
        }
        let target = self.point_target(run, first);
        self.move_head(conn, run, target, true).await?;
        self.checkpoint()?;
        self.indicator(conn, run, true).await?;

        loop {
            self.checkpoint()?;
            tokio::task::yield_now().await;
            for i in 1..run.points.len() {
                self.checkpoint()?;
                let point = run.points[i];
                if run.interlock.is_required() {
                    let door = conn.door_status().await?;
                    run.interlock.verify(door.is_open(), point)?;
                }
                let target = self.point_target(run, point);
                self.move_head(conn, run, target, false).await?;
            }
            if !run.loop_mode {
                break;
            }
        }
        self.checkpoint()?;
        self.indicator(conn, run, false).await?;

        if let Some(rotary) = run.rotary {
            let target = if rotary.use_a_axis {
                MoveArgs {
                    a: Some(rotary.y),
                    ..Default::default()
                }
            } else {
                MoveArgs {
                    y: Some(rotary.y),
                    ..Default::default()
                }
            };
            self.move_head(conn, run, target, false).await?;
            conn.set_output(Output::Rotary, false, fcode).await?;
            run.enabled.rotary = false;
        }
        self.checkpoint()?;

        if let Some(origin) = self.job_origin {
            self.move_head(conn, run, MoveArgs::xy(origin.x, origin.y), false)
                .await?;
        }
        Ok(())
    }

    /// Show or hide the position indicator
    async fn indicator(&self, conn: &DeviceConnection, run: &mut Run, on: bool) -> Result<(), Halt> {
        let fcode = self.profile.fcode_version;
        if self.profile.add_ons.red_light {
            conn.set_output(Output::RedLight, on, fcode).await?;
        } else if run.low_power > 0.0 {
            if on {
                conn.set_laser(true, Some(run.low_power)).await?;
                conn.set_output(Output::TwentyFourV, true, fcode).await?;
                run.enabled.twenty_four_v = true;
            } else {
                conn.set_laser(false, Some(0.0)).await?;
            }
        }
        Ok(())
    }

    fn point_target(&self, run: &Run, point: Point) -> MoveArgs {
        let use_a_axis = run.rotary.is_some_and(|r| r.use_a_axis);
        MoveArgs {
            x: Some(point.x),
            y: (!use_a_axis).then_some(point.y),
            a: use_a_axis.then_some(point.y),
            ..Default::default()
        }
    }

    /// Move with job-origin and rotary compensation
    ///
    /// With `wait`, sleeps for the travel time at the framing feedrate so the
    /// head has arrived before the indicator turns on.
    async fn move_head(
        &self,
        conn: &DeviceConnection,
        run: &mut Run,
        target: MoveArgs,
        wait: bool,
    ) -> Result<(), Halt> {
        let feedrate = self.settings.movement_feedrate;
        let origin = self.job_origin.unwrap_or_default();
        let engaged = run.rotary.filter(|_| run.enabled.rotary);
        let scale = |v: f64| engaged.map_or(v, |rotary| rotary.scale(v));

        let mut args = MoveArgs {
            f: Some(feedrate),
            ..target
        };
        let (mut dx, mut dy) = (0.0, 0.0);
        if let Some(x) = args.x {
            let x = x - origin.x;
            dx = x - run.cur.x;
            run.cur.x = x;
            args.x = Some(x);
        }
        if let Some(y) = args.y {
            let y = scale(y) - origin.y;
            dy = y - run.cur.y;
            run.cur.y = y;
            args.y = Some(y);
        } else if let Some(a) = args.a {
            let a = scale(a) - origin.y;
            dy = a - run.cur.a;
            run.cur.a = a;
            args.a = Some(a);
        }

        conn.move_to(args).await?;

        if wait {
            let distance = (dx * dx + dy * dy).sqrt();
            let ms = distance / feedrate * 60_000.0;
            tokio::time::sleep(Duration::from_secs_f64(ms / 1000.0)).await;
        }
        Ok(())
    }

    async fn tear_down(&self, conn: &DeviceConnection, run: &Run) {
        if conn.mode() != ConnectionMode::Raw {
            return;
        }
        self.set_phase(FramingPhase::TearingDown);
        let fcode = self.profile.fcode_version;

        if run.enabled.line_check {
            log_step("end line check", conn.end_line_check().await);
        }
        if run.enabled.rotary {
            log_step("rotary off", conn.set_output(Output::Rotary, false, fcode).await);
        }
        if self.profile.add_ons.red_light {
            log_step("red light on", conn.set_output(Output::RedLight, true, fcode).await);
        }
        log_step("laser off", conn.set_laser(false, Some(0.0)).await);
        if run.enabled.twenty_four_v {
            log_step("24V off", conn.set_output(Output::TwentyFourV, false, fcode).await);
        }
        if self.job_origin.is_some() {
            let single = self.profile.single_command_loose_motor();
            log_step("loose motor", conn.loose_motor(fcode, single).await);
        }
        log_step("end sub-task", conn.end_sub_task().await);
    }
}

fn log_step<T>(step: &str, result: Result<T, ControlError>) {
    if let Err(e) = result {
        tracing::warn!("Teardown step '{}' failed: {}", step, e);
    }
}
