use async_trait::async_trait;
use beamctl_communication::DeviceReport;
use beamctl_core::{ControlError, FramingEvent};
use beamctl_framing::{
    BoundingBox, Element, FramingKind, FramingManager, FramingOptions, GalvoBackend, GalvoEvent,
    GeometrySource, Layer, Point, RotaryInfo,
};
use beamctl_settings::{
    AddOns, DeviceProfile, Field, FramingSettings, GalvoParameters, MachineFamily, PromarkStore,
    RedDot,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    SetField(f64, Field),
    SetGalvo(GalvoParameters),
    Upload(String),
    Start([Point; 2], Option<RotaryInfo>),
    Stop,
}

struct FakeGalvo {
    calls: Mutex<Vec<Call>>,
    state: AtomicI64,
    rotary: bool,
    events: broadcast::Sender<GalvoEvent>,
}

impl FakeGalvo {
    fn new(rotary: bool) -> Arc<Self> {
        let (events, _) = broadcast::channel(8);
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            state: AtomicI64::new(0),
            rotary,
            events,
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl GalvoBackend for FakeGalvo {
    async fn report(&self) -> Result<DeviceReport, ControlError> {
        Ok(DeviceReport {
            st_id: self.state.load(Ordering::SeqCst),
            ..Default::default()
        })
    }

    async fn set_field(&self, width: f64, field: Field) -> Result<(), ControlError> {
        self.calls.lock().push(Call::SetField(width, field));
        Ok(())
    }

    async fn set_galvo_parameters(&self, parameters: GalvoParameters) -> Result<(), ControlError> {
        self.calls.lock().push(Call::SetGalvo(parameters));
        Ok(())
    }

    async fn upload_task(&self, blob: &str) -> Result<(), ControlError> {
        self.calls.lock().push(Call::Upload(blob.to_string()));
        Ok(())
    }

    async fn start_framing(
        &self,
        corners: [Point; 2],
        rotary: Option<RotaryInfo>,
    ) -> Result<(), ControlError> {
        self.calls.lock().push(Call::Start(corners, rotary));
        Ok(())
    }

    async fn stop_framing(&self) -> Result<(), ControlError> {
        self.calls.lock().push(Call::Stop);
        Ok(())
    }

    fn supports_rotary(&self) -> bool {
        self.rotary
    }

    fn subscribe(&self) -> broadcast::Receiver<GalvoEvent> {
        self.events.subscribe()
    }
}

struct Doc;

#[async_trait]
impl GeometrySource for Doc {
    async fn layers(&self) -> Vec<Layer> {
        vec![Layer {
            name: "Mark".to_string(),
            visible: true,
            repeat: 1,
            elements: vec![Element::shape(BoundingBox::new(20.0, 30.0, 60.0, 70.0))],
        }]
    }

    async fn silhouette(&self) -> Vec<Point> {
        Vec::new()
    }

    async fn last_job_bounds(&self) -> Option<BoundingBox> {
        None
    }

    async fn task_blob(&self) -> Option<String> {
        Some("FRAME-TASK".to_string())
    }
}

fn promark_profile(rotary: bool) -> DeviceProfile {
    DeviceProfile {
        serial: "PM0001".to_string(),
        name: "Promark".to_string(),
        family: MachineFamily::Promark,
        workarea: beamctl_settings::Workarea {
            width: 110.0,
            height: 110.0,
        },
        add_ons: AddOns {
            rotary,
            ..Default::default()
        },
        rotary_y: Some(55.0),
        ..Default::default()
    }
}

fn calibration() -> PromarkStore {
    PromarkStore {
        field: Field {
            offset_x: 1.0,
            offset_y: 2.0,
            angle: 0.0,
        },
        galvo_parameters: GalvoParameters::default(),
        red_dot: Some(RedDot {
            offset_x: 0.5,
            offset_y: -0.5,
            scale_x: 1.1,
            scale_y: 0.9,
        }),
    }
}

fn manager(galvo: Arc<FakeGalvo>, rotary: bool) -> FramingManager {
    let settings = FramingSettings {
        rotary_mode: rotary,
        ..Default::default()
    };
    FramingManager::promark(galvo, calibration(), promark_profile(rotary), settings, Arc::new(Doc))
}

#[tokio::test(start_paused = true)]
async fn test_red_dot_applied_once_and_restored() {
    let galvo = FakeGalvo::new(false);
    let manager = manager(galvo.clone(), false);

    assert!(manager.start_framing(FramingKind::Framing, FramingOptions::default()).await);
    assert!(manager.is_working());

    let calls = galvo.calls();
    let Call::SetField(width, field) = calls[0] else {
        panic!("expected field first, got {:?}", calls[0]);
    };
    assert_eq!(width, 110.0);
    assert_eq!(field.offset_x, 1.5);
    assert_eq!(field.offset_y, 1.5);
    let Call::SetGalvo(parameters) = calls[1] else {
        panic!("expected galvo parameters, got {:?}", calls[1]);
    };
    assert!((parameters.x.scale - 110.0).abs() < 1e-9);
    assert!((parameters.y.scale - 90.0).abs() < 1e-9);
    assert_eq!(calls[2], Call::Upload("FRAME-TASK".to_string()));
    assert_eq!(
        calls[3],
        Call::Start([Point::new(20.0, 30.0), Point::new(60.0, 70.0)], None)
    );

    // Already working: ignored
    assert!(!manager.start_framing(FramingKind::Framing, FramingOptions::default()).await);

    manager.stop_framing().await;
    assert!(!manager.is_working());
    assert_eq!(galvo.calls().last(), Some(&Call::Stop));

    // Correction stays applied for the session
    assert!(manager.start_framing(FramingKind::Framing, FramingOptions::default()).await);
    let calls = galvo.calls();
    assert_eq!(calls.iter().filter(|c| matches!(c, Call::SetField(..))).count(), 1);
    manager.stop_framing().await;

    manager.end_session().await.unwrap();
    let calls = galvo.calls();
    assert_eq!(calls[calls.len() - 2], Call::SetField(110.0, calibration().field));
    assert_eq!(calls[calls.len() - 1], Call::SetGalvo(GalvoParameters::default()));
}

#[tokio::test]
async fn test_disconnect_forces_idle() {
    let galvo = FakeGalvo::new(false);
    let manager = manager(galvo.clone(), false);
    let mut rx = manager.subscribe();

    assert!(manager.start_framing(FramingKind::Framing, FramingOptions::default()).await);
    galvo.events.send(GalvoEvent::Disconnected).unwrap();

    loop {
        if let Ok(FramingEvent::StatusChanged(false)) = rx.recv().await {
            break;
        }
    }
    assert!(!manager.is_working());
}

#[tokio::test(start_paused = true)]
async fn test_rotary_run_ends_when_job_finishes() {
    let galvo = FakeGalvo::new(true);
    let manager = manager(galvo.clone(), true);
    assert_eq!(
        manager.framing_options(),
        vec![FramingKind::RotateAxis, FramingKind::RotateFraming]
    );

    assert!(manager.start_framing(FramingKind::RotateFraming, FramingOptions::default()).await);
    let rotary = galvo.calls().iter().find_map(|c| match c {
        Call::Start(_, rotary) => Some(*rotary),
        _ => None,
    });
    assert_eq!(rotary.flatten().map(|r| r.y), Some(55.0));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(manager.is_working());

    galvo.state.store(64, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(!manager.is_working());
}

#[tokio::test]
async fn test_rotary_refused_without_firmware_support() {
    let galvo = FakeGalvo::new(false);
    let manager = manager(galvo.clone(), true);

    assert!(!manager.start_framing(FramingKind::RotateFraming, FramingOptions::default()).await);
    assert!(galvo.calls().is_empty());

    // The axis line itself runs without rotation
    assert!(manager.start_framing(FramingKind::RotateAxis, FramingOptions::default()).await);
    assert!(matches!(galvo.calls().last(), Some(Call::Start(_, None))));
}

#[tokio::test]
async fn test_busy_device_is_reported() {
    let galvo = FakeGalvo::new(false);
    galvo.state.store(16, Ordering::SeqCst);
    let manager = manager(galvo.clone(), false);
    let mut rx = manager.subscribe();

    assert!(!manager.start_framing(FramingKind::Framing, FramingOptions::default()).await);
    assert!(!manager.is_working());
    let mut alerted = false;
    while let Ok(event) = rx.try_recv() {
        alerted |= matches!(event, FramingEvent::Alert(ref text) if text.starts_with("Failed to start framing"));
    }
    assert!(alerted);
}
