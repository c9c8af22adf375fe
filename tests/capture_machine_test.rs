//! Capture machine tests against the simulated camera service

use crabsurface::capture::{CaptureAction, CaptureMachine, CaptureState, DeviceErrorCode, TextureHandoff};
use crabsurface::config::CaptureConfig;
use crabsurface::render::{ExternalTexture, Gpu};
use crabsurface::testing::{Completion, SimCamera, SimDeviceManager, SimGpu, SimHost};
use crabsurface::{Handoff, LensFacing, MachineState, Notification, Rotation, Size, StateMachine, Worker};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(2);

struct Fixture {
    gpu: SimGpu,
    host: Arc<SimHost>,
    devices: Arc<SimDeviceManager>,
    handoff: TextureHandoff,
    worker: Worker<CaptureMachine>,
}

fn fixture_with(devices: SimDeviceManager, config: CaptureConfig) -> Fixture {
    let host = Arc::new(SimHost::new());
    let worker = Worker::spawn(CaptureMachine::new(config, host.clone()), host.clone()).unwrap();
    Fixture {
        gpu: SimGpu::new(),
        host,
        devices: Arc::new(devices),
        handoff: Arc::new(Handoff::new("fullscreen-texture")),
        worker,
    }
}

fn fixture(devices: SimDeviceManager) -> Fixture {
    fixture_with(devices, CaptureConfig::default())
}

impl Fixture {
    fn start(&self) {
        self.worker.send(CaptureAction::Start {
            devices: self.devices.clone(),
            texture_handoff: self.handoff.clone(),
        });
    }

    fn texture(&self) -> Arc<dyn ExternalTexture> {
        self.gpu
            .create_external_texture(Size::new(1280, 720), &[0.0; 20], None)
            .unwrap()
    }

    /// Flush once per generation of self-sent actions
    fn settle(&self) {
        for _ in 0..6 {
            assert!(self.worker.flush(TIMEOUT));
        }
    }

    fn phase(&self) -> &'static str {
        self.worker.state().phase()
    }
}

#[test]
fn test_start_reaches_previewing() {
    let f = fixture(SimDeviceManager::single_back_camera());
    let texture = f.texture();
    f.handoff.put(texture.clone());

    f.start();
    assert!(f
        .worker
        .wait_until(TIMEOUT, |s| matches!(s, CaptureState::Previewing(_))));

    let state = f.worker.state();
    let holder = state.holder().unwrap();
    assert_eq!(holder.device_id.as_deref(), Some("0"));
    assert_eq!(holder.size, Some(Size::new(640, 360)));
    assert!(holder.session.is_some());

    let sim = f.gpu.texture(texture.id()).unwrap();
    assert_eq!(sim.default_buffer_size(), Some(Size::new(640, 360)));
    assert_eq!(texture.rotation(), Rotation::Deg90);
    assert_eq!(f.devices.sessions_created(), vec![texture.window()]);
    assert_eq!(f.devices.repeating_targets(), vec![texture.window()]);
    assert!(!f.handoff.has_pending_value());
}

#[test]
fn test_texture_published_after_open_is_picked_up() {
    let f = fixture(SimDeviceManager::single_back_camera());
    f.start();
    assert!(f
        .worker
        .wait_until(TIMEOUT, |s| matches!(s, CaptureState::AwaitingTargetSurface(_))));
    assert!(f.handoff.has_waiting_consumer());

    f.handoff.put(f.texture());
    assert!(f
        .worker
        .wait_until(TIMEOUT, |s| matches!(s, CaptureState::Previewing(_))));
}

#[test]
fn test_stop_from_previewing_releases_once() {
    let f = fixture(SimDeviceManager::single_back_camera());
    f.handoff.put(f.texture());
    f.start();
    assert!(f
        .worker
        .wait_until(TIMEOUT, |s| matches!(s, CaptureState::Previewing(_))));

    f.worker.send(CaptureAction::Stop);
    f.worker.send(CaptureAction::Stop);
    f.settle();

    assert!(f.worker.state().is_idle());
    assert_eq!(f.devices.abort_count(), 1);
    assert_eq!(f.devices.close_count(), 1);
}

#[test]
fn test_stop_when_idle_is_noop() {
    let f = fixture(SimDeviceManager::single_back_camera());
    f.worker.send(CaptureAction::Stop);
    f.settle();

    assert_eq!(f.phase(), "Idle");
    assert_eq!(f.devices.close_count(), 0);
    assert!(f.devices.open_calls().is_empty());
}

#[test]
fn test_no_back_camera_skips_open() {
    let f = fixture(SimDeviceManager::new(vec![SimCamera::new(
        "front",
        LensFacing::Front,
        vec![Size::new(640, 360)],
    )]));
    f.start();
    f.settle();

    let state = f.worker.state();
    assert!(matches!(state, CaptureState::AwaitingDeviceOpen(_)));
    assert_eq!(state.holder().unwrap().device_id, None);
    assert!(f.devices.open_calls().is_empty());

    f.worker.send(CaptureAction::Stop);
    f.settle();
    assert_eq!(f.phase(), "Idle");
    assert_eq!(f.devices.close_count(), 0);
}

#[test]
fn test_no_matching_size_still_opens() {
    let f = fixture(SimDeviceManager::new(vec![SimCamera::new(
        "0",
        LensFacing::Back,
        vec![Size::new(1920, 1080), Size::new(640, 480)],
    )]));
    let texture = f.texture();
    f.handoff.put(texture.clone());
    f.start();
    assert!(f
        .worker
        .wait_until(TIMEOUT, |s| matches!(s, CaptureState::Previewing(_))));

    assert_eq!(f.worker.state().holder().unwrap().size, None);
    // Without a size the texture keeps its defaults
    assert_eq!(f.gpu.texture(texture.id()).unwrap().default_buffer_size(), None);
    assert_eq!(texture.rotation(), Rotation::Deg0);
}

#[test]
fn test_portrait_size_is_not_rotated() {
    let config = CaptureConfig {
        target_aspect_ratio: 9.0 / 16.0,
        ..CaptureConfig::default()
    };
    let f = fixture_with(
        SimDeviceManager::new(vec![SimCamera::new(
            "0",
            LensFacing::Back,
            vec![Size::new(640, 360), Size::new(360, 640)],
        )]),
        config,
    );
    let texture = f.texture();
    texture.set_rotation(Rotation::Deg270);
    f.handoff.put(texture.clone());
    f.start();
    assert!(f
        .worker
        .wait_until(TIMEOUT, |s| matches!(s, CaptureState::Previewing(_))));

    assert_eq!(texture.rotation(), Rotation::Deg0);
    assert_eq!(
        f.gpu.texture(texture.id()).unwrap().default_buffer_size(),
        Some(Size::new(360, 640))
    );
}

#[test]
fn test_late_open_after_stop_closes_device() {
    let f = fixture(SimDeviceManager::single_back_camera().with_open_completion(Completion::Manual));
    f.start();
    f.worker.send(CaptureAction::Stop);
    f.settle();
    assert_eq!(f.phase(), "Idle");
    assert_eq!(f.devices.close_count(), 0);

    assert!(f.devices.complete_open());
    f.settle();

    assert_eq!(f.phase(), "Idle");
    assert_eq!(f.devices.close_count(), 1);
}

#[test]
fn test_max_cameras_in_use_notifies_and_stops() {
    let f = fixture(SimDeviceManager::single_back_camera().with_open_error(DeviceErrorCode::MaxCamerasInUse));
    f.start();
    f.settle();

    assert_eq!(f.phase(), "Idle");
    assert_eq!(f.host.notifications(), vec![Notification::MaxCamerasInUse]);
    assert!(f.host.fatal_errors().is_empty());
}

#[test]
fn test_other_device_errors_stop_quietly() {
    let f = fixture(SimDeviceManager::single_back_camera().with_open_completion(Completion::Manual));
    f.start();
    f.settle();
    assert_eq!(f.phase(), "AwaitingDeviceOpen");

    assert!(f.devices.fail_open(DeviceErrorCode::InUse));
    f.settle();

    assert_eq!(f.phase(), "Idle");
    assert!(f.host.notifications().is_empty());
}

#[test]
fn test_disconnect_while_previewing_stops() {
    let f = fixture(SimDeviceManager::single_back_camera());
    f.handoff.put(f.texture());
    f.start();
    assert!(f
        .worker
        .wait_until(TIMEOUT, |s| matches!(s, CaptureState::Previewing(_))));

    assert!(f.devices.disconnect());
    f.settle();

    assert_eq!(f.phase(), "Idle");
    assert_eq!(f.devices.abort_count(), 1);
    assert_eq!(f.devices.close_count(), 1);
}

#[test]
fn test_capture_failure_stops() {
    let f = fixture(SimDeviceManager::single_back_camera());
    f.handoff.put(f.texture());
    f.start();
    assert!(f
        .worker
        .wait_until(TIMEOUT, |s| matches!(s, CaptureState::Previewing(_))));

    assert!(f.devices.fail_capture());
    f.settle();
    assert_eq!(f.phase(), "Idle");
    assert_eq!(f.devices.close_count(), 1);
}

#[test]
fn test_session_configure_failure_stops() {
    let f = fixture(SimDeviceManager::single_back_camera().with_session_completion(Completion::Manual));
    f.handoff.put(f.texture());
    f.start();
    assert!(f
        .worker
        .wait_until(TIMEOUT, |s| matches!(s, CaptureState::AwaitingSessionReady(_))));

    assert!(f.devices.fail_session());
    f.settle();

    assert_eq!(f.phase(), "Idle");
    assert_eq!(f.devices.abort_count(), 0);
    assert_eq!(f.devices.close_count(), 1);
}

#[test]
fn test_stop_while_awaiting_session_then_late_session_is_aborted() {
    let f = fixture(SimDeviceManager::single_back_camera().with_session_completion(Completion::Manual));
    f.handoff.put(f.texture());
    f.start();
    assert!(f
        .worker
        .wait_until(TIMEOUT, |s| matches!(s, CaptureState::AwaitingSessionReady(_))));

    f.worker.send(CaptureAction::Stop);
    f.settle();
    assert_eq!(f.phase(), "Idle");
    assert_eq!(f.devices.close_count(), 1);
    assert_eq!(f.devices.abort_count(), 0);

    assert!(f.devices.complete_session());
    f.settle();

    assert_eq!(f.phase(), "Idle");
    assert_eq!(f.devices.close_count(), 1);
    assert_eq!(f.devices.abort_count(), 1);
    assert!(f.devices.repeating_targets().is_empty());
}

#[test]
fn test_stop_while_awaiting_texture_withdraws_consumer() {
    let f = fixture(SimDeviceManager::single_back_camera());
    f.start();
    assert!(f
        .worker
        .wait_until(TIMEOUT, |s| matches!(s, CaptureState::AwaitingTargetSurface(_))));

    f.worker.send(CaptureAction::Stop);
    f.settle();
    assert!(!f.handoff.has_waiting_consumer());

    f.handoff.put(f.texture());
    f.settle();
    assert!(f.handoff.has_pending_value());
    assert_eq!(f.phase(), "Idle");
    assert!(f.devices.sessions_created().is_empty());
}

#[test]
fn test_restart_after_stop() {
    let f = fixture(SimDeviceManager::single_back_camera());
    f.handoff.put(f.texture());
    f.start();
    assert!(f
        .worker
        .wait_until(TIMEOUT, |s| matches!(s, CaptureState::Previewing(_))));
    f.worker.send(CaptureAction::Stop);
    f.settle();

    f.handoff.put(f.texture());
    f.start();
    assert!(f
        .worker
        .wait_until(TIMEOUT, |s| matches!(s, CaptureState::Previewing(_))));

    assert_eq!(f.devices.open_calls(), vec!["0".to_string(), "0".to_string()]);
    assert_eq!(f.devices.close_count(), 1);
}
