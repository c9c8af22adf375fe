//! End-to-end pipeline tests: all three machines against the simulated backend

use crabsurface::capture::CaptureState;
use crabsurface::recording::EncodeState;
use crabsurface::render::{BouncingBall, HostSurface, RenderState};
use crabsurface::testing::{SimDeviceManager, SimEncoderFactory, SimGpu, SimHost, SimHostSurface, SimMuxerFactory};
use crabsurface::{MachineState, Notification, Pipeline, PipelineConfig, PipelineDeps, Size};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(3);

struct Fixture {
    dir: TempDir,
    gpu: Arc<SimGpu>,
    host: Arc<SimHost>,
    devices: Arc<SimDeviceManager>,
    muxers: Arc<SimMuxerFactory>,
    surface: Arc<SimHostSurface>,
    pipeline: Pipeline,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let gpu = Arc::new(SimGpu::new());
    let host = Arc::new(SimHost::new());
    let devices = Arc::new(SimDeviceManager::single_back_camera());
    let muxers = Arc::new(SimMuxerFactory::new());

    let mut config = PipelineConfig::default();
    config.encode.output_dir = dir.path().to_path_buf();

    let pipeline = Pipeline::new(
        config,
        PipelineDeps {
            devices: devices.clone(),
            gpu: gpu.clone(),
            encoders: Arc::new(SimEncoderFactory::new(gpu.clone())),
            muxers: muxers.clone(),
            host: host.clone(),
            on_active_changed: Some(host.active_callback()),
        },
    )
    .unwrap();

    Fixture {
        dir,
        gpu,
        host,
        devices,
        muxers,
        surface: Arc::new(SimHostSurface::with_size(Size::new(1280, 720))),
        pipeline,
    }
}

impl Fixture {
    fn create_and_resume(&self) {
        let surface: Arc<dyn HostSurface> = self.surface.clone();
        self.pipeline.create(surface, Arc::new(BouncingBall::new()));
        self.pipeline.resume();
        self.wait_running();
    }

    fn wait_running(&self) {
        assert!(self
            .pipeline
            .render()
            .wait_until(TIMEOUT, |s| matches!(s, RenderState::Drawing(_))));
        assert!(self
            .pipeline
            .capture()
            .wait_until(TIMEOUT, |s| matches!(s, CaptureState::Previewing(_))));
    }

    fn wait_encode<F>(&self, predicate: F) -> bool
    where
        F: Fn(&EncodeState) -> bool,
    {
        self.pipeline.encode().wait_until(TIMEOUT, predicate)
    }

    /// Drive `n` vsyncs and let every worker catch up
    fn frames(&self, n: usize) {
        for _ in 0..n {
            assert!(self.surface.vsync());
            assert!(self.pipeline.flush(TIMEOUT));
        }
        assert!(self.pipeline.flush(TIMEOUT));
    }
}

#[test]
fn test_resume_previews_camera_into_render_texture() {
    let f = fixture();
    f.create_and_resume();

    let render = f.pipeline.render_state();
    let capture = f.pipeline.capture_state();
    let fullscreen = render.scene().unwrap().fullscreen_texture().clone();
    let target = capture.holder().unwrap().texture.clone().unwrap();

    assert_eq!(target.id(), fullscreen.id());
    assert_eq!(f.devices.repeating_targets(), vec![fullscreen.window()]);
    assert!(f.pipeline.encode_state().is_idle());
    assert!(!f.pipeline.is_recording_active());
}

#[test]
fn test_frames_without_recording_only_reach_the_screen() {
    let f = fixture();
    f.create_and_resume();
    f.frames(3);

    assert_eq!(f.surface.swaps(), 3);
    assert_eq!(f.gpu.swap_count(), 0);
    assert!(f.muxers.log().paths.is_empty());
}

#[test]
fn test_toggle_record_writes_file() {
    let f = fixture();
    f.create_and_resume();

    assert!(f.pipeline.toggle_record());
    assert!(f.wait_encode(|s| matches!(s, EncodeState::Recording(_))));
    assert!(f.pipeline.is_recording_active());

    f.frames(5);
    assert_eq!(f.gpu.swap_count(), 5);

    assert!(!f.pipeline.toggle_record());
    assert!(f.wait_encode(|s| s.is_idle()));
    assert!(f.pipeline.flush(TIMEOUT));

    let output = f.dir.path().join("mediacoder-record.mp4");
    let log = f.muxers.log();
    assert_eq!(log.samples, 5);
    assert!(log.stopped);
    assert!(output.exists());
    assert_eq!(
        f.host.notifications(),
        vec![Notification::RecordingStopped { path: output }]
    );
    assert_eq!(f.host.active_changes(), vec![true, false]);
}

#[test]
fn test_second_recording_gets_fresh_params() {
    let f = fixture();
    f.create_and_resume();

    for _ in 0..2 {
        assert!(f.pipeline.toggle_record());
        assert!(f.wait_encode(|s| matches!(s, EncodeState::Recording(_))));
        f.frames(2);
        assert!(!f.pipeline.toggle_record());
        assert!(f.wait_encode(|s| s.is_idle()));
    }
    assert!(f.pipeline.flush(TIMEOUT));

    assert_eq!(f.muxers.log().paths.len(), 2);
    assert_eq!(f.host.active_changes(), vec![true, false, true, false]);
    assert!(f.host.fatal_errors().is_empty());
}

#[test]
fn test_pause_stops_everything_and_resume_restarts() {
    let f = fixture();
    f.create_and_resume();
    assert!(f.pipeline.toggle_record());
    assert!(f.wait_encode(|s| matches!(s, EncodeState::Recording(_))));
    let first_texture = f.pipeline.render_state().scene().unwrap().fullscreen_texture().id();

    f.pipeline.pause();
    assert!(f.pipeline.flush(TIMEOUT));
    assert!(f.pipeline.flush(TIMEOUT));

    let render = f.pipeline.render_state();
    assert!(matches!(render, RenderState::AwaitingSurfaceReady(_)));
    assert!(render.is_idle());
    assert!(f.pipeline.capture_state().is_idle());
    assert!(f.pipeline.encode_state().is_idle());
    assert!(f.surface.is_paused());
    assert_eq!(f.devices.close_count(), 1);
    assert_eq!(f.gpu.live_textures(), 0);
    assert_eq!(f.gpu.live_contexts(), 0);

    f.pipeline.resume();
    f.wait_running();

    let second_texture = f.pipeline.render_state().scene().unwrap().fullscreen_texture().id();
    assert_ne!(first_texture, second_texture);
    assert_eq!(f.surface.resumes(), 1);
    assert_eq!(f.devices.open_calls().len(), 2);
    assert!(f.pipeline.encode_state().is_idle());
}

#[test]
fn test_shutdown_stops_workers() {
    let f = fixture();
    f.create_and_resume();

    f.pipeline.shutdown(TIMEOUT).unwrap();

    assert!(!f.pipeline.render().is_running());
    assert!(!f.pipeline.capture().is_running());
    assert!(!f.pipeline.encode().is_running());
    assert_eq!(f.devices.close_count(), 1);
    assert_eq!(f.gpu.live_textures(), 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let gpu = Arc::new(SimGpu::new());
    let host = Arc::new(SimHost::new());
    let mut config = PipelineConfig::default();
    config.render.overlay_scale = 0.0;

    let result = Pipeline::new(
        config,
        PipelineDeps {
            devices: Arc::new(SimDeviceManager::single_back_camera()),
            gpu: gpu.clone(),
            encoders: Arc::new(SimEncoderFactory::new(gpu)),
            muxers: Arc::new(SimMuxerFactory::new()),
            host,
            on_active_changed: None,
        },
    );

    assert!(matches!(result, Err(crabsurface::PipelineError::Config(_))));
}
