//! Wiring of the three machines into one host-driven pipeline
//!
//! The render machine is spawned first because it owns both handoffs the
//! other two consume. Host lifecycle events map onto machine actions:
//!
//! | Host event      | Actions                                                  |
//! |-----------------|----------------------------------------------------------|
//! | `create`        | render `Create`                                          |
//! | `resume`        | render `Start`, capture `Start`                          |
//! | `pause`         | render `Stop`, encode `Stop`, capture `Stop`             |
//! | `toggle_record` | encode `Stop` if active, otherwise encode `Start`        |

use crate::capture::{CaptureAction, CaptureMachine, CaptureState, DeviceManager, TextureHandoff};
use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::host::Host;
use crate::machine::{StateMachine, Worker};
use crate::recording::{
    ActiveCallback, DrawingCaller, EncodeAction, EncodeMachine, EncodeState, EncodeStatus, EncoderFactory,
    MuxerFactory, ParamsHandoff,
};
use crate::render::{Drawable, Gpu, HostSurface, RenderAction, RenderMachine, RenderState};
use std::sync::Arc;
use std::time::Duration;

/// Collaborators the pipeline is built from
pub struct PipelineDeps {
    pub devices: Arc<dyn DeviceManager>,
    pub gpu: Arc<dyn Gpu>,
    pub encoders: Arc<dyn EncoderFactory>,
    pub muxers: Arc<dyn MuxerFactory>,
    pub host: Arc<dyn Host>,
    /// Record-button observer, called on the host's main context
    pub on_active_changed: Option<ActiveCallback>,
}

/// The capture, render and encode machines running on their own workers
pub struct Pipeline {
    devices: Arc<dyn DeviceManager>,
    fullscreen_handoff: TextureHandoff,
    encoder_handoff: ParamsHandoff,
    drawing_caller: DrawingCaller,
    encode_status: Arc<EncodeStatus>,
    render: Worker<RenderMachine>,
    capture: Worker<CaptureMachine>,
    encode: Worker<EncodeMachine>,
}

impl Pipeline {
    /// Spawn the three workers
    pub fn new(config: PipelineConfig, deps: PipelineDeps) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::Config)?;

        let render_machine = RenderMachine::new(deps.gpu.clone(), config.render.clone());
        let fullscreen_handoff = render_machine.fullscreen_handoff();
        let encoder_handoff = render_machine.encoder_handoff();
        let render = Worker::spawn(render_machine, deps.host.clone())?;

        let capture = Worker::spawn(
            CaptureMachine::new(config.capture.clone(), deps.host.clone()),
            deps.host.clone(),
        )?;

        let mut encode_machine = EncodeMachine::new(
            deps.gpu,
            deps.encoders,
            deps.muxers,
            config.encode.clone(),
            config.render.clone(),
            deps.host.clone(),
        );
        if let Some(callback) = deps.on_active_changed {
            encode_machine = encode_machine.with_active_callback(callback);
        }
        let encode_status = encode_machine.status();
        let encode = Worker::spawn(encode_machine, deps.host)?;
        let drawing_caller = DrawingCaller::new(encode.mailbox(), encode_status.clone());

        log::info!("Pipeline workers started");

        Ok(Self {
            devices: deps.devices,
            fullscreen_handoff,
            encoder_handoff,
            drawing_caller,
            encode_status,
            render,
            capture,
            encode,
        })
    }

    /// Bind the host's drawing surface and the overlay it composites
    pub fn create(&self, surface: Arc<dyn HostSurface>, overlay: Arc<dyn Drawable>) {
        self.render.send(RenderAction::Create {
            surface,
            overlay,
            on_frame_rendered: self.drawing_caller.clone().into_frame_callback(),
        });
    }

    pub fn resume(&self) {
        self.render.send(RenderAction::Start);
        self.capture.send(CaptureAction::Start {
            devices: self.devices.clone(),
            texture_handoff: self.fullscreen_handoff.clone(),
        });
    }

    pub fn pause(&self) {
        self.render.send(RenderAction::Stop);
        self.encode.send(EncodeAction::Stop);
        self.capture.send(CaptureAction::Stop);
    }

    /// Stop recording if the encoder is active, otherwise start it.
    ///
    /// Returns true when a start was requested.
    pub fn toggle_record(&self) -> bool {
        if self.encode_status.is_active() {
            log::info!("Stopping recording");
            self.encode.send(EncodeAction::Stop);
            false
        } else {
            log::info!("Starting recording");
            self.render.send(RenderAction::PublishEncoderParams);
            self.encode.send(EncodeAction::Start {
                params_handoff: self.encoder_handoff.clone(),
            });
            true
        }
    }

    pub fn is_recording_active(&self) -> bool {
        self.encode_status.is_active()
    }

    pub fn render_state(&self) -> RenderState {
        self.render.state()
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture.state()
    }

    pub fn encode_state(&self) -> EncodeState {
        self.encode.state()
    }

    pub fn render(&self) -> &Worker<RenderMachine> {
        &self.render
    }

    pub fn capture(&self) -> &Worker<CaptureMachine> {
        &self.capture
    }

    pub fn encode(&self) -> &Worker<EncodeMachine> {
        &self.encode
    }

    /// Block until every action queued so far on all three workers has run
    pub fn flush(&self, timeout: Duration) -> bool {
        self.render.flush(timeout) && self.capture.flush(timeout) && self.encode.flush(timeout)
    }

    /// Pause, then stop the workers in reverse spawn order
    pub fn shutdown(&self, join_timeout: Duration) -> Result<(), PipelineError> {
        self.pause();
        self.encode.shutdown(join_timeout)?;
        self.capture.shutdown(join_timeout)?;
        self.render.shutdown(join_timeout)?;
        log::info!("Pipeline stopped");
        Ok(())
    }
}
