//! Encode state machine: renders the composite into the encoder and muxes the output

use super::encoder::{EncoderFactory, MuxerFactory};
use super::recorder::Recorder;
use crate::config::{EncodeConfig, RenderConfig};
use crate::errors::PipelineError;
use crate::handoff::Handoff;
use crate::host::{Host, Notification};
use crate::machine::{Machine, MachineState, Mailbox};
use crate::render::{EncoderSurfaceParams, FrameCallback, Gpu, Scene};
use crate::types::{ContextId, SurfaceId};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Handoff carrying the render machine's shared context and texture ids
pub type ParamsHandoff = Arc<Handoff<EncoderSurfaceParams>>;

/// Called on the host's main context with the new active flag
pub type ActiveCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Flags mirrored from the encode worker for lock-free reads elsewhere
#[derive(Debug, Default)]
pub struct EncodeStatus {
    active: AtomicBool,
    recording: AtomicBool,
}

impl EncodeStatus {
    /// True whenever the machine is not idle
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }
}

/// Per-frame hook handed to the render machine
#[derive(Clone)]
pub struct DrawingCaller {
    mailbox: Mailbox<EncodeAction>,
    status: Arc<EncodeStatus>,
}

impl DrawingCaller {
    pub fn new(mailbox: Mailbox<EncodeAction>, status: Arc<EncodeStatus>) -> Self {
        Self { mailbox, status }
    }

    /// Enqueue a frame only while recording, so idle ticks cost nothing
    pub fn call(&self) {
        if self.status.is_recording() {
            self.mailbox.send(EncodeAction::FrameAvailable);
        }
    }

    pub fn into_frame_callback(self) -> FrameCallback {
        Arc::new(move || self.call())
    }
}

impl fmt::Debug for DrawingCaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrawingCaller")
            .field("recording", &self.status.is_recording())
            .finish()
    }
}

/// Resources accumulated by the encode machine
#[derive(Clone, Default)]
pub struct EncodeHolder {
    pub params_handoff: Option<ParamsHandoff>,
    pub params: Option<EncoderSurfaceParams>,
    pub recorder: Option<Arc<Mutex<Recorder>>>,
    pub context: Option<ContextId>,
    pub surface: Option<SurfaceId>,
    pub scene: Option<Arc<Scene>>,
}

impl fmt::Debug for EncodeHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodeHolder")
            .field("params", &self.params)
            .field("context", &self.context)
            .field("surface", &self.surface)
            .field("scene", &self.scene)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum EncodeState {
    Idle,
    AwaitingContext(EncodeHolder),
    Recording(EncodeHolder),
}

impl EncodeState {
    pub fn holder(&self) -> Option<&EncodeHolder> {
        match self {
            EncodeState::Idle => None,
            EncodeState::AwaitingContext(h) | EncodeState::Recording(h) => Some(h),
        }
    }
}

impl MachineState for EncodeState {
    fn phase(&self) -> &'static str {
        match self {
            EncodeState::Idle => "Idle",
            EncodeState::AwaitingContext(_) => "AwaitingContext",
            EncodeState::Recording(_) => "Recording",
        }
    }

    fn is_idle(&self) -> bool {
        matches!(self, EncodeState::Idle)
    }
}

pub enum EncodeAction {
    Start { params_handoff: ParamsHandoff },
    ContextReady(EncoderSurfaceParams),
    FrameAvailable,
    Stop,
}

impl fmt::Debug for EncodeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeAction::Start { .. } => write!(f, "Start"),
            EncodeAction::ContextReady(params) => write!(f, "ContextReady({:?})", params),
            EncodeAction::FrameAvailable => write!(f, "FrameAvailable"),
            EncodeAction::Stop => write!(f, "Stop"),
        }
    }
}

/// Owns the encoder, the muxer and the private encoder-side scene
pub struct EncodeMachine {
    gpu: Arc<dyn Gpu>,
    encoders: Arc<dyn EncoderFactory>,
    muxers: Arc<dyn MuxerFactory>,
    config: EncodeConfig,
    render: RenderConfig,
    host: Arc<dyn Host>,
    status: Arc<EncodeStatus>,
    on_active_changed: Option<ActiveCallback>,
}

impl EncodeMachine {
    pub fn new(
        gpu: Arc<dyn Gpu>,
        encoders: Arc<dyn EncoderFactory>,
        muxers: Arc<dyn MuxerFactory>,
        config: EncodeConfig,
        render: RenderConfig,
        host: Arc<dyn Host>,
    ) -> Self {
        Self {
            gpu,
            encoders,
            muxers,
            config,
            render,
            host,
            status: Arc::new(EncodeStatus::default()),
            on_active_changed: None,
        }
    }

    /// Observer notified on the host's main context on every idle edge
    pub fn with_active_callback(mut self, callback: ActiveCallback) -> Self {
        self.on_active_changed = Some(callback);
        self
    }

    pub fn status(&self) -> Arc<EncodeStatus> {
        self.status.clone()
    }

    fn start(&self, params_handoff: ParamsHandoff, mailbox: &Mailbox<EncodeAction>) -> EncodeState {
        let consumer_mailbox = mailbox.clone();
        params_handoff.consume(move |params| {
            consumer_mailbox.send(EncodeAction::ContextReady(params));
        });

        EncodeState::AwaitingContext(EncodeHolder {
            params_handoff: Some(params_handoff),
            ..EncodeHolder::default()
        })
    }

    fn context_ready(
        &self,
        holder: &EncodeHolder,
        params: EncoderSurfaceParams,
    ) -> Result<EncodeState, PipelineError> {
        let output_path = self.config.output_path();
        remove_previous_output(&output_path)?;

        let recorder = Recorder::new(&output_path, &self.config, self.encoders.as_ref(), self.muxers.as_ref())?;
        let frame_size = recorder.frame_size();

        let context = self.gpu.create_shared_context(params.context, true)?;
        let surface = match self.gpu.create_window_surface(context, recorder.input_window()) {
            Ok(surface) => surface,
            Err(e) => {
                self.gpu.release_context(context);
                return Err(e);
            }
        };

        let scene = self.gpu.make_current(context, surface).and_then(|()| {
            Scene::new(
                self.gpu.clone(),
                frame_size,
                self.render.overlay_scale,
                self.render.clear_color,
                Some(params.fullscreen_texture),
                Some(params.overlay_texture),
            )
        });
        let scene = match scene {
            Ok(scene) => scene,
            Err(e) => {
                self.gpu.release_surface(context, surface);
                self.gpu.release_context(context);
                return Err(e);
            }
        };

        log::info!("Recording {} to {}", frame_size, output_path.display());

        Ok(EncodeState::Recording(EncodeHolder {
            params: Some(params),
            recorder: Some(Arc::new(Mutex::new(recorder))),
            context: Some(context),
            surface: Some(surface),
            scene: Some(Arc::new(scene)),
            ..holder.clone()
        }))
    }

    fn frame_available(&self, holder: &EncodeHolder) -> Result<(), PipelineError> {
        let (Some(recorder), Some(scene), Some(surface)) =
            (holder.recorder.as_ref(), holder.scene.as_ref(), holder.surface)
        else {
            return Ok(());
        };

        let mut recorder = recorder.lock().unwrap_or_else(PoisonError::into_inner);
        recorder.drain(false)?;
        scene.draw()?;
        self.gpu.swap_buffers(surface)?;
        recorder.frame_rendered();
        Ok(())
    }

    fn stop(&self, holder: &EncodeHolder) -> Result<EncodeState, PipelineError> {
        if let Some(handoff) = holder.params_handoff.as_ref() {
            handoff.withdraw();
        }

        let finished = holder.recorder.as_ref().map(|recorder| {
            recorder
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .finish()
        });

        if let Some(scene) = holder.scene.as_ref() {
            scene.release();
        }
        if let (Some(context), Some(surface)) = (holder.context, holder.surface) {
            self.gpu.release_surface(context, surface);
        }
        if let Some(context) = holder.context {
            // Private context only; the shared one belongs to the render machine
            self.gpu.release_context(context);
        }

        match finished {
            Some(Err(e)) if e.is_fatal() => return Err(e),
            Some(Err(e)) => log::warn!("Recording did not finish cleanly: {}", e),
            Some(Ok(stats)) => log::debug!("{:?}", stats),
            None => {}
        }

        let output_path = self.config.output_path();
        if output_path.exists() {
            self.host.notify(Notification::RecordingStopped { path: output_path });
        }

        Ok(EncodeState::Idle)
    }

    fn step(
        &self,
        state: &EncodeState,
        action: EncodeAction,
        mailbox: &Mailbox<EncodeAction>,
    ) -> Result<Option<EncodeState>, PipelineError> {
        match (state, action) {
            (EncodeState::Idle, EncodeAction::Start { params_handoff }) => {
                Ok(Some(self.start(params_handoff, mailbox)))
            }

            (EncodeState::AwaitingContext(holder), EncodeAction::ContextReady(params)) => {
                match self.context_ready(holder, params) {
                    Ok(next) => Ok(Some(next)),
                    Err(e) if e.is_fatal() => Err(e),
                    Err(e) => {
                        log::warn!("Encoder setup failed, recording abandoned: {}", e);
                        Ok(Some(EncodeState::Idle))
                    }
                }
            }

            (EncodeState::Recording(holder), EncodeAction::FrameAvailable) => {
                self.frame_available(holder)?;
                Ok(None)
            }

            (EncodeState::AwaitingContext(holder) | EncodeState::Recording(holder), EncodeAction::Stop) => {
                self.stop(holder).map(Some)
            }

            _ => Ok(None),
        }
    }

    fn publish_status(&self, before: &EncodeState, after: &EncodeState) {
        self.status
            .recording
            .store(matches!(after, EncodeState::Recording(_)), Ordering::Release);

        let active = !after.is_idle();
        if before.is_idle() == after.is_idle() {
            return;
        }
        self.status.active.store(active, Ordering::Release);

        log::info!("Encoder {}", if active { "active" } else { "inactive" });
        if let Some(callback) = self.on_active_changed.clone() {
            self.host.run_on_main(Box::new(move || callback(active)));
        }
    }
}

impl Machine for EncodeMachine {
    type State = EncodeState;
    type Action = EncodeAction;
    const NAME: &'static str = "encode";

    fn initial_state(&self) -> EncodeState {
        EncodeState::Idle
    }

    fn transition(
        &mut self,
        state: &EncodeState,
        action: EncodeAction,
        mailbox: &Mailbox<EncodeAction>,
    ) -> Result<Option<EncodeState>, PipelineError> {
        let next = self.step(state, action, mailbox)?;
        if let Some(next) = next.as_ref() {
            self.publish_status(state, next);
        }
        Ok(next)
    }
}

fn remove_previous_output(path: &Path) -> Result<(), PipelineError> {
    match fs::remove_file(path) {
        Ok(()) => {
            log::debug!("Removed previous recording {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
