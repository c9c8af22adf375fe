//! Render state machine: owns the GPU scene behind the host's drawing surface

use super::drawable::Drawable;
use super::gpu::{lock_canvas, ExternalTexture, Gpu};
use super::scene::Scene;
use crate::config::RenderConfig;
use crate::errors::PipelineError;
use crate::handoff::Handoff;
use crate::machine::{Machine, MachineState, Mailbox};
use crate::types::{ContextId, Rect, Size, TextureId};
use std::fmt;
use std::sync::Arc;

/// Invoked after every composited frame
pub type FrameCallback = Arc<dyn Fn() + Send + Sync>;

/// Host view that owns the on-screen drawing surface and its vsync loop
pub trait HostSurface: Send + Sync {
    fn set_context_client_version(&self, version: u32);

    /// Install the driver the host calls on resize and on every vsync
    fn set_render_loop(&self, render_loop: RenderLoop);

    /// Stop delivering draw requests and drop the on-screen context
    fn pause(&self);

    /// Recreate the on-screen context; geometry is delivered again afterwards
    fn resume(&self);

    fn swap_buffers(&self) -> Result<(), PipelineError>;
}

/// Driver handed to the host surface. Every call becomes a render action.
#[derive(Clone, Debug)]
pub struct RenderLoop {
    mailbox: Mailbox<RenderAction>,
}

impl RenderLoop {
    pub fn surface_changed(&self, width: u32, height: u32) {
        self.mailbox
            .send(RenderAction::SurfaceGeometryReady { width, height });
    }

    pub fn draw_frame(&self) {
        self.mailbox.send(RenderAction::Tick);
    }
}

/// What the encode machine needs to render its own copy of the composite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSurfaceParams {
    pub context: ContextId,
    pub overlay_texture: TextureId,
    pub fullscreen_texture: TextureId,
}

/// Resources accumulated by the render machine
#[derive(Clone)]
pub struct RenderHolder {
    pub surface: Arc<dyn HostSurface>,
    pub overlay: Arc<dyn Drawable>,
    pub on_frame_rendered: FrameCallback,
    pub surface_size: Option<Size>,
    pub scene: Option<Arc<Scene>>,
    pub paused: bool,
}

impl fmt::Debug for RenderHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderHolder")
            .field("surface_size", &self.surface_size)
            .field("scene", &self.scene)
            .field("paused", &self.paused)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum RenderState {
    AwaitingCreate,
    AwaitingSurfaceReady(RenderHolder),
    Drawing(RenderHolder),
}

impl RenderState {
    pub fn holder(&self) -> Option<&RenderHolder> {
        match self {
            RenderState::AwaitingCreate => None,
            RenderState::AwaitingSurfaceReady(h) | RenderState::Drawing(h) => Some(h),
        }
    }

    pub fn scene(&self) -> Option<&Arc<Scene>> {
        self.holder().and_then(|h| h.scene.as_ref())
    }
}

impl MachineState for RenderState {
    fn phase(&self) -> &'static str {
        match self {
            RenderState::AwaitingCreate => "AwaitingCreate",
            RenderState::AwaitingSurfaceReady(_) => "AwaitingSurfaceReady",
            RenderState::Drawing(_) => "Drawing",
        }
    }

    fn is_idle(&self) -> bool {
        matches!(self, RenderState::AwaitingCreate)
            || self.holder().is_some_and(|h| h.scene.is_none())
    }
}

pub enum RenderAction {
    Create {
        surface: Arc<dyn HostSurface>,
        overlay: Arc<dyn Drawable>,
        on_frame_rendered: FrameCallback,
    },
    SurfaceGeometryReady {
        width: u32,
        height: u32,
    },
    Tick,
    /// Publish the current scene's encoder params again for a new consumer
    PublishEncoderParams,
    Stop,
    Start,
}

impl fmt::Debug for RenderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderAction::Create { .. } => write!(f, "Create"),
            RenderAction::SurfaceGeometryReady { width, height } => {
                write!(f, "SurfaceGeometryReady({}x{})", width, height)
            }
            RenderAction::Tick => write!(f, "Tick"),
            RenderAction::PublishEncoderParams => write!(f, "PublishEncoderParams"),
            RenderAction::Stop => write!(f, "Stop"),
            RenderAction::Start => write!(f, "Start"),
        }
    }
}

/// Owns the on-screen GPU scene and publishes its textures to the other machines
pub struct RenderMachine {
    gpu: Arc<dyn Gpu>,
    config: RenderConfig,
    fullscreen_handoff: Arc<Handoff<Arc<dyn ExternalTexture>>>,
    encoder_handoff: Arc<Handoff<EncoderSurfaceParams>>,
}

impl RenderMachine {
    pub fn new(gpu: Arc<dyn Gpu>, config: RenderConfig) -> Self {
        Self {
            gpu,
            config,
            fullscreen_handoff: Arc::new(Handoff::new("fullscreen-texture")),
            encoder_handoff: Arc::new(Handoff::new("encoder-params")),
        }
    }

    /// Camera target texture, published once per built scene
    pub fn fullscreen_handoff(&self) -> Arc<Handoff<Arc<dyn ExternalTexture>>> {
        self.fullscreen_handoff.clone()
    }

    /// Shared context and texture ids, published once per built scene
    pub fn encoder_handoff(&self) -> Arc<Handoff<EncoderSurfaceParams>> {
        self.encoder_handoff.clone()
    }

    fn create(
        &self,
        surface: Arc<dyn HostSurface>,
        overlay: Arc<dyn Drawable>,
        on_frame_rendered: FrameCallback,
        mailbox: &Mailbox<RenderAction>,
    ) -> RenderState {
        surface.set_context_client_version(self.config.gl_client_version);

        let holder = RenderHolder {
            surface: surface.clone(),
            overlay,
            on_frame_rendered,
            surface_size: None,
            scene: None,
            paused: false,
        };

        surface.set_render_loop(RenderLoop {
            mailbox: mailbox.clone(),
        });

        RenderState::AwaitingSurfaceReady(holder)
    }

    fn build_scene(&self, holder: &RenderHolder, size: Size) -> Result<RenderState, PipelineError> {
        let scene = Arc::new(Scene::new(
            self.gpu.clone(),
            size,
            self.config.overlay_scale,
            self.config.clear_color,
            None,
            None,
        )?);

        holder
            .overlay
            .set_bounds(Rect::from_size(scene.overlay_texture().size()));

        self.fullscreen_handoff.put(scene.fullscreen_texture().clone());
        self.encoder_handoff.put(encoder_params(&scene));

        log::info!("Render scene ready at {}", size);

        Ok(RenderState::Drawing(RenderHolder {
            surface_size: Some(size),
            scene: Some(scene),
            ..holder.clone()
        }))
    }

    fn draw_frame(&self, holder: &RenderHolder) -> Result<(), PipelineError> {
        let Some(scene) = holder.scene.as_ref() else {
            return Ok(());
        };

        {
            let overlay_texture = scene.overlay_texture();
            let mut canvas = lock_canvas(overlay_texture.as_ref(), holder.overlay.bounds())?;
            holder.overlay.draw(&mut *canvas);
        }

        scene.draw()?;
        holder.surface.swap_buffers()?;
        (holder.on_frame_rendered)();
        Ok(())
    }

    fn stop(&self, holder: &RenderHolder) -> Option<RenderState> {
        if holder.paused && holder.scene.is_none() {
            return None;
        }

        if !holder.paused {
            holder.surface.pause();
        }

        if let Some(scene) = holder.scene.as_ref() {
            scene.release();
        }

        // Undelivered values would point at the scene just released
        self.fullscreen_handoff.clear();
        self.encoder_handoff.clear();

        Some(RenderState::AwaitingSurfaceReady(RenderHolder {
            scene: None,
            paused: true,
            ..holder.clone()
        }))
    }
}

fn encoder_params(scene: &Scene) -> EncoderSurfaceParams {
    EncoderSurfaceParams {
        context: scene.context(),
        overlay_texture: scene.overlay_texture().id(),
        fullscreen_texture: scene.fullscreen_texture().id(),
    }
}

impl Machine for RenderMachine {
    type State = RenderState;
    type Action = RenderAction;
    const NAME: &'static str = "render";

    fn initial_state(&self) -> RenderState {
        RenderState::AwaitingCreate
    }

    fn transition(
        &mut self,
        state: &RenderState,
        action: RenderAction,
        mailbox: &Mailbox<RenderAction>,
    ) -> Result<Option<RenderState>, PipelineError> {
        match (state, action) {
            (
                RenderState::AwaitingCreate,
                RenderAction::Create {
                    surface,
                    overlay,
                    on_frame_rendered,
                },
            ) => Ok(Some(self.create(surface, overlay, on_frame_rendered, mailbox))),

            (RenderState::AwaitingSurfaceReady(holder), RenderAction::SurfaceGeometryReady { width, height }) => {
                self.build_scene(holder, Size::new(width, height)).map(Some)
            }

            (RenderState::Drawing(holder), RenderAction::Tick) => {
                self.draw_frame(holder)?;
                Ok(None)
            }

            (RenderState::Drawing(holder), RenderAction::PublishEncoderParams) => {
                if let Some(scene) = holder.scene.as_ref() {
                    self.encoder_handoff.put(encoder_params(scene));
                }
                Ok(None)
            }

            (RenderState::AwaitingSurfaceReady(holder) | RenderState::Drawing(holder), RenderAction::Stop) => {
                Ok(self.stop(holder))
            }

            (RenderState::AwaitingSurfaceReady(holder), RenderAction::Start) => {
                if !holder.paused {
                    return Ok(None);
                }
                holder.surface.resume();
                Ok(Some(RenderState::AwaitingSurfaceReady(RenderHolder {
                    paused: false,
                    ..holder.clone()
                })))
            }

            _ => Ok(None),
        }
    }
}
