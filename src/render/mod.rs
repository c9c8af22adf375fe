//! On-screen compositing: GPU interface, scene, overlay drawables and the render machine

pub mod drawable;
pub mod gpu;
pub mod machine;
pub mod scene;

pub use drawable::{BouncingBall, Drawable};
pub use gpu::{lock_canvas, Canvas, CanvasGuard, ExternalTexture, Gpu, ProgramBindings, QuadDraw, QuadVertices};
pub use machine::{
    EncoderSurfaceParams, FrameCallback, HostSurface, RenderAction, RenderHolder, RenderLoop, RenderMachine,
    RenderState,
};
pub use scene::{texture_matrix, Scene};
