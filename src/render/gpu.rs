//! GPU collaborator interface
//!
//! The shader compiler, texture allocator and draw calls live behind [`Gpu`].
//! Implementations are expected to be used only from the thread that has the
//! relevant context current, which for the machines means their own worker.

use crate::errors::PipelineError;
use crate::types::{ContextId, NativeWindow, ProgramId, Rect, Rgba, Rotation, Size, SurfaceId, TextureId};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Interleaved quad vertices: four `X, Y, Z, U, V` rows drawn as a triangle strip
pub type QuadVertices = [f32; 20];

/// Floats per vertex row
pub const VERTEX_STRIDE: usize = 5;
/// Offset of the position within a vertex row
pub const POSITION_OFFSET: usize = 0;
/// Offset of the texture coordinate within a vertex row
pub const UV_OFFSET: usize = 3;

/// Texture whose content is produced outside the GPU (camera, CPU canvas)
/// and sampled by draw calls
pub trait ExternalTexture: Send + Sync {
    fn id(&self) -> TextureId;

    /// Size the texture was created with
    fn size(&self) -> Size;

    fn rotation(&self) -> Rotation;

    fn set_rotation(&self, rotation: Rotation);

    /// Size of the buffers the producer side will queue
    fn set_default_buffer_size(&self, size: Size);

    /// Producer side of the texture
    fn window(&self) -> NativeWindow;

    /// Acquire a CPU canvas over `dirty`. Prefer [`lock_canvas`], which
    /// guarantees the matching unlock.
    fn lock_canvas(&self, dirty: Rect) -> Result<Box<dyn Canvas>, PipelineError>;

    /// Queue the canvas content to the texture and release the canvas
    fn unlock_canvas_and_post(&self, canvas: Box<dyn Canvas>);

    /// Latch the most recent producer buffer for sampling
    fn update_tex_image(&self) -> Result<(), PipelineError>;

    /// Release the producer side. Does not delete the GPU texture name.
    fn release(&self);
}

/// 2D drawing surface handed to overlay drawables
pub trait Canvas: Send {
    fn fill_rect(&mut self, rect: Rect, color: Rgba);

    fn fill_circle(&mut self, cx: f32, cy: f32, radius: f32, color: Rgba);
}

/// Canvas locked on an external texture, posted back when dropped
pub struct CanvasGuard<'a> {
    texture: &'a dyn ExternalTexture,
    canvas: Option<Box<dyn Canvas>>,
}

/// Lock a canvas on `texture` for the lifetime of the returned guard
pub fn lock_canvas(texture: &dyn ExternalTexture, dirty: Rect) -> Result<CanvasGuard<'_>, PipelineError> {
    let canvas = texture.lock_canvas(dirty)?;
    Ok(CanvasGuard {
        texture,
        canvas: Some(canvas),
    })
}

impl Deref for CanvasGuard<'_> {
    type Target = dyn Canvas;

    fn deref(&self) -> &Self::Target {
        // Only taken in drop.
        match &self.canvas {
            Some(canvas) => canvas.as_ref(),
            None => unreachable!("canvas released before guard was dropped"),
        }
    }
}

impl DerefMut for CanvasGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.canvas {
            Some(canvas) => canvas.as_mut(),
            None => unreachable!("canvas released before guard was dropped"),
        }
    }
}

impl Drop for CanvasGuard<'_> {
    fn drop(&mut self) {
        if let Some(canvas) = self.canvas.take() {
            self.texture.unlock_canvas_and_post(canvas);
        }
    }
}

/// Attribute and uniform locations of the compositing program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramBindings {
    pub program: ProgramId,
    pub a_position: u32,
    pub a_texture_coord: u32,
    pub u_mvp_matrix: u32,
    pub u_tex_matrix: u32,
}

/// One textured quad draw
#[derive(Debug, Clone, Copy)]
pub struct QuadDraw<'a> {
    pub texture: TextureId,
    pub vertices: &'a QuadVertices,
    pub mvp_matrix: [f32; 16],
    pub tex_matrix: [f32; 16],
    pub bindings: &'a ProgramBindings,
}

/// GPU services used by the render and encode machines
pub trait Gpu: Send + Sync {
    /// Context current on the calling thread
    fn current_context(&self) -> ContextId;

    /// Create an external texture over `vertices`, allocating a new texture
    /// name unless `existing` is given
    fn create_external_texture(
        &self,
        size: Size,
        vertices: &QuadVertices,
        existing: Option<TextureId>,
    ) -> Result<Arc<dyn ExternalTexture>, PipelineError>;

    fn delete_texture(&self, texture: TextureId);

    fn compile_program(&self, vertex_src: &str, fragment_src: &str) -> Result<ProgramId, PipelineError>;

    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<u32>;

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<u32>;

    fn delete_program(&self, program: ProgramId);

    fn viewport(&self, size: Size);

    fn clear(&self, color: Rgba);

    fn use_program(&self, program: ProgramId) -> Result<(), PipelineError>;

    fn draw_quad(&self, draw: &QuadDraw<'_>) -> Result<(), PipelineError>;

    /// New context sharing textures with `share`; `recordable` selects a
    /// config that can render into encoder input surfaces
    fn create_shared_context(&self, share: ContextId, recordable: bool) -> Result<ContextId, PipelineError>;

    fn create_window_surface(&self, context: ContextId, window: NativeWindow) -> Result<SurfaceId, PipelineError>;

    fn make_current(&self, context: ContextId, surface: SurfaceId) -> Result<(), PipelineError>;

    fn swap_buffers(&self, surface: SurfaceId) -> Result<(), PipelineError>;

    fn release_surface(&self, context: ContextId, surface: SurfaceId);

    fn release_context(&self, context: ContextId);
}

impl fmt::Debug for dyn ExternalTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalTexture")
            .field("id", &self.id())
            .field("size", &self.size())
            .field("rotation", &self.rotation())
            .finish()
    }
}
