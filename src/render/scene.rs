//! Compositing scene: fullscreen camera quad with a small overlay quad on top

use super::gpu::{ExternalTexture, Gpu, ProgramBindings, QuadDraw, QuadVertices};
use crate::errors::PipelineError;
use crate::types::{ContextId, Rgba, Rotation, Size, TextureId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const VERTEX_SHADER: &str = "\
uniform mat4 uMVPMatrix;
uniform mat4 uTexMatrix;
attribute vec4 aPosition;
attribute vec4 aTextureCoord;
varying vec2 vTextureCoord;

void main() {
    gl_Position = uMVPMatrix * aPosition;
    vTextureCoord = (uTexMatrix * aTextureCoord).xy;
}
";

pub const FRAGMENT_SHADER: &str = "\
#extension GL_OES_EGL_image_external : require
precision mediump float;
varying vec2 vTextureCoord;
uniform samplerExternalOES sTexture;

void main() {
    gl_FragColor = texture2D(sTexture, vTextureCoord);
}
";

/// Whole viewport, U mirrored
#[rustfmt::skip]
pub const FULLSCREEN_QUAD: QuadVertices = [
    // X,    Y,    Z,   U,   V
    -1.0, -1.0, 0.0, 1.0, 0.0,
     1.0, -1.0, 0.0, 0.0, 0.0,
    -1.0,  1.0, 0.0, 1.0, 1.0,
     1.0,  1.0, 0.0, 0.0, 1.0,
];

/// Inset in the upper-right quadrant
#[rustfmt::skip]
pub const OVERLAY_QUAD: QuadVertices = [
    // X,   Y,   Z,   U,   V
    0.3, 0.3, 0.0, 0.0, 0.0,
    0.8, 0.3, 0.0, 1.0, 0.0,
    0.3, 0.8, 0.0, 0.0, 1.0,
    0.8, 0.8, 0.0, 1.0, 1.0,
];

#[rustfmt::skip]
pub const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0,
    0.0, 0.0, 0.0, 1.0,
];

/// Column-major texture-coordinate transform for `rotation`.
///
/// Rotates about Z, then translates so the rotated unit square lands back on
/// `[0, 1]²`.
pub fn texture_matrix(rotation: Rotation) -> [f32; 16] {
    // (cos, sin, tx, ty); exact values keep the matrix free of rounding noise
    let (c, s, tx, ty) = match rotation {
        Rotation::Deg0 => return IDENTITY,
        Rotation::Deg90 => (0.0, 1.0, 0.0, -1.0),
        Rotation::Deg180 => (-1.0, 0.0, -1.0, -1.0),
        Rotation::Deg270 => (0.0, -1.0, -1.0, 0.0),
    };

    let mut m = IDENTITY;
    m[0] = c;
    m[1] = s;
    m[4] = -s;
    m[5] = c;
    m[12] = c * tx - s * ty;
    m[13] = s * tx + c * ty;
    m
}

/// Apply a column-major matrix to a texture coordinate
pub fn transform_uv(m: &[f32; 16], u: f32, v: f32) -> (f32, f32) {
    (m[0] * u + m[4] * v + m[12], m[1] * u + m[5] * v + m[13])
}

struct Quad {
    texture: Arc<dyn ExternalTexture>,
    vertices: &'static QuadVertices,
    /// Whether this scene allocated the texture name and must delete it
    owned: bool,
}

/// Two textured quads composited with one external-texture program.
///
/// A scene either allocates its textures or borrows names published by
/// another scene. Borrowed names are never deleted on release.
pub struct Scene {
    gpu: Arc<dyn Gpu>,
    context: ContextId,
    size: Size,
    clear_color: Rgba,
    bindings: ProgramBindings,
    fullscreen: Quad,
    overlay: Quad,
    released: AtomicBool,
}

impl Scene {
    /// Build a scene of `size` on the current context.
    ///
    /// The overlay texture is `overlay_scale` times the scene size. Fails with
    /// [`PipelineError::GpuSetup`] when the program does not link or exposes
    /// an invalid attribute or uniform location.
    pub fn new(
        gpu: Arc<dyn Gpu>,
        size: Size,
        overlay_scale: f32,
        clear_color: Rgba,
        fullscreen_texture: Option<TextureId>,
        overlay_texture: Option<TextureId>,
    ) -> Result<Self, PipelineError> {
        gpu.viewport(size);

        let overlay_size = Size::new(
            (overlay_scale * size.width as f32) as u32,
            (overlay_scale * size.height as f32) as u32,
        );

        let fullscreen = Quad {
            texture: gpu.create_external_texture(size, &FULLSCREEN_QUAD, fullscreen_texture)?,
            vertices: &FULLSCREEN_QUAD,
            owned: fullscreen_texture.is_none(),
        };
        fullscreen.texture.set_rotation(Rotation::Deg90);

        let overlay = match gpu.create_external_texture(overlay_size, &OVERLAY_QUAD, overlay_texture) {
            Ok(texture) => Quad {
                texture,
                vertices: &OVERLAY_QUAD,
                owned: overlay_texture.is_none(),
            },
            Err(e) => {
                release_quad(gpu.as_ref(), &fullscreen);
                return Err(e);
            }
        };
        overlay.texture.set_rotation(Rotation::Deg0);

        let bindings = match link_program(gpu.as_ref()) {
            Ok(bindings) => bindings,
            Err(e) => {
                release_quad(gpu.as_ref(), &fullscreen);
                release_quad(gpu.as_ref(), &overlay);
                return Err(e);
            }
        };

        let context = gpu.current_context();
        log::debug!(
            "Scene {} ready: fullscreen {:?}, overlay {:?} {}",
            size,
            fullscreen.texture.id(),
            overlay.texture.id(),
            overlay_size
        );

        Ok(Self {
            gpu,
            context,
            size,
            clear_color,
            bindings,
            fullscreen,
            overlay,
            released: AtomicBool::new(false),
        })
    }

    /// Context the scene was built on
    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn fullscreen_texture(&self) -> &Arc<dyn ExternalTexture> {
        &self.fullscreen.texture
    }

    pub fn overlay_texture(&self) -> &Arc<dyn ExternalTexture> {
        &self.overlay.texture
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Clear and draw both quads, then latch the newest producer frames
    pub fn draw(&self) -> Result<(), PipelineError> {
        if self.is_released() {
            return Err(PipelineError::Gpu("scene already released".to_string()));
        }

        self.gpu.clear(self.clear_color);
        self.gpu.use_program(self.bindings.program)?;

        for quad in [&self.fullscreen, &self.overlay] {
            self.gpu.draw_quad(&QuadDraw {
                texture: quad.texture.id(),
                vertices: quad.vertices,
                mvp_matrix: IDENTITY,
                tex_matrix: texture_matrix(quad.texture.rotation()),
                bindings: &self.bindings,
            })?;
            quad.texture.update_tex_image()?;
        }

        Ok(())
    }

    /// Release producer surfaces, owned texture names and the program. Idempotent.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        release_quad(self.gpu.as_ref(), &self.overlay);
        release_quad(self.gpu.as_ref(), &self.fullscreen);
        self.gpu.delete_program(self.bindings.program);
        log::debug!("Scene {} released", self.size);
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("size", &self.size)
            .field("context", &self.context)
            .field("fullscreen", &self.fullscreen.texture.id())
            .field("overlay", &self.overlay.texture.id())
            .field("released", &self.is_released())
            .finish()
    }
}

fn release_quad(gpu: &dyn Gpu, quad: &Quad) {
    quad.texture.release();
    if quad.owned {
        gpu.delete_texture(quad.texture.id());
    }
}

fn link_program(gpu: &dyn Gpu) -> Result<ProgramBindings, PipelineError> {
    let program = gpu.compile_program(VERTEX_SHADER, FRAGMENT_SHADER)?;

    let lookup = |kind: &str, name: &str, location: Option<u32>| {
        location.ok_or_else(|| {
            gpu.delete_program(program);
            PipelineError::GpuSetup(format!("Could not get {} location for {}", kind, name))
        })
    };

    let a_position = lookup("attrib", "aPosition", gpu.attrib_location(program, "aPosition"))?;
    let u_mvp_matrix = lookup("uniform", "uMVPMatrix", gpu.uniform_location(program, "uMVPMatrix"))?;
    let u_tex_matrix = lookup("uniform", "uTexMatrix", gpu.uniform_location(program, "uTexMatrix"))?;
    let a_texture_coord = lookup(
        "attrib",
        "aTextureCoord",
        gpu.attrib_location(program, "aTextureCoord"),
    )?;

    Ok(ProgramBindings {
        program,
        a_position,
        a_texture_coord,
        u_mvp_matrix,
        u_tex_matrix,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SimGpu;

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-6 && (a.1 - b.1).abs() < 1e-6
    }

    #[test]
    fn test_texture_matrix_maps_unit_square_onto_itself() {
        for rotation in [Rotation::Deg0, Rotation::Deg90, Rotation::Deg180, Rotation::Deg270] {
            let m = texture_matrix(rotation);
            for (u, v) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)] {
                let (tu, tv) = transform_uv(&m, u, v);
                assert!((0.0..=1.0).contains(&tu), "{:?} u out of range", rotation);
                assert!((0.0..=1.0).contains(&tv), "{:?} v out of range", rotation);
            }
        }
    }

    #[test]
    fn test_texture_matrix_rotations() {
        let m90 = texture_matrix(Rotation::Deg90);
        assert!(close(transform_uv(&m90, 0.0, 0.0), (1.0, 0.0)));
        assert!(close(transform_uv(&m90, 1.0, 0.0), (1.0, 1.0)));

        let m180 = texture_matrix(Rotation::Deg180);
        assert!(close(transform_uv(&m180, 0.0, 0.0), (1.0, 1.0)));

        let m270 = texture_matrix(Rotation::Deg270);
        assert!(close(transform_uv(&m270, 0.0, 0.0), (0.0, 1.0)));
        assert!(close(transform_uv(&m270, 0.0, 1.0), (1.0, 1.0)));
    }

    #[test]
    fn test_scene_allocates_and_releases_owned_textures() {
        let gpu = Arc::new(SimGpu::new());
        let scene = Scene::new(gpu.clone(), Size::new(1280, 720), 0.25, Rgba::YELLOW, None, None)
            .expect("scene");

        assert_eq!(scene.overlay_texture().size(), Size::new(320, 180));
        assert_eq!(scene.fullscreen_texture().rotation(), Rotation::Deg90);
        assert_eq!(scene.overlay_texture().rotation(), Rotation::Deg0);
        assert_eq!(gpu.live_textures(), 2);

        scene.draw().expect("draw");
        assert_eq!(gpu.draw_calls(), 2);

        scene.release();
        scene.release();
        assert_eq!(gpu.live_textures(), 0);
        assert_eq!(gpu.live_programs(), 0);
        assert!(scene.draw().is_err());
    }

    #[test]
    fn test_scene_never_deletes_borrowed_textures() {
        let gpu = Arc::new(SimGpu::new());
        let owner = Scene::new(gpu.clone(), Size::new(1280, 720), 0.25, Rgba::YELLOW, None, None)
            .expect("owner");

        let borrower = Scene::new(
            gpu.clone(),
            Size::new(720, 1280),
            0.25,
            Rgba::YELLOW,
            Some(owner.fullscreen_texture().id()),
            Some(owner.overlay_texture().id()),
        )
        .expect("borrower");

        assert_eq!(borrower.fullscreen_texture().id(), owner.fullscreen_texture().id());
        borrower.release();
        assert_eq!(gpu.live_textures(), 2);

        owner.release();
        assert_eq!(gpu.live_textures(), 0);
    }

    #[test]
    fn test_invalid_location_is_setup_error() {
        let gpu = Arc::new(SimGpu::new());
        gpu.fail_location("uTexMatrix");

        let err = Scene::new(gpu.clone(), Size::new(640, 360), 0.25, Rgba::YELLOW, None, None)
            .expect_err("missing uniform");

        assert!(matches!(err, PipelineError::GpuSetup(_)));
        assert!(err.is_fatal());
        assert_eq!(gpu.live_textures(), 0);
        assert_eq!(gpu.live_programs(), 0);
    }
}
