//! Simulated GPU: tracks every object it hands out

use crate::errors::PipelineError;
use crate::render::{Canvas, ExternalTexture, Gpu, QuadDraw, QuadVertices};
use crate::types::{ContextId, NativeWindow, ProgramId, Rect, Rgba, Rotation, Size, SurfaceId, TextureId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Receives a frame queued into a window by `swap_buffers`
pub type WindowSink = Arc<dyn Fn() + Send + Sync>;

const ROOT_CONTEXT: ContextId = ContextId(1);

#[derive(Default)]
struct GpuState {
    next_id: u64,
    live_textures: HashSet<TextureId>,
    live_programs: HashSet<ProgramId>,
    contexts: HashSet<ContextId>,
    surfaces: HashMap<SurfaceId, (ContextId, NativeWindow)>,
    current: HashMap<ThreadId, ContextId>,
    window_sinks: HashMap<NativeWindow, WindowSink>,
    textures: Vec<Arc<SimTexture>>,
    failing_locations: HashSet<String>,
    fail_compile: bool,
    root_released: bool,
    last_viewport: Option<Size>,
    draw_calls: usize,
    swaps: usize,
}

impl GpuState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        // Keep clear of the root context id
        self.next_id + 1
    }
}

/// In-memory [`Gpu`]. Every thread starts with the root context current.
pub struct SimGpu {
    state: Mutex<GpuState>,
}

impl Default for SimGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl SimGpu {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GpuState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Context current on threads that never called `make_current`
    pub fn root_context(&self) -> ContextId {
        ROOT_CONTEXT
    }

    /// Make lookups of `name` return no location
    pub fn fail_location(&self, name: &str) {
        self.lock().failing_locations.insert(name.to_string());
    }

    /// Make every program compile fail
    pub fn fail_compile(&self) {
        self.lock().fail_compile = true;
    }

    pub fn allocate_window(&self) -> NativeWindow {
        NativeWindow(self.lock().next_id())
    }

    /// Route frames swapped into `window` to `sink`
    pub fn register_window_sink(&self, window: NativeWindow, sink: WindowSink) {
        self.lock().window_sinks.insert(window, sink);
    }

    pub fn unregister_window_sink(&self, window: NativeWindow) {
        self.lock().window_sinks.remove(&window);
    }

    /// Most recent texture created with `id`
    pub fn texture(&self, id: TextureId) -> Option<Arc<SimTexture>> {
        self.lock().textures.iter().rev().find(|t| t.id == id).cloned()
    }

    /// Texture names allocated and not yet deleted
    pub fn live_textures(&self) -> usize {
        self.lock().live_textures.len()
    }

    pub fn live_programs(&self) -> usize {
        self.lock().live_programs.len()
    }

    /// Shared contexts created and not yet released
    pub fn live_contexts(&self) -> usize {
        self.lock().contexts.len()
    }

    pub fn live_surfaces(&self) -> usize {
        self.lock().surfaces.len()
    }

    pub fn root_context_released(&self) -> bool {
        self.lock().root_released
    }

    pub fn last_viewport(&self) -> Option<Size> {
        self.lock().last_viewport
    }

    pub fn draw_calls(&self) -> usize {
        self.lock().draw_calls
    }

    pub fn swap_count(&self) -> usize {
        self.lock().swaps
    }

    fn location(&self, name: &str) -> Option<u32> {
        let state = self.lock();
        if state.failing_locations.contains(name) {
            return None;
        }
        match name {
            "aPosition" => Some(0),
            "aTextureCoord" => Some(1),
            "uMVPMatrix" => Some(2),
            "uTexMatrix" => Some(3),
            _ => None,
        }
    }
}

impl Gpu for SimGpu {
    fn current_context(&self) -> ContextId {
        self.lock()
            .current
            .get(&thread::current().id())
            .copied()
            .unwrap_or(ROOT_CONTEXT)
    }

    fn create_external_texture(
        &self,
        size: Size,
        _vertices: &QuadVertices,
        existing: Option<TextureId>,
    ) -> Result<Arc<dyn ExternalTexture>, PipelineError> {
        let mut state = self.lock();
        let id = match existing {
            Some(id) => id,
            None => {
                let id = TextureId(state.next_id() as u32);
                state.live_textures.insert(id);
                id
            }
        };
        let window = NativeWindow(state.next_id());

        let texture = Arc::new(SimTexture::new(id, size, window));
        state.textures.push(texture.clone());
        Ok(texture)
    }

    fn delete_texture(&self, texture: TextureId) {
        self.lock().live_textures.remove(&texture);
    }

    fn compile_program(&self, _vertex_src: &str, _fragment_src: &str) -> Result<ProgramId, PipelineError> {
        let mut state = self.lock();
        if state.fail_compile {
            return Err(PipelineError::GpuSetup("Could not create shader program".to_string()));
        }
        let program = ProgramId(state.next_id() as u32);
        state.live_programs.insert(program);
        Ok(program)
    }

    fn attrib_location(&self, _program: ProgramId, name: &str) -> Option<u32> {
        self.location(name)
    }

    fn uniform_location(&self, _program: ProgramId, name: &str) -> Option<u32> {
        self.location(name)
    }

    fn delete_program(&self, program: ProgramId) {
        self.lock().live_programs.remove(&program);
    }

    fn viewport(&self, size: Size) {
        self.lock().last_viewport = Some(size);
    }

    fn clear(&self, _color: Rgba) {}

    fn use_program(&self, program: ProgramId) -> Result<(), PipelineError> {
        if self.lock().live_programs.contains(&program) {
            Ok(())
        } else {
            Err(PipelineError::Gpu(format!("{:?} is not a live program", program)))
        }
    }

    fn draw_quad(&self, draw: &QuadDraw<'_>) -> Result<(), PipelineError> {
        let mut state = self.lock();
        if !state.live_programs.contains(&draw.bindings.program) {
            return Err(PipelineError::Gpu("draw with deleted program".to_string()));
        }
        state.draw_calls += 1;
        Ok(())
    }

    fn create_shared_context(&self, share: ContextId, _recordable: bool) -> Result<ContextId, PipelineError> {
        let mut state = self.lock();
        if share != ROOT_CONTEXT && !state.contexts.contains(&share) {
            return Err(PipelineError::Gpu(format!("unknown share context {:?}", share)));
        }
        let context = ContextId(state.next_id());
        state.contexts.insert(context);
        Ok(context)
    }

    fn create_window_surface(&self, context: ContextId, window: NativeWindow) -> Result<SurfaceId, PipelineError> {
        let mut state = self.lock();
        if !state.contexts.contains(&context) {
            return Err(PipelineError::Gpu(format!("unknown context {:?}", context)));
        }
        let surface = SurfaceId(state.next_id());
        state.surfaces.insert(surface, (context, window));
        Ok(surface)
    }

    fn make_current(&self, context: ContextId, surface: SurfaceId) -> Result<(), PipelineError> {
        let mut state = self.lock();
        if !state.surfaces.contains_key(&surface) || !state.contexts.contains(&context) {
            return Err(PipelineError::Gpu("make_current on released objects".to_string()));
        }
        state.current.insert(thread::current().id(), context);
        Ok(())
    }

    fn swap_buffers(&self, surface: SurfaceId) -> Result<(), PipelineError> {
        let sink = {
            let mut state = self.lock();
            let (_, window) = *state
                .surfaces
                .get(&surface)
                .ok_or_else(|| PipelineError::Gpu(format!("unknown surface {:?}", surface)))?;
            state.swaps += 1;
            state.window_sinks.get(&window).cloned()
        };

        if let Some(sink) = sink {
            sink();
        }
        Ok(())
    }

    fn release_surface(&self, _context: ContextId, surface: SurfaceId) {
        self.lock().surfaces.remove(&surface);
    }

    fn release_context(&self, context: ContextId) {
        let mut state = self.lock();
        if context == ROOT_CONTEXT {
            state.root_released = true;
        }
        state.contexts.remove(&context);
        state.current.retain(|_, current| *current != context);
    }
}

/// External texture that counts canvas and latch activity
pub struct SimTexture {
    id: TextureId,
    size: Size,
    window: NativeWindow,
    rotation: Mutex<Rotation>,
    buffer_size: Mutex<Option<Size>>,
    released: AtomicBool,
    canvas_locked: Arc<AtomicBool>,
    canvas_fills: Arc<AtomicUsize>,
    canvas_posts: AtomicUsize,
    latches: AtomicUsize,
}

impl SimTexture {
    fn new(id: TextureId, size: Size, window: NativeWindow) -> Self {
        Self {
            id,
            size,
            window,
            rotation: Mutex::new(Rotation::Deg0),
            buffer_size: Mutex::new(None),
            released: AtomicBool::new(false),
            canvas_locked: Arc::new(AtomicBool::new(false)),
            canvas_fills: Arc::new(AtomicUsize::new(0)),
            canvas_posts: AtomicUsize::new(0),
            latches: AtomicUsize::new(0),
        }
    }

    pub fn default_buffer_size(&self) -> Option<Size> {
        *self.buffer_size.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn is_canvas_locked(&self) -> bool {
        self.canvas_locked.load(Ordering::SeqCst)
    }

    /// Fill operations issued on this texture's canvases
    pub fn canvas_fills(&self) -> usize {
        self.canvas_fills.load(Ordering::SeqCst)
    }

    pub fn canvas_posts(&self) -> usize {
        self.canvas_posts.load(Ordering::SeqCst)
    }

    pub fn latches(&self) -> usize {
        self.latches.load(Ordering::SeqCst)
    }
}

impl ExternalTexture for SimTexture {
    fn id(&self) -> TextureId {
        self.id
    }

    fn size(&self) -> Size {
        self.size
    }

    fn rotation(&self) -> Rotation {
        *self.rotation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_rotation(&self, rotation: Rotation) {
        *self.rotation.lock().unwrap_or_else(PoisonError::into_inner) = rotation;
    }

    fn set_default_buffer_size(&self, size: Size) {
        *self.buffer_size.lock().unwrap_or_else(PoisonError::into_inner) = Some(size);
    }

    fn window(&self) -> NativeWindow {
        self.window
    }

    fn lock_canvas(&self, _dirty: Rect) -> Result<Box<dyn Canvas>, PipelineError> {
        if self.is_released() {
            return Err(PipelineError::Gpu("surface has been released".to_string()));
        }
        if self.canvas_locked.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::Gpu("canvas already locked".to_string()));
        }
        Ok(Box::new(SimCanvas {
            fills: self.canvas_fills.clone(),
        }))
    }

    fn unlock_canvas_and_post(&self, canvas: Box<dyn Canvas>) {
        drop(canvas);
        self.canvas_locked.store(false, Ordering::SeqCst);
        self.canvas_posts.fetch_add(1, Ordering::SeqCst);
    }

    fn update_tex_image(&self) -> Result<(), PipelineError> {
        if self.is_released() {
            return Err(PipelineError::Gpu("update_tex_image after release".to_string()));
        }
        self.latches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Canvas that only counts fills
pub struct SimCanvas {
    fills: Arc<AtomicUsize>,
}

impl Canvas for SimCanvas {
    fn fill_rect(&mut self, _rect: Rect, _color: Rgba) {
        self.fills.fetch_add(1, Ordering::SeqCst);
    }

    fn fill_circle(&mut self, _cx: f32, _cy: f32, _radius: f32, _color: Rgba) {
        self.fills.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::lock_canvas;

    #[test]
    fn test_canvas_guard_posts_on_drop() {
        let gpu = SimGpu::new();
        let texture = gpu
            .create_external_texture(Size::new(32, 18), &[0.0; 20], None)
            .unwrap();
        let sim = gpu.texture(texture.id()).unwrap();

        {
            let mut canvas = lock_canvas(texture.as_ref(), Rect::new(0, 0, 32, 18)).unwrap();
            canvas.fill_rect(Rect::new(0, 0, 32, 18), Rgba::GREEN);
            assert!(sim.is_canvas_locked());
        }

        assert!(!sim.is_canvas_locked());
        assert_eq!(sim.canvas_posts(), 1);
        assert_eq!(sim.canvas_fills(), 1);
    }

    #[test]
    fn test_swap_feeds_window_sink() {
        let gpu = SimGpu::new();
        let window = gpu.allocate_window();
        let frames = Arc::new(AtomicUsize::new(0));
        let counter = frames.clone();
        gpu.register_window_sink(
            window,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let context = gpu.create_shared_context(gpu.root_context(), true).unwrap();
        let surface = gpu.create_window_surface(context, window).unwrap();
        gpu.make_current(context, surface).unwrap();
        assert_eq!(gpu.current_context(), context);

        gpu.swap_buffers(surface).unwrap();
        gpu.swap_buffers(surface).unwrap();
        assert_eq!(frames.load(Ordering::SeqCst), 2);

        gpu.release_surface(context, surface);
        gpu.release_context(context);
        assert_eq!(gpu.current_context(), gpu.root_context());
        assert!(gpu.swap_buffers(surface).is_err());
    }
}
