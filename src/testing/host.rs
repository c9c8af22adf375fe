//! Recording host and host surface

use crate::errors::PipelineError;
use crate::host::{Host, Notification};
use crate::recording::ActiveCallback;
use crate::render::{HostSurface, RenderLoop};
use crate::types::Size;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`Host`] that runs main-thread tasks inline and records everything it is told
#[derive(Default)]
pub struct SimHost {
    notifications: Mutex<Vec<Notification>>,
    fatal: Mutex<Vec<(String, String)>>,
    active_changes: Mutex<Vec<bool>>,
    main_tasks: AtomicUsize,
}

impl SimHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.notifications).clone()
    }

    /// Names of machines that reported a fatal error
    pub fn fatal_errors(&self) -> Vec<String> {
        lock(&self.fatal).iter().map(|(machine, _)| machine.clone()).collect()
    }

    /// Messages of the reported fatal errors
    pub fn fatal_messages(&self) -> Vec<String> {
        lock(&self.fatal).iter().map(|(_, message)| message.clone()).collect()
    }

    /// Values passed to the callback from [`SimHost::active_callback`]
    pub fn active_changes(&self) -> Vec<bool> {
        lock(&self.active_changes).clone()
    }

    pub fn main_tasks(&self) -> usize {
        self.main_tasks.load(Ordering::SeqCst)
    }

    /// Record-button callback that logs into this host
    pub fn active_callback(self: &Arc<Self>) -> ActiveCallback {
        let host = Arc::clone(self);
        Arc::new(move |active: bool| lock(&host.active_changes).push(active))
    }
}

impl Host for SimHost {
    fn run_on_main(&self, task: Box<dyn FnOnce() + Send>) {
        self.main_tasks.fetch_add(1, Ordering::SeqCst);
        task();
    }

    fn notify(&self, notification: Notification) {
        log::debug!("notify: {}", notification);
        lock(&self.notifications).push(notification);
    }

    fn on_fatal(&self, machine: &'static str, error: PipelineError) {
        log::debug!("fatal in {}: {}", machine, error);
        lock(&self.fatal).push((machine.to_string(), error.to_string()));
    }
}

/// [`HostSurface`] driven by hand: call [`SimHostSurface::vsync`] to request a frame
#[derive(Default)]
pub struct SimHostSurface {
    size: Option<Size>,
    render_loop: Mutex<Option<RenderLoop>>,
    client_version: AtomicU32,
    paused: AtomicBool,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    swaps: AtomicUsize,
}

impl SimHostSurface {
    /// A surface that never reports geometry
    pub fn new() -> Self {
        Self::default()
    }

    /// A surface that reports `size` whenever a render loop is installed or resumed
    pub fn with_size(size: Size) -> Self {
        Self {
            size: Some(size),
            ..Self::default()
        }
    }

    pub fn render_loop(&self) -> Option<RenderLoop> {
        lock(&self.render_loop).clone()
    }

    /// Deliver one draw request unless paused. Returns whether one was sent.
    pub fn vsync(&self) -> bool {
        if self.paused.load(Ordering::SeqCst) {
            return false;
        }
        match self.render_loop() {
            Some(render_loop) => {
                render_loop.draw_frame();
                true
            }
            None => false,
        }
    }

    /// Report new geometry as a resize would
    pub fn resize(&self, size: Size) {
        if let Some(render_loop) = self.render_loop() {
            render_loop.surface_changed(size.width, size.height);
        }
    }

    pub fn client_version(&self) -> u32 {
        self.client_version.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn swaps(&self) -> usize {
        self.swaps.load(Ordering::SeqCst)
    }

    fn report_geometry(&self) {
        if let Some(size) = self.size {
            self.resize(size);
        }
    }
}

impl HostSurface for SimHostSurface {
    fn set_context_client_version(&self, version: u32) {
        self.client_version.store(version, Ordering::SeqCst);
    }

    fn set_render_loop(&self, render_loop: RenderLoop) {
        *lock(&self.render_loop) = Some(render_loop);
        self.report_geometry();
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resumes.fetch_add(1, Ordering::SeqCst);
        self.report_geometry();
    }

    fn swap_buffers(&self) -> Result<(), PipelineError> {
        if self.is_paused() {
            return Err(PipelineError::Gpu("swap on a paused surface".to_string()));
        }
        self.swaps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
