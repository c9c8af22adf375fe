//! Simulated camera service

use crate::capture::{
    CameraDevice, CaptureFailureCallback, CaptureSession, DeviceCallback, DeviceCharacteristics, DeviceErrorCode,
    DeviceEvent, DeviceManager, SessionCallback, SessionEvent,
};
use crate::errors::PipelineError;
use crate::types::{LensFacing, NativeWindow, Size};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type SharedDeviceCallback = Arc<dyn Fn(DeviceEvent) + Send + Sync>;
type SharedSessionCallback = Arc<dyn Fn(SessionEvent) + Send + Sync>;
type SharedFailureCallback = Arc<dyn Fn() + Send + Sync>;

/// One simulated camera
#[derive(Debug, Clone)]
pub struct SimCamera {
    pub id: String,
    pub facing: Option<LensFacing>,
    pub output_sizes: Vec<Size>,
}

impl SimCamera {
    pub fn new(id: &str, facing: LensFacing, output_sizes: Vec<Size>) -> Self {
        Self {
            id: id.to_string(),
            facing: Some(facing),
            output_sizes,
        }
    }
}

/// How the simulated service answers asynchronous requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Callbacks fire before the request call returns
    Immediate,
    /// Callbacks fire when the test calls the matching `complete_*`/`fail_*` method
    Manual,
}

struct ServiceState {
    open_completion: Completion,
    session_completion: Completion,
    open_error: Option<DeviceErrorCode>,
    open_calls: Vec<String>,
    device_callback: Option<SharedDeviceCallback>,
    session_callback: Option<SharedSessionCallback>,
    failure_callback: Option<SharedFailureCallback>,
    close_counts: HashMap<String, usize>,
    sessions_created: Vec<NativeWindow>,
    repeating_targets: Vec<NativeWindow>,
    abort_count: usize,
}

/// In-memory [`DeviceManager`] with call accounting
pub struct SimDeviceManager {
    cameras: Vec<SimCamera>,
    state: Arc<Mutex<ServiceState>>,
}

impl SimDeviceManager {
    pub fn new(cameras: Vec<SimCamera>) -> Self {
        Self {
            cameras,
            state: Arc::new(Mutex::new(ServiceState {
                open_completion: Completion::Immediate,
                session_completion: Completion::Immediate,
                open_error: None,
                open_calls: Vec::new(),
                device_callback: None,
                session_callback: None,
                failure_callback: None,
                close_counts: HashMap::new(),
                sessions_created: Vec::new(),
                repeating_targets: Vec::new(),
                abort_count: 0,
            })),
        }
    }

    /// One rear camera that streams 640x360
    pub fn single_back_camera() -> Self {
        Self::new(vec![SimCamera::new(
            "0",
            LensFacing::Back,
            vec![Size::new(1920, 1080), Size::new(1280, 720), Size::new(640, 360)],
        )])
    }

    pub fn with_open_completion(self, completion: Completion) -> Self {
        lock(&self.state).open_completion = completion;
        self
    }

    pub fn with_session_completion(self, completion: Completion) -> Self {
        lock(&self.state).session_completion = completion;
        self
    }

    /// Every open attempt reports `code`
    pub fn with_open_error(self, code: DeviceErrorCode) -> Self {
        lock(&self.state).open_error = Some(code);
        self
    }

    fn device(&self, id: &str) -> Arc<SimCameraDevice> {
        Arc::new(SimCameraDevice {
            id: id.to_string(),
            state: self.state.clone(),
        })
    }

    fn device_callback(&self) -> Option<SharedDeviceCallback> {
        lock(&self.state).device_callback.clone()
    }

    /// Deliver `Opened` for the most recent open request
    pub fn complete_open(&self) -> bool {
        let id = lock(&self.state).open_calls.last().cloned();
        match (self.device_callback(), id) {
            (Some(callback), Some(id)) => {
                callback(DeviceEvent::Opened(self.device(&id)));
                true
            }
            _ => false,
        }
    }

    pub fn fail_open(&self, code: DeviceErrorCode) -> bool {
        self.device_callback()
            .map(|callback| callback(DeviceEvent::Error(code)))
            .is_some()
    }

    pub fn disconnect(&self) -> bool {
        self.device_callback()
            .map(|callback| callback(DeviceEvent::Disconnected))
            .is_some()
    }

    /// Deliver `Configured` for the most recent session request
    pub fn complete_session(&self) -> bool {
        let callback = lock(&self.state).session_callback.clone();
        callback
            .map(|callback| {
                callback(SessionEvent::Configured(Arc::new(SimCaptureSession {
                    state: self.state.clone(),
                })))
            })
            .is_some()
    }

    pub fn fail_session(&self) -> bool {
        let callback = lock(&self.state).session_callback.clone();
        callback
            .map(|callback| callback(SessionEvent::ConfigureFailed))
            .is_some()
    }

    /// Report a failed capture on the running repeating request
    pub fn fail_capture(&self) -> bool {
        let callback = lock(&self.state).failure_callback.clone();
        callback.map(|callback| callback()).is_some()
    }

    pub fn open_calls(&self) -> Vec<String> {
        lock(&self.state).open_calls.clone()
    }

    /// Total `close` calls across all devices
    pub fn close_count(&self) -> usize {
        lock(&self.state).close_counts.values().sum()
    }

    pub fn abort_count(&self) -> usize {
        lock(&self.state).abort_count
    }

    pub fn sessions_created(&self) -> Vec<NativeWindow> {
        lock(&self.state).sessions_created.clone()
    }

    pub fn repeating_targets(&self) -> Vec<NativeWindow> {
        lock(&self.state).repeating_targets.clone()
    }
}

fn lock(state: &Mutex<ServiceState>) -> MutexGuard<'_, ServiceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DeviceManager for SimDeviceManager {
    fn device_ids(&self) -> Result<Vec<String>, PipelineError> {
        Ok(self.cameras.iter().map(|c| c.id.clone()).collect())
    }

    fn characteristics(&self, device_id: &str) -> Result<DeviceCharacteristics, PipelineError> {
        self.cameras
            .iter()
            .find(|c| c.id == device_id)
            .map(|c| DeviceCharacteristics {
                facing: c.facing,
                output_sizes: c.output_sizes.clone(),
            })
            .ok_or_else(|| PipelineError::Device(format!("unknown camera {}", device_id)))
    }

    fn open(&self, device_id: &str, callback: DeviceCallback) -> Result<(), PipelineError> {
        let callback: SharedDeviceCallback = Arc::from(callback);
        let (completion, open_error) = {
            let mut state = lock(&self.state);
            state.open_calls.push(device_id.to_string());
            state.device_callback = Some(callback.clone());
            (state.open_completion, state.open_error)
        };

        match (open_error, completion) {
            (Some(code), _) => callback(DeviceEvent::Error(code)),
            (None, Completion::Immediate) => callback(DeviceEvent::Opened(self.device(device_id))),
            (None, Completion::Manual) => {}
        }
        Ok(())
    }
}

struct SimCameraDevice {
    id: String,
    state: Arc<Mutex<ServiceState>>,
}

impl CameraDevice for SimCameraDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_session(&self, target: NativeWindow, callback: SessionCallback) -> Result<(), PipelineError> {
        let callback: SharedSessionCallback = Arc::from(callback);
        let completion = {
            let mut state = lock(&self.state);
            state.sessions_created.push(target);
            state.session_callback = Some(callback.clone());
            state.session_completion
        };

        if completion == Completion::Immediate {
            callback(SessionEvent::Configured(Arc::new(SimCaptureSession {
                state: self.state.clone(),
            })));
        }
        Ok(())
    }

    fn close(&self) {
        *lock(&self.state).close_counts.entry(self.id.clone()).or_insert(0) += 1;
    }
}

struct SimCaptureSession {
    state: Arc<Mutex<ServiceState>>,
}

impl CaptureSession for SimCaptureSession {
    fn set_repeating_request(
        &self,
        target: NativeWindow,
        on_failure: CaptureFailureCallback,
    ) -> Result<(), PipelineError> {
        let mut state = lock(&self.state);
        state.repeating_targets.push(target);
        state.failure_callback = Some(Arc::from(on_failure));
        Ok(())
    }

    fn abort_captures(&self) -> Result<(), PipelineError> {
        lock(&self.state).abort_count += 1;
        Ok(())
    }
}
