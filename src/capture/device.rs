//! Camera device collaborator interface
//!
//! Mirrors the shape of an asynchronous camera service: opening a device and
//! configuring a session complete through callbacks, which the capture machine
//! turns into actions on its own mailbox.

use crate::errors::PipelineError;
use crate::types::{LensFacing, NativeWindow, Size};
use std::fmt;
use std::sync::Arc;

/// Static description of one camera
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCharacteristics {
    /// `None` when the device does not report a facing
    pub facing: Option<LensFacing>,
    /// Sizes the device can stream into an external texture, in device order
    pub output_sizes: Vec<Size>,
}

/// Reason a device reported an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorCode {
    InUse,
    MaxCamerasInUse,
    Disabled,
    Device,
    Service,
}

impl From<DeviceErrorCode> for PipelineError {
    fn from(code: DeviceErrorCode) -> Self {
        match code {
            DeviceErrorCode::MaxCamerasInUse => PipelineError::MaxCamerasInUse,
            other => PipelineError::Device(format!("{:?}", other)),
        }
    }
}

pub enum DeviceEvent {
    Opened(Arc<dyn CameraDevice>),
    Disconnected,
    Error(DeviceErrorCode),
}

pub enum SessionEvent {
    Configured(Arc<dyn CaptureSession>),
    ConfigureFailed,
}

pub type DeviceCallback = Box<dyn Fn(DeviceEvent) + Send + Sync>;
pub type SessionCallback = Box<dyn Fn(SessionEvent) + Send + Sync>;
pub type CaptureFailureCallback = Box<dyn Fn() + Send + Sync>;

/// Enumerates and opens cameras
pub trait DeviceManager: Send + Sync {
    fn device_ids(&self) -> Result<Vec<String>, PipelineError>;

    fn characteristics(&self, device_id: &str) -> Result<DeviceCharacteristics, PipelineError>;

    /// Start opening `device_id`. The outcome arrives through `callback`,
    /// which may keep firing for the lifetime of the device.
    fn open(&self, device_id: &str, callback: DeviceCallback) -> Result<(), PipelineError>;
}

/// An opened camera
pub trait CameraDevice: Send + Sync {
    fn id(&self) -> &str;

    /// Start configuring a session that streams into `target`
    fn create_session(&self, target: NativeWindow, callback: SessionCallback) -> Result<(), PipelineError>;

    fn close(&self);
}

/// A configured capture session
pub trait CaptureSession: Send + Sync {
    /// Stream preview frames into `target` until aborted
    fn set_repeating_request(
        &self,
        target: NativeWindow,
        on_failure: CaptureFailureCallback,
    ) -> Result<(), PipelineError>;

    /// Discard in-flight and repeating captures
    fn abort_captures(&self) -> Result<(), PipelineError>;
}

impl fmt::Debug for dyn CameraDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraDevice").field("id", &self.id()).finish()
    }
}

impl fmt::Debug for dyn CaptureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CaptureSession")
    }
}

impl fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEvent::Opened(device) => write!(f, "Opened({})", device.id()),
            DeviceEvent::Disconnected => write!(f, "Disconnected"),
            DeviceEvent::Error(code) => write!(f, "Error({:?})", code),
        }
    }
}
