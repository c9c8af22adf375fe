//! Camera capture: device interface, size selection and the capture machine

pub mod device;
pub mod machine;
pub mod selection;

pub use device::{
    CameraDevice, CaptureFailureCallback, CaptureSession, DeviceCallback, DeviceCharacteristics, DeviceErrorCode,
    DeviceEvent, DeviceManager, SessionCallback, SessionEvent,
};
pub use machine::{CaptureAction, CaptureHolder, CaptureMachine, CaptureState, TextureHandoff};
pub use selection::{select_camera, select_size, CameraSelection};
