//! Capture state machine: camera lifecycle from selection to repeating preview

use super::device::{
    CameraDevice, CaptureFailureCallback, CaptureSession, DeviceCallback, DeviceErrorCode, DeviceEvent, DeviceManager,
    SessionCallback, SessionEvent,
};
use super::selection::select_camera;
use crate::config::CaptureConfig;
use crate::errors::PipelineError;
use crate::handoff::Handoff;
use crate::host::{Host, Notification};
use crate::machine::{Machine, MachineState, Mailbox};
use crate::render::ExternalTexture;
use crate::types::{Rotation, Size};
use std::fmt;
use std::sync::Arc;

/// Handoff carrying the texture the camera streams into
pub type TextureHandoff = Arc<Handoff<Arc<dyn ExternalTexture>>>;

/// Resources accumulated by the capture machine
#[derive(Clone, Default)]
pub struct CaptureHolder {
    pub devices: Option<Arc<dyn DeviceManager>>,
    pub texture_handoff: Option<TextureHandoff>,
    pub device_id: Option<String>,
    pub size: Option<Size>,
    pub device: Option<Arc<dyn CameraDevice>>,
    pub texture: Option<Arc<dyn ExternalTexture>>,
    pub session: Option<Arc<dyn CaptureSession>>,
}

impl fmt::Debug for CaptureHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureHolder")
            .field("device_id", &self.device_id)
            .field("size", &self.size)
            .field("device", &self.device.is_some())
            .field("texture", &self.texture.as_ref().map(|t| t.id()))
            .field("session", &self.session.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum CaptureState {
    Idle,
    AwaitingDeviceOpen(CaptureHolder),
    AwaitingTargetSurface(CaptureHolder),
    AwaitingSessionReady(CaptureHolder),
    Previewing(CaptureHolder),
}

impl CaptureState {
    pub fn holder(&self) -> Option<&CaptureHolder> {
        match self {
            CaptureState::Idle => None,
            CaptureState::AwaitingDeviceOpen(h)
            | CaptureState::AwaitingTargetSurface(h)
            | CaptureState::AwaitingSessionReady(h)
            | CaptureState::Previewing(h) => Some(h),
        }
    }
}

impl MachineState for CaptureState {
    fn phase(&self) -> &'static str {
        match self {
            CaptureState::Idle => "Idle",
            CaptureState::AwaitingDeviceOpen(_) => "AwaitingDeviceOpen",
            CaptureState::AwaitingTargetSurface(_) => "AwaitingTargetSurface",
            CaptureState::AwaitingSessionReady(_) => "AwaitingSessionReady",
            CaptureState::Previewing(_) => "Previewing",
        }
    }

    fn is_idle(&self) -> bool {
        matches!(self, CaptureState::Idle)
    }
}

pub enum CaptureAction {
    Start {
        devices: Arc<dyn DeviceManager>,
        texture_handoff: TextureHandoff,
    },
    /// `None` when the open attempt produced no device
    DeviceOpened(Option<Arc<dyn CameraDevice>>),
    TargetSurfaceReady(Arc<dyn ExternalTexture>),
    SessionConfigured(Arc<dyn CaptureSession>),
    Stop,
}

impl fmt::Debug for CaptureAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureAction::Start { .. } => write!(f, "Start"),
            CaptureAction::DeviceOpened(Some(device)) => write!(f, "DeviceOpened({})", device.id()),
            CaptureAction::DeviceOpened(None) => write!(f, "DeviceOpened(none)"),
            CaptureAction::TargetSurfaceReady(texture) => {
                write!(f, "TargetSurfaceReady({:?})", texture.id())
            }
            CaptureAction::SessionConfigured(_) => write!(f, "SessionConfigured"),
            CaptureAction::Stop => write!(f, "Stop"),
        }
    }
}

/// Owns the camera device and its capture session
pub struct CaptureMachine {
    config: CaptureConfig,
    host: Arc<dyn Host>,
}

impl CaptureMachine {
    pub fn new(config: CaptureConfig, host: Arc<dyn Host>) -> Self {
        Self { config, host }
    }

    fn start(
        &self,
        devices: Arc<dyn DeviceManager>,
        texture_handoff: TextureHandoff,
        mailbox: &Mailbox<CaptureAction>,
    ) -> CaptureState {
        let selection = match select_camera(devices.as_ref(), &self.config) {
            Ok(selection) => selection,
            Err(e) => {
                log::warn!("Camera enumeration failed: {}", e);
                None
            }
        };

        let holder = CaptureHolder {
            devices: Some(devices.clone()),
            texture_handoff: Some(texture_handoff),
            device_id: selection.as_ref().map(|s| s.device_id.clone()),
            size: selection.as_ref().and_then(|s| s.size),
            ..CaptureHolder::default()
        };

        match holder.device_id.as_deref() {
            Some(device_id) => {
                log::info!("Opening camera {} at {:?}", device_id, holder.size);
                if let Err(e) = devices.open(device_id, self.device_callback(mailbox)) {
                    log::warn!("Camera {} open request failed: {}", device_id, e);
                    mailbox.send(CaptureAction::Stop);
                }
            }
            None => log::warn!("No {:?}-facing camera found", self.config.facing),
        }

        CaptureState::AwaitingDeviceOpen(holder)
    }

    fn device_callback(&self, mailbox: &Mailbox<CaptureAction>) -> DeviceCallback {
        let mailbox = mailbox.clone();
        let host = self.host.clone();
        Box::new(move |event: DeviceEvent| match event {
            DeviceEvent::Opened(device) => {
                mailbox.send(CaptureAction::DeviceOpened(Some(device)));
            }
            DeviceEvent::Disconnected => {
                log::info!("Camera disconnected");
                mailbox.send(CaptureAction::Stop);
            }
            DeviceEvent::Error(code) => {
                log::warn!("Camera error: {}", PipelineError::from(code));
                if code == DeviceErrorCode::MaxCamerasInUse {
                    host.notify(Notification::MaxCamerasInUse);
                }
                mailbox.send(CaptureAction::Stop);
            }
        })
    }

    fn device_opened(
        &self,
        holder: &CaptureHolder,
        device: Arc<dyn CameraDevice>,
        mailbox: &Mailbox<CaptureAction>,
    ) -> CaptureState {
        if let Some(handoff) = holder.texture_handoff.as_ref() {
            let mailbox = mailbox.clone();
            handoff.consume(move |texture| {
                mailbox.send(CaptureAction::TargetSurfaceReady(texture));
            });
        }

        CaptureState::AwaitingTargetSurface(CaptureHolder {
            device: Some(device),
            ..holder.clone()
        })
    }

    fn target_surface_ready(
        &self,
        holder: &CaptureHolder,
        texture: Arc<dyn ExternalTexture>,
        mailbox: &Mailbox<CaptureAction>,
    ) -> Option<CaptureState> {
        let device = holder.device.as_ref()?;

        if let Some(size) = holder.size {
            texture.set_rotation(if size.is_landscape() {
                Rotation::Deg90
            } else {
                Rotation::Deg0
            });
            texture.set_default_buffer_size(size);
        }

        let session_mailbox = mailbox.clone();
        let callback: SessionCallback = Box::new(move |event: SessionEvent| match event {
            SessionEvent::Configured(session) => {
                session_mailbox.send(CaptureAction::SessionConfigured(session));
            }
            SessionEvent::ConfigureFailed => {
                log::warn!("Capture session configuration failed");
                session_mailbox.send(CaptureAction::Stop);
            }
        });

        if let Err(e) = device.create_session(texture.window(), callback) {
            log::warn!("Could not create capture session: {}", e);
            mailbox.send(CaptureAction::Stop);
        }

        Some(CaptureState::AwaitingSessionReady(CaptureHolder {
            texture: Some(texture),
            ..holder.clone()
        }))
    }

    fn session_configured(
        &self,
        holder: &CaptureHolder,
        session: Arc<dyn CaptureSession>,
        mailbox: &Mailbox<CaptureAction>,
    ) -> Option<CaptureState> {
        let texture = holder.texture.as_ref()?;
        holder.device.as_ref()?;

        let failure_mailbox = mailbox.clone();
        let on_failure: CaptureFailureCallback = Box::new(move || {
            log::warn!("Capture failed");
            failure_mailbox.send(CaptureAction::Stop);
        });

        if let Err(e) = session.set_repeating_request(texture.window(), on_failure) {
            log::warn!("Could not start repeating capture: {}", e);
            mailbox.send(CaptureAction::Stop);
        } else {
            log::info!("Camera preview running");
        }

        Some(CaptureState::Previewing(CaptureHolder {
            session: Some(session),
            ..holder.clone()
        }))
    }

    fn stop(&self, holder: &CaptureHolder) -> CaptureState {
        if let Some(handoff) = holder.texture_handoff.as_ref() {
            handoff.withdraw();
        }
        if let Some(session) = holder.session.as_ref() {
            if let Err(e) = session.abort_captures() {
                log::warn!("Abort captures failed: {}", e);
            }
        }
        if let Some(device) = holder.device.as_ref() {
            device.close();
            log::info!("Camera {} closed", device.id());
        }
        CaptureState::Idle
    }
}

impl Machine for CaptureMachine {
    type State = CaptureState;
    type Action = CaptureAction;
    const NAME: &'static str = "capture";

    fn initial_state(&self) -> CaptureState {
        CaptureState::Idle
    }

    fn transition(
        &mut self,
        state: &CaptureState,
        action: CaptureAction,
        mailbox: &Mailbox<CaptureAction>,
    ) -> Result<Option<CaptureState>, PipelineError> {
        let next = match (state, action) {
            (
                CaptureState::Idle,
                CaptureAction::Start {
                    devices,
                    texture_handoff,
                },
            ) => Some(self.start(devices, texture_handoff, mailbox)),

            (CaptureState::AwaitingDeviceOpen(holder), CaptureAction::DeviceOpened(Some(device))) => {
                Some(self.device_opened(holder, device, mailbox))
            }

            (_, CaptureAction::DeviceOpened(Some(device))) => {
                // Opened after the machine moved on
                log::debug!("Closing late camera {}", device.id());
                device.close();
                None
            }

            (CaptureState::AwaitingTargetSurface(holder), CaptureAction::TargetSurfaceReady(texture)) => {
                self.target_surface_ready(holder, texture, mailbox)
            }

            (CaptureState::AwaitingSessionReady(holder), CaptureAction::SessionConfigured(session)) => {
                self.session_configured(holder, session, mailbox)
            }

            (_, CaptureAction::SessionConfigured(session)) => {
                log::debug!("Aborting orphaned capture session");
                if let Err(e) = session.abort_captures() {
                    log::warn!("Abort captures failed: {}", e);
                }
                None
            }

            (CaptureState::Idle, CaptureAction::Stop) => None,

            (_, CaptureAction::Stop) => match state.holder() {
                Some(holder) => Some(self.stop(holder)),
                None => None,
            },

            _ => None,
        };

        Ok(next)
    }
}
