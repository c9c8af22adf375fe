//! Outbound interface from the machines to the hosting application

use crate::errors::PipelineError;
use std::fmt;
use std::path::PathBuf;

/// User-visible, one-shot messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The camera service refused to open another device
    MaxCamerasInUse,
    /// A recording finished and its file exists at `path`
    RecordingStopped { path: PathBuf },
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Notification::MaxCamerasInUse => write!(f, "ERROR_MAX_CAMERAS_IN_USE"),
            Notification::RecordingStopped { path } => {
                write!(f, "Stop record: {}", path.display())
            }
        }
    }
}

/// Services the hosting application provides to the machines.
///
/// Passed explicitly to every machine; nothing reaches for process-wide state.
pub trait Host: Send + Sync {
    /// Run `task` on the host's main execution context
    fn run_on_main(&self, task: Box<dyn FnOnce() + Send>);

    /// Show a user-visible notification
    fn notify(&self, notification: Notification);

    /// A machine hit an unrecoverable error and its worker has stopped
    fn on_fatal(&self, machine: &'static str, error: PipelineError);
}

/// Host without a UI: main-thread tasks run inline and everything is logged
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHost;

impl Host for LoggingHost {
    fn run_on_main(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }

    fn notify(&self, notification: Notification) {
        log::info!("{}", notification);
    }

    fn on_fatal(&self, machine: &'static str, error: PipelineError) {
        log::error!("{} machine stopped: {}", machine, error);
    }
}
