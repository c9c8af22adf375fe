use thiserror::Error;

/// Errors raised by the capture, render and encode machines and their collaborators.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Camera device error: {0}")]
    Device(String),
    #[error("Camera device error: maximum number of cameras in use")]
    MaxCamerasInUse,
    #[error("GPU setup error: {0}")]
    GpuSetup(String),
    #[error("GPU error: {0}")]
    Gpu(String),
    #[error("Encoder error: {0}")]
    Encoder(String),
    #[error("Encoder illegal state: {0}")]
    EncoderIllegalState(String),
    #[error("Muxing error: {0}")]
    Muxer(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Failed to spawn worker: {0}")]
    WorkerSpawn(String),
    #[error("{0} worker is no longer running")]
    WorkerGone(&'static str),
}

impl PipelineError {
    /// Fatal errors terminate the owning machine's worker and are reported to the host.
    ///
    /// Everything else is recovered locally, usually by collapsing the machine back
    /// to its idle state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::GpuSetup(_) | PipelineError::EncoderIllegalState(_) | PipelineError::Muxer(_)
        )
    }
}
