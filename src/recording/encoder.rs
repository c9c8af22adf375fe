//! Hardware encoder and muxer collaborator interface
//!
//! The encoder consumes frames rendered into its input window and exposes the
//! encoded output through a dequeue/release buffer queue. The muxer turns the
//! dequeued samples into the output container.

use super::config::EncoderFormat;
use crate::errors::PipelineError;
use crate::types::{NativeWindow, Size};
use bytes::Bytes;
use std::path::Path;
use std::time::Duration;

/// Output format reported by the encoder once it knows its codec parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFormat {
    pub mime: String,
    pub size: Size,
    /// Codec-specific data (for H.264: SPS then PPS, Annex B framed)
    pub codec_specific_data: Vec<Bytes>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFlags {
    pub key_frame: bool,
    /// Codec configuration rather than media data
    pub codec_config: bool,
    pub end_of_stream: bool,
}

/// Placement and timing of one dequeued output buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
}

/// Result of one output dequeue attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DequeueResult {
    TryAgainLater,
    OutputBuffersChanged,
    FormatChanged,
    Buffer { index: usize, info: BufferInfo },
    /// Status code the drain loop does not understand
    Unexpected(i32),
}

/// A configured hardware video encoder with a surface input
pub trait HardwareEncoder: Send {
    /// Window frames must be rendered into
    fn input_window(&self) -> NativeWindow;

    fn start(&mut self) -> Result<(), PipelineError>;

    fn signal_end_of_input_stream(&mut self) -> Result<(), PipelineError>;

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<DequeueResult, PipelineError>;

    /// Valid after [`DequeueResult::FormatChanged`]
    fn output_format(&self) -> Result<MediaFormat, PipelineError>;

    /// Content of a dequeued buffer, `None` if the index is not held
    fn output_buffer(&self, index: usize) -> Option<Bytes>;

    fn release_output_buffer(&mut self, index: usize);

    fn stop(&mut self) -> Result<(), PipelineError>;

    fn release(&mut self);
}

/// Creates configured encoders
pub trait EncoderFactory: Send + Sync {
    fn create(&self, format: &EncoderFormat) -> Result<Box<dyn HardwareEncoder>, PipelineError>;
}

/// Container writer fed by the drain loop
pub trait Muxer: Send {
    /// Register a track, returning its index
    fn add_track(&mut self, format: &MediaFormat) -> Result<usize, PipelineError>;

    fn start(&mut self) -> Result<(), PipelineError>;

    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> Result<(), PipelineError>;

    /// Finalize the container. Only valid after [`Muxer::start`].
    fn stop(&mut self) -> Result<(), PipelineError>;

    fn release(&mut self);
}

/// Creates a muxer writing to a path
pub trait MuxerFactory: Send + Sync {
    fn create(&self, path: &Path) -> Result<Box<dyn Muxer>, PipelineError>;
}
