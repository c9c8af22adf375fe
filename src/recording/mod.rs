//! Video recording for crabsurface
//!
//! This module provides:
//! - the hardware encoder and muxer collaborator traits
//! - [`Recorder`], which drains encoded samples into the muxer
//! - [`EncodeMachine`], which renders the composite into the encoder
//! - an MP4 muxer built on muxide (`mp4` feature)
//!
//! # Example
//! ```rust,ignore
//! use crabsurface::recording::Recorder;
//!
//! let mut recorder = Recorder::new(path, &config.encode, encoders.as_ref(), muxers.as_ref())?;
//!
//! // After every frame rendered into recorder.input_window():
//! recorder.drain(false)?;
//!
//! // When done:
//! let stats = recorder.finish()?;
//! ```

mod config;
mod encoder;
mod machine;
#[cfg(feature = "mp4")]
mod mp4;
mod recorder;

pub use config::{EncoderFormat, RecordingStats};
pub use encoder::{
    BufferInfo, DequeueResult, EncoderFactory, HardwareEncoder, MediaFormat, Muxer, MuxerFactory, SampleFlags,
};
pub use machine::{
    ActiveCallback, DrawingCaller, EncodeAction, EncodeHolder, EncodeMachine, EncodeState, EncodeStatus,
    ParamsHandoff,
};
#[cfg(feature = "mp4")]
pub use mp4::{Mp4Muxer, Mp4MuxerFactory};
pub use recorder::Recorder;

#[cfg(test)]
mod tests;
