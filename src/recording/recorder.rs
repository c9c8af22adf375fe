//! Video recorder combining the hardware encoder and the muxer

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::config::{EncoderFormat, RecordingStats};
use super::encoder::{DequeueResult, EncoderFactory, HardwareEncoder, Muxer, MuxerFactory};
use crate::config::EncodeConfig;
use crate::errors::PipelineError;
use crate::types::{NativeWindow, Size};

/// Drains encoded samples from a surface-input encoder into a muxer
pub struct Recorder {
    encoder: Box<dyn HardwareEncoder>,
    muxer: Box<dyn Muxer>,
    output_path: PathBuf,
    frame_size: Size,
    drain_timeout: Duration,
    track: Option<usize>,
    muxer_started: bool,
    samples_written: u64,
    bytes_written: u64,
    frames_rendered: u64,
    started_at: DateTime<Utc>,
    released: bool,
}

impl Recorder {
    /// Configure and start an encoder, and open a muxer on `output_path`
    pub fn new<P: AsRef<Path>>(
        output_path: P,
        config: &EncodeConfig,
        encoders: &dyn EncoderFactory,
        muxers: &dyn MuxerFactory,
    ) -> Result<Self, PipelineError> {
        let output_path = output_path.as_ref().to_path_buf();
        let format = EncoderFormat::from_config(config);

        let mut encoder = encoders.create(&format)?;

        let muxer = match muxers.create(&output_path) {
            Ok(muxer) => muxer,
            Err(e) => {
                encoder.release();
                return Err(e);
            }
        };

        let mut recorder = Self {
            encoder,
            muxer,
            output_path,
            frame_size: format.size,
            drain_timeout: Duration::from_micros(config.drain_timeout_us),
            track: None,
            muxer_started: false,
            samples_written: 0,
            bytes_written: 0,
            frames_rendered: 0,
            started_at: Utc::now(),
            released: false,
        };

        // Drop releases both halves if start fails
        recorder.encoder.start()?;
        log::info!(
            "Encoder started: {} {} at {} bps -> {}",
            format.mime,
            format.size,
            format.bitrate,
            recorder.output_path.display()
        );

        Ok(recorder)
    }

    pub fn input_window(&self) -> NativeWindow {
        self.encoder.input_window()
    }

    pub fn frame_size(&self) -> Size {
        self.frame_size
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Count a frame rendered into the input window
    pub fn frame_rendered(&mut self) {
        self.frames_rendered += 1;
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn is_muxer_started(&self) -> bool {
        self.muxer_started
    }

    /// Move every available encoded sample into the muxer.
    ///
    /// Without `end_of_stream` the loop gives up as soon as the encoder has
    /// nothing ready. With it, end of input is signalled first and the loop
    /// keeps polling until the encoder emits its end-of-stream buffer.
    pub fn drain(&mut self, end_of_stream: bool) -> Result<(), PipelineError> {
        log::trace!("drain(end_of_stream={})", end_of_stream);

        if end_of_stream {
            log::debug!("Sending end of stream to encoder");
            self.encoder.signal_end_of_input_stream()?;
        }

        loop {
            match self.encoder.dequeue_output_buffer(self.drain_timeout)? {
                DequeueResult::TryAgainLater => {
                    if !end_of_stream {
                        break;
                    }
                    log::trace!("No output available, spinning to await end of stream");
                }

                DequeueResult::OutputBuffersChanged => {
                    log::debug!("Encoder output buffers changed");
                }

                DequeueResult::FormatChanged => {
                    if self.muxer_started {
                        return Err(PipelineError::EncoderIllegalState("format changed twice".to_string()));
                    }

                    let format = self.encoder.output_format()?;
                    log::debug!("Encoder output format changed: {:?}", format);

                    self.track = Some(self.muxer.add_track(&format)?);
                    self.muxer.start()?;
                    self.muxer_started = true;
                }

                DequeueResult::Unexpected(status) => {
                    log::debug!("Unexpected result from dequeue_output_buffer: {}", status);
                }

                DequeueResult::Buffer { index, mut info } => {
                    let data = self.encoder.output_buffer(index).ok_or_else(|| {
                        PipelineError::EncoderIllegalState(format!("encoder output buffer {} was null", index))
                    })?;

                    if info.flags.codec_config {
                        log::debug!("Ignoring codec config buffer");
                        info.size = 0;
                    }

                    if info.size != 0 {
                        let track = match (self.muxer_started, self.track) {
                            (true, Some(track)) => track,
                            _ => {
                                return Err(PipelineError::EncoderIllegalState(
                                    "muxer hasn't started".to_string(),
                                ))
                            }
                        };

                        let end = info.offset + info.size;
                        let sample = data.get(info.offset..end).ok_or_else(|| {
                            PipelineError::EncoderIllegalState(format!(
                                "sample {}..{} outside buffer of {} bytes",
                                info.offset,
                                end,
                                data.len()
                            ))
                        })?;

                        self.muxer.write_sample(track, sample, &info)?;
                        self.samples_written += 1;
                        self.bytes_written += info.size as u64;
                        log::trace!("Wrote {} bytes at {}us", info.size, info.presentation_time_us);
                    }

                    self.encoder.release_output_buffer(index);

                    if info.flags.end_of_stream {
                        if end_of_stream {
                            log::debug!("End of stream reached");
                        } else {
                            log::warn!("Reached end of stream unexpectedly");
                        }
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Drain to end of stream, finalize the container and return statistics
    pub fn finish(&mut self) -> Result<RecordingStats, PipelineError> {
        let drained = self.drain(true);
        let released = self.release();
        drained?;
        released?;

        let stats = RecordingStats {
            samples_written: self.samples_written,
            frames_rendered: self.frames_rendered,
            bytes_written: self.bytes_written,
            started_at: self.started_at,
            finished_at: Utc::now(),
            output_path: self.output_path.clone(),
        };

        log::info!(
            "Recording finished: {} samples, {} bytes in {:.2}s ({:.0} bps)",
            stats.samples_written,
            stats.bytes_written,
            stats.duration_secs(),
            stats.avg_bitrate()
        );

        Ok(stats)
    }

    /// Stop and release the encoder and the muxer. Idempotent.
    pub fn release(&mut self) -> Result<(), PipelineError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        if let Err(e) = self.encoder.stop() {
            log::warn!("Encoder stop failed: {}", e);
        }
        self.encoder.release();

        let stopped = if self.muxer_started {
            self.muxer.stop()
        } else {
            Ok(())
        };
        self.muxer.release();
        stopped
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("Error releasing recorder in drop: {}", e);
        }
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("output_path", &self.output_path)
            .field("frame_size", &self.frame_size)
            .field("muxer_started", &self.muxer_started)
            .field("samples_written", &self.samples_written)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SimEncoderFactory, SimGpu, SimMuxerFactory, SimOutput};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn recorder(encoders: &SimEncoderFactory, muxers: &SimMuxerFactory, path: &Path) -> Recorder {
        Recorder::new(path, &EncodeConfig::default(), encoders, muxers).expect("recorder")
    }

    #[test]
    fn test_drain_writes_samples_after_format_change() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let gpu = Arc::new(SimGpu::new());
        let encoders = SimEncoderFactory::new(gpu.clone());
        let muxers = SimMuxerFactory::new();

        let mut recorder = recorder(&encoders, &muxers, &path);
        let encoder = encoders.last().unwrap();
        encoder.queue_frame();
        encoder.queue_frame();

        recorder.drain(false).unwrap();
        assert!(recorder.is_muxer_started());
        assert_eq!(recorder.samples_written(), 2);

        let stats = recorder.finish().unwrap();
        assert_eq!(stats.samples_written, 2);
        assert!(stats.bytes_written > 0);

        let log = muxers.log();
        assert_eq!(log.tracks, 1);
        assert!(log.stopped);
        assert!(log.released);
        assert!(path.exists());
    }

    #[test]
    fn test_codec_config_is_skipped() {
        let dir = tempdir().unwrap();
        let gpu = Arc::new(SimGpu::new());
        let encoders = SimEncoderFactory::new(gpu).with_codec_config();
        let muxers = SimMuxerFactory::new();

        let mut recorder = recorder(&encoders, &muxers, &dir.path().join("out.mp4"));
        recorder.drain(false).unwrap();

        assert_eq!(recorder.samples_written(), 0);
        assert_eq!(encoders.last().unwrap().released_buffers(), 1);
    }

    #[test]
    fn test_format_changed_twice_is_illegal() {
        let dir = tempdir().unwrap();
        let gpu = Arc::new(SimGpu::new());
        let encoders = SimEncoderFactory::new(gpu).with_script(vec![SimOutput::FormatChanged]);
        let muxers = SimMuxerFactory::new();

        let mut recorder = recorder(&encoders, &muxers, &dir.path().join("out.mp4"));
        let err = recorder.drain(false).unwrap_err();
        assert!(matches!(err, PipelineError::EncoderIllegalState(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_sample_before_muxer_start_is_illegal() {
        let dir = tempdir().unwrap();
        let gpu = Arc::new(SimGpu::new());
        let encoders = SimEncoderFactory::new(gpu).without_format_change();
        let muxers = SimMuxerFactory::new();

        let mut recorder = recorder(&encoders, &muxers, &dir.path().join("out.mp4"));
        encoders.last().unwrap().queue_frame();

        let err = recorder.drain(false).unwrap_err();
        assert!(err.to_string().contains("muxer hasn't started"));
    }

    #[test]
    fn test_missing_buffer_is_illegal() {
        let dir = tempdir().unwrap();
        let gpu = Arc::new(SimGpu::new());
        let encoders = SimEncoderFactory::new(gpu).with_script(vec![SimOutput::MissingBuffer]);
        let muxers = SimMuxerFactory::new();

        let mut recorder = recorder(&encoders, &muxers, &dir.path().join("out.mp4"));
        assert!(matches!(
            recorder.drain(false),
            Err(PipelineError::EncoderIllegalState(_))
        ));
    }

    #[test]
    fn test_unexpected_status_is_ignored() {
        let dir = tempdir().unwrap();
        let gpu = Arc::new(SimGpu::new());
        let encoders = SimEncoderFactory::new(gpu)
            .with_script(vec![SimOutput::Unexpected(-42), SimOutput::BuffersChanged]);
        let muxers = SimMuxerFactory::new();

        let mut recorder = recorder(&encoders, &muxers, &dir.path().join("out.mp4"));
        encoders.last().unwrap().queue_frame();
        recorder.drain(false).unwrap();
        assert_eq!(recorder.samples_written(), 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let dir = tempdir().unwrap();
        let gpu = Arc::new(SimGpu::new());
        let encoders = SimEncoderFactory::new(gpu);
        let muxers = SimMuxerFactory::new();

        let mut recorder = recorder(&encoders, &muxers, &dir.path().join("out.mp4"));
        recorder.release().unwrap();
        recorder.release().unwrap();
        drop(recorder);

        assert_eq!(encoders.last().unwrap().release_count(), 1);
        // Muxer never started, so it must not be stopped
        assert!(!muxers.log().stopped);
        assert!(muxers.log().released);
    }
}
