//! MP4 container output using muxide

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use muxide::api::{MuxerBuilder, VideoCodec};

use super::encoder::{BufferInfo, MediaFormat, Muxer, MuxerFactory};
use crate::errors::PipelineError;

const H264_MIME: &str = "video/avc";

/// Creates [`Mp4Muxer`]s for H.264 recordings
#[derive(Debug, Clone)]
pub struct Mp4MuxerFactory {
    frame_rate: f64,
    fast_start: bool,
}

impl Mp4MuxerFactory {
    pub fn new(frame_rate: u32) -> Self {
        Self {
            frame_rate: frame_rate as f64,
            fast_start: true,
        }
    }

    /// Set fast-start mode (moov before mdat)
    pub fn with_fast_start(mut self, enabled: bool) -> Self {
        self.fast_start = enabled;
        self
    }
}

impl MuxerFactory for Mp4MuxerFactory {
    fn create(&self, path: &Path) -> Result<Box<dyn Muxer>, PipelineError> {
        let file = File::create(path)?;
        Ok(Box::new(Mp4Muxer {
            path: path.to_path_buf(),
            frame_rate: self.frame_rate,
            fast_start: self.fast_start,
            writer: Some(BufWriter::new(file)),
            muxer: None,
            codec_specific_data: Vec::new(),
            started: false,
            first_pts_us: None,
        }))
    }
}

/// Single-track H.264 MP4 writer.
///
/// Encoders deliver SPS/PPS out of band in the output format; they are
/// prepended to every key frame so the stream is decodable from any sync
/// sample.
pub struct Mp4Muxer {
    path: PathBuf,
    frame_rate: f64,
    fast_start: bool,
    writer: Option<BufWriter<File>>,
    muxer: Option<muxide::api::Muxer<BufWriter<File>>>,
    codec_specific_data: Vec<u8>,
    started: bool,
    first_pts_us: Option<i64>,
}

impl Muxer for Mp4Muxer {
    fn add_track(&mut self, format: &MediaFormat) -> Result<usize, PipelineError> {
        if format.mime != H264_MIME {
            return Err(PipelineError::Muxer(format!("Unsupported track format {}", format.mime)));
        }

        let writer = self
            .writer
            .take()
            .ok_or_else(|| PipelineError::Muxer("Only one video track is supported".to_string()))?;

        let muxer = MuxerBuilder::new(writer)
            .video(VideoCodec::H264, format.size.width, format.size.height, self.frame_rate)
            .with_fast_start(self.fast_start)
            .build()
            .map_err(|e| PipelineError::Muxer(format!("Failed to create muxer: {}", e)))?;

        self.codec_specific_data = format
            .codec_specific_data
            .iter()
            .flat_map(|csd| csd.iter().copied())
            .collect();
        self.muxer = Some(muxer);
        Ok(0)
    }

    fn start(&mut self) -> Result<(), PipelineError> {
        if self.muxer.is_none() {
            return Err(PipelineError::Muxer("Muxer started without a track".to_string()));
        }
        self.started = true;
        Ok(())
    }

    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> Result<(), PipelineError> {
        if track != 0 {
            return Err(PipelineError::Muxer(format!("Unknown track {}", track)));
        }
        let muxer = match (self.started, self.muxer.as_mut()) {
            (true, Some(muxer)) => muxer,
            _ => return Err(PipelineError::Muxer("Muxer not started".to_string())),
        };

        let first = *self.first_pts_us.get_or_insert(info.presentation_time_us);
        let pts = (info.presentation_time_us - first).max(0) as f64 / 1_000_000.0;

        let key_frame = info.flags.key_frame;
        let result = if key_frame && !self.codec_specific_data.is_empty() {
            let mut sample = Vec::with_capacity(self.codec_specific_data.len() + data.len());
            sample.extend_from_slice(&self.codec_specific_data);
            sample.extend_from_slice(data);
            muxer.write_video(pts, &sample, key_frame)
        } else {
            muxer.write_video(pts, data, key_frame)
        };

        result.map_err(|e| PipelineError::Muxer(format!("Failed to write sample: {}", e)))
    }

    fn stop(&mut self) -> Result<(), PipelineError> {
        let muxer = self
            .muxer
            .take()
            .ok_or_else(|| PipelineError::Muxer("Muxer stopped twice".to_string()))?;
        self.started = false;

        let stats = muxer
            .finish_with_stats()
            .map_err(|e| PipelineError::Muxer(format!("Failed to finalize recording: {}", e)))?;

        log::info!(
            "Finalized {}: {} video frames, {} bytes",
            self.path.display(),
            stats.video_frames,
            stats.bytes_written
        );
        Ok(())
    }

    fn release(&mut self) {
        self.muxer = None;
        self.writer = None;
        self.started = false;
    }
}
