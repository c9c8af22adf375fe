//! Recording configuration types

use crate::config::EncodeConfig;
use crate::types::Size;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Parameters the hardware encoder is configured with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderFormat {
    /// Codec MIME type
    pub mime: String,
    /// Encoded frame size
    pub size: Size,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Nominal frames per second
    pub frame_rate: u32,
    /// Seconds between key frames
    pub i_frame_interval_secs: u32,
}

impl EncoderFormat {
    pub fn from_config(config: &EncodeConfig) -> Self {
        Self {
            mime: config.mime.clone(),
            size: config.frame_size(),
            bitrate: config.bitrate,
            frame_rate: config.frame_rate,
            i_frame_interval_secs: config.i_frame_interval_secs,
        }
    }
}

/// Statistics returned after finishing a recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingStats {
    /// Encoded samples handed to the muxer
    pub samples_written: u64,
    /// Frames rendered into the encoder's input surface
    pub frames_rendered: u64,
    /// Total sample bytes handed to the muxer
    pub bytes_written: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Output file path
    pub output_path: PathBuf,
}

impl RecordingStats {
    /// Wall-clock length of the recording in seconds
    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0
    }

    /// Calculate the average bitrate achieved
    pub fn avg_bitrate(&self) -> f64 {
        let duration = self.duration_secs();
        if duration > 0.0 {
            (self.bytes_written as f64 * 8.0) / duration
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_from_default_config() {
        let format = EncoderFormat::from_config(&EncodeConfig::default());
        assert_eq!(format.mime, "video/avc");
        assert_eq!(format.size, Size::new(720, 1280));
        assert_eq!(format.bitrate, 3_000_000);
        assert_eq!(format.frame_rate, 30);
        assert_eq!(format.i_frame_interval_secs, 2);
    }

    #[test]
    fn test_stats_bitrate() {
        let started_at = Utc::now();
        let stats = RecordingStats {
            samples_written: 60,
            frames_rendered: 60,
            bytes_written: 750_000,
            started_at,
            finished_at: started_at + Duration::seconds(2),
            output_path: PathBuf::from("out.mp4"),
        };
        assert_eq!(stats.duration_secs(), 2.0);
        assert_eq!(stats.avg_bitrate(), 3_000_000.0);
    }

    #[test]
    fn test_stats_zero_duration() {
        let now = Utc::now();
        let stats = RecordingStats {
            samples_written: 0,
            frames_rendered: 0,
            bytes_written: 10,
            started_at: now,
            finished_at: now,
            output_path: PathBuf::new(),
        };
        assert_eq!(stats.avg_bitrate(), 0.0);
    }
}
