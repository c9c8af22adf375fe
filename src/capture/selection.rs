//! Camera and capture size selection

use super::device::DeviceManager;
use crate::config::CaptureConfig;
use crate::errors::PipelineError;
use crate::types::Size;

/// Device chosen for capture and the size it will stream at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSelection {
    pub device_id: String,
    /// `None` when none of the device's sizes qualify
    pub size: Option<Size>,
}

/// First size close enough to the target aspect ratio and under the pixel ceiling
pub fn select_size(sizes: &[Size], config: &CaptureConfig) -> Option<Size> {
    sizes.iter().copied().find(|size| {
        let ratio_diff = (size.aspect_ratio() - config.target_aspect_ratio).abs();
        size.pixel_count() < config.max_pixels() && ratio_diff < config.aspect_tolerance
    })
}

/// First device facing the configured way.
///
/// Devices whose characteristics cannot be read are skipped. Returns `None`
/// when no device matches.
pub fn select_camera(
    manager: &dyn DeviceManager,
    config: &CaptureConfig,
) -> Result<Option<CameraSelection>, PipelineError> {
    for device_id in manager.device_ids()? {
        let characteristics = match manager.characteristics(&device_id) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Skipping camera {}: {}", device_id, e);
                continue;
            }
        };

        if characteristics.facing != Some(config.facing) {
            continue;
        }

        let size = select_size(&characteristics.output_sizes, config);
        if size.is_none() {
            log::warn!(
                "Camera {} has no {:?} size under {}px",
                device_id,
                config.target_aspect_ratio,
                config.max_pixels()
            );
        }

        return Ok(Some(CameraSelection { device_id, size }));
    }

    Ok(None)
}
