//! Brightness-curve mapper (spec §1 out-of-scope collaborator, §4.4): maps a
//! device class to the sysfs paths the brightness engine writes/probes.
//! Kept deliberately dumb — no curve shaping, just path resolution and raw
//! I/O — per spec §4.4, all the interpolation math lives in [`crate::brightness`].

use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum BrightnessCurveError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, #[source] source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, #[source] source: io::Error },
}

/// Default max level assumed when the sysfs probe fails (spec §4.4: "`max` is
/// probed from sysfs at init with a safe default if probe fails").
pub const SAFE_DEFAULT_MAX_LEVEL: u32 = 255;

pub trait BrightnessCurve: Send + Sync {
    /// Probed once at init.
    fn max_level(&self) -> u32;
    /// Write the raw hardware level (already clipped to `[0, max_level()]`).
    fn write_level(&self, level: u32) -> Result<(), BrightnessCurveError>;
    /// Toggle the hardware fading assist bit, if the panel exposes one.
    fn set_hw_fading(&self, enabled: bool);
}

/// Sysfs-backed curve for `/sys/class/backlight/<device>`.
pub struct SysfsBrightnessCurve {
    brightness_path: PathBuf,
    max_brightness_path: PathBuf,
    hw_fading_path: Option<PathBuf>,
    max_level: u32,
}

impl SysfsBrightnessCurve {
    pub fn probe(device_class_dir: impl Into<PathBuf>) -> Self {
        let dir = device_class_dir.into();
        let max_brightness_path = dir.join("max_brightness");
        let max_level = fs::read_to_string(&max_brightness_path)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or_else(|| {
                warn!(
                    path = %max_brightness_path.display(),
                    fallback = SAFE_DEFAULT_MAX_LEVEL,
                    "failed to probe max_brightness, using safe default"
                );
                SAFE_DEFAULT_MAX_LEVEL
            });
        let hw_fading_path = dir.join("als");
        Self {
            brightness_path: dir.join("brightness"),
            max_brightness_path,
            hw_fading_path: hw_fading_path.exists().then_some(hw_fading_path),
            max_level,
        }
    }
}

impl BrightnessCurve for SysfsBrightnessCurve {
    fn max_level(&self) -> u32 {
        self.max_level
    }

    fn write_level(&self, level: u32) -> Result<(), BrightnessCurveError> {
        fs::write(&self.brightness_path, level.to_string()).map_err(|source| {
            BrightnessCurveError::Write {
                path: self.brightness_path.clone(),
                source,
            }
        })
    }

    fn set_hw_fading(&self, enabled: bool) {
        if let Some(path) = &self.hw_fading_path {
            if let Err(err) = fs::write(path, if enabled { "1" } else { "0" }) {
                warn!(?err, path = %path.display(), "failed to toggle hardware fading, skipping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_of_missing_directory_falls_back_to_safe_default() {
        let curve = SysfsBrightnessCurve::probe("/nonexistent/backlight/device");
        assert_eq!(curve.max_level(), SAFE_DEFAULT_MAX_LEVEL);
    }
}
