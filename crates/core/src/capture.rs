use std::path::Path;

use crate::config::{CaptureConfig, Resolution};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSettings {
    pub resolution: Resolution,
    pub framerate: u32,
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
}

impl SensorSettings {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            resolution: config.resolution,
            framerate: config.framerate,
            horizontal_flip: config.horizontal_flip,
            vertical_flip: config.vertical_flip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSettings {
    pub bitrate: u32,
    pub framerate: u32,
}

impl EncoderSettings {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            bitrate: config.bitrate,
            framerate: config.framerate,
        }
    }
}

/// Camera hardware as seen by the scheduler.
///
/// Every failure is reported as [`crate::Error::Hardware`]. At most one
/// recording or stream is active at a time.
pub trait CaptureDevice {
    fn configure(&mut self, sensor: &SensorSettings) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn capture_still(&mut self, dest: &Path) -> Result<()>;
    fn start_recording(&mut self, encoder: &EncoderSettings, dest: &Path) -> Result<()>;
    fn stop_recording(&mut self) -> Result<()>;
    fn start_stream(&mut self, encoder: &EncoderSettings, address: &str) -> Result<()>;
}
