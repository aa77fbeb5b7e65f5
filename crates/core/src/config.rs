use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

const MAX_LOCATION_LEN: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Image,
    Video,
    ImageVideo,
    Stream,
}

impl CaptureMode {
    pub fn records_video(self) -> bool {
        matches!(self, CaptureMode::Video | CaptureMode::ImageVideo)
    }
}

impl FromStr for CaptureMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "image" => Ok(CaptureMode::Image),
            "video" => Ok(CaptureMode::Video),
            "image/video" | "image_video" => Ok(CaptureMode::ImageVideo),
            "stream" | "rtsp_stream" => Ok(CaptureMode::Stream),
            other => Err(Error::Config(format!("unknown mode: {other}"))),
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CaptureMode::Image => "image",
            CaptureMode::Video => "video",
            CaptureMode::ImageVideo => "image/video",
            CaptureMode::Stream => "stream",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    pub fn seconds(self) -> u64 {
        match self {
            TimeUnit::Second => 1,
            TimeUnit::Minute => 60,
            TimeUnit::Hour => 3_600,
            TimeUnit::Day => 86_400,
        }
    }
}

impl FromStr for TimeUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "second" | "seconds" => Ok(TimeUnit::Second),
            "m" | "min" | "minute" | "minutes" => Ok(TimeUnit::Minute),
            "h" | "hour" | "hours" => Ok(TimeUnit::Hour),
            "d" | "day" | "days" => Ok(TimeUnit::Day),
            other => Err(Error::Config(format!("unknown time unit: {other}"))),
        }
    }
}

/// Resolves a configured `(magnitude, unit)` pair to seconds.
pub fn normalize(magnitude: u64, unit: TimeUnit) -> u64 {
    magnitude.saturating_mul(unit.seconds())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpan {
    pub magnitude: u64,
    pub unit: TimeUnit,
}

impl TimeSpan {
    pub fn new(magnitude: u64, unit: TimeUnit) -> Self {
        Self { magnitude, unit }
    }

    pub fn as_secs(&self) -> u64 {
        normalize(self.magnitude, self.unit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Capture durations resolved to plain seconds once, when the scheduler is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub image_capture: Duration,
    pub image_rest: Duration,
    pub recording: Duration,
    pub cycle_rest: Duration,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub mode: CaptureMode,
    pub resolution: Resolution,
    pub framerate: u32,
    pub bitrate: u32,
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
    pub image_capture: TimeSpan,
    pub image_rest: TimeSpan,
    pub recording: TimeSpan,
    pub cycle_rest: TimeSpan,
    pub location: String,
    pub device_id: String,
    pub output_dir: PathBuf,
    pub stream_address: Option<String>,
}

impl CaptureConfig {
    /// Reads and validates the config file. A relative `output_dir` is taken
    /// relative to the directory holding the file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| {
            Error::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_json_str(&text, base)
    }

    pub fn from_json_str(text: &str, base_dir: &Path) -> Result<Self> {
        let doc: RawDocument = serde_json::from_str(text)
            .map_err(|err| Error::Config(format!("malformed config: {err}")))?;
        let config = doc.camera.into_config(base_dir)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(Error::Config(format!(
                "resolution must be positive, got {}x{}",
                self.resolution.width, self.resolution.height
            )));
        }
        if self.framerate == 0 {
            return Err(Error::Config("framerate must be positive".to_string()));
        }
        if self.bitrate == 0 {
            return Err(Error::Config("bitrate must be positive".to_string()));
        }
        if self.mode.records_video() && self.recording.magnitude == 0 {
            return Err(Error::Config(format!(
                "recording_time must be positive in {} mode",
                self.mode
            )));
        }
        validate_device_id(&self.device_id)?;
        validate_location(&self.location)?;
        if self.mode == CaptureMode::Stream
            && self
                .stream_address
                .as_deref()
                .map_or(true, |addr| addr.trim().is_empty())
        {
            return Err(Error::Config(
                "rtsp_stream.address is required in stream mode".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timing(&self) -> Timing {
        Timing {
            image_capture: Duration::from_secs(self.image_capture.as_secs()),
            image_rest: Duration::from_secs(self.image_rest.as_secs()),
            recording: Duration::from_secs(self.recording.as_secs()),
            cycle_rest: Duration::from_secs(self.cycle_rest.as_secs()),
        }
    }
}

/// The id becomes a directory and file-name component, so it must not
/// carry path separators or parent references.
fn validate_device_id(device_id: &str) -> Result<()> {
    if device_id.is_empty() {
        return Err(Error::Config("pi_id must not be empty".to_string()));
    }
    if device_id.contains(['/', '\\']) || device_id.contains("..") {
        return Err(Error::Config(format!(
            "pi_id may not contain path separators or '..', got {device_id:?}"
        )));
    }
    Ok(())
}

fn validate_location(location: &str) -> Result<()> {
    if location.is_empty() || location.len() > MAX_LOCATION_LEN {
        return Err(Error::Config(format!(
            "location must be 1-{MAX_LOCATION_LEN} characters, got {:?}",
            location
        )));
    }
    if !location.chars().all(|c| c.is_ascii_lowercase() || c == '-') {
        return Err(Error::Config(format!(
            "location may only contain lowercase letters and hyphens, got {location:?}"
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    camera: RawCamera,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Number(n) => n.to_string(),
            RawId::Text(s) => s,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawResolution {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTransforms {
    #[serde(default)]
    horizontal_flip: bool,
    #[serde(default)]
    vertical_flip: bool,
}

#[derive(Debug, Deserialize)]
struct RawStream {
    address: String,
}

#[derive(Debug, Deserialize)]
struct RawCamera {
    mode: String,
    pi_id: RawId,
    location: String,
    output_dir: PathBuf,
    #[serde(default)]
    resolution: RawResolution,
    framerate: Option<u32>,
    bitrate: Option<u32>,
    #[serde(default)]
    transforms: RawTransforms,
    image_capture_time: Option<u64>,
    image_capture_time_unit: Option<String>,
    image_rest_time: Option<u64>,
    image_rest_time_unit: Option<String>,
    recording_time: Option<u64>,
    recording_time_unit: Option<String>,
    cycle_rest_time: Option<u64>,
    cycle_rest_time_unit: Option<String>,
    rtsp_stream: Option<RawStream>,
}

fn span(magnitude: Option<u64>, default: u64, unit: Option<&str>) -> Result<TimeSpan> {
    let unit = match unit {
        Some(u) => u.parse()?,
        None => TimeUnit::Minute,
    };
    Ok(TimeSpan::new(magnitude.unwrap_or(default), unit))
}

impl RawCamera {
    fn into_config(self, base_dir: &Path) -> Result<CaptureConfig> {
        let output_dir = if self.output_dir.is_absolute() {
            self.output_dir
        } else {
            base_dir.join(self.output_dir)
        };

        Ok(CaptureConfig {
            mode: self.mode.parse()?,
            resolution: Resolution {
                width: self.resolution.width.unwrap_or(1640),
                height: self.resolution.height.unwrap_or(1232),
            },
            framerate: self.framerate.unwrap_or(24),
            bitrate: self.bitrate.unwrap_or(8_388_608),
            horizontal_flip: self.transforms.horizontal_flip,
            vertical_flip: self.transforms.vertical_flip,
            image_capture: span(
                self.image_capture_time,
                0,
                self.image_capture_time_unit.as_deref(),
            )?,
            image_rest: span(self.image_rest_time, 0, self.image_rest_time_unit.as_deref())?,
            recording: span(self.recording_time, 10, self.recording_time_unit.as_deref())?,
            cycle_rest: span(self.cycle_rest_time, 0, self.cycle_rest_time_unit.as_deref())?,
            location: self.location,
            device_id: self.pi_id.into_string(),
            output_dir,
            stream_address: self.rtsp_stream.map(|s| s.address),
        })
    }
}

/// Looks up a dot-separated key path such as `camera.resolution.width`.
pub fn lookup<'a>(doc: &'a serde_json::Value, key_path: &str) -> Option<&'a serde_json::Value> {
    key_path
        .split('.')
        .try_fold(doc, |node, key| node.as_object()?.get(key))
}

/// Overwrites the value at a dot-separated key path. Every intermediate key
/// must already exist and be an object.
pub fn set_value(
    doc: &mut serde_json::Value,
    key_path: &str,
    value: serde_json::Value,
) -> Result<()> {
    let (parents, leaf) = match key_path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, key_path),
    };

    let mut node = doc;
    if let Some(parents) = parents {
        for key in parents.split('.') {
            node = node
                .get_mut(key)
                .ok_or_else(|| Error::InvalidArgument(format!("key not found: {key_path}")))?;
        }
    }

    let obj = node
        .as_object_mut()
        .ok_or_else(|| Error::InvalidArgument(format!("not an object: {key_path}")))?;
    obj.insert(leaf.to_string(), value);
    Ok(())
}
