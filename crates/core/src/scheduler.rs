use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureDevice, EncoderSettings, SensorSettings};
use crate::config::{CaptureConfig, CaptureMode, Timing};
use crate::counter::SequenceCounter;
use crate::error::{Error, Result};
use crate::naming::{artifact_file_name, ArtifactKind};
use crate::storage::{OutputResolver, StorageProbe};

/// Time given to the sensor after start-up before the first capture.
pub const WARMUP: Duration = Duration::from_secs(2);

const TICK: Duration = Duration::from_secs(1);
const FAILURE_BACKOFF: Duration = Duration::from_secs(1);

pub trait Clock {
    fn now(&self) -> DateTime<Local>;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

/// Artifacts written and failures seen during one [`Scheduler::cycle`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub artifacts: Vec<PathBuf>,
    pub failures: u32,
}

/// Drives a capture device through the configured mode until the process
/// is terminated.
pub struct Scheduler<D, S, C> {
    config: CaptureConfig,
    timing: Timing,
    encoder: EncoderSettings,
    device: D,
    counter: SequenceCounter,
    storage: S,
    clock: C,
    resolver: OutputResolver,
    last_alive: Option<DateTime<Local>>,
}

impl<D, S, C> Scheduler<D, S, C>
where
    D: CaptureDevice,
    S: StorageProbe,
    C: Clock,
{
    pub fn new(
        config: CaptureConfig,
        device: D,
        counter: SequenceCounter,
        storage: S,
        clock: C,
    ) -> Self {
        let timing = config.timing();
        let encoder = EncoderSettings::from_config(&config);
        let resolver = OutputResolver::new(config.output_dir.clone(), config.device_id.clone());
        Self {
            config,
            timing,
            encoder,
            device,
            counter,
            storage,
            clock,
            resolver,
            last_alive: None,
        }
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn counter(&self) -> &SequenceCounter {
        &self.counter
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn last_alive(&self) -> Option<DateTime<Local>> {
        self.last_alive
    }

    /// Configures and starts the device, then waits for the sensor to settle.
    pub fn start(&mut self) -> Result<()> {
        let sensor = SensorSettings::from_config(&self.config);
        self.device.configure(&sensor)?;
        self.device.start()?;
        info!(
            mode = %self.config.mode,
            width = sensor.resolution.width,
            height = sensor.resolution.height,
            fps = sensor.framerate,
            "camera configured"
        );
        self.clock.sleep(WARMUP);
        self.touch();
        Ok(())
    }

    /// Starts the device and loops forever. Only returns on a start-up
    /// failure or when a stream cannot be opened.
    pub fn run(&mut self) -> Result<()> {
        if let Err(err) = self.start() {
            self.shutdown();
            return Err(err);
        }

        if self.config.mode == CaptureMode::Stream {
            if let Err(err) = self.start_stream() {
                self.shutdown();
                return Err(err);
            }
            loop {
                self.stream_tick();
            }
        }

        loop {
            let report = self.cycle();
            debug!(
                artifacts = report.artifacts.len(),
                failures = report.failures,
                counter = self.counter.value(),
                "cycle finished"
            );
        }
    }

    /// Runs one outer cycle of the configured mode, rests included.
    pub fn cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        match self.config.mode {
            CaptureMode::Image => self.image_cycle(&mut report),
            CaptureMode::Video => self.video_cycle(&mut report),
            CaptureMode::ImageVideo => {
                let opened = self.clock.now();
                while self.elapsed_since(opened) < self.timing.image_capture {
                    self.image_cycle(&mut report);
                }
                self.video_cycle(&mut report);
            }
            CaptureMode::Stream => self.stream_tick(),
        }
        report
    }

    /// Opens the live stream. There is no fallback when this fails.
    pub fn start_stream(&mut self) -> Result<()> {
        let address = self
            .config
            .stream_address
            .clone()
            .ok_or_else(|| Error::Config("stream address missing".to_string()))?;
        self.device.start_stream(&self.encoder, &address)?;
        info!(address = %address, "streaming");
        self.touch();
        Ok(())
    }

    pub fn stream_tick(&mut self) {
        self.clock.sleep(TICK);
        self.touch();
    }

    /// Captures one still into a freshly named file.
    pub fn capture_image(&mut self) -> Result<PathBuf> {
        let path = self.next_artifact_path(ArtifactKind::Still)?;
        self.device.capture_still(&path)?;
        self.record_artifact();
        Ok(path)
    }

    /// Records one segment of the configured length.
    pub fn record_video(&mut self) -> Result<PathBuf> {
        let path = self.next_artifact_path(ArtifactKind::Video)?;
        if let Err(err) = self.device.start_recording(&self.encoder, &path) {
            // a half-started encoder would block the next cycle
            if let Err(stop_err) = self.device.stop_recording() {
                debug!(err = %stop_err, "no encoder to stop");
            }
            return Err(err);
        }
        debug!(path = %path.display(), secs = self.timing.recording.as_secs(), "recording");

        let mut remaining = self.timing.recording;
        while !remaining.is_zero() {
            let step = remaining.min(TICK);
            self.clock.sleep(step);
            self.touch();
            remaining -= step;
        }

        self.device.stop_recording()?;
        self.record_artifact();
        Ok(path)
    }

    fn image_cycle(&mut self, report: &mut CycleReport) {
        let rest = self.timing.image_rest;
        match self.capture_image() {
            Ok(path) => {
                info!(path = %path.display(), rest_secs = rest.as_secs(), "image captured");
                report.artifacts.push(path);
                self.clock.sleep(rest);
            }
            Err(err) => {
                error!(%err, "image capture failed");
                report.failures += 1;
                self.clock.sleep(rest.max(FAILURE_BACKOFF));
            }
        }
    }

    fn video_cycle(&mut self, report: &mut CycleReport) {
        let rest = self.timing.cycle_rest;
        match self.record_video() {
            Ok(path) => {
                info!(path = %path.display(), rest_secs = rest.as_secs(), "recording finished");
                report.artifacts.push(path);
                self.clock.sleep(rest);
            }
            Err(err) => {
                error!(%err, "recording failed");
                report.failures += 1;
                self.clock.sleep(rest.max(FAILURE_BACKOFF));
            }
        }
    }

    fn next_artifact_path(&mut self, kind: ArtifactKind) -> Result<PathBuf> {
        if self.counter.is_exhausted() {
            return Err(Error::CounterExhausted(self.counter.path().to_path_buf()));
        }
        let dir = self.resolver.resolve(&self.storage)?;
        let name = artifact_file_name(
            &self.config.device_id,
            &self.config.location,
            &self.clock.now(),
            self.counter.value(),
            kind,
        );
        Ok(dir.join(name))
    }

    fn record_artifact(&mut self) {
        if let Err(err) = self.counter.increment() {
            error!(
                %err,
                path = %self.counter.path().display(),
                "failed to persist counter"
            );
        }
    }

    fn elapsed_since(&self, opened: DateTime<Local>) -> Duration {
        (self.clock.now() - opened).to_std().unwrap_or(Duration::ZERO)
    }

    fn touch(&mut self) {
        self.last_alive = Some(self.clock.now());
    }

    fn shutdown(&mut self) {
        if let Err(err) = self.device.stop() {
            warn!(%err, "failed to stop camera");
        }
    }
}
