use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::capture::{CaptureDevice, EncoderSettings, SensorSettings};
use crate::error::{Error, Result};

const STILL_TIMEOUT: Duration = Duration::from_secs(30);
const STOP_TIMEOUT: Duration = Duration::from_secs(10);
const SPAWN_SETTLE: Duration = Duration::from_millis(500);

/// Drives the Raspberry Pi camera through the `rpicam-still` and
/// `rpicam-vid` command-line tools.
#[derive(Debug)]
pub struct RpicamDevice {
    still_bin: PathBuf,
    video_bin: PathBuf,
    sensor: Option<SensorSettings>,
    started: bool,
    active: Option<Child>,
}

impl Default for RpicamDevice {
    fn default() -> Self {
        Self::with_binaries("rpicam-still", "rpicam-vid")
    }
}

impl RpicamDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binaries(still_bin: impl Into<PathBuf>, video_bin: impl Into<PathBuf>) -> Self {
        Self {
            still_bin: still_bin.into(),
            video_bin: video_bin.into(),
            sensor: None,
            started: false,
            active: None,
        }
    }

    fn sensor(&self) -> Result<&SensorSettings> {
        if !self.started {
            return Err(Error::Hardware("camera not started".to_string()));
        }
        self.sensor
            .as_ref()
            .ok_or_else(|| Error::Hardware("camera not configured".to_string()))
    }

    fn sensor_args(cmd: &mut Command, sensor: &SensorSettings) {
        cmd.arg("--nopreview")
            .arg("--width")
            .arg(sensor.resolution.width.to_string())
            .arg("--height")
            .arg(sensor.resolution.height.to_string());
        if sensor.horizontal_flip {
            cmd.arg("--hflip");
        }
        if sensor.vertical_flip {
            cmd.arg("--vflip");
        }
    }

    fn video_command(&self, sensor: &SensorSettings, encoder: &EncoderSettings) -> Command {
        let mut cmd = Command::new(&self.video_bin);
        Self::sensor_args(&mut cmd, sensor);
        cmd.arg("--timeout")
            .arg("0")
            .arg("--framerate")
            .arg(encoder.framerate.to_string())
            .arg("--bitrate")
            .arg(encoder.bitrate.to_string())
            .arg("--codec")
            .arg("libav");
        cmd
    }

    fn spawn_active(&mut self, mut cmd: Command, what: &str) -> Result<()> {
        if self.active.is_some() {
            return Err(Error::Hardware(format!("cannot start {what}: encoder busy")));
        }

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| Error::Hardware(format!("failed to spawn {what}: {err}")))?;

        thread::sleep(SPAWN_SETTLE);
        match child.try_wait() {
            Ok(Some(status)) => {
                return Err(Error::Hardware(format!("{what} exited early: {status}")));
            }
            Ok(None) => {}
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Hardware(format!("{what} did not start: {err}")));
            }
        }

        debug!(pid = child.id(), "{what} running");
        self.active = Some(child);
        Ok(())
    }

    fn stop_active(&mut self) -> Result<()> {
        let Some(mut child) = self.active.take() else {
            return Ok(());
        };

        // rpicam-vid finalises the container on SIGINT.
        let pid = child.id();
        if send_interrupt(pid) {
            match child.wait_timeout(STOP_TIMEOUT)? {
                Some(status) => {
                    debug!(%status, "encoder stopped");
                    return Ok(());
                }
                None => warn!(pid, "encoder ignored SIGINT, killing"),
            }
        }

        warn!(pid, "killing encoder; the container may not be finalised");
        child.kill()?;
        child.wait()?;
        Ok(())
    }
}

/// Sends SIGINT through the `kill` tool. Returns false, after logging why,
/// when the signal could not be delivered.
fn send_interrupt(pid: u32) -> bool {
    match Command::new("kill")
        .arg("-INT")
        .arg(pid.to_string())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => true,
        Ok(status) => {
            warn!(pid, %status, "kill -INT failed");
            false
        }
        Err(err) => {
            warn!(pid, %err, "cannot run kill");
            false
        }
    }
}

impl CaptureDevice for RpicamDevice {
    fn configure(&mut self, sensor: &SensorSettings) -> Result<()> {
        self.sensor = Some(*sensor);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.sensor.is_none() {
            return Err(Error::Hardware("camera not configured".to_string()));
        }
        for bin in [&self.still_bin, &self.video_bin] {
            let ok = Command::new(bin)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .map_err(|err| Error::Hardware(format!("{} unavailable: {err}", bin.display())))?;
            if !ok {
                return Err(Error::Hardware(format!("{} failed to run", bin.display())));
            }
        }
        self.started = true;
        info!("camera started");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let res = self.stop_active();
        self.started = false;
        res
    }

    fn capture_still(&mut self, dest: &Path) -> Result<()> {
        if self.active.is_some() {
            return Err(Error::Hardware("cannot capture still while encoding".to_string()));
        }
        let sensor = *self.sensor()?;

        let mut cmd = Command::new(&self.still_bin);
        Self::sensor_args(&mut cmd, &sensor);
        cmd.arg("--immediate")
            .arg("--encoding")
            .arg("jpg")
            .arg("--output")
            .arg(dest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = cmd
            .spawn()
            .map_err(|err| Error::Hardware(format!("failed to spawn still capture: {err}")))?;

        let status = match child.wait_timeout(STILL_TIMEOUT)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Hardware(format!(
                    "still capture timed out after {}s",
                    STILL_TIMEOUT.as_secs()
                )));
            }
        };

        if !status.success() {
            return Err(Error::Hardware(format!("still capture failed: {status}")));
        }
        if !dest.is_file() {
            return Err(Error::Hardware(format!(
                "still capture produced no file at {}",
                dest.display()
            )));
        }
        Ok(())
    }

    fn start_recording(&mut self, encoder: &EncoderSettings, dest: &Path) -> Result<()> {
        let sensor = *self.sensor()?;
        let mut cmd = self.video_command(&sensor, encoder);
        cmd.arg("--libav-format").arg("matroska").arg("--output").arg(dest);
        self.spawn_active(cmd, "recording")
    }

    fn stop_recording(&mut self) -> Result<()> {
        if self.active.is_none() {
            return Err(Error::Hardware("no recording in progress".to_string()));
        }
        self.stop_active()
    }

    fn start_stream(&mut self, encoder: &EncoderSettings, address: &str) -> Result<()> {
        let sensor = *self.sensor()?;
        let mut cmd = self.video_command(&sensor, encoder);
        cmd.arg("--libav-format").arg("rtsp").arg("--output").arg(address);
        self.spawn_active(cmd, "stream")
    }
}

impl Drop for RpicamDevice {
    fn drop(&mut self) {
        if let Err(err) = self.stop_active() {
            warn!(%err, "failed to stop encoder on drop");
        }
    }
}
