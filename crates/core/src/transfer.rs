use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::CaptureConfig;
use crate::drive::MountPoint;
use crate::error::{Error, Result};
use crate::hash::same_contents;
use crate::storage::{device_dir, StorageProbe, MIN_FREE_SPACE};

/// Newest files left in staging because the scheduler may still be writing them.
pub const IN_PROGRESS_MARGIN: usize = 2;

pub const STOP_KEYWORD: &str = "stop";

/// One-way cancellation flag shared between the transfer loop and the
/// operator listener. Once raised it stays raised.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    Cancelled,
    SpaceExhausted,
}

impl TransferOutcome {
    pub fn message(self) -> &'static str {
        match self {
            TransferOutcome::Completed => "Transfer complete.",
            TransferOutcome::Cancelled => "Transfer was interrupted.",
            TransferOutcome::SpaceExhausted => {
                "Not enough space on the selected USB device for transfer."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferReport {
    pub outcome: TransferOutcome,
    pub files: u64,
    pub bytes: u64,
    pub elapsed: Duration,
}

impl TransferReport {
    pub fn average_per_file(&self) -> Duration {
        match u32::try_from(self.files) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.elapsed / n,
            Err(_) => self.elapsed.div_f64(self.files as f64),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} {} file(s) transferred in {:.2} seconds (avg: {:.2} s per file).",
            self.outcome.message(),
            self.files,
            self.elapsed.as_secs_f64(),
            self.average_per_file().as_secs_f64()
        )
    }
}

#[derive(Debug, Clone)]
pub struct TransferProgress {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub size_bytes: u64,
    pub files_transferred: u64,
}

/// Run-scoped state of one offload invocation.
#[derive(Debug)]
pub struct TransferSession {
    mount: MountPoint,
    cancel: CancelToken,
    files_transferred: u64,
    bytes_transferred: u64,
    started: Instant,
}

impl TransferSession {
    pub fn new(mount: MountPoint, cancel: CancelToken) -> Self {
        Self {
            mount,
            cancel,
            files_transferred: 0,
            bytes_transferred: 0,
            started: Instant::now(),
        }
    }

    pub fn mount(&self) -> &MountPoint {
        &self.mount
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn files_transferred(&self) -> u64 {
        self.files_transferred
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn report(&self, outcome: TransferOutcome) -> TransferReport {
        TransferReport {
            outcome,
            files: self.files_transferred,
            bytes: self.bytes_transferred,
            elapsed: self.elapsed(),
        }
    }
}

/// Regular files directly inside `staging`, sorted by name, minus the
/// newest [`IN_PROGRESS_MARGIN`] entries. A missing directory is an empty batch.
pub fn select_batch(staging: &Path) -> Result<Vec<PathBuf>> {
    if !staging.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(staging)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    let keep = files.len().saturating_sub(IN_PROGRESS_MARGIN);
    files.truncate(keep);
    Ok(files)
}

/// Moves `batch` into `dest_dir` one file at a time.
///
/// Before each file the destination's free space is queried again and the
/// cancellation token is checked; a file is only removed from the source
/// once its copy has been verified. A failed copy ends the batch with
/// [`Error::CopyFailed`] and leaves that source file in place.
pub fn transfer_batch<P, F>(
    session: &mut TransferSession,
    batch: &[PathBuf],
    dest_dir: &Path,
    storage: &P,
    mut on_file: F,
) -> Result<TransferReport>
where
    P: StorageProbe + ?Sized,
    F: FnMut(&TransferProgress),
{
    fs::create_dir_all(dest_dir)?;

    for source in batch {
        let available = storage.available_space(dest_dir)?;

        if session.cancel.is_cancelled() {
            info!(transferred = session.files_transferred, "transfer cancelled");
            return Ok(session.report(TransferOutcome::Cancelled));
        }

        let size = fs::metadata(source)?.len();
        if available < size || available < MIN_FREE_SPACE {
            warn!(
                file = %source.display(),
                size,
                available,
                "destination out of space"
            );
            return Ok(session.report(TransferOutcome::SpaceExhausted));
        }

        let destination = move_verified(source, dest_dir)?;
        session.files_transferred += 1;
        session.bytes_transferred += size;
        debug!(
            from = %source.display(),
            to = %destination.display(),
            size,
            "file transferred"
        );

        on_file(&TransferProgress {
            source: source.clone(),
            destination,
            size_bytes: size,
            files_transferred: session.files_transferred,
        });
    }

    Ok(session.report(TransferOutcome::Completed))
}

/// Offloads this device's staged artifacts onto the session's mount, into
/// `{mount}/data/{device_id}`.
pub fn offload<P, F>(
    config: &CaptureConfig,
    session: &mut TransferSession,
    storage: &P,
    on_file: F,
) -> Result<TransferReport>
where
    P: StorageProbe + ?Sized,
    F: FnMut(&TransferProgress),
{
    let staging = &config.output_dir;
    fs::create_dir_all(staging)?;
    let dest_dir = device_dir(&session.mount.mount_path, &config.device_id);
    let batch = select_batch(staging)?;
    info!(
        files = batch.len(),
        from = %staging.display(),
        to = %dest_dir.display(),
        "starting transfer"
    );
    transfer_batch(session, &batch, &dest_dir, storage, on_file)
}

fn move_verified(source: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let name = source.file_name().ok_or_else(|| Error::CopyFailed {
        path: source.to_path_buf(),
        reason: "source has no file name".to_string(),
    })?;
    let destination = dest_dir.join(name);
    let partial = dest_dir.join(partial_name(name));

    if let Err(err) = copy_and_verify(source, &partial) {
        let _ = fs::remove_file(&partial);
        return Err(Error::CopyFailed {
            path: source.to_path_buf(),
            reason: err.to_string(),
        });
    }

    fs::rename(&partial, &destination).map_err(|err| Error::CopyFailed {
        path: source.to_path_buf(),
        reason: format!("cannot finalise {}: {err}", destination.display()),
    })?;

    fs::remove_file(source).map_err(|err| Error::CopyFailed {
        path: source.to_path_buf(),
        reason: format!("copied but source not removed: {err}"),
    })?;

    Ok(destination)
}

fn copy_and_verify(source: &Path, partial: &Path) -> Result<()> {
    fs::copy(source, partial)?;
    File::open(partial)?.sync_all()?;
    if !same_contents(source, partial)? {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "destination does not match source",
        )
        .into());
    }
    Ok(())
}

fn partial_name(name: &std::ffi::OsStr) -> OsString {
    let mut partial = OsString::from(".");
    partial.push(name);
    partial.push(".part");
    partial
}

/// Reads operator input line by line until the stop keyword arrives, the
/// input ends, or the token is raised elsewhere. Returns whether this
/// listener raised the token.
pub fn listen_for_stop<R: BufRead>(input: R, token: &CancelToken) -> bool {
    for line in input.lines() {
        if token.is_cancelled() {
            return false;
        }
        let Ok(line) = line else {
            return false;
        };
        if line.trim().eq_ignore_ascii_case(STOP_KEYWORD) {
            token.cancel();
            return true;
        }
    }
    false
}
