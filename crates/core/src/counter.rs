use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Error, Result};

/// Persistent artifact sequence number.
///
/// The value lives in a single file holding one ASCII integer. A missing,
/// unreadable or non-numeric file is treated as zero rather than an error.
#[derive(Debug)]
pub struct SequenceCounter {
    path: PathBuf,
    value: u64,
}

impl SequenceCounter {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let value = read_value(&path);
        Self { path, value }
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once the value can no longer advance.
    pub fn is_exhausted(&self) -> bool {
        self.value == u64::MAX
    }

    /// Advances the counter by one and overwrites the file.
    ///
    /// The in-memory value advances even when the write fails, so names
    /// derived later in this process never repeat. At `u64::MAX` the value
    /// stays put and an error is returned.
    pub fn increment(&mut self) -> Result<u64> {
        self.value = self
            .value
            .checked_add(1)
            .ok_or_else(|| Error::CounterExhausted(self.path.clone()))?;
        write_value(&self.path, self.value)?;
        Ok(self.value)
    }
}

fn read_value(path: &Path) -> u64 {
    let text = match fs::read_to_string(path) {
        Ok(v) => v,
        Err(err) => {
            warn!(path = %path.display(), %err, "counter file unreadable, starting at 0");
            return 0;
        }
    };

    match text.trim().parse::<u64>() {
        Ok(v) => v,
        Err(_) => {
            warn!(path = %path.display(), contents = %text.trim(), "counter file corrupt, starting at 0");
            0
        }
    }
}

fn write_value(path: &Path, value: u64) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(value.to_string().as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
