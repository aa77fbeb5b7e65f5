use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sysinfo::Disks;
use tracing::{debug, warn};

use crate::drive::{self, MountPoint};
use crate::error::Result;

/// Free-space floor shared by the capture output policy and the offload
/// pipeline (1 GiB).
pub const MIN_FREE_SPACE: u64 = 1 << 30;

/// Storage queries used by both the scheduler and the offload pipeline.
/// Callers query fresh every time; nothing is cached.
pub trait StorageProbe {
    fn removable_mounts(&self) -> Vec<MountPoint>;
    fn available_space(&self, path: &Path) -> Result<u64>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemStorage;

impl StorageProbe for SystemStorage {
    fn removable_mounts(&self) -> Vec<MountPoint> {
        drive::discover_removable_mounts()
    }

    fn available_space(&self, path: &Path) -> Result<u64> {
        let target = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let disks = Disks::new_with_refreshed_list();

        let mut best: Option<(&Path, u64)> = None;
        for disk in disks.list() {
            let mount = disk.mount_point();
            if !target.starts_with(mount) {
                continue;
            }
            let replace = match best {
                None => true,
                Some((cur, _)) => mount.as_os_str().len() > cur.as_os_str().len(),
            };
            if replace {
                best = Some((mount, disk.available_space()));
            }
        }

        match best {
            Some((_, free)) => Ok(free),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no filesystem found for {}", path.display()),
            )
            .into()),
        }
    }
}

/// Chooses where the next artifact is written: a removable mount with
/// enough room if one is present, otherwise the local staging directory.
#[derive(Debug, Clone)]
pub struct OutputResolver {
    staging_dir: PathBuf,
    device_id: String,
}

impl OutputResolver {
    pub fn new(staging_dir: impl Into<PathBuf>, device_id: impl Into<String>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            device_id: device_id.into(),
        }
    }

    /// Resolves the directory and creates it if needed.
    pub fn resolve<P: StorageProbe + ?Sized>(&self, storage: &P) -> Result<PathBuf> {
        let dir = self.pick(storage);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn pick<P: StorageProbe + ?Sized>(&self, storage: &P) -> PathBuf {
        for mount in storage.removable_mounts() {
            match storage.available_space(&mount.mount_path) {
                Ok(free) if free >= MIN_FREE_SPACE => {
                    return device_dir(&mount.mount_path, &self.device_id);
                }
                Ok(free) => {
                    debug!(mount = %mount.mount_path.display(), free, "removable mount too full");
                }
                Err(err) => {
                    warn!(mount = %mount.mount_path.display(), %err, "cannot query free space");
                }
            }
        }
        self.staging_dir.clone()
    }
}

/// `{mount}/data/{device_id}`: where a device's artifacts live on removable media.
pub fn device_dir(mount_path: &Path, device_id: &str) -> PathBuf {
    mount_path.join("data").join(device_id)
}
