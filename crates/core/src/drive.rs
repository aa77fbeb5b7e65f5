use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Device-path prefix of USB mass storage on the target boards.
pub const REMOVABLE_DEVICE_PREFIX: &str = "/dev/sd";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub device: String,
    pub mount_path: PathBuf,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MountInfo {
    pub(crate) mount_point: PathBuf,
    pub(crate) fs_type: Option<String>,
    pub(crate) mount_source: Option<String>,
}

/// The single "looks like external storage" test shared by the capture
/// scheduler and the offload pipeline.
pub fn is_removable_mount(device: &str, mount_path: &Path) -> bool {
    device.starts_with(REMOVABLE_DEVICE_PREFIX)
        && !mount_path.as_os_str().is_empty()
        && mount_path.exists()
}

/// Lists mounted filesystems that look like removable storage. A failure to
/// read the mount table is reported and yields no candidates.
pub fn discover_removable_mounts() -> Vec<MountPoint> {
    let mounts = match read_mount_table() {
        Ok(v) => v,
        Err(err) => {
            warn!(%err, "cannot enumerate mounted filesystems");
            return Vec::new();
        }
    };

    let found = removable_from(mounts);
    debug!(count = found.len(), "removable mounts discovered");
    found
}

pub(crate) fn removable_from(mounts: Vec<MountInfo>) -> Vec<MountPoint> {
    let mut found: Vec<MountPoint> = Vec::new();
    for mi in mounts {
        let Some(device) = mi.mount_source else {
            continue;
        };
        if !is_removable_mount(&device, &mi.mount_point) {
            continue;
        }
        if found.iter().any(|m| m.mount_path == mi.mount_point) {
            continue;
        }
        let label = device_label(&device);
        debug!(
            device = %device,
            fs_type = mi.fs_type.as_deref().unwrap_or("?"),
            mount = %mi.mount_point.display(),
            "removable mount"
        );
        found.push(MountPoint {
            device,
            mount_path: mi.mount_point,
            label,
        });
    }
    found
}

pub(crate) fn read_mount_table() -> io::Result<Vec<MountInfo>> {
    let mountinfo = fs::read_to_string("/proc/self/mountinfo")?;
    Ok(mountinfo.lines().filter_map(parse_mountinfo_line).collect())
}

pub(crate) fn parse_mountinfo_line(line: &str) -> Option<MountInfo> {
    let (left, right) = line.split_once(" - ")?;
    let left_fields: Vec<&str> = left.split_whitespace().collect();
    if left_fields.len() < 5 {
        return None;
    }

    let mount_point = unescape_mountinfo(left_fields[4]);
    let right_fields: Vec<&str> = right.split_whitespace().collect();
    let fs_type = right_fields.first().map(|s| s.to_string());
    let mount_source = right_fields.get(1).map(|s| s.to_string());

    Some(MountInfo {
        mount_point: PathBuf::from(mount_point),
        fs_type,
        mount_source,
    })
}

fn unescape_mountinfo(s: &str) -> String {
    s.replace(r"\040", " ")
        .replace(r"\011", "\t")
        .replace(r"\012", "\n")
        .replace(r"\134", r"\")
}

fn device_label(device: &str) -> Option<String> {
    let dev_path = fs::canonicalize(device).unwrap_or_else(|_| PathBuf::from(device));
    find_disk_id(&dev_path, Path::new("/dev/disk/by-label")).ok()
}

fn find_disk_id(dev: &Path, dir: &Path) -> io::Result<String> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        let target = fs::canonicalize(&path).unwrap_or(path);
        if target == dev {
            return Ok(unescape_label(&name));
        }
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        "no matching device label found",
    ))
}

// udev escapes spaces in by-label links as \x20.
fn unescape_label(name: &str) -> String {
    name.replace(r"\x20", " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_mountinfo_fields() {
        let line = "36 35 8:1 / /media/pi/USB\\040STICK rw,nosuid - vfat /dev/sda1 rw,uid=1000";
        let mi = parse_mountinfo_line(line).unwrap();
        assert_eq!(mi.mount_point, PathBuf::from("/media/pi/USB STICK"));
        assert_eq!(mi.fs_type.as_deref(), Some("vfat"));
        assert_eq!(mi.mount_source.as_deref(), Some("/dev/sda1"));
    }

    #[test]
    fn rejects_short_lines() {
        assert_eq!(parse_mountinfo_line("garbage"), None);
        assert_eq!(parse_mountinfo_line("1 2 - ext4 /dev/sda1"), None);
    }

    #[test]
    fn removable_predicate_needs_prefix_and_existing_path() {
        let dir = TempDir::new().unwrap();
        assert!(is_removable_mount("/dev/sda1", dir.path()));
        assert!(!is_removable_mount("/dev/mmcblk0p2", dir.path()));
        assert!(!is_removable_mount("/dev/sdb1", &dir.path().join("gone")));
        assert!(!is_removable_mount("/dev/sdb1", Path::new("")));
    }

    #[test]
    fn filters_and_dedupes_candidates() {
        let dir = TempDir::new().unwrap();
        let usb = dir.path().to_path_buf();
        let mounts = vec![
            MountInfo {
                mount_point: PathBuf::from("/"),
                fs_type: Some("ext4".into()),
                mount_source: Some("/dev/mmcblk0p2".into()),
            },
            MountInfo {
                mount_point: usb.clone(),
                fs_type: Some("vfat".into()),
                mount_source: Some("/dev/sda1".into()),
            },
            MountInfo {
                mount_point: usb.clone(),
                fs_type: Some("vfat".into()),
                mount_source: Some("/dev/sda1".into()),
            },
            MountInfo {
                mount_point: PathBuf::from("/proc"),
                fs_type: Some("proc".into()),
                mount_source: None,
            },
        ];

        let found = removable_from(mounts);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].device, "/dev/sda1");
        assert_eq!(found[0].mount_path, usb);
    }
}
