use std::fs;
use std::path::{Path, PathBuf};

use fieldcam_core::drive::MountPoint;
use fieldcam_core::storage::{StorageProbe, MIN_FREE_SPACE};
use fieldcam_core::transfer::{
    offload, select_batch, transfer_batch, CancelToken, TransferOutcome, TransferSession,
};
use fieldcam_core::{CaptureConfig, Error, Result};
use tempfile::TempDir;

/// Destination with a fixed capacity; free space shrinks as files land in it.
struct FixedCapacity {
    capacity: u64,
}

impl StorageProbe for FixedCapacity {
    fn removable_mounts(&self) -> Vec<MountPoint> {
        Vec::new()
    }

    fn available_space(&self, path: &Path) -> Result<u64> {
        let mut used = 0;
        for entry in fs::read_dir(path)? {
            used += entry?.metadata()?.len();
        }
        Ok(self.capacity.saturating_sub(used))
    }
}

const AMPLE: FixedCapacity = FixedCapacity {
    capacity: u64::MAX / 2,
};

fn mount(path: &Path) -> MountPoint {
    MountPoint {
        device: "/dev/sda1".to_string(),
        mount_path: path.to_path_buf(),
        label: None,
    }
}

fn stage(dir: &Path, names: &[&str], size: usize) {
    fs::create_dir_all(dir).unwrap();
    for (i, name) in names.iter().enumerate() {
        fs::write(dir.join(name), vec![i as u8; size]).unwrap();
    }
}

fn names_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn four_staged_files_move_the_two_oldest() {
    let root = TempDir::new().unwrap();
    let staging = root.path().join("staging");
    let dest = root.path().join("usb").join("data").join("7");
    stage(&staging, &["A.jpg", "B.jpg", "C.jpg", "D.jpg"], 64);
    let original_a = fs::read(staging.join("A.jpg")).unwrap();

    let batch = select_batch(&staging).unwrap();
    let mut session = TransferSession::new(mount(&root.path().join("usb")), CancelToken::new());
    let report = transfer_batch(&mut session, &batch, &dest, &AMPLE, |_| {}).unwrap();

    assert_eq!(report.outcome, TransferOutcome::Completed);
    assert_eq!(report.files, 2);
    assert_eq!(report.bytes, 128);
    assert_eq!(names_in(&staging), vec!["C.jpg", "D.jpg"]);
    assert_eq!(names_in(&dest), vec!["A.jpg", "B.jpg"]);
    assert_eq!(fs::read(dest.join("A.jpg")).unwrap(), original_a);
    assert!(report.summary().starts_with("Transfer complete. 2 file(s)"));
}

#[test]
fn space_exhaustion_stops_before_the_file_that_does_not_fit() {
    let root = TempDir::new().unwrap();
    let staging = root.path().join("staging");
    let dest = root.path().join("dest");
    stage(&staging, &["1.jpg", "2.jpg", "3.jpg", "4.jpg", "5.jpg", "6.jpg", "7.jpg"], 100);

    // room above the floor for two files only
    let storage = FixedCapacity {
        capacity: MIN_FREE_SPACE + 150,
    };
    let batch = select_batch(&staging).unwrap();
    assert_eq!(batch.len(), 5);

    let mut session = TransferSession::new(mount(root.path()), CancelToken::new());
    let report = transfer_batch(&mut session, &batch, &dest, &storage, |_| {}).unwrap();

    assert_eq!(report.outcome, TransferOutcome::SpaceExhausted);
    assert_eq!(report.files, 2);
    assert_eq!(names_in(&dest), vec!["1.jpg", "2.jpg"]);
    assert_eq!(
        names_in(&staging),
        vec!["3.jpg", "4.jpg", "5.jpg", "6.jpg", "7.jpg"]
    );
    assert!(report.summary().starts_with("Not enough space"));
}

#[test]
fn cancellation_between_files_keeps_the_rest() {
    let root = TempDir::new().unwrap();
    let staging = root.path().join("staging");
    let dest = root.path().join("dest");
    stage(&staging, &["a", "b", "c", "d", "e", "f"], 16);

    let token = CancelToken::new();
    let listener_side = token.clone();
    let batch = select_batch(&staging).unwrap();
    let mut session = TransferSession::new(mount(root.path()), token);
    let report = transfer_batch(&mut session, &batch, &dest, &AMPLE, |progress| {
        if progress.files_transferred == 2 {
            listener_side.cancel();
        }
    })
    .unwrap();

    assert_eq!(report.outcome, TransferOutcome::Cancelled);
    assert_eq!(report.files, 2);
    assert_eq!(session.files_transferred(), 2);
    assert_eq!(names_in(&dest), vec!["a", "b"]);
    assert_eq!(names_in(&staging), vec!["c", "d", "e", "f"]);
    assert!(report.summary().starts_with("Transfer was interrupted."));
}

#[test]
fn cancellation_before_start_moves_nothing() {
    let root = TempDir::new().unwrap();
    let staging = root.path().join("staging");
    stage(&staging, &["a", "b", "c"], 8);

    let token = CancelToken::new();
    token.cancel();
    let batch = select_batch(&staging).unwrap();
    let mut session = TransferSession::new(mount(root.path()), token);
    let report =
        transfer_batch(&mut session, &batch, &root.path().join("dest"), &AMPLE, |_| {}).unwrap();

    assert_eq!(report.outcome, TransferOutcome::Cancelled);
    assert_eq!(report.files, 0);
    assert_eq!(names_in(&staging), vec!["a", "b", "c"]);
}

#[test]
fn copy_failure_ends_batch_and_keeps_source() {
    let root = TempDir::new().unwrap();
    let staging = root.path().join("staging");
    let dest = root.path().join("dest");
    stage(&staging, &["a.jpg"], 8);
    let not_a_file = staging.join("b.jpg");
    fs::create_dir(&not_a_file).unwrap();

    let batch: Vec<PathBuf> = vec![staging.join("a.jpg"), not_a_file.clone()];
    let mut session = TransferSession::new(mount(root.path()), CancelToken::new());
    let err = transfer_batch(&mut session, &batch, &dest, &AMPLE, |_| {}).unwrap_err();

    assert!(matches!(err, Error::CopyFailed { ref path, .. } if path == &not_a_file));
    assert_eq!(session.files_transferred(), 1);
    assert!(not_a_file.exists());
    assert_eq!(names_in(&dest), vec!["a.jpg"]);
}

#[test]
fn rerun_after_transfer_only_sees_what_is_left() {
    let root = TempDir::new().unwrap();
    let staging = root.path().join("staging");
    let dest = root.path().join("dest");
    stage(&staging, &["a", "b", "c", "d"], 4);

    let mut first = TransferSession::new(mount(root.path()), CancelToken::new());
    let batch = select_batch(&staging).unwrap();
    transfer_batch(&mut first, &batch, &dest, &AMPLE, |_| {}).unwrap();

    assert!(select_batch(&staging).unwrap().is_empty());
}

#[test]
fn offload_targets_device_directory_on_mount() {
    let root = TempDir::new().unwrap();
    let staging = root.path().join("recordings");
    let usb = root.path().join("usb");
    fs::create_dir_all(&usb).unwrap();
    stage(&staging, &["x1.mkv", "x2.mkv", "x3.mkv"], 32);

    let text = serde_json::json!({
        "camera": {"mode": "video", "pi_id": 7, "location": "lab", "output_dir": "recordings"}
    })
    .to_string();
    let config = CaptureConfig::from_json_str(&text, root.path()).unwrap();

    let mut session = TransferSession::new(mount(&usb), CancelToken::new());
    assert_eq!(session.mount().mount_path, usb);
    let mut seen = Vec::new();
    let report = offload(&config, &mut session, &AMPLE, |p| {
        seen.push((p.destination.clone(), p.size_bytes))
    })
    .unwrap();

    assert_eq!(report.files, 1);
    assert_eq!(seen, vec![(usb.join("data").join("7").join("x1.mkv"), 32)]);
    assert_eq!(names_in(&staging), vec!["x2.mkv", "x3.mkv"]);
}
