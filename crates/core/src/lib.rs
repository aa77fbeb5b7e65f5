pub mod capture;
pub mod config;
pub mod counter;
pub mod drive;
pub mod error;
pub mod hash;
pub mod naming;
pub mod rpicam;
pub mod scheduler;
pub mod storage;
pub mod transfer;

pub use crate::config::{CaptureConfig, CaptureMode, TimeSpan, TimeUnit};
pub use crate::error::{Error, Result};
