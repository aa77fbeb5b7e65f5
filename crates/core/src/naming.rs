use chrono::{DateTime, TimeZone};

const TIMESTAMP_FORMAT: &str = "%d-%m-%Y-%H-%M-%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Still,
    Video,
}

impl ArtifactKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Still => "jpg",
            ArtifactKind::Video => "mkv",
        }
    }
}

/// Builds `{id}_{location}_{DD-MM-YYYY-HH-MM-SS}_{id:0>4}-{counter:0>10}.{ext}`.
pub fn artifact_file_name<Tz>(
    device_id: &str,
    location: &str,
    timestamp: &DateTime<Tz>,
    counter: u64,
    kind: ArtifactKind,
) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{device_id}_{location}_{}_{device_id:0>4}-{counter:0>10}.{}",
        timestamp.format(TIMESTAMP_FORMAT),
        kind.extension()
    )
}
