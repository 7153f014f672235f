//! Frame records and the capture-store naming convention.

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use std::path::{Path, PathBuf};

/// File name prefix shared by every pending frame.
pub const FRAME_PREFIX: &str = "frame_";

/// File extension of pending frames.
pub const FRAME_EXTENSION: &str = "jpg";

// ISO-8601 with ':' and '.' replaced so the name is valid on every filesystem.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%3fZ";

/// A captured frame awaiting upload.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    /// Identifier derived from the capture timestamp (the file stem)
    pub id: String,

    /// When the frame was captured
    pub captured_at: DateTime<Utc>,

    /// Backing file in the capture store
    pub storage_path: PathBuf,

    /// Encoded image bytes; re-read from `storage_path` when absent
    pub payload: Option<Bytes>,
}

impl FrameRecord {
    /// Create a record for a frame stored at `storage_path`.
    pub fn new(captured_at: DateTime<Utc>, storage_path: PathBuf, payload: Option<Bytes>) -> Self {
        let id = storage_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| frame_id(captured_at));

        Self {
            id,
            captured_at,
            storage_path,
            payload,
        }
    }

    /// File name of the backing file.
    pub fn file_name(&self) -> String {
        self.storage_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.{}", self.id, FRAME_EXTENSION))
    }

    /// Return the payload, reading it from disk if it is not held in memory.
    pub async fn load_payload(&self) -> std::io::Result<Bytes> {
        match &self.payload {
            Some(payload) => Ok(payload.clone()),
            None => tokio::fs::read(&self.storage_path).await.map(Bytes::from),
        }
    }
}

/// Truncate a timestamp to the precision encoded in frame file names.
pub fn frame_timestamp(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

/// Frame identifier for a capture time, e.g. `frame_2024-01-15T10-30-45-123Z`.
pub fn frame_id(at: DateTime<Utc>) -> String {
    format!("{}{}", FRAME_PREFIX, at.format(TIMESTAMP_FORMAT))
}

/// File name for a frame captured at `at`.
pub fn frame_file_name(at: DateTime<Utc>) -> String {
    format!("{}.{}", frame_id(at), FRAME_EXTENSION)
}

/// Whether `name` follows the frame naming convention.
pub fn is_frame_file_name(name: &str) -> bool {
    name.len() > FRAME_PREFIX.len() + FRAME_EXTENSION.len() + 1
        && name.starts_with(FRAME_PREFIX)
        && name
            .rsplit_once('.')
            .map(|(_, ext)| ext.eq_ignore_ascii_case(FRAME_EXTENSION))
            .unwrap_or(false)
}

/// Recover the capture timestamp embedded in a frame file name.
pub fn parse_frame_file_name(name: &str) -> Option<DateTime<Utc>> {
    let stem = name.strip_prefix(FRAME_PREFIX)?.rsplit_once('.')?.0;
    NaiveDateTime::parse_from_str(stem, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Capture timestamp for an existing file, parsed from its name when possible.
pub fn recovered_timestamp(path: &Path) -> DateTime<Utc> {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(parse_frame_file_name)
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap()
            + chrono::Duration::milliseconds(123)
    }

    #[test]
    fn test_file_name_format() {
        assert_eq!(
            frame_file_name(sample_time()),
            "frame_2024-01-15T10-30-45-123Z.jpg"
        );
    }

    #[test]
    fn test_parse_embedded_timestamp() {
        let parsed = parse_frame_file_name("frame_2024-01-15T10-30-45-123Z.jpg");
        assert_eq!(parsed, Some(sample_time()));
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert_eq!(parse_frame_file_name("dead_letter.log"), None);
        assert_eq!(parse_frame_file_name("frame_garbage.jpg"), None);
    }

    #[test]
    fn test_frame_name_filter() {
        assert!(is_frame_file_name("frame_2024-01-15T10-30-45-123Z.jpg"));
        assert!(is_frame_file_name("frame_manual.JPG"));
        assert!(!is_frame_file_name("frame_.jpg"));
        assert!(!is_frame_file_name("dead_letter.log"));
        assert!(!is_frame_file_name("frame_2024.png"));
        assert!(!is_frame_file_name("snapshot.jpg"));
    }

    #[test]
    fn test_unparseable_name_falls_back_to_now() {
        let before = Utc::now();
        let at = recovered_timestamp(Path::new("/store/frame_manual.jpg"));
        assert!(at >= before);
    }

    #[test]
    fn test_record_id_from_path() {
        let path = PathBuf::from("/store").join(frame_file_name(sample_time()));
        let record = FrameRecord::new(sample_time(), path, None);
        assert_eq!(record.id, "frame_2024-01-15T10-30-45-123Z");
        assert_eq!(record.file_name(), "frame_2024-01-15T10-30-45-123Z.jpg");
    }

    #[tokio::test]
    async fn test_held_payload_is_not_reread() {
        let record = FrameRecord::new(
            sample_time(),
            PathBuf::from("/nonexistent/frame_x.jpg"),
            Some(Bytes::from_static(b"jpeg")),
        );
        assert_eq!(record.load_payload().await.unwrap(), Bytes::from_static(b"jpeg"));
    }
}
