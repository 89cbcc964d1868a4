//! Recovery store: crash-safe streaming checkpoints.
//!
//! Plain `key=value` text, one pair per line, written atomically (temp file
//! then rename — the rename is the commit). Read back at startup to resume
//! a program after a crash mid-run.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq)]
pub struct RecoveryRecord {
    pub filename: String,
    pub total: usize,
    pub cursor: usize,
    pub timestamp: u64,
    pub mpos_z: f64,
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("write failed: {0}")]
    Write(#[from] std::io::Error),
    #[error("malformed recovery file: {0}")]
    Malformed(String),
}

impl RecoveryRecord {
    pub fn now(filename: &str, total: usize, cursor: usize, mpos_z: f64) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        RecoveryRecord {
            filename: filename.to_string(),
            total,
            cursor,
            timestamp,
            mpos_z,
        }
    }

    fn to_text(&self) -> String {
        format!(
            "filename={}\ntotal={}\ncursor={}\ntimestamp={}\nmpos_z={}\n",
            self.filename, self.total, self.cursor, self.timestamp, self.mpos_z
        )
    }

    fn from_text(text: &str) -> Result<Self, RecoveryError> {
        let mut filename = None;
        let mut total = None;
        let mut cursor = None;
        let mut timestamp = None;
        let mut mpos_z = None;
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                "filename" => filename = Some(value.to_string()),
                "total" => total = value.parse().ok(),
                "cursor" => cursor = value.parse().ok(),
                "timestamp" => timestamp = value.parse().ok(),
                "mpos_z" => mpos_z = value.parse().ok(),
                _ => {}
            }
        }
        let record = RecoveryRecord {
            filename: filename.ok_or_else(|| RecoveryError::Malformed("missing filename".into()))?,
            total: total.ok_or_else(|| RecoveryError::Malformed("missing total".into()))?,
            cursor: cursor.ok_or_else(|| RecoveryError::Malformed("missing cursor".into()))?,
            timestamp: timestamp.ok_or_else(|| RecoveryError::Malformed("missing timestamp".into()))?,
            mpos_z: mpos_z.ok_or_else(|| RecoveryError::Malformed("missing mpos_z".into()))?,
        };
        if record.cursor > record.total {
            return Err(RecoveryError::Malformed(format!(
                "cursor {} exceeds total {}",
                record.cursor, record.total
            )));
        }
        Ok(record)
    }
}

/// Writes a recovery record atomically: write to a sibling temp file, then
/// rename over the destination.
pub async fn write_atomic(path: &Path, record: &RecoveryRecord) -> Result<(), RecoveryError> {
    let tmp_path = sibling_temp_path(path);
    tokio::fs::write(&tmp_path, record.to_text()).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

pub async fn read(path: &Path) -> Result<Option<RecoveryRecord>, RecoveryError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => RecoveryRecord::from_text(&text).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_atomic_write() {
        let dir = std::env::temp_dir().join(format!("grbl_recovery_test_{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("recovery.txt");
        let record = RecoveryRecord::now("prog.nc", 100, 47, -12.5);
        write_atomic(&path, &record).await.unwrap();
        let read_back = read(&path).await.unwrap().unwrap();
        assert_eq!(read_back, record);
        assert!(!sibling_temp_path(&path).exists());
    }

    #[tokio::test]
    async fn missing_file_returns_none() {
        let path = std::env::temp_dir().join("grbl_recovery_does_not_exist.txt");
        let _ = tokio::fs::remove_file(&path).await;
        assert!(read(&path).await.unwrap().is_none());
    }

    #[test]
    fn rejects_cursor_past_total() {
        let text = "filename=a\ntotal=5\ncursor=10\ntimestamp=1\nmpos_z=0\n";
        assert!(RecoveryRecord::from_text(text).is_err());
    }

    #[test]
    fn accepts_cursor_equal_total() {
        let text = "filename=a\ntotal=5\ncursor=5\ntimestamp=1\nmpos_z=0\n";
        assert!(RecoveryRecord::from_text(text).is_ok());
    }
}
