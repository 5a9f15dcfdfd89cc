use crate::reading::{SensorReading, Status};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info};


/// Header line written once to an empty log
pub const HEADER: &str = "timestamp,sensor_id,distance,status";

/// One accepted reading as it is written to the log
#[derive(Clone, Debug, PartialEq)]
pub struct PersistenceRecord {
    pub timestamp: DateTime<Utc>,
    pub sensor_id: String,
    pub distance: f64,
    pub status: Status,
}

impl PersistenceRecord {
    pub fn new(sensor_id: &str, reading: &SensorReading) -> Self {
        Self {
            timestamp: reading.timestamp,
            sensor_id: sensor_id.to_string(),
            distance: reading.distance,
            status: reading.status,
        }
    }

    /// Render as `timestamp,sensor_id,distance,status\n`.
    ///
    /// A sensor id containing `,` or `"` is quoted RFC 4180 style. Distance is
    /// plain decimal (never exponent form) and always keeps a fractional part,
    /// so `5.0` stays `5.0`.
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{},{}\n",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            csv_field(&self.sensor_id),
            format_distance(self.distance),
            self.status
        )
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn format_distance(distance: f64) -> String {
    let mut text = distance.to_string();
    if distance.is_finite() && !text.contains('.') {
        text.push_str(".0");
    }
    text
}

/// What a record write needs from the underlying file.
trait LogFile: Write {
    fn current_len(&self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn current_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write one whole line, cutting the file back to its previous length if the
/// write fails partway so the next record starts on a fresh line.
fn write_line<F: LogFile>(file: &mut F, line: &str) -> Result<()> {
    let len = file
        .current_len()
        .context("Failed to read persistence log length")?;

    if let Err(e) = file.write_all(line.as_bytes()) {
        if let Err(truncate_err) = file.truncate_to(len) {
            error!(error = %truncate_err, "Failed to roll back partial persistence record");
        }
        return Err(e).context("Failed to write persistence record");
    }

    Ok(())
}

/// Append-only CSV log of every accepted reading.
///
/// The file handle sits behind a mutex so concurrent appends land as whole
/// lines. Each append is flushed with `sync_data` before returning.
#[derive(Debug)]
pub struct PersistenceLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl PersistenceLog {
    /// Open (or create) the log in append mode.
    ///
    /// Writes the header only when the file is empty, so restarts keep
    /// appending below existing records.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("Failed to create persistence directory")?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open persistence log {}", path.display()))?;

        let len = file
            .metadata()
            .context("Failed to read persistence log metadata")?
            .len();

        if len == 0 {
            file.write_all(format!("{}\n", HEADER).as_bytes())
                .context("Failed to write persistence log header")?;
            file.sync_data()
                .context("Failed to sync persistence log header")?;
            info!(path = %path.display(), "Created persistence log");
        } else {
            info!(path = %path.display(), bytes = len, "Appending to existing persistence log");
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Write one record and force it to disk.
    ///
    /// Blocking; async callers should go through [`PersistenceLog::append_async`].
    pub fn append(&self, record: &PersistenceRecord) -> Result<()> {
        let line = record.to_line();

        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        write_line(&mut *file, &line)?;
        file.sync_data()
            .context("Failed to sync persistence record")?;

        Ok(())
    }

    /// Run [`PersistenceLog::append`] on the blocking pool and wait for it.
    pub async fn append_async(self: &Arc<Self>, record: PersistenceRecord) -> Result<()> {
        let log = Arc::clone(self);
        tokio::task::spawn_blocking(move || log.append(&record))
            .await
            .context("Persistence task panicked")?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
