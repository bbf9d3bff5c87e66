//! Capture Files
//!
//! Raw notifications can be appended to a JSON lines file while bridging and
//! fed back through the decoder and publisher later, without a sensor.
use crate::model::sample::RawNotification;
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends notifications to a capture file, one JSON object per line.
#[derive(Debug)]
pub struct CaptureWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl CaptureWriter {
    /// Opens `path` for appending, creating it if needed.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("could not open capture file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, notification: &RawNotification) -> Result<()> {
        serde_json::to_writer(&mut self.writer, notification)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads every notification of a capture file in recorded order.
///
/// Blank lines are skipped; any other line that does not parse fails the
/// whole read with its line number.
pub fn read_capture(path: &Path) -> Result<Vec<RawNotification>> {
    let file = File::open(path)
        .with_context(|| format!("could not open capture file {}", path.display()))?;
    let mut notifications = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let notification = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid capture record", path.display(), index + 1))?;
        notifications.push(notification);
    }
    Ok(notifications)
}
