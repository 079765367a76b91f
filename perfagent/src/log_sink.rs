//! Append-only JSON-array log
//!
//! The file is opened with a leading `[`; every append writes one
//! pretty-printed object followed by `,` and a newline, and is flushed.
//! Only [`LogSink::close`] turns the file into a valid JSON array by
//! overwriting the final `,\n` with `\n]`.
//!
//! A process that dies before `close()` leaves a dangling comma and no
//! closing bracket. That gap is accepted; nothing repairs it on drop or on
//! the next start.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::debug;
use serde::Serialize;
use serde_json::Value;

use crate::domain::LogSinkError;

/// Trailing bytes written after every record
const RECORD_SEPARATOR: &[u8] = b",\n";

/// One log entry as written to disk
#[derive(Debug, Serialize)]
struct LogRecord<'a> {
    body: Value,
    from: &'a str,
    timestamp: String,
}

/// Writer for the durable telemetry log
pub struct LogSink {
    path: PathBuf,
    writer: BufWriter<File>,
    records: u64,
}

impl LogSink {
    /// Create (truncate) the log file and write the opening bracket
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, LogSinkError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .map_err(|source| LogSinkError::Open { path: path.clone(), source })?;
        let mut writer = BufWriter::new(file);
        writer.write_all(b"[\n")?;
        writer.flush()?;
        Ok(Self { path, writer, records: 0 })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records appended so far
    #[must_use]
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Append one message with its source tag and a capture timestamp
    ///
    /// A message that is valid JSON is stored as structured data, anything
    /// else as a raw string.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn append(&mut self, message: &str, source: &str) -> Result<(), LogSinkError> {
        let body = serde_json::from_str(message).unwrap_or_else(|_| Value::String(message.to_string()));
        self.append_value(body, source)
    }

    /// Append an already structured message
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn append_value(&mut self, body: Value, source: &str) -> Result<(), LogSinkError> {
        let record = LogRecord { body, from: source, timestamp: Utc::now().to_rfc3339() };
        serde_json::to_writer_pretty(&mut self.writer, &record)?;
        self.writer.write_all(RECORD_SEPARATOR)?;
        self.writer.flush()?;
        self.records += 1;
        Ok(())
    }

    /// Terminate the array and close the file
    ///
    /// # Errors
    /// Returns an error if the seek or the final write fails.
    pub fn close(mut self) -> Result<(), LogSinkError> {
        if self.records > 0 {
            #[allow(clippy::cast_possible_wrap)]
            self.writer.seek(SeekFrom::Current(-(RECORD_SEPARATOR.len() as i64)))?;
            self.writer.write_all(b"\n]\n")?;
        } else {
            self.writer.write_all(b"]\n")?;
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        debug!("Closed log {} with {} records", self.path.display(), self.records);
        Ok(())
    }
}
