//! Log writer: the append-only durable sink

use super::reader::LogReader;
use super::record::LogRecord;
use crate::{Result, TileLogError};
use bytes::BytesMut;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Appends framed records to the sink and forces them durable.
///
/// Owned by the frontend logger thread; nothing else writes to the file.
pub struct LogWriter {
    path: PathBuf,
    file: BufWriter<File>,
    bytes_written: u64,
    records_written: u64,
    syncs: u64,
}

impl LogWriter {
    /// Open the sink for appending, creating it if absent.
    ///
    /// An existing file is scanned first and any torn tail is truncated so
    /// new frames follow the last complete record.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                TileLogError::Config(format!("cannot create log directory {:?}: {}", parent, e))
            })?;
        }

        let valid_len = LogReader::valid_prefix_len(&path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TileLogError::Config(format!("cannot open log file {:?}: {}", path, e)))?;

        let file_len = file.metadata()?.len();
        if file_len > valid_len {
            warn!(
                "Truncating {:?} from {} to {} bytes (torn tail)",
                path, file_len, valid_len
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        info!("Opened log file {:?} at offset {}", path, valid_len);

        Ok(Self {
            path,
            file: BufWriter::new(file),
            bytes_written: 0,
            records_written: 0,
            syncs: 0,
        })
    }

    /// Path of the sink
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a batch of records; they are not durable until `sync`
    pub fn append_batch(&mut self, records: &[LogRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut buf = BytesMut::with_capacity(records.iter().map(LogRecord::frame_len).sum());
        for record in records {
            record.encode_into(&mut buf);
        }

        self.file.write_all(&buf)?;
        self.bytes_written += buf.len() as u64;
        self.records_written += records.len() as u64;
        Ok(buf.len() as u64)
    }

    /// Force everything appended so far to durable storage
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        self.syncs += 1;
        Ok(())
    }

    /// Bytes appended by this writer
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Records appended by this writer
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Number of completed syncs
    pub fn syncs(&self) -> u64 {
        self.syncs
    }
}
