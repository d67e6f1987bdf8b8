//! # Binary Depth Ring Log
//!
//! One file per anchorage keeps the last 30 days of averaged depth samples so a
//! restarted watcher can replay them and pick up the tide where it left off.
//!
//! ## File Layout
//!
//! All fields are big-endian.
//!
//! ```text
//! header (20 bytes)
//!   magic      [u8; 4]  "TWDL"
//!   version    u32      1
//!   capacity   u32      record slots in the file
//!   cursor     u32      next physical slot to write
//!   count      u32      occupied slots (<= capacity)
//! slots (capacity x 28 bytes)
//!   timer      f64      epoch milliseconds
//!   depth      f32      meters
//!   latitude   f64
//!   longitude  f64
//! ```
//!
//! The file is allocated at full size when created. Appends overwrite the slot
//! under the cursor and wrap to slot 0 at capacity, so the oldest record is the
//! one replaced. Replay walks the occupied slots oldest to newest.
//!
//! ## Error Handling
//!
//! Records carry no checksum. Replay skips slots that cannot be a real sample
//! (all zero, non-finite, non-positive timer) instead of aborting, and a header
//! that is not ours causes the file to be reinitialized as an empty log.

use crate::{Position, Sample};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Exact byte size of one encoded sample
pub const RECORD_BYTES: usize = 28;
/// Exact byte size of the file header
pub const HEADER_BYTES: usize = 20;
/// Magic bytes at the start of every depth log (`"TWDL"`)
pub const LOG_MAGIC: [u8; 4] = *b"TWDL";
/// Current on-disk format version
pub const LOG_VERSION: u32 = 1;
/// Days of history a log holds at its configured cadence
pub const RETENTION_DAYS: u32 = 30;

/// Errors raised by depth log operations.
#[derive(Error, Debug)]
pub enum LogError {
    /// File open, read, write or sync failed
    #[error("depth log IO: {0}")]
    Io(#[from] io::Error),

    /// Operation attempted after `close()`
    #[error("depth log is closed")]
    Closed,

    /// A log must hold at least one record
    #[error("invalid depth log capacity: {0}")]
    Capacity(u32),
}

/// Record capacity for 30 days of samples taken every `interval_minutes`.
pub fn capacity_for_interval(interval_minutes: u32) -> u32 {
    RETENTION_DAYS * 24 * 60 / interval_minutes.max(1)
}

/// Log file name for an anchorage id: zero-padded to five digits.
pub fn file_name(anchorage_id: u32) -> String {
    format!("{:05}.dat", anchorage_id)
}

/// Encode a sample into its 28-byte slot representation.
pub fn encode_record(sample: &Sample) -> [u8; RECORD_BYTES] {
    let mut out = [0_u8; RECORD_BYTES];
    out[0..8].copy_from_slice(&(sample.timer as f64).to_be_bytes());
    out[8..12].copy_from_slice(&sample.depth.to_be_bytes());
    out[12..20].copy_from_slice(&sample.position.latitude.to_be_bytes());
    out[20..28].copy_from_slice(&sample.position.longitude.to_be_bytes());
    out
}

/// Decode a slot, returning `None` for never-written or implausible records.
pub fn decode_record(bytes: &[u8; RECORD_BYTES]) -> Option<Sample> {
    if bytes.iter().all(|&b| b == 0) {
        return None;
    }

    let timer = f64::from_be_bytes(array_at(bytes, 0));
    let depth = f32::from_be_bytes(array_at(bytes, 8));
    let latitude = f64::from_be_bytes(array_at(bytes, 12));
    let longitude = f64::from_be_bytes(array_at(bytes, 20));

    if !timer.is_finite() || timer <= 0.0 {
        return None;
    }
    if !depth.is_finite() || !latitude.is_finite() || !longitude.is_finite() {
        return None;
    }

    Some(Sample {
        timer: timer as i64,
        depth,
        position: Position {
            latitude,
            longitude,
        },
    })
}

fn array_at<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0_u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

/// In-memory copy of the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LogHeader {
    capacity: u32,
    cursor: u32,
    count: u32,
}

impl LogHeader {
    fn empty(capacity: u32) -> Self {
        Self {
            capacity,
            cursor: 0,
            count: 0,
        }
    }

    fn encode(&self) -> [u8; HEADER_BYTES] {
        let mut out = [0_u8; HEADER_BYTES];
        out[0..4].copy_from_slice(&LOG_MAGIC);
        out[4..8].copy_from_slice(&LOG_VERSION.to_be_bytes());
        out[8..12].copy_from_slice(&self.capacity.to_be_bytes());
        out[12..16].copy_from_slice(&self.cursor.to_be_bytes());
        out[16..20].copy_from_slice(&self.count.to_be_bytes());
        out
    }

    fn decode(bytes: &[u8; HEADER_BYTES]) -> Option<Self> {
        if bytes[0..4] != LOG_MAGIC {
            return None;
        }
        if u32::from_be_bytes(array_at(bytes, 4)) != LOG_VERSION {
            return None;
        }
        let header = Self {
            capacity: u32::from_be_bytes(array_at(bytes, 8)),
            cursor: u32::from_be_bytes(array_at(bytes, 12)),
            count: u32::from_be_bytes(array_at(bytes, 16)),
        };

        // Until the log fills up the cursor always equals the count.
        let consistent = header.capacity > 0
            && header.cursor < header.capacity
            && header.count <= header.capacity
            && (header.count == header.capacity || header.cursor == header.count);
        consistent.then_some(header)
    }

    /// Occupied physical slots, oldest first.
    fn chronological_slots(&self) -> impl Iterator<Item = u32> {
        let capacity = self.capacity;
        let start = if self.count < capacity { 0 } else { self.cursor };
        (0..self.count).map(move |i| (start + i) % capacity)
    }
}

fn slot_offset(slot: u32) -> u64 {
    HEADER_BYTES as u64 + slot as u64 * RECORD_BYTES as u64
}

/// A fixed-capacity circular file of depth samples.
///
/// Keep an instance only for the duration of one operation: open, append or
/// replay, close. Dropping the log closes it.
#[derive(Debug)]
pub struct DepthLog {
    path: PathBuf,
    file: Option<File>,
    header: LogHeader,
}

impl DepthLog {
    /// Open the log at `path`, creating it sized for `capacity` records if absent.
    ///
    /// An existing log keeps its records, cursor and stored capacity.
    pub fn open<P: AsRef<Path>>(path: P, capacity: u32) -> Result<Self, LogError> {
        if capacity == 0 {
            return Err(LogError::Capacity(capacity));
        }

        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let header = match read_header(&mut file)? {
            Some(header) => {
                if header.capacity != capacity {
                    debug!(
                        path = %path.display(),
                        stored = header.capacity,
                        requested = capacity,
                        "Keeping stored depth log capacity"
                    );
                }
                header
            }
            None => {
                if file.metadata()?.len() > 0 {
                    warn!(path = %path.display(), "Unrecognized depth log header, starting an empty log");
                }
                let header = LogHeader::empty(capacity);
                initialize(&mut file, &header)?;
                header
            }
        };

        Ok(Self {
            path,
            file: Some(file),
            header,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> u32 {
        self.header.capacity
    }

    /// Number of occupied slots
    pub fn len(&self) -> u32 {
        self.header.count
    }

    pub fn is_empty(&self) -> bool {
        self.header.count == 0
    }

    /// Write `sample` at the cursor and advance it, wrapping at capacity.
    pub fn append_record(&mut self, sample: &Sample) -> Result<(), LogError> {
        let file = self.file.as_mut().ok_or(LogError::Closed)?;

        file.seek(SeekFrom::Start(slot_offset(self.header.cursor)))?;
        file.write_all(&encode_record(sample))?;

        self.header.cursor = (self.header.cursor + 1) % self.header.capacity;
        self.header.count = (self.header.count + 1).min(self.header.capacity);

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&self.header.encode())?;
        Ok(())
    }

    /// Visit every stored sample oldest to newest. Returns the number delivered.
    pub fn for_each<F: FnMut(Sample)>(&mut self, mut visitor: F) -> Result<usize, LogError> {
        let file = self.file.as_mut().ok_or(LogError::Closed)?;

        let mut slots = Vec::new();
        file.seek(SeekFrom::Start(HEADER_BYTES as u64))?;
        file.read_to_end(&mut slots)?;

        let mut delivered = 0;
        let mut missing = 0_u32;
        for slot in self.header.chronological_slots() {
            let start = slot as usize * RECORD_BYTES;
            let Some(bytes) = slots.get(start..start + RECORD_BYTES) else {
                missing += 1;
                continue;
            };

            let mut record = [0_u8; RECORD_BYTES];
            record.copy_from_slice(bytes);
            match decode_record(&record) {
                Some(sample) => {
                    visitor(sample);
                    delivered += 1;
                }
                None => {
                    warn!(path = %self.path.display(), slot, "Skipping unreadable depth record");
                }
            }
        }

        if missing > 0 {
            warn!(path = %self.path.display(), missing, "Depth log truncated, skipped missing slots");
        }
        Ok(delivered)
    }

    /// All stored samples, oldest first.
    pub fn records(&mut self) -> Result<Vec<Sample>, LogError> {
        let mut samples = Vec::with_capacity(self.header.count as usize);
        self.for_each(|sample| samples.push(sample))?;
        Ok(samples)
    }

    /// Flush and release the file. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<(), LogError> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            file.sync_data()?;
        }
        Ok(())
    }
}

impl Drop for DepthLog {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            warn!(path = %self.path.display(), %error, "Failed to close depth log");
        }
    }
}

fn read_header(file: &mut File) -> Result<Option<LogHeader>, io::Error> {
    if file.metadata()?.len() < HEADER_BYTES as u64 {
        return Ok(None);
    }
    let mut bytes = [0_u8; HEADER_BYTES];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut bytes)?;
    Ok(LogHeader::decode(&bytes))
}

fn initialize(file: &mut File, header: &LogHeader) -> Result<(), io::Error> {
    file.set_len(0)?;
    file.set_len(slot_offset(header.capacity))?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header.encode())?;
    Ok(())
}

/// Open the log, append one sample and close it again.
pub fn append_to<P: AsRef<Path>>(path: P, capacity: u32, sample: &Sample) -> Result<(), LogError> {
    let mut log = DepthLog::open(path, capacity)?;
    log.append_record(sample)?;
    log.close()
}
