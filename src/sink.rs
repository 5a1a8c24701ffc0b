//! Append-only CSV persistence of decoded events.
//!
//! One file per event kind, named `{kind}_data_{YYYY-MM-DD}.csv` after the day
//! the sink was opened. The date is fixed for the lifetime of the sink, so a
//! run that crosses midnight keeps writing to the same files.
//!
//! Columns are `timestamp,event,` followed by the event fields:
//!
//! | File | Fields |
//! |------|--------|
//! | swap | sender, recipient, amount0, amount1, sqrtPriceX96, liquidity, tick |
//! | mint | sender, owner, tickLower, tickUpper, amount, amount0, amount1 |
//! | burn | owner, tickLower, tickUpper, amount, amount0, amount1 |
//!
//! A Burn without `tickUpper` leaves that column empty.

use chrono::{Local, NaiveDate, NaiveDateTime};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

use crate::error::{MonitorError, MonitorResult};
use crate::events::{DecodedEvent, EventKind};

/// Format of the capture timestamp column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Destination for decoded events.
///
/// Appends happen inline in the receive loop, in arrival order.
pub trait EventSink: Send {
    /// Persist one event.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the event could not be written.
    fn append(&mut self, event: &DecodedEvent) -> MonitorResult<()>;
}

/// Collects events in memory.
impl EventSink for Vec<DecodedEvent> {
    fn append(&mut self, event: &DecodedEvent) -> MonitorResult<()> {
        self.push(event.clone());
        Ok(())
    }
}

/// CSV header for one event kind.
#[must_use]
pub const fn header(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Swap => {
            "timestamp,event,sender,recipient,amount0,amount1,sqrtPriceX96,liquidity,tick"
        }
        EventKind::Mint => {
            "timestamp,event,sender,owner,tickLower,tickUpper,amount,amount0,amount1"
        }
        EventKind::Burn => "timestamp,event,owner,tickLower,tickUpper,amount,amount0,amount1",
    }
}

/// Render one CSV row (without trailing newline).
#[must_use]
pub fn format_row(event: &DecodedEvent, at: NaiveDateTime) -> String {
    let ts = at.format(TIMESTAMP_FORMAT);
    let kind = event.kind();
    match event {
        DecodedEvent::Swap(e) => format!(
            "{ts},{kind},{},{},{},{},{},{},{}",
            e.sender.to_checksum(None),
            e.recipient.to_checksum(None),
            e.amount0,
            e.amount1,
            e.sqrt_price_x96,
            e.liquidity,
            e.tick,
        ),
        DecodedEvent::Mint(e) => format!(
            "{ts},{kind},{},{},{},{},{},{},{}",
            e.sender.to_checksum(None),
            e.owner.to_checksum(None),
            e.tick_lower,
            e.tick_upper,
            e.amount,
            e.amount0,
            e.amount1,
        ),
        DecodedEvent::Burn(e) => format!(
            "{ts},{kind},{},{},{},{},{},{}",
            e.owner.to_checksum(None),
            e.tick_lower,
            e.tick_upper.map(|t| t.to_string()).unwrap_or_default(),
            e.amount,
            e.amount0,
            e.amount1,
        ),
    }
}

/// Dated CSV files under one directory.
#[derive(Debug)]
pub struct RecordSink {
    dir: PathBuf,
    date: NaiveDate,
    swap: File,
    mint: File,
    burn: File,
}

impl RecordSink {
    /// Open (or create) today's files under `dir`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the directory or a file cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> MonitorResult<Self> {
        Self::open_dated(dir, Local::now().date_naive())
    }

    /// Open (or create) the files for `date` under `dir`.
    ///
    /// A header row is written only when a file is created; reopening an
    /// existing destination appends after the rows already there.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the directory or a file cannot be created.
    #[instrument(skip(dir), fields(dir = %dir.as_ref().display()))]
    pub fn open_dated(dir: impl AsRef<Path>, date: NaiveDate) -> MonitorResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            MonitorError::storage(
                format!("failed to create output directory {}", dir.display()),
                Some(Box::new(e)),
            )
        })?;

        let sink = Self {
            swap: open_table(&file_path(&dir, date, EventKind::Swap), EventKind::Swap)?,
            mint: open_table(&file_path(&dir, date, EventKind::Mint), EventKind::Mint)?,
            burn: open_table(&file_path(&dir, date, EventKind::Burn), EventKind::Burn)?,
            dir,
            date,
        };
        info!(dir = %sink.dir.display(), date = %date, "Record sink ready");
        Ok(sink)
    }

    /// Path of the file receiving events of `kind`.
    #[must_use]
    pub fn path(&self, kind: EventKind) -> PathBuf {
        file_path(&self.dir, self.date, kind)
    }

    /// Day the file names are stamped with.
    #[must_use]
    pub const fn date(&self) -> NaiveDate {
        self.date
    }

    /// Append `event` with an explicit capture time.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub fn append_at(&mut self, event: &DecodedEvent, at: NaiveDateTime) -> MonitorResult<()> {
        let kind = event.kind();
        let mut row = format_row(event, at);
        row.push('\n');

        let file = match kind {
            EventKind::Swap => &mut self.swap,
            EventKind::Mint => &mut self.mint,
            EventKind::Burn => &mut self.burn,
        };
        // One write_all per row so a failed write never splits an earlier one.
        file.write_all(row.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| {
                MonitorError::storage(format!("failed to append {kind} record"), Some(Box::new(e)))
            })?;
        debug!(event = %kind, "Record appended");
        Ok(())
    }
}

impl EventSink for RecordSink {
    fn append(&mut self, event: &DecodedEvent) -> MonitorResult<()> {
        self.append_at(event, Local::now().naive_local())
    }
}

fn file_path(dir: &Path, date: NaiveDate, kind: EventKind) -> PathBuf {
    dir.join(format!("{}_data_{}.csv", kind.slug(), date.format("%Y-%m-%d")))
}

fn open_table(path: &Path, kind: EventKind) -> MonitorResult<File> {
    let storage_err = |e: std::io::Error| {
        MonitorError::storage(format!("failed to open {}", path.display()), Some(Box::new(e)))
    };

    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            writeln!(file, "{}", header(kind)).map_err(storage_err)?;
            debug!(path = %path.display(), "Created record file with header");
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
        Err(e) => return Err(storage_err(e)),
    }

    OpenOptions::new().append(true).open(path).map_err(storage_err)
}
