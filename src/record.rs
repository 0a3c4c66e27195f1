//! The log record value type: rendering, wire-line parsing, size accounting.

use std::mem;

use chrono::{DateTime, Local, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::level::{BadLevel, LogLevel};

/// A line that could not be turned into a [`Record`].
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line does not match log grammar: {0}")]
    BadFormat(String),
    #[error(transparent)]
    BadLevel(#[from] BadLevel),
}

/// Wire grammar: `[HH:MM:SS.mmm][LEVEL][subsystem_id](source) message`.
/// The message is the remainder of the line and may be empty.
static LINE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[([^\]]*)\]\[([^\]]*)\]\[(\d+)\]\(([^)]*)\)\s(.*)$")
        .unwrap_or_else(|err| panic!("log line pattern failed to compile: {err}"))
});

/// One log record. Immutable after construction; ownership moves with the
/// record through the buffers to the drain worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    level: LogLevel,
    subsystem_id: u32,
    source: String,
    message: String,
    timestamp: DateTime<Local>,
}

impl Record {
    /// Create a record stamped with the current wall-clock time.
    pub fn new(
        level: LogLevel,
        subsystem_id: u32,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::with_timestamp(level, subsystem_id, source, message, Local::now())
    }

    /// Create a record with an explicit timestamp.
    pub fn with_timestamp(
        level: LogLevel,
        subsystem_id: u32,
        source: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Local>,
    ) -> Self {
        Self {
            level,
            subsystem_id,
            source: source.into(),
            message: message.into(),
            timestamp,
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn subsystem_id(&self) -> u32 {
        self.subsystem_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    /// `HH:MM:SS.mmm` in local time.
    pub fn format_timestamp(&self) -> String {
        self.timestamp.format("%H:%M:%S%.3f").to_string()
    }

    /// Render the record as its wire line.
    pub fn render(&self) -> String {
        format!(
            "[{}][{}][{}]({}) {}",
            self.format_timestamp(),
            self.level,
            self.subsystem_id,
            self.source,
            self.message
        )
    }

    /// Parse a wire line back into a record.
    ///
    /// The time-of-day is combined with the current local date; fields out
    /// of range are clamped rather than rejected, and a time that does not
    /// scan at all falls back to the current wall-clock instant.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let caps = LINE_PATTERN
            .captures(line)
            .ok_or_else(|| ParseError::BadFormat(line.to_string()))?;

        let level: LogLevel = caps[2].parse()?;
        let subsystem_id: u32 = caps[3]
            .parse()
            .map_err(|_| ParseError::BadFormat(line.to_string()))?;
        let timestamp = timestamp_from_time_of_day(&caps[1]);

        Ok(Self {
            level,
            subsystem_id,
            source: caps[4].to_string(),
            message: caps[5].to_string(),
            timestamp,
        })
    }

    /// Logical size used for byte budgeting by both buffers: a fixed
    /// per-record overhead plus the payload string lengths.
    pub fn accounted_size(&self) -> usize {
        mem::size_of::<Record>() + self.message.len() + self.source.len()
    }
}

/// Reconstruct an absolute timestamp from `HH:MM:SS.mmm` and today's local
/// date. Lossy by contract: the wire format carries no date.
fn timestamp_from_time_of_day(time: &str) -> DateTime<Local> {
    let Some((hour, minute, second, millis)) = scan_time_of_day(time) else {
        return Local::now();
    };
    let naive = match Local::now().date_naive().and_hms_milli_opt(hour, minute, second, millis) {
        Some(naive) => naive,
        None => return Local::now(),
    };
    Local
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(Local::now)
}

/// Scan `H:M:S.mmm` into clamped fields. Out-of-range hour/minute/second
/// zero out; milliseconds clamp into 0..=999. Returns `None` when any field
/// fails to scan as an integer.
fn scan_time_of_day(time: &str) -> Option<(u32, u32, u32, u32)> {
    let (clock, millis) = time.split_once('.')?;
    let mut parts = clock.splitn(3, ':');
    let hour: i64 = parts.next()?.trim().parse().ok()?;
    let minute: i64 = parts.next()?.trim().parse().ok()?;
    let second: i64 = parts.next()?.trim().parse().ok()?;
    let millis: i64 = millis.trim().parse().ok()?;

    let hour = if (0..=23).contains(&hour) { hour } else { 0 };
    let minute = if (0..=59).contains(&minute) { minute } else { 0 };
    let second = if (0..=59).contains(&second) { second } else { 0 };
    let millis = millis.clamp(0, 999);

    Some((hour as u32, minute as u32, second as u32, millis as u32))
}
