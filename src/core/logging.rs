//! Log Sinks
//!
//! Destinations for formatted reading lines. Diagnostics go through the `log`
//! macros directly; a sink receives one line per published reading.

use crate::core::config::Config;
use crate::model::reading::Reading;
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Arc, Mutex};
use time::{macros::format_description, OffsetDateTime};

/// A destination accepting formatted lines.
pub trait LogSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// Forwards every line to the `log` facade at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCrateSink;

impl LogSink for LogCrateSink {
    fn write_line(&self, line: &str) {
        log::info!("{}", line);
    }
}

/// Writes lines to any `Write` implementation, one per call.
#[derive(Debug)]
pub struct WriterSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> LogSink for WriterSink<W> {
    fn write_line(&self, line: &str) {
        let mut writer = match self.writer.lock() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(writer, "{}", line) {
            log::warn!("could not write log line: {}", e);
        }
    }
}

/// Picks the sink configured by `log_file`, falling back to [`LogCrateSink`].
pub fn open_sink(config: &Config) -> Result<Arc<dyn LogSink>> {
    let Some(path) = &config.log_file else {
        return Ok(Arc::new(LogCrateSink));
    };
    let file: File = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("could not open log file {}", path.display()))?;
    log::info!("Writing readings to {}.", path.display());
    Ok(Arc::new(WriterSink::new(file)))
}

/// Formats a reading as a single timestamped line.
pub fn format_reading(at: OffsetDateTime, reading: &Reading) -> String {
    let ts = at
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_else(|_| at.unix_timestamp().to_string());
    let mut line = format!("{} {} bpm", ts, reading.beats_per_minute());
    if let Some(energy) = reading.energy_expended() {
        line.push_str(&format!(" energy={}kJ", energy));
    }
    if !reading.rr_intervals().is_empty() {
        let rr = reading
            .rr_intervals_ms()
            .iter()
            .map(|rr| format!("{:.0}", rr))
            .collect::<Vec<_>>()
            .join(",");
        line.push_str(&format!(" rr=[{}]ms", rr));
    }
    line.push_str(&format!(" contact={}", reading.contact_status()));
    line
}
