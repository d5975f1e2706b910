//! Control protocol and outbound wire formats.
//!
//! Sessions drive the server with line-delimited JSON commands; batches leave
//! in two serializations, one for the controlling session and one for the
//! downstream processor.

use serde::{Deserialize, Serialize};

use crate::collector::batch::LogBatch;
use crate::level::LogLevel;

fn default_interval_ms() -> u64 {
    1000
}

fn default_max_lines() -> usize {
    10
}

/// Commands accepted on the session socket.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum ControlCommand {
    Start(StartCommand),
    Stop,
}

/// `{"cmd":"start", ...}`: begin tailing a file for this session.
#[derive(Debug, Deserialize, PartialEq)]
pub struct StartCommand {
    /// Path of the file to tail.
    pub file: String,
    /// Tailer tick interval in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval: u64,
    /// Lines read per tick.
    #[serde(default = "default_max_lines", rename = "maxLines")]
    pub max_lines: usize,
    /// Level assigned to tailed lines and used as the collector's floor.
    #[serde(default)]
    pub level: LogLevel,
    /// Gzip outbound batch payloads.
    #[serde(default)]
    pub compress: bool,
    /// When non-empty, entries containing any of these substrings are
    /// rejected.
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Parse one control line.
pub fn parse_command(line: &str) -> Result<ControlCommand, serde_json::Error> {
    serde_json::from_str(line)
}

#[derive(Serialize)]
struct SessionRecord<'a> {
    time: String,
    level: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ProcessorRecord<'a> {
    timestamp: String,
    level: &'static str,
    message: &'a str,
    source: &'static str,
}

/// Serialize a batch for the controlling session socket.
pub fn session_payload(batch: &LogBatch) -> Result<Vec<u8>, serde_json::Error> {
    let records: Vec<SessionRecord<'_>> = batch
        .entries()
        .iter()
        .map(|entry| SessionRecord {
            time: entry.wall_time_string(),
            level: entry.level_str(),
            content: entry.content(),
        })
        .collect();
    serde_json::to_vec(&records)
}

/// Serialize a batch for the processor uplink.
pub fn processor_payload(batch: &LogBatch) -> Result<Vec<u8>, serde_json::Error> {
    let records: Vec<ProcessorRecord<'_>> = batch
        .entries()
        .iter()
        .map(|entry| ProcessorRecord {
            timestamp: entry.wall_time_string(),
            level: entry.level_str(),
            message: entry.content(),
            source: "collector",
        })
        .collect();
    serde_json::to_vec(&records)
}
