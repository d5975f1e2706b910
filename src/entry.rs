//! Log entry representation for the ingestion pipeline.
//!
//! [`LogEntry`] captures one line of log content together with its severity
//! and the instant it entered the pipeline. Entries are immutable after
//! construction; ownership moves from producer to queue to batch.

use std::time::{Instant, SystemTime};

use crate::level::LogLevel;

#[derive(Clone, Debug)]
pub struct LogEntry {
    /// Raw log content. The pipeline passes text through unparsed.
    content: String,
    /// Severity chosen by the producer.
    level: LogLevel,
    /// Wall-clock time the entry was created, used for wire timestamps.
    wall: SystemTime,
    /// Monotonic time the entry was created, used for latency accounting.
    mono: Instant,
}

impl LogEntry {
    /// Construct an entry stamped with the current wall and monotonic time.
    pub fn new(content: impl Into<String>, level: LogLevel) -> Self {
        Self {
            content: content.into(),
            level,
            wall: SystemTime::now(),
            mono: Instant::now(),
        }
    }

    #[inline]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[inline]
    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Return the level name as a static string slice.
    #[inline]
    pub fn level_str(&self) -> &'static str {
        self.level.as_str()
    }

    #[inline]
    pub fn wall_time(&self) -> SystemTime {
        self.wall
    }

    #[inline]
    pub fn monotonic_time(&self) -> Instant {
        self.mono
    }

    /// Format the wall-clock timestamp the way both wire formats expect.
    pub fn wall_time_string(&self) -> String {
        let stamp: chrono::DateTime<chrono::Local> = self.wall.into();
        stamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.level_str(), self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn new_entry_carries_content_and_level() {
        let entry = LogEntry::new("boot complete", LogLevel::Info);
        assert_eq!(entry.content(), "boot complete");
        assert_eq!(entry.level(), LogLevel::Info);
        assert_eq!(entry.level_str(), "INFO");
    }

    #[rstest]
    fn wall_time_string_matches_expected_shape() {
        let entry = LogEntry::new("x", LogLevel::Debug);
        let stamp = entry.wall_time_string();
        // "2024-01-02 03:04:05"
        assert_eq!(stamp.len(), 19);
        assert_eq!(stamp.as_bytes()[4], b'-');
        assert_eq!(stamp.as_bytes()[10], b' ');
        assert_eq!(stamp.as_bytes()[13], b':');
    }

    #[rstest]
    fn display_includes_level_and_content() {
        let entry = LogEntry::new("disk full", LogLevel::Error);
        assert_eq!(entry.to_string(), "ERROR - disk full");
    }
}
