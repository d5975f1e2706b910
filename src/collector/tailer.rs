//! File tailer: converts file appends into log submissions.
//!
//! The tailer remembers the end-of-file offset when it starts and, on every
//! tick, reads up to a bounded number of newly appended lines, submitting
//! each at the level the caller chose. A file that shrinks (truncation or
//! rotation) resets the offset to zero.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use log::warn;

use crate::level::LogLevel;

use super::CollectorShared;

/// Handle to a running tailer thread.
pub(crate) struct FileTailer {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl FileTailer {
    pub(crate) fn spawn(
        shared: Arc<CollectorShared>,
        path: PathBuf,
        min_level: LogLevel,
        interval: Duration,
        max_lines_per_tick: usize,
    ) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        // Capture the end offset before the caller returns so lines appended
        // right after `collect_from_file` are never skipped.
        let initial = std::fs::metadata(&path).map(|meta| meta.len());
        let handle = thread::spawn(move || match initial {
            Ok(offset) => {
                tail_loop(
                    shared,
                    path,
                    min_level,
                    interval,
                    max_lines_per_tick,
                    stop_rx,
                    offset,
                );
            }
            // Opening the target is the only fatal error: the tailer stops,
            // the collector lives.
            Err(err) => {
                let msg = format!("tailer failed to open {}: {err}", path.display());
                warn!("FileTailer: {msg}");
                shared.callbacks.notify_error(&msg);
            }
        });
        Self { stop_tx, handle }
    }

    /// Signal the tailer to stop and wait for the thread to exit.
    pub(crate) fn stop(self) {
        drop(self.stop_tx);
        if self.handle.join().is_err() {
            warn!("FileTailer: tailer thread panicked");
        }
    }
}

fn tail_loop(
    shared: Arc<CollectorShared>,
    path: PathBuf,
    min_level: LogLevel,
    interval: Duration,
    max_lines_per_tick: usize,
    stop_rx: Receiver<()>,
    mut offset: u64,
) {
    loop {
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                offset = tick(&shared, &path, min_level, max_lines_per_tick, offset);
            }
            _ => break,
        }
    }
}

/// Read newly appended lines starting at `offset`; return the new offset.
fn tick(
    shared: &CollectorShared,
    path: &Path,
    min_level: LogLevel,
    max_lines_per_tick: usize,
    mut offset: u64,
) -> u64 {
    let file = match File::open(path) {
        Ok(file) => file,
        // Transient: the file may be mid-rotation; try again next tick.
        Err(_) => return offset,
    };
    let len = match file.metadata() {
        Ok(meta) => meta.len(),
        Err(_) => return offset,
    };
    if len < offset {
        // Truncated or rotated underneath us; start over from the top.
        offset = 0;
    }
    let mut reader = BufReader::new(file);
    if reader.seek(SeekFrom::Start(offset)).is_err() {
        return offset;
    }
    let mut line = String::new();
    for _ in 0..max_lines_per_tick {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(read) => {
                if !line.ends_with('\n') {
                    // Incomplete final line; pick it up once the writer
                    // finishes it.
                    break;
                }
                offset += read as u64;
                let content = line.trim_end_matches(['\r', '\n']);
                if !content.is_empty() {
                    shared.submit(content.to_owned(), min_level);
                }
            }
            Err(err) => {
                warn!("FileTailer: read error on {}: {err}", path.display());
                break;
            }
        }
    }
    offset
}
