//! The WAL driver stage.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::error::StreamError;
use crate::pg::wal::{Cursor, Entry};

/// How long the driver sleeps when the cursor makes no progress.
const IDLE_SLEEP: Duration = Duration::from_millis(50);

/// Tails the WAL of a data directory and publishes entries.
///
/// The driver owns the cursor. It starts at the latest checkpoint, reads
/// until the cursor stops moving, then naps and retries. Read errors make
/// it reposition at the *current* checkpoint: a missing segment file means
/// either the reader ran ahead of the log or the log was recycled under it,
/// and both resolve by resyncing (re-read entries are deduplicated
/// downstream via the published-offset watermark).
pub struct WalStream {
    data_dir: PathBuf,
    running: Arc<AtomicBool>,
}

impl WalStream {
    /// Creates a stream over a data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> WalStream {
        WalStream {
            data_dir: data_dir.into(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Positions at the latest checkpoint, spawns the driver task, and
    /// returns its output channel.
    ///
    /// Fails with [`StreamError::AlreadyStreaming`] while a previous start
    /// is still running, and with the underlying error when the checkpoint
    /// cannot be read. The output closes when `stop` is cancelled.
    pub async fn start(
        &self,
        stop: CancellationToken,
    ) -> Result<mpsc::Receiver<Entry>, StreamError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(StreamError::AlreadyStreaming);
        }

        let cursor = match Cursor::at_checkpoint(&self.data_dir).await {
            Ok(cursor) => cursor,
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(StreamError::Wal(err));
            }
        };

        let (publish, out) = mpsc::channel(1);
        let mut driver = Driver {
            data_dir: self.data_dir.clone(),
            cursor,
            last_offset_published: 0,
            publish,
        };
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            loop {
                if driver.publish_until_error_or_stopped(&stop).await {
                    break;
                }

                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_SLEEP) => {}
                }
            }
            running.store(false, Ordering::SeqCst);
        });

        Ok(out)
    }
}

struct Driver {
    data_dir: PathBuf,
    cursor: Cursor,
    last_offset_published: u64,
    publish: mpsc::Sender<Entry>,
}

impl Driver {
    /// Reads forward until an error, no progress, or stop. Returns whether
    /// the driver should shut down.
    async fn publish_until_error_or_stopped(&mut self, stop: &CancellationToken) -> bool {
        let mut current = self.cursor.clone();
        let mut read_error = None;

        loop {
            let previous = current.location();

            match current.read_entries().await {
                Ok((entries, next)) => {
                    current = next;

                    // Expanded multi-insert tuples share their record's
                    // offset; the whole batch publishes under one watermark
                    // bump.
                    let batch_offset = entries.first().map(|e| e.read_from.offset());
                    if let Some(offset) = batch_offset {
                        if offset > self.last_offset_published {
                            for entry in entries {
                                tokio::select! {
                                    _ = stop.cancelled() => return true,
                                    sent = self.publish.send(entry) => {
                                        if sent.is_err() {
                                            return true;
                                        }
                                    }
                                }
                            }
                            self.cursor = current.clone();
                            self.last_offset_published = offset;
                        }
                    }
                }
                Err(err) => {
                    read_error = Some(err);
                    break;
                }
            }

            if stop.is_cancelled() {
                return true;
            }
            if previous == current.location() {
                break;
            }
        }

        if let Some(err) = read_error {
            // Missing segments are routine while keeping up with the log;
            // logging them would be all noise.
            if !err.is_segment_missing() {
                warn!(error = %err, "error while reading wal");
            }
            match Cursor::at_checkpoint(&self.data_dir).await {
                Ok(cursor) => self.cursor = cursor,
                Err(err) => warn!(error = %err, "failed to reposition at checkpoint"),
            }
        }

        false
    }
}
