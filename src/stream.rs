//! The three-stage pipeline: WAL driver, transaction buffer, populator.
//!
//! ```text
//! data directory          live DB connections
//!       |                         |
//!       v                         v
//! +-----------+          +----------------+
//! | WalStream |          | SchemaReader   |
//! +-----+-----+          +-------+--------+
//!       | Entry                  |
//!       v                        |
//! +-----------+ <---filter-------+
//! | TxnBuffer |                  |
//! +-----+-----+                  |
//!       | Vec<Entry> per txn     |
//!       v                        |
//! +-----------+ <----------------+
//! | Populator |
//! +-----+-----+
//!       | Transaction
//!       v
//!    consumer
//! ```
//!
//! Stages are independent tasks joined by bounded channels; a slow consumer
//! backpressures all the way to the segment-file reads. Stop is a
//! cancellation token: the driver closes its output, and each downstream
//! stage drains its input and closes in turn.

mod error;
mod populate;
mod spill;
mod txn_buffer;
mod wal_stream;

pub use error::StreamError;
pub use populate::Populator;
pub use spill::SpillBuffer;
pub use txn_buffer::{TxnBuffer, DEFAULT_BUFFER_MAX};
pub use wal_stream::WalStream;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::filter::{ColumnMapFilter, FilterNone, MessageFilter};
use crate::message::Transaction;
use crate::pg::schema::SchemaReader;

/// The assembled pipeline from data directory to transaction channel.
pub struct Pipeline {
    schema: Arc<dyn SchemaReader>,
    max_message_count: usize,
    wal_stream: Option<WalStream>,
    stop: CancellationToken,
}

impl Pipeline {
    /// Creates a pipeline around a schema reader.
    ///
    /// `max_message_count` of zero disables summary mode.
    pub fn new(schema: Arc<dyn SchemaReader>, max_message_count: usize) -> Pipeline {
        Pipeline {
            schema,
            max_message_count,
            wal_stream: None,
            stop: CancellationToken::new(),
        }
    }

    /// Starts all stages and returns the transaction channel.
    ///
    /// The channel closes after [`Pipeline::stop`], once the stages have
    /// drained.
    pub async fn start(
        &mut self,
        server_version: &str,
        filter: Arc<dyn MessageFilter>,
        data_dir: impl AsRef<Path>,
        buffer_dir: impl AsRef<Path>,
        buffer_max: u64,
    ) -> Result<mpsc::Receiver<Transaction>, StreamError> {
        let wal_stream = self
            .wal_stream
            .get_or_insert_with(|| WalStream::new(data_dir.as_ref()));

        let entries = wal_stream.start(self.stop.clone()).await?;

        let buffered =
            TxnBuffer::new(Arc::clone(&filter), buffer_dir.as_ref(), buffer_max).start(entries);

        let populated = Populator::new(
            filter,
            Arc::clone(&self.schema),
            self.max_message_count,
            server_version,
        )
        .start(buffered);

        Ok(populated)
    }

    /// Signals every stage to stop.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// The token the stages watch; cancel it to stop the pipeline.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }
}

/// Builds the filter, buffer directory, and pipeline out of a [`Config`]
/// and returns the transaction channel along with its pipeline handle.
pub async fn start_transaction_channel(
    server_version: &str,
    config: &Config,
    schema: Arc<dyn SchemaReader>,
) -> Result<(Pipeline, mpsc::Receiver<Transaction>), StreamError> {
    let buffer_dir = config
        .buffer_directory_or_temp()
        .map_err(StreamError::BufferDirectory)?;

    let filter: Arc<dyn MessageFilter> = if !config.include.is_empty() {
        Arc::new(ColumnMapFilter::inclusive(Arc::clone(&schema), config.include.clone()).await)
    } else if !config.exclude.is_empty() {
        Arc::new(ColumnMapFilter::exclusive(Arc::clone(&schema), config.exclude.clone()).await)
    } else {
        Arc::new(FilterNone)
    };

    let mut pipeline = Pipeline::new(schema, config.max_message_per_txn);

    let buffer_max = if config.buffer_max > 0 {
        config.buffer_max
    } else {
        DEFAULT_BUFFER_MAX
    };

    let txns = pipeline
        .start(
            server_version,
            filter,
            &config.data_dir,
            &buffer_dir,
            buffer_max,
        )
        .await?;

    Ok((pipeline, txns))
}
