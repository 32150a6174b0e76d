//! The transaction buffer's backing store.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Suffix of the per-transaction spill files.
const SPILL_FILE_SUFFIX: &str = "buffer_data";

/// A collection of fixed-size items keyed by transaction id.
///
/// Items live in memory until the process-wide byte counter would exceed
/// the memory limit; at that point the whole queue for the key moves to
/// `<dir>/<key>.buffer_data` and every later item for that key is appended
/// there, until [`SpillBuffer::remove`] deletes the file. The spill files
/// are bare concatenations of `item_size`-byte records with no framing.
///
/// Spill I/O failures are logged and swallowed; losing one transaction's
/// buffer must not take the pipeline down.
pub struct SpillBuffer {
    working_dir: PathBuf,
    memory: HashMap<u32, Vec<u8>>,
    on_disk: HashSet<u32>,
    memory_limit: u64,
    item_size: u64,
    memory_counter: u64,
}

impl SpillBuffer {
    /// Creates a buffer over a working directory, wiping any spill files a
    /// previous run left behind.
    pub async fn new(working_dir: impl Into<PathBuf>, memory_limit: u64, item_size: u64) -> Self {
        let working_dir = working_dir.into();
        wipe_spill_files(&working_dir).await;

        Self {
            working_dir,
            memory: HashMap::new(),
            on_disk: HashSet::new(),
            memory_limit,
            item_size,
            memory_counter: 0,
        }
    }

    /// Bytes currently held in memory.
    pub fn memory_used(&self) -> u64 {
        self.memory_counter
    }

    /// Adds an item under a transaction id.
    ///
    /// The item is copied into a fresh `item_size` slot: shorter items are
    /// zero-padded, longer ones truncated.
    pub async fn add(&mut self, key: u32, item: &[u8]) {
        if self.on_disk.contains(&key) {
            self.add_on_disk(key, item).await;
        } else if self.memory_counter + self.item_size <= self.memory_limit {
            self.add_in_memory(key, item);
        } else {
            self.add_on_disk(key, item).await;
        }
    }

    /// Removes and returns every item added under a transaction id, in add
    /// order.
    pub async fn remove(&mut self, key: u32) -> Vec<Vec<u8>> {
        if let Some(queue) = self.remove_from_memory(key) {
            return extract_items(&queue, self.item_size);
        }
        self.remove_from_disk(key).await
    }

    fn add_in_memory(&mut self, key: u32, item: &[u8]) {
        let queue = self.memory.entry(key).or_default();
        queue.extend_from_slice(&to_slot(item, self.item_size));
        self.memory_counter += self.item_size;
    }

    fn remove_from_memory(&mut self, key: u32) -> Option<Vec<u8>> {
        let queue = self.memory.remove(&key)?;
        self.memory_counter -= queue.len() as u64;
        Some(queue)
    }

    async fn add_on_disk(&mut self, key: u32, item: &[u8]) {
        let path = self.filename_for_key(key);
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await;

        let mut file = match file {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "error opening disk buffer file");
                return;
            }
        };

        self.on_disk.insert(key);

        // Whatever was queued in memory for this key lands first, keeping
        // the on-disk file in add order.
        if let Some(queue) = self.remove_from_memory(key) {
            write_to_file(&mut file, &path, &queue).await;
        }

        write_to_file(&mut file, &path, &to_slot(item, self.item_size)).await;
    }

    async fn remove_from_disk(&mut self, key: u32) -> Vec<Vec<u8>> {
        self.on_disk.remove(&key);
        let path = self.filename_for_key(key);

        let out = match tokio::fs::read(&path).await {
            Ok(queue) => extract_items(&queue, self.item_size),
            Err(_) => Vec::new(),
        };

        let _ = tokio::fs::remove_file(&path).await;
        out
    }

    fn filename_for_key(&self, key: u32) -> PathBuf {
        self.working_dir
            .join(format!("{}.{}", key, SPILL_FILE_SUFFIX))
    }
}

async fn wipe_spill_files(working_dir: &Path) {
    let mut entries = match tokio::fs::read_dir(working_dir).await {
        Ok(entries) => entries,
        Err(err) => {
            warn!(
                dir = %working_dir.display(),
                error = %err,
                "error initializing buffer directory"
            );
            return;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        if name.to_string_lossy().ends_with(SPILL_FILE_SUFFIX) {
            let _ = tokio::fs::remove_file(entry.path()).await;
        }
    }
}

async fn write_to_file(file: &mut tokio::fs::File, path: &Path, bytes: &[u8]) {
    if let Err(err) = file.write_all(bytes).await {
        warn!(path = %path.display(), error = %err, "error writing to disk buffer file");
    }
}

fn to_slot(item: &[u8], item_size: u64) -> Vec<u8> {
    let mut slot = vec![0u8; item_size as usize];
    let len = item.len().min(item_size as usize);
    slot[..len].copy_from_slice(&item[..len]);
    slot
}

fn extract_items(queue: &[u8], item_size: u64) -> Vec<Vec<u8>> {
    queue
        .chunks_exact(item_size as usize)
        .map(|chunk| chunk.to_vec())
        .collect()
}
