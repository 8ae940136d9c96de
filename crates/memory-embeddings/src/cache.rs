//! Persistent embedding cache.
//!
//! Vectors are kept in an LRU map guarded by a single mutex and mirrored to
//! one JSON file (`{"<key>": [f32, ...], ...}`).
//!
//! Writes never block callers: `set` marks the map dirty and nudges a
//! dedicated flush thread through a one-slot channel. When the slot is
//! already taken a flush is pending and will pick up the newer state, so
//! bursts of `set` calls coalesce into few disk writes.
//!
//! Each flush snapshots the map under the lock, serializes outside it,
//! writes a temp file in the same directory, fsyncs, and renames it over
//! the canonical file. Readers of the file see either the previous complete
//! state or the new one.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use lru::LruCache;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::EmbeddingError;

/// Outcome of reading the backing file at open time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CacheLoadStatus {
    /// No backing file existed
    Fresh,
    /// Backing file was read
    Loaded { entries: usize },
    /// Backing file was unreadable; the cache started empty
    Degraded { reason: String },
}

impl CacheLoadStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    /// Successful writes of the backing file
    pub flushes: u64,
    /// Writes that failed and were left for the next flush
    pub flush_failures: u64,
    pub load_status: CacheLoadStatus,
}

enum FlushSignal {
    Flush,
    Barrier(mpsc::Sender<()>),
}

struct CacheState {
    entries: LruCache<String, Arc<Vec<f32>>>,
    dirty: bool,
}

struct Shared {
    path: PathBuf,
    state: Mutex<CacheState>,
    /// Held across snapshot and write so files land in snapshot order
    write_lock: Mutex<()>,
    flushes: AtomicU64,
    flush_failures: AtomicU64,
    load_status: CacheLoadStatus,
}

/// Embedding cache backed by a JSON file.
///
/// Shared between tasks through `Arc`. Dropping the last handle stops the
/// flush thread after a final flush.
pub struct EmbeddingCache {
    shared: Arc<Shared>,
    flush_tx: Option<SyncSender<FlushSignal>>,
    worker: Option<JoinHandle<()>>,
}

impl EmbeddingCache {
    /// Open the cache at `path`, holding at most `capacity` vectors.
    ///
    /// An unreadable or corrupt file is not an error: the cache starts
    /// empty and `load_status()` reports `Degraded`.
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> Result<Self, EmbeddingError> {
        let path = path.into();
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| EmbeddingError::Cache("capacity must be greater than zero".into()))?;

        if let Some(parent) = parent_dir(&path) {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!(path = ?parent, error = %e, "Could not create cache directory");
            }
        }

        let mut entries = LruCache::new(capacity);
        let load_status = match read_entries(&path) {
            Ok(None) => CacheLoadStatus::Fresh,
            Ok(Some(loaded)) => {
                // File order is oldest first, so the last entry ends up most recent
                for (key, vector) in loaded {
                    entries.put(key, Arc::new(vector));
                }
                CacheLoadStatus::Loaded {
                    entries: entries.len(),
                }
            }
            Err(reason) => {
                warn!(path = ?path, reason = %reason, "Embedding cache unreadable, starting empty");
                CacheLoadStatus::Degraded { reason }
            }
        };

        info!(path = ?path, status = ?load_status, capacity = capacity.get(), "Opened embedding cache");

        let shared = Arc::new(Shared {
            path,
            state: Mutex::new(CacheState {
                entries,
                dirty: false,
            }),
            write_lock: Mutex::new(()),
            flushes: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            load_status,
        });

        let (flush_tx, flush_rx) = mpsc::sync_channel(1);
        let worker = std::thread::Builder::new()
            .name("embedding-cache-flush".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                move || run_worker(shared, flush_rx)
            })?;

        Ok(Self {
            shared,
            flush_tx: Some(flush_tx),
            worker: Some(worker),
        })
    }

    /// Look up a vector. Refreshes the entry's recency.
    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        lock(&self.shared.state)
            .entries
            .get(key)
            .map(|v| v.as_ref().clone())
    }

    /// Insert or replace a vector and schedule a flush.
    pub fn set(&self, key: impl Into<String>, vector: Vec<f32>) {
        let key = key.into();
        {
            let mut state = lock(&self.shared.state);
            if let Some((evicted, _)) = state.entries.push(key.clone(), Arc::new(vector)) {
                if evicted != key {
                    debug!(key = %evicted, "Evicted least recently used embedding");
                }
            }
            state.dirty = true;
        }
        self.signal(FlushSignal::Flush);
    }

    /// Block until every `set` issued before this call has been flushed,
    /// or its flush has failed.
    pub fn sync(&self) {
        let (done_tx, done_rx) = mpsc::channel();
        let Some(tx) = &self.flush_tx else {
            return;
        };
        if tx.send(FlushSignal::Barrier(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }

    /// Flush on the calling thread. Returns `Ok(false)` when nothing was
    /// dirty.
    pub fn flush_now(&self) -> Result<bool, EmbeddingError> {
        self.shared.flush()
    }

    pub fn len(&self) -> usize {
        lock(&self.shared.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn load_status(&self) -> &CacheLoadStatus {
        &self.shared.load_status
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, capacity) = {
            let state = lock(&self.shared.state);
            (state.entries.len(), state.entries.cap().get())
        };
        CacheStats {
            entries,
            capacity,
            flushes: self.shared.flushes.load(Ordering::Relaxed),
            flush_failures: self.shared.flush_failures.load(Ordering::Relaxed),
            load_status: self.shared.load_status.clone(),
        }
    }

    fn signal(&self, signal: FlushSignal) {
        let Some(tx) = &self.flush_tx else {
            return;
        };
        match tx.try_send(signal) {
            Ok(()) => {}
            // A flush is already queued and will see this write
            Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                warn!(path = ?self.shared.path, "Embedding cache flush worker is gone");
            }
        }
    }
}

impl Drop for EmbeddingCache {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop after a final flush
        self.flush_tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(path = ?self.shared.path, "Embedding cache flush worker panicked");
            }
        }
    }
}

impl fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field("path", &self.shared.path)
            .field("load_status", &self.shared.load_status)
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn flush(&self) -> Result<bool, EmbeddingError> {
        let _writer = lock(&self.write_lock);

        let snapshot: Vec<(String, Arc<Vec<f32>>)> = {
            let mut state = lock(&self.state);
            if !state.dirty {
                return Ok(false);
            }
            state.dirty = false;
            // Oldest first, so reloading restores recency order
            state
                .entries
                .iter()
                .rev()
                .map(|(k, v)| (k.clone(), Arc::clone(v)))
                .collect()
        };

        match self.write_snapshot(&snapshot) {
            Ok(()) => {
                self.flushes.fetch_add(1, Ordering::Relaxed);
                debug!(path = ?self.path, entries = snapshot.len(), "Flushed embedding cache");
                Ok(true)
            }
            Err(e) => {
                lock(&self.state).dirty = true;
                self.flush_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    fn flush_logged(&self) {
        if let Err(e) = self.flush() {
            warn!(path = ?self.path, error = %e, "Embedding cache flush failed");
        }
    }

    fn write_snapshot(&self, snapshot: &[(String, Arc<Vec<f32>>)]) -> Result<(), EmbeddingError> {
        let bytes = serde_json::to_vec(&SnapshotRef(snapshot))
            .map_err(|e| EmbeddingError::Cache(format!("serialize: {e}")))?;
        let dir = parent_dir(&self.path).unwrap_or_else(|| Path::new("."));
        let staged = stage(dir, &bytes)?;
        commit(staged, &self.path)
    }
}

fn run_worker(shared: Arc<Shared>, rx: Receiver<FlushSignal>) {
    for signal in rx.iter() {
        match signal {
            FlushSignal::Flush => shared.flush_logged(),
            FlushSignal::Barrier(done) => {
                shared.flush_logged();
                let _ = done.send(());
            }
        }
    }
    shared.flush_logged();
    debug!(path = ?shared.path, "Embedding cache flush worker stopped");
}

/// Write `bytes` to a durable temp file in `dir`. The file is removed if
/// the returned handle is dropped without `commit`.
fn stage(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile, EmbeddingError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// Atomically replace `path` with a staged file.
fn commit(staged: NamedTempFile, path: &Path) -> Result<(), EmbeddingError> {
    staged.persist(path).map_err(|e| EmbeddingError::Io(e.error))?;
    Ok(())
}

fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `Ok(None)` when the file does not exist.
fn read_entries(path: &Path) -> Result<Option<Vec<(String, Vec<f32>)>>, String> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(format!("read failed: {e}")),
    };
    serde_json::from_slice::<FileEntries>(&bytes)
        .map(|entries| Some(entries.0))
        .map_err(|e| format!("parse failed: {e}"))
}

struct SnapshotRef<'a>(&'a [(String, Arc<Vec<f32>>)]);

impl Serialize for SnapshotRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v.as_slice())))
    }
}

/// Cache file contents in file order.
struct FileEntries(Vec<(String, Vec<f32>)>);

impl<'de> Deserialize<'de> for FileEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = FileEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of hash keys to vectors")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, Vec<f32>>()? {
                    entries.push(entry);
                }
                Ok(FileEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}
