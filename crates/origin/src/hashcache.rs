//! Lazy per-file fingerprint cache.
//!
//! The cache maps relative paths under a content directory to their
//! fingerprints. Digests are computed on first use and recomputed when the
//! file's modification time changes; idle entries are evicted after ten
//! minutes. A single manager task owns the entry table, so lookups and
//! inserts never contend on a table-wide lock; callers do the actual file
//! I/O under the entry's own lock.

use dcdn_core::{Error, Fingerprint, HashRegistry, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::Instant;

/// How often the manager scans for idle entries.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Idle time after which an entry is dropped.
const IDLE_EVICTION: Duration = Duration::from_secs(10 * 60);

const HASH_BUF_SIZE: usize = 64 * 1024;

/// Cache of file fingerprints under one content directory.
///
/// Dropping the cache closes the request channel and stops the manager task.
pub struct HashCache {
    tx: mpsc::Sender<CacheRequest>,
    dir: PathBuf,
    algorithm: RwLock<String>,
    registry: Arc<HashRegistry>,
}

struct CacheRequest {
    path: String,
    reply: oneshot::Sender<Result<Arc<CacheEntry>>>,
}

struct CacheEntry {
    state: Mutex<EntryState>,
}

struct EntryState {
    /// Valid only while `mtime` matches the file's current mtime.
    fingerprint: Option<Fingerprint>,
    /// Mtime the fingerprint was computed at; UNIX_EPOCH means never.
    mtime: SystemTime,
    last_used: Instant,
}

impl HashCache {
    /// Create a cache over `dir` using the global algorithm registry.
    pub async fn new(dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_registry(dir, HashRegistry::global()).await
    }

    /// Create a cache over `dir` with an explicit registry.
    pub async fn with_registry(dir: impl AsRef<Path>, registry: Arc<HashRegistry>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::metadata(&dir).await?;

        let (tx, rx) = mpsc::channel(2);
        tokio::spawn(manager(dir.clone(), rx));

        Ok(Self {
            tx,
            dir,
            algorithm: RwLock::new("sha256".to_string()),
            registry,
        })
    }

    /// Open a file and return it with its fingerprint and modification time.
    ///
    /// The returned handle is a fresh open at offset zero; hashing streams a
    /// separate handle. A failed re-hash leaves the entry's previous state so
    /// a later call can retry.
    pub async fn get(&self, path: &str) -> Result<(fs::File, Fingerprint, SystemTime)> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CacheRequest {
                path: path.to_string(),
                reply,
            })
            .await
            .map_err(|_| closed_error())?;
        let entry = match rx.await {
            Ok(result) => result?,
            Err(_) => return Err(closed_error()),
        };

        let full_path = self.dir.join(path);
        let mut state = entry.state.lock().await;
        let file = fs::File::open(&full_path).await?;
        let mtime = file.metadata().await?.modified()?;

        let fingerprint = match &state.fingerprint {
            Some(fp) if state.mtime == mtime => fp.clone(),
            _ => {
                let algorithm = self
                    .algorithm
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                let fp = hash_file(&self.registry, &algorithm, &full_path).await?;
                state.fingerprint = Some(fp.clone());
                state.mtime = mtime;
                fp
            }
        };
        state.last_used = Instant::now();

        Ok((file, fingerprint, mtime))
    }

    /// Set the fingerprint algorithm for future digest computations.
    ///
    /// Existing entries are not invalidated: until a file's mtime changes,
    /// it keeps serving the fingerprint it was hashed with, whose algorithm
    /// name travels inside the fingerprint itself.
    pub fn set_algorithm(&self, algorithm: &str) -> Result<()> {
        if !self.registry.contains(algorithm) {
            return Err(Error::UnrecognizedAlgorithm(algorithm.to_string()));
        }
        *self
            .algorithm
            .write()
            .unwrap_or_else(PoisonError::into_inner) = algorithm.to_string();
        Ok(())
    }
}

fn closed_error() -> Error {
    Error::Io(std::io::Error::other("hash cache shut down"))
}

/// Manager task: sole owner of the entry table.
async fn manager(dir: PathBuf, mut rx: mpsc::Receiver<CacheRequest>) {
    let mut entries: HashMap<String, Arc<CacheEntry>> = HashMap::new();
    let mut prune = tokio::time::interval(PRUNE_INTERVAL);
    prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = prune.tick() => {
                prune_entries(&mut entries);
            }
            request = rx.recv() => {
                let Some(request) = request else {
                    return; // cache dropped
                };
                handle_request(&dir, &mut entries, request).await;
            }
        }
    }
}

async fn handle_request(
    dir: &Path,
    entries: &mut HashMap<String, Arc<CacheEntry>>,
    request: CacheRequest,
) {
    if let Some(entry) = entries.get(&request.path) {
        let _ = request.reply.send(Ok(entry.clone()));
        return;
    }
    // stat errors go straight back to the caller; no entry is born
    if let Err(e) = fs::metadata(dir.join(&request.path)).await {
        let _ = request.reply.send(Err(e.into()));
        return;
    }
    let entry = Arc::new(CacheEntry {
        state: Mutex::new(EntryState {
            fingerprint: None,
            mtime: UNIX_EPOCH,
            last_used: Instant::now(),
        }),
    });
    entries.insert(request.path, entry.clone());
    let _ = request.reply.send(Ok(entry));
}

/// Drop entries idle longer than [`IDLE_EVICTION`]. Entries whose lock is
/// held are in use and survive the scan.
fn prune_entries(entries: &mut HashMap<String, Arc<CacheEntry>>) {
    entries.retain(|path, entry| match entry.state.try_lock() {
        Ok(state) => {
            let keep = state.last_used.elapsed() <= IDLE_EVICTION;
            if !keep {
                tracing::debug!(path = %path, "evicting idle hash cache entry");
            }
            keep
        }
        Err(_) => true,
    });
}

/// Stream a file through a digest writer, producing its fingerprint.
pub(crate) async fn hash_file(
    registry: &HashRegistry,
    algorithm: &str,
    path: &Path,
) -> Result<Fingerprint> {
    let mut file = fs::File::open(path).await?;
    let mut writer = registry.writer(algorithm)?;
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.update(&buf[..n]);
        if writer.bytes_written() > u64::from(u32::MAX) {
            return Err(Error::OversizedFile);
        }
    }
    writer.finish()
}
