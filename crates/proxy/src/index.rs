//! Single-flight cache index.
//!
//! The index maps canonical digest strings to local cache files. For each
//! digest at most one download runs at a time: the first caller becomes the
//! leader and receives the freshly-opened cache file, everyone else waits on
//! the entry's completion signal and then streams the finished file. A
//! failed download tombstones the entry before waking waiters, so nobody
//! ever serves a partial file.
//!
//! A single manager task owns the digest table, the monotonic file-number
//! allocator and the eviction tick; file deletion is pushed through a
//! bounded queue onto a small pool of unlink workers. Submissions from
//! failure paths never block: when a queue is full the message is detached
//! onto a transient task.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::fs;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

/// How often the manager scans for idle entries.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Idle time after which a cache file is deleted.
const IDLE_EVICTION: Duration = Duration::from_secs(5 * 60);

const REQUEST_QUEUE_DEPTH: usize = 2;
const FAILURE_QUEUE_DEPTH: usize = 1;
const DELETE_QUEUE_DEPTH: usize = 20;
const DELETE_WORKERS: usize = 4;

/// Handle to the cache index. Cheap to clone; all clones talk to the same
/// manager task.
#[derive(Clone)]
pub struct CacheIndex {
    tx: mpsc::Sender<IndexRequest>,
    delete_tx: mpsc::Sender<PathBuf>,
    failure_tx: mpsc::Sender<String>,
}

struct IndexRequest {
    digest: String,
    reply: oneshot::Sender<std::io::Result<Lease>>,
}

/// One caller's handle on an index entry.
pub struct Lease {
    pub entry: Arc<CacheEntry>,
    /// Present when this caller must perform the download.
    pub leader: Option<Leader>,
}

/// Exclusive download rights for a newly-created entry.
pub struct Leader {
    /// The opened cache file to download into.
    pub(crate) file: fs::File,
    /// Completion signal; waiters block until it turns true.
    pub(crate) done: watch::Sender<bool>,
}

/// An entry in the digest table.
pub struct CacheEntry {
    digest: String,
    state: Mutex<EntryState>,
    done: watch::Receiver<bool>,
}

struct EntryState {
    /// Local cache file; `None` marks a tombstone that must not be served.
    path: Option<PathBuf>,
    last_used: Instant,
}

impl CacheEntry {
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Wait for the leader to finish. Returns false when the leader vanished
    /// without signalling (its task died); callers treat that as a failed
    /// download.
    pub async fn ready(&self) -> bool {
        let mut done = self.done.clone();
        done.wait_for(|done| *done).await.is_ok()
    }

    /// The entry's cache file, unless it has been tombstoned.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .path
            .clone()
    }

    /// Refresh the idle-eviction clock.
    pub fn touch(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_used = Instant::now();
    }

    /// Mark the entry as failed and take its file path for deletion.
    pub(crate) fn tombstone(&self) -> Option<PathBuf> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .path
            .take()
    }

    fn is_tombstoned(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .path
            .is_none()
    }
}

impl CacheIndex {
    /// Create the index over a cache directory, spawning the manager task
    /// and the deletion worker pool.
    pub async fn new(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        let (tx, request_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let (failure_tx, failure_rx) = mpsc::channel(FAILURE_QUEUE_DEPTH);
        let (delete_tx, delete_rx) = mpsc::channel::<PathBuf>(DELETE_QUEUE_DEPTH);

        let delete_rx = Arc::new(tokio::sync::Mutex::new(delete_rx));
        for worker in 0..DELETE_WORKERS {
            let rx = delete_rx.clone();
            tokio::spawn(async move {
                loop {
                    let path = rx.lock().await.recv().await;
                    let Some(path) = path else { return };
                    if let Err(e) = fs::remove_file(&path).await {
                        tracing::error!(worker, path = %path.display(), error = %e,
                            "failed to delete cache file");
                    } else {
                        tracing::debug!(worker, path = %path.display(), "deleted cache file");
                    }
                }
            });
        }

        let manager = Manager {
            dir,
            entries: HashMap::new(),
            next_file: 0,
            delete_tx: delete_tx.clone(),
        };
        tokio::spawn(manager.run(request_rx, failure_rx));

        Ok(Self {
            tx,
            delete_tx,
            failure_tx,
        })
    }

    /// Look up or create the entry for a digest.
    ///
    /// When the digest is new the returned lease carries the leader role and
    /// the opened cache file; otherwise the caller is a follower.
    pub async fn acquire(&self, digest: String) -> std::io::Result<Lease> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(IndexRequest { digest, reply })
            .await
            .map_err(|_| closed_error())?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(closed_error()),
        }
    }

    /// Queue a cache file for deletion without ever blocking the caller.
    pub(crate) fn schedule_delete(&self, path: PathBuf) {
        match self.delete_tx.try_send(path) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(path)) => {
                tracing::warn!(path = %path.display(), "delete queue full, detaching");
                let tx = self.delete_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(path).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Tell the manager a download failed so the entry can be removed,
    /// without ever blocking the caller.
    pub(crate) fn notify_failure(&self, digest: String) {
        match self.failure_tx.try_send(digest) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(digest)) => {
                let tx = self.failure_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(digest).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Tear down a failed download: tombstone the entry, wake waiters,
    /// queue the orphaned file for deletion, and notify the manager.
    pub(crate) fn abort(&self, entry: &CacheEntry, done: watch::Sender<bool>) {
        let orphan = entry.tombstone();
        // waiters woken after the tombstone is in place observe it and
        // answer 502 instead of racing the unlink
        let _ = done.send(true);
        if let Some(path) = orphan {
            self.schedule_delete(path);
        }
        self.notify_failure(entry.digest().to_string());
    }
}

fn closed_error() -> std::io::Error {
    std::io::Error::other("cache index shut down")
}

/// Sole owner of the digest table and file-number allocator.
struct Manager {
    dir: PathBuf,
    entries: HashMap<String, Arc<CacheEntry>>,
    next_file: u64,
    delete_tx: mpsc::Sender<PathBuf>,
}

impl Manager {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<IndexRequest>,
        mut failures: mpsc::Receiver<String>,
    ) {
        let mut prune = tokio::time::interval(PRUNE_INTERVAL);
        prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = prune.tick() => {
                    self.prune();
                }
                Some(digest) = failures.recv() => {
                    self.remove_failed(&digest);
                }
                request = requests.recv() => {
                    let Some(request) = request else {
                        return; // index dropped
                    };
                    self.handle(request).await;
                }
            }
        }
    }

    async fn handle(&mut self, request: IndexRequest) {
        if let Some(entry) = self.entries.get(&request.digest) {
            let _ = request.reply.send(Ok(Lease {
                entry: entry.clone(),
                leader: None,
            }));
            return;
        }

        let (file, path) = match self.next_cache_file().await {
            Ok(opened) => opened,
            Err(e) => {
                let _ = request.reply.send(Err(e));
                return;
            }
        };
        let (done_tx, done_rx) = watch::channel(false);
        let entry = Arc::new(CacheEntry {
            digest: request.digest.clone(),
            state: Mutex::new(EntryState {
                path: Some(path),
                last_used: Instant::now(),
            }),
            done: done_rx,
        });
        self.entries.insert(request.digest.clone(), entry.clone());

        let lease = Lease {
            entry,
            leader: Some(Leader {
                file,
                done: done_tx,
            }),
        };
        if let Err(Ok(lease)) = request.reply.send(Ok(lease)) {
            // caller vanished before taking leadership: retire the entry so
            // the next request for this digest elects a fresh leader
            if let Some(leader) = lease.leader {
                let orphan = lease.entry.tombstone();
                let _ = leader.done.send(true);
                if let Some(path) = orphan {
                    self.schedule_delete_local(path);
                }
            }
            self.entries.remove(&request.digest);
        }
    }

    /// Open the next `<n>.cache` file. Numbers are monotonic and never
    /// reused within one process lifetime.
    async fn next_cache_file(&mut self) -> std::io::Result<(fs::File, PathBuf)> {
        let path = self.dir.join(format!("{}.cache", self.next_file));
        self.next_file += 1;

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o700);
        let file = options.open(&path).await?;
        Ok((file, path))
    }

    /// Remove a failed entry, but only while it is still the tombstoned one;
    /// a replacement inserted in the meantime must survive.
    fn remove_failed(&mut self, digest: &str) {
        if let Some(entry) = self.entries.get(digest)
            && entry.is_tombstoned()
        {
            tracing::debug!(digest, "removing failed cache entry");
            self.entries.remove(digest);
        }
    }

    /// Evict completed entries idle longer than [`IDLE_EVICTION`]. A full
    /// deletion queue halts pruning for this tick; the survivors are
    /// retried on the next one.
    fn prune(&mut self) {
        let mut halted = false;
        let delete_tx = &self.delete_tx;
        self.entries.retain(|digest, entry| {
            if halted {
                return true;
            }
            if !*entry.done.borrow() {
                return true; // download in flight
            }
            let Ok(mut state) = entry.state.try_lock() else {
                return true; // in use
            };
            if state.last_used.elapsed() <= IDLE_EVICTION {
                return true;
            }
            let Some(path) = state.path.take() else {
                return false; // tombstone straggler, just drop it
            };
            match delete_tx.try_send(path) {
                Ok(()) => {
                    tracing::debug!(digest, "evicted idle cache entry");
                    false
                }
                Err(mpsc::error::TrySendError::Full(path)) => {
                    state.path = Some(path);
                    tracing::warn!("delete queue backed up, halting prune");
                    halted = true;
                    true
                }
                Err(mpsc::error::TrySendError::Closed(path)) => {
                    state.path = Some(path);
                    halted = true;
                    true
                }
            }
        });
    }

    fn schedule_delete_local(&self, path: PathBuf) {
        match self.delete_tx.try_send(path) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(path)) => {
                let tx = self.delete_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(path).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
