//! Process-wide reader/writer lock table, keyed by absolute path, with
//! writer preference (spec §4.10). Mirrors `filelock.c`/`filelock.h` in
//! the original source; the blocking `pthread_cond_t` there becomes
//! `tokio::sync::Notify` here, since waiters are async tasks rather than
//! OS threads.
//!
//! Entries are created lazily on first acquisition. They are not removed
//! synchronously with the last release -- a zero-count entry left behind
//! is harmless (a later acquisition on the same path just reuses it as if
//! it were freshly created) -- but `Drop` opportunistically reclaims it
//! when the table-level lock isn't contended, keeping long-running
//! servers from accumulating one entry per path ever touched.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex as AsyncMutex, Notify};

#[derive(Default)]
struct Counts {
    readers: u32,
    writers: u32,
    waiting_writers: u32,
}

struct LockEntry {
    counts: StdMutex<Counts>,
    notify: Notify,
}

impl LockEntry {
    fn new() -> Arc<Self> {
        Arc::new(LockEntry {
            counts: StdMutex::new(Counts::default()),
            notify: Notify::new(),
        })
    }
}

/// The global lock table. Always used behind an `Arc` so guards can hold
/// a handle back to it for release bookkeeping.
pub struct FileLockTable {
    entries: AsyncMutex<HashMap<String, Arc<LockEntry>>>,
}

impl FileLockTable {
    pub fn new() -> Arc<Self> {
        Arc::new(FileLockTable {
            entries: AsyncMutex::new(HashMap::new()),
        })
    }

    async fn get_or_create(&self, path: &str) -> Arc<LockEntry> {
        let mut map = self.entries.lock().await;
        map.entry(path.to_string())
            .or_insert_with(LockEntry::new)
            .clone()
    }

    /// Acquires a shared (read) lock. Blocks (cooperatively) while a
    /// writer holds or is waiting for the lock.
    pub async fn acquire_shared(self: &Arc<Self>, path: &str) -> SharedLockGuard {
        let key = normalize_key(path);
        let entry = self.get_or_create(&key).await;
        loop {
            let notified = {
                let mut counts = entry.counts.lock().unwrap();
                if counts.writers == 0 && counts.waiting_writers == 0 {
                    counts.readers += 1;
                    None
                } else {
                    Some(entry.notify.notified())
                }
            };
            match notified {
                None => break,
                Some(n) => n.await,
            }
        }
        SharedLockGuard {
            table: self.clone(),
            path: key,
            entry,
        }
    }

    /// Acquires an exclusive (write) lock. Registers as a waiting writer
    /// immediately so that new readers stop entering ahead of it
    /// (writer preference).
    pub async fn acquire_exclusive(self: &Arc<Self>, path: &str) -> ExclusiveLockGuard {
        let key = normalize_key(path);
        let entry = self.get_or_create(&key).await;
        {
            let mut counts = entry.counts.lock().unwrap();
            counts.waiting_writers += 1;
        }
        loop {
            let notified = {
                let mut counts = entry.counts.lock().unwrap();
                if counts.writers == 0 && counts.readers == 0 {
                    counts.waiting_writers -= 1;
                    counts.writers = 1;
                    None
                } else {
                    Some(entry.notify.notified())
                }
            };
            match notified {
                None => break,
                Some(n) => n.await,
            }
        }
        ExclusiveLockGuard {
            table: self.clone(),
            path: key,
            entry,
        }
    }

    /// Non-blocking probe: is `path` currently held exclusively?
    pub async fn is_exclusive_locked(&self, path: &str) -> bool {
        let key = normalize_key(path);
        let map = self.entries.lock().await;
        match map.get(&key) {
            Some(entry) => entry.counts.lock().unwrap().writers > 0,
            None => false,
        }
    }

    /// Non-blocking probe: how many shared locks currently hold `path`?
    pub async fn shared_lock_count(&self, path: &str) -> u32 {
        let key = normalize_key(path);
        let map = self.entries.lock().await;
        match map.get(&key) {
            Some(entry) => entry.counts.lock().unwrap().readers,
            None => 0,
        }
    }
}

fn normalize_key(path: &str) -> String {
    Path::new(path).to_string_lossy().into_owned()
}

fn try_reclaim(table: &Arc<FileLockTable>, path: &str, entry: &Arc<LockEntry>) {
    if let Ok(mut map) = table.entries.try_lock() {
        let idle = {
            let counts = entry.counts.lock().unwrap();
            counts.readers == 0 && counts.writers == 0 && counts.waiting_writers == 0
        };
        if idle {
            if let Some(current) = map.get(path) {
                if Arc::ptr_eq(current, entry) {
                    map.remove(path);
                }
            }
        }
    }
}

pub struct SharedLockGuard {
    table: Arc<FileLockTable>,
    path: String,
    entry: Arc<LockEntry>,
}

impl Drop for SharedLockGuard {
    fn drop(&mut self) {
        {
            let mut counts = self.entry.counts.lock().unwrap();
            counts.readers = counts.readers.saturating_sub(1);
        }
        self.entry.notify.notify_waiters();
        try_reclaim(&self.table, &self.path, &self.entry);
    }
}

pub struct ExclusiveLockGuard {
    table: Arc<FileLockTable>,
    path: String,
    entry: Arc<LockEntry>,
}

impl Drop for ExclusiveLockGuard {
    fn drop(&mut self) {
        {
            let mut counts = self.entry.counts.lock().unwrap();
            counts.writers = 0;
        }
        self.entry.notify.notify_waiters();
        try_reclaim(&self.table, &self.path, &self.entry);
    }
}

/// Either kind of lock guard, held by a transfer task across the handoff
/// from the initiating handler to the transfer worker (spec §3, §9:
/// "ownership of the file lock across a thread handoff").
pub enum FileLockGuard {
    Shared(SharedLockGuard),
    Exclusive(ExclusiveLockGuard),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn shared_locks_are_concurrent() {
        let table = FileLockTable::new();
        let g1 = table.acquire_shared("/f").await;
        let g2 = table.acquire_shared("/f").await;
        assert_eq!(table.shared_lock_count("/f").await, 2);
        drop(g1);
        drop(g2);
    }

    #[tokio::test]
    async fn exclusive_excludes_shared() {
        let table = FileLockTable::new();
        let writer = table.acquire_exclusive("/f").await;
        assert!(table.is_exclusive_locked("/f").await);

        let table2 = table.clone();
        let reader_done = Arc::new(tokio::sync::Notify::new());
        let reader_done2 = reader_done.clone();
        let handle = tokio::spawn(async move {
            let _g = table2.acquire_shared("/f").await;
            reader_done2.notify_one();
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        // Reader must still be blocked.
        drop(writer);
        reader_done.notified().await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn waiting_writer_blocks_new_readers() {
        let table = FileLockTable::new();
        let r1 = table.acquire_shared("/f").await;
        let r2 = table.acquire_shared("/f").await;

        let table2 = table.clone();
        let writer_acquired = Arc::new(tokio::sync::Notify::new());
        let writer_acquired2 = writer_acquired.clone();
        let writer_handle = tokio::spawn(async move {
            let _g = table2.acquire_exclusive("/f").await;
            writer_acquired2.notify_one();
        });
        // give the writer task time to register as waiting
        tokio::time::sleep(Duration::from_millis(20)).await;

        let table3 = table.clone();
        let late_reader_done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let late_reader_done2 = late_reader_done.clone();
        let late_reader = tokio::spawn(async move {
            let _g = table3.acquire_shared("/f").await;
            late_reader_done2.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!late_reader_done.load(std::sync::atomic::Ordering::SeqCst));

        drop(r1);
        drop(r2);
        writer_acquired.notified().await;
        writer_handle.await.unwrap();
        late_reader.await.unwrap();
        assert!(late_reader_done.load(std::sync::atomic::Ordering::SeqCst));
    }
}
