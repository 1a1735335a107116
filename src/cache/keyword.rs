use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use reqwest::Url;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex as AsyncMutex;

use crate::models::CacheEntry;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache record {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cache serialization error: {0}")]
    Serialization(serde_json::Error),

    #[error("Invalid image URL {0}")]
    InvalidUrl(String),
}

// Recency bookkeeping keyed by record digest. Ticks only grow, so the
// smallest tick in `by_tick` is the least recently used record.
#[derive(Debug, Default)]
struct LruIndex {
    tick: u64,
    by_key: HashMap<String, u64>,
    by_tick: BTreeMap<u64, String>,
}

impl LruIndex {
    fn touch(&mut self, key: &str) {
        self.tick += 1;
        if let Some(old) = self.by_key.insert(key.to_string(), self.tick) {
            self.by_tick.remove(&old);
        }
        self.by_tick.insert(self.tick, key.to_string());
    }

    fn refresh(&mut self, key: &str) {
        if self.by_key.contains_key(key) {
            self.touch(key);
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.by_key.remove(key) {
            Some(tick) => {
                self.by_tick.remove(&tick);
                true
            }
            None => false,
        }
    }

    fn pop_oldest(&mut self) -> Option<String> {
        let (_, key) = self.by_tick.pop_first()?;
        self.by_key.remove(&key);
        Some(key)
    }

    fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    fn len(&self) -> usize {
        self.by_key.len()
    }

    fn keys(&self) -> Vec<String> {
        self.by_key.keys().cloned().collect()
    }
}

/// Disk-backed keyword → image URL store.
///
/// Every keyword lives in its own `<md5>.json` record under the cache
/// directory. Records are written to a `.tmp` sibling and renamed into
/// place, so readers only ever see complete records. Writers to the same
/// keyword are serialized; different keywords never wait on each other.
pub struct KeywordCache {
    dir: PathBuf,
    ttl: chrono::Duration,
    max_entries: Option<usize>,
    index: Mutex<LruIndex>,
    write_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeywordCache {
    /// Opens (or creates) the cache directory and rebuilds the recency index
    /// from the records already on disk, oldest `fetchedAt` first.
    ///
    /// A `max_entries` of zero is treated as no cap.
    pub async fn open(
        dir: impl Into<PathBuf>,
        ttl: Duration,
        max_entries: Option<usize>,
    ) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut records = Vec::new();
        let mut listing = fs::read_dir(&dir).await?;
        while let Some(item) = listing.next_entry().await? {
            let path = item.path();
            match path.extension().and_then(|ext| ext.to_str()) {
                Some("tmp") => {
                    debug!("Removing leftover temporary record {}", path.display());
                    let _ = fs::remove_file(&path).await;
                    continue;
                }
                Some("json") => {}
                _ => continue,
            }

            let Some(key) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match read_record(&path).await {
                Ok(entry) => records.push((entry.fetched_at, key.to_string())),
                Err(e) => warn!("Skipping unreadable cache record {}: {}", path.display(), e),
            }
        }

        records.sort();
        let mut index = LruIndex::default();
        for (_, key) in &records {
            index.touch(key);
        }

        let cache = Self {
            dir,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            max_entries: max_entries.filter(|&cap| cap > 0),
            index: Mutex::new(index),
            write_locks: Mutex::new(HashMap::new()),
        };

        if let Some(cap) = cache.max_entries {
            let victims = {
                let mut index = cache.index.lock();
                let mut victims = Vec::new();
                while index.len() > cap {
                    match index.pop_oldest() {
                        Some(key) => victims.push(key),
                        None => break,
                    }
                }
                victims
            };
            for key in victims {
                cache.delete_record(&key).await;
            }
        }

        info!(
            "Keyword cache opened at {} with {} entries (ttl: {}s, cap: {:?})",
            cache.dir.display(),
            cache.len(),
            cache.ttl.num_seconds(),
            cache.max_entries
        );

        Ok(cache)
    }

    pub fn cache_key(keyword: &str) -> String {
        format!("{:x}", md5::compute(keyword.as_bytes()))
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        entry.age(now) > self.ttl
    }

    pub async fn get(&self, keyword: &str) -> Result<Option<CacheEntry>, CacheError> {
        let key = Self::cache_key(keyword);
        let path = self.record_path(&key);

        let entry = match read_record(&path).await {
            Ok(entry) => entry,
            Err(CacheError::Io(e)) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        if entry.keyword != keyword {
            debug!(
                "Record {} belongs to '{}', not '{}'",
                key, entry.keyword, keyword
            );
            return Ok(None);
        }

        self.index.lock().refresh(&key);
        Ok(Some(entry))
    }

    /// Writes or replaces the record for `keyword`. When a cap is configured
    /// and `keyword` is new, least recently used records are evicted first.
    ///
    /// `url` must be an absolute URL.
    pub async fn put(
        &self,
        keyword: &str,
        url: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        if let Err(e) = Url::parse(url) {
            return Err(CacheError::InvalidUrl(format!("'{}': {}", url, e)));
        }

        let key = Self::cache_key(keyword);
        let entry = CacheEntry::new(keyword, url, fetched_at);
        let data = serde_json::to_vec(&entry).map_err(CacheError::Serialization)?;

        for victim in self.reserve_slot(&key) {
            self.evict(&victim).await;
        }

        let lock = self.write_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            let path = self.record_path(&key);

            if !self.index.lock().contains(&key) {
                // Evicted or removed by another caller since the slot was reserved.
                debug!("Record {} dropped before it was written", key);
                Ok(())
            } else {
                match write_atomically(&path, &data).await {
                    Ok(()) => {
                        self.index.lock().refresh(&key);
                        Ok(())
                    }
                    Err(e) => {
                        if fs::metadata(&path).await.is_err() {
                            self.index.lock().remove(&key);
                        }
                        Err(e)
                    }
                }
            }
        };
        self.release_write_lock(&key, lock);

        result
    }

    pub async fn remove(&self, keyword: &str) -> Result<bool, CacheError> {
        let key = Self::cache_key(keyword);
        let lock = self.write_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            self.index.lock().remove(&key);
            match fs::remove_file(self.record_path(&key)).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(CacheError::Io(e)),
            }
        };
        self.release_write_lock(&key, lock);

        result
    }

    /// Deletes every record whose age exceeds the TTL at `now`.
    /// Returns how many records were removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, CacheError> {
        let keys = self.index.lock().keys();
        let mut purged = 0;

        for key in keys {
            let lock = self.write_lock(&key);
            let expired = {
                let _guard = lock.lock().await;
                let path = self.record_path(&key);
                let expired = match read_record(&path).await {
                    Ok(entry) => self.is_expired(&entry, now),
                    Err(CacheError::Io(e)) if e.kind() == ErrorKind::NotFound => false,
                    Err(e) => {
                        warn!("Dropping unreadable cache record {}: {}", path.display(), e);
                        true
                    }
                };
                if expired {
                    self.index.lock().remove(&key);
                    self.delete_record(&key).await;
                }
                expired
            };
            self.release_write_lock(&key, lock);

            if expired {
                purged += 1;
            }
        }

        if purged > 0 {
            info!("Purged {} expired cache records", purged);
        }
        Ok(purged)
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    // Claims a slot for `key` in the index and picks the records that must go
    // to stay within the cap. Both happen under one index lock, so concurrent
    // puts of different keys cannot overshoot the cap.
    fn reserve_slot(&self, key: &str) -> Vec<String> {
        let mut index = self.index.lock();
        if index.contains(key) {
            return Vec::new();
        }
        index.touch(key);

        let Some(cap) = self.max_entries else {
            return Vec::new();
        };

        let mut victims = Vec::new();
        while index.len() > cap {
            match index.pop_oldest() {
                Some(victim) => victims.push(victim),
                None => break,
            }
        }
        victims
    }

    // Deletes an evicted record under its own write lock. A record that was
    // reserved again in the meantime belongs to a newer put and is kept.
    async fn evict(&self, key: &str) {
        let lock = self.write_lock(key);
        {
            let _guard = lock.lock().await;
            if !self.index.lock().contains(key) {
                info!("Evicting least recently used cache record {}", key);
                self.delete_record(key).await;
            }
        }
        self.release_write_lock(key, lock);
    }

    async fn delete_record(&self, key: &str) {
        let path = self.record_path(key);
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to delete cache record {}: {}", path.display(), e);
            }
        }
    }

    fn write_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.write_locks
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    // Drops the per-key lock from the map once no other writer holds a clone.
    fn release_write_lock(&self, key: &str, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self.write_locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
    }
}

async fn read_record(path: &Path) -> Result<CacheEntry, CacheError> {
    let data = fs::read(path).await?;
    serde_json::from_slice(&data).map_err(|source| CacheError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

async fn write_atomically(path: &Path, data: &[u8]) -> Result<(), CacheError> {
    let tmp = path.with_extension("json.tmp");

    if let Err(e) = fs::write(&tmp, data).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
