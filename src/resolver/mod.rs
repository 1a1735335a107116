use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use crate::cache::KeywordCache;
use crate::models::{Resolution, ResolutionSource};
use crate::scrapers::getty::{ImageSearch, ScraperError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("Keyword must not be empty")]
    InvalidKeyword,

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Upstream rejected the request with status {0}")]
    UpstreamRejected(u16),

    #[error("No image found for keyword")]
    NoResultFound,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ScraperError> for ResolveError {
    fn from(error: ScraperError) -> Self {
        match error {
            ScraperError::UpstreamUnreachable(e) => ResolveError::UpstreamUnreachable(e.to_string()),
            ScraperError::UpstreamRejected(status) => ResolveError::UpstreamRejected(status.as_u16()),
            ScraperError::NoResultFound => ResolveError::NoResultFound,
            ScraperError::Setup(e) => ResolveError::Internal(e),
        }
    }
}

type Flight = Shared<BoxFuture<'static, Result<Resolution, ResolveError>>>;

/// Resolves keywords to image URLs, reading through the keyword cache.
///
/// At most one upstream search runs per keyword. Callers arriving while a
/// search is in flight attach to it and receive the same outcome. Each
/// flight runs in its own task, so it completes even if every caller that
/// was waiting on it goes away.
#[derive(Clone)]
pub struct Resolver {
    cache: Arc<KeywordCache>,
    search: Arc<dyn ImageSearch>,
    pending: Arc<Mutex<HashMap<String, Flight>>>,
}

impl Resolver {
    pub fn new(cache: Arc<KeywordCache>, search: Arc<dyn ImageSearch>) -> Self {
        Self {
            cache,
            search,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cache(&self) -> &KeywordCache {
        &self.cache
    }

    pub async fn resolve(&self, keyword: &str) -> Result<String, ResolveError> {
        self.resolve_detailed(keyword).await.map(|resolution| resolution.url)
    }

    pub async fn resolve_detailed(&self, keyword: &str) -> Result<Resolution, ResolveError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(ResolveError::InvalidKeyword);
        }

        if let Some(resolution) = fresh_entry(&self.cache, keyword).await {
            info!("Cache hit for '{}'", keyword);
            return Ok(resolution);
        }

        let (flight, owner) = self.join_flight(keyword);
        if owner {
            info!("Cache miss for '{}', starting upstream search", keyword);
        } else {
            debug!("Joining in-flight search for '{}'", keyword);
        }

        let mut result = flight.await;
        if !owner {
            if let Ok(resolution) = result.as_mut() {
                if resolution.source == ResolutionSource::Fetched {
                    resolution.source = ResolutionSource::Joined;
                }
            }
        }
        result
    }

    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    // Check-and-maybe-create under the registry lock. The flight task is
    // spawned while the lock is held, so it cannot unregister itself before
    // it has been registered.
    fn join_flight(&self, keyword: &str) -> (Flight, bool) {
        let mut pending = self.pending.lock();
        if let Some(flight) = pending.get(keyword) {
            return (flight.clone(), false);
        }

        let task = tokio::spawn(run_flight(
            keyword.to_string(),
            self.cache.clone(),
            self.search.clone(),
            self.pending.clone(),
        ));
        let flight = task
            .map(|joined| {
                joined.unwrap_or_else(|e| Err(ResolveError::Internal(format!("search task failed: {}", e))))
            })
            .boxed()
            .shared();

        pending.insert(keyword.to_string(), flight.clone());
        (flight, true)
    }
}

// Unregisters a flight when its task ends, including when the search panics
// and the task unwinds.
struct PendingGuard {
    keyword: String,
    pending: Arc<Mutex<HashMap<String, Flight>>>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.keyword);
    }
}

async fn run_flight(
    keyword: String,
    cache: Arc<KeywordCache>,
    search: Arc<dyn ImageSearch>,
    pending: Arc<Mutex<HashMap<String, Flight>>>,
) -> Result<Resolution, ResolveError> {
    let _registered = PendingGuard {
        keyword: keyword.clone(),
        pending,
    };

    // A flight that finished just before this one was registered may already
    // have refreshed the record.
    match fresh_entry(&cache, &keyword).await {
        Some(resolution) => Ok(resolution),
        None => fetch_and_store(&keyword, &cache, search.as_ref()).await,
    }
}

async fn fetch_and_store(
    keyword: &str,
    cache: &KeywordCache,
    search: &dyn ImageSearch,
) -> Result<Resolution, ResolveError> {
    let url = match search.fetch(keyword).await {
        Ok(url) => url,
        Err(e) => {
            warn!("Upstream search for '{}' failed: {}", keyword, e);
            return Err(e.into());
        }
    };

    let fetched_at = Utc::now();
    if let Err(e) = cache.put(keyword, &url, fetched_at).await {
        error!("Failed to cache result for '{}': {}", keyword, e);
    }

    info!("Resolved '{}' to {}", keyword, url);
    Ok(Resolution {
        url,
        source: ResolutionSource::Fetched,
        fetched_at,
    })
}

// Unreadable records count as misses so a broken cache never blocks a search.
async fn fresh_entry(cache: &KeywordCache, keyword: &str) -> Option<Resolution> {
    match cache.get(keyword).await {
        Ok(Some(entry)) if !cache.is_expired(&entry, Utc::now()) => Some(Resolution {
            url: entry.url,
            source: ResolutionSource::CacheHit,
            fetched_at: entry.fetched_at,
        }),
        Ok(Some(_)) => {
            debug!("Cache entry for '{}' has expired", keyword);
            None
        }
        Ok(None) => None,
        Err(e) => {
            warn!("Cache read failed for '{}', treating as miss: {}", keyword, e);
            None
        }
    }
}
