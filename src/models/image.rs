use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A resolved keyword as persisted by the keyword cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub keyword: String,
    pub url: String,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(keyword: &str, url: &str, fetched_at: DateTime<Utc>) -> Self {
        Self {
            keyword: keyword.to_string(),
            url: url.to_string(),
            fetched_at,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.fetched_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// Served from a fresh cache entry.
    CacheHit,
    /// This caller's request started the upstream fetch.
    Fetched,
    /// Attached to a fetch another caller had already started.
    Joined,
}

impl ResolutionSource {
    pub fn is_cache_hit(&self) -> bool {
        matches!(self, ResolutionSource::CacheHit)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub url: String,
    pub source: ResolutionSource,
    pub fetched_at: DateTime<Utc>,
}
