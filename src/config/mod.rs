use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_UPSTREAM_URL: &str = "https://www.gettyimages.com/search/2/image";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: u64,
    #[serde(default)]
    pub cache_max_entries: Option<usize>,
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl AppConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours * 60 * 60)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            cache_dir: default_cache_dir(),
            cache_ttl_hours: default_cache_ttl_hours(),
            cache_max_entries: None,
            upstream_url: default_upstream_url(),
            timeout: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_cache_ttl_hours() -> u64 {
    24
}

fn default_upstream_url() -> String {
    DEFAULT_UPSTREAM_URL.to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::figment::Figment;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config: AppConfig = Figment::new()
            .merge(("cache_ttl_hours", 2))
            .extract()
            .unwrap();

        assert_eq!(config.cache_ttl(), Duration::from_secs(2 * 3600));
        assert_eq!(config.cache_dir, PathBuf::from("./cache"));
        assert_eq!(config.upstream_url, DEFAULT_UPSTREAM_URL);
        assert!(config.cache_max_entries.is_none());
    }

    #[test]
    fn cache_cap_is_read_from_figment() {
        let config: AppConfig = Figment::from(rocket::Config::default())
            .merge(("cache_max_entries", 500))
            .merge(("timeout", 3))
            .extract()
            .unwrap();

        assert_eq!(config.cache_max_entries, Some(500));
        assert_eq!(config.request_timeout(), Duration::from_secs(3));
    }
}
