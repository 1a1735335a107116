use std::env;
use std::error::Error;
use std::sync::Arc;

use barabild::cache::KeywordCache;
use barabild::config::AppConfig;
use barabild::resolver::Resolver;
use barabild::scrapers::getty::GettyScraper;
use chrono::Utc;
use dotenv::dotenv;
use env_logger::Env;
use log::{info, warn};
use rocket::{
    figment::{
        providers::{Format, Toml},
        Figment, Profile,
    },
    Config,
};

fn merge_number<T>(figment: Figment, var: &str, key: &str) -> Figment
where
    T: std::str::FromStr + serde::Serialize,
{
    match env::var(var) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => figment.merge((key, value)),
            Err(_) => {
                warn!("Ignoring {}: '{}' is not a valid number", var, raw);
                figment
            }
        },
        Err(_) => figment,
    }
}

#[rocket::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    // Load config
    let mut figment = Figment::from(Config::default())
        .merge(Toml::file("App.toml").nested());

    if let Ok(dir) = env::var("CACHE_DIR") {
        figment = figment.merge(("cache_dir", dir));
    }
    if let Ok(url) = env::var("UPSTREAM_URL") {
        figment = figment.merge(("upstream_url", url));
    }
    figment = merge_number::<u64>(figment, "CACHE_TTL_HOURS", "cache_ttl_hours");
    figment = merge_number::<usize>(figment, "CACHE_MAX_ENTRIES", "cache_max_entries");

    figment = figment.select(Profile::from_env_or("APP_PROFILE", "default"));

    let config = figment.extract::<AppConfig>()?;
    info!("Configuration loaded successfully");

    let cache = KeywordCache::open(&config.cache_dir, config.cache_ttl(), config.cache_max_entries).await?;
    cache.purge_expired(Utc::now()).await?;

    let scraper = GettyScraper::new(&config)?;
    info!("Upstream search endpoint: {}", config.upstream_url);

    let resolver = Resolver::new(Arc::new(cache), Arc::new(scraper));

    info!(
        "Starting BaraBild API server on {}:{}",
        config.address, config.port
    );

    barabild::build(figment, resolver).launch().await?;
    Ok(())
}
