use rocket::http::{Header, Status};
use rocket::serde::json::Json;
use rocket::{request::Request, response::{self, Responder, Response}};
use rocket::State;
use serde_json::{json, Value};

use crate::api::ApiError;
use crate::models::Resolution;
use crate::resolver::Resolver;

#[get("/")]
pub fn index() -> Json<Value> {
    Json(json!({ "message": "Welcome to BaraBild Images Search API" }))
}

#[get("/search/<keyword>")]
pub async fn search_image(
    keyword: &str,
    resolver: &State<Resolver>,
) -> Result<RedirectWithCache, ApiError> {
    let resolution = resolver.resolve_detailed(keyword).await?;
    let ttl = resolver.cache().ttl();

    Ok(RedirectWithCache::new(resolution, ttl))
}

/// Temporary redirect to the resolved image, cacheable for the rest of the
/// entry's lifetime.
pub struct RedirectWithCache {
    pub location: String,
    pub from_cache: bool,
    pub max_age: i64,
}

impl RedirectWithCache {
    pub fn new(resolution: Resolution, ttl: chrono::Duration) -> Self {
        let from_cache = resolution.source.is_cache_hit();
        let max_age = if from_cache {
            let age = chrono::Utc::now().signed_duration_since(resolution.fetched_at);
            (ttl - age).num_seconds().max(0)
        } else {
            ttl.num_seconds()
        };

        Self {
            location: resolution.url,
            from_cache,
            max_age,
        }
    }
}

impl<'r> Responder<'r, 'static> for RedirectWithCache {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        Response::build()
            .status(Status::TemporaryRedirect)
            .header(Header::new("Location", self.location))
            .header(Header::new("Cache-Control", format!("public, max-age={}", self.max_age)))
            .header(Header::new("X-Cache", if self.from_cache { "HIT" } else { "MISS" }))
            .ok()
    }
}
