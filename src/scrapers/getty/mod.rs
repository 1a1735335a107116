use async_trait::async_trait;
use lazy_static::lazy_static;
use log::{debug, error, info};
use regex::Regex;
use reqwest::{Client, StatusCode, Url};
use scraper::{Html, Selector};
use thiserror::Error;

use crate::config::AppConfig;

lazy_static! {
    static ref PICTURE_IMG: Selector = Selector::parse("picture img").unwrap();
    static ref MEDIA_URL: Regex =
        Regex::new(r#"https://media\.gettyimages\.com/[^"'\s<>\\]+"#).unwrap();
}

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(#[from] reqwest::Error),

    #[error("Upstream rejected the request with status {0}")]
    UpstreamRejected(StatusCode),

    #[error("No image found in search results")]
    NoResultFound,

    #[error("Scraper setup failed: {0}")]
    Setup(String),
}

/// Looks up the first image URL for a keyword.
#[async_trait]
pub trait ImageSearch: Send + Sync {
    async fn fetch(&self, keyword: &str) -> Result<String, ScraperError>;
}

pub struct GettyScraper {
    client: Client,
    endpoint: Url,
}

impl GettyScraper {
    pub fn new(config: &AppConfig) -> Result<Self, ScraperError> {
        let endpoint = Url::parse(&config.upstream_url)
            .map_err(|e| ScraperError::Setup(format!("invalid upstream URL {}: {}", config.upstream_url, e)))?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ScraperError::Setup(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl ImageSearch for GettyScraper {
    async fn fetch(&self, keyword: &str) -> Result<String, ScraperError> {
        info!("Searching upstream for keyword: {}", keyword);

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("phrase", keyword)])
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.5")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            error!("Upstream search for '{}' failed with status: {}", keyword, status);
            return Err(ScraperError::UpstreamRejected(status));
        }

        let page_url = response.url().clone();
        let html = response.text().await?;

        match extract_first_image(&html, &page_url) {
            Some(url) => {
                debug!("First image for '{}': {}", keyword, url);
                Ok(url)
            }
            None => {
                let preview_length = html.len().min(300);
                let preview = html.get(..preview_length).unwrap_or_default();
                error!("No image found for '{}'. Preview of HTML: {}...", keyword, preview);
                Err(ScraperError::NoResultFound)
            }
        }
    }
}

/// Returns the first image URL in a search results page.
///
/// The `<img>` of the first `<picture>` wins; relative sources are resolved
/// against `page_url`. If no picture yields an absolute http(s) URL, the first
/// media CDN link anywhere in the markup is used instead.
pub fn extract_first_image(html: &str, page_url: &Url) -> Option<String> {
    let document = Html::parse_document(html);

    let from_picture = document.select(&PICTURE_IMG).find_map(|img| {
        let src = img
            .value()
            .attr("src")
            .filter(|src| !src.trim().is_empty())
            .or_else(|| img.value().attr("data-src"))?;
        absolute_http_url(src.trim(), page_url)
    });

    from_picture.or_else(|| {
        MEDIA_URL
            .find(html)
            .and_then(|found| absolute_http_url(&found.as_str().replace("&amp;", "&"), page_url))
    })
}

fn absolute_http_url(candidate: &str, base: &Url) -> Option<String> {
    let url = base.join(candidate).ok()?;
    match url.scheme() {
        "http" | "https" => Some(url.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn page() -> Url {
        Url::parse("https://www.gettyimages.com/search/2/image?phrase=sunset").unwrap()
    }

    fn config_for(server: &MockServer) -> AppConfig {
        AppConfig {
            upstream_url: format!("{}/search/2/image", server.uri()),
            timeout: 5,
            ..AppConfig::default()
        }
    }

    #[test]
    fn picks_first_picture_image() {
        let html = r#"
            <html><body>
              <img src="https://static.example.com/logo.png">
              <picture><source srcset="x.webp"><img src="https://media.gettyimages.com/id/1/img123.jpg" alt="sunset"></picture>
              <picture><img src="https://media.gettyimages.com/id/2/img456.jpg"></picture>
            </body></html>
        "#;

        assert_eq!(
            extract_first_image(html, &page()).as_deref(),
            Some("https://media.gettyimages.com/id/1/img123.jpg")
        );
    }

    #[test]
    fn resolves_relative_sources_against_page() {
        let html = r#"<picture><img src="/photos/img123.jpg"></picture>"#;

        assert_eq!(
            extract_first_image(html, &page()).as_deref(),
            Some("https://www.gettyimages.com/photos/img123.jpg")
        );
    }

    #[test]
    fn skips_pictures_without_usable_source() {
        let html = r#"
            <picture><img src=""></picture>
            <picture><img src="data:image/gif;base64,R0lGOD"></picture>
            <picture><img data-src="https://media.gettyimages.com/id/3/lazy.jpg"></picture>
        "#;

        assert_eq!(
            extract_first_image(html, &page()).as_deref(),
            Some("https://media.gettyimages.com/id/3/lazy.jpg")
        );
    }

    #[test]
    fn falls_back_to_media_link_in_markup() {
        let html = r#"<script>window.__data = {"thumb":"https://media.gettyimages.com/id/9/photo.jpg?s=612x612&amp;w=0"}</script>"#;

        assert_eq!(
            extract_first_image(html, &page()).as_deref(),
            Some("https://media.gettyimages.com/id/9/photo.jpg?s=612x612&w=0")
        );
    }

    #[test]
    fn page_without_images_yields_nothing() {
        assert!(extract_first_image("<html><body>No results</body></html>", &page()).is_none());
    }

    #[test]
    fn rejects_malformed_endpoint() {
        let config = AppConfig {
            upstream_url: "not a url".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(
            GettyScraper::new(&config),
            Err(ScraperError::Setup(_))
        ));
    }

    #[tokio::test]
    async fn fetch_sends_encoded_phrase_and_returns_first_image() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/2/image"))
            .and(query_param("phrase", "red fox & snow"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<picture><img src="https://media.gettyimages.com/id/7/fox.jpg"></picture>"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let scraper = GettyScraper::new(&config_for(&server)).unwrap();
        let url = scraper.fetch("red fox & snow").await.unwrap();

        assert_eq!(url, "https://media.gettyimages.com/id/7/fox.jpg");
    }

    #[tokio::test]
    async fn non_success_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let scraper = GettyScraper::new(&config_for(&server)).unwrap();
        let err = scraper.fetch("sunset").await.unwrap_err();

        assert!(matches!(err, ScraperError::UpstreamRejected(status) if status == StatusCode::TOO_MANY_REQUESTS));
    }

    #[tokio::test]
    async fn empty_results_page_is_no_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body></body></html>"))
            .mount(&server)
            .await;

        let scraper = GettyScraper::new(&config_for(&server)).unwrap();
        assert!(matches!(
            scraper.fetch("sunset").await,
            Err(ScraperError::NoResultFound)
        ));
    }

    #[tokio::test]
    async fn unreachable_host_is_reported() {
        let config = AppConfig {
            upstream_url: "http://127.0.0.1:9/search".to_string(),
            timeout: 2,
            ..AppConfig::default()
        };

        let scraper = GettyScraper::new(&config).unwrap();
        assert!(matches!(
            scraper.fetch("sunset").await,
            Err(ScraperError::UpstreamUnreachable(_))
        ));
    }
}
