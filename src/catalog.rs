//! External book search against the Google Books volumes API.

use crate::config::CatalogConfig;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A catalog hit, shaped like a book submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalBook {
    /// Upstream volume ID.
    pub external_id: String,
    /// Title.
    pub title: String,
    /// Authors joined with ", ".
    pub author: String,
    /// First category.
    pub genre: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// ISBN-13 if known, else ISBN-10.
    pub isbn: Option<String>,
    /// Publication date as reported.
    pub published_date: Option<String>,
    /// Page count.
    pub page_count: Option<u32>,
    /// Cover thumbnail URL.
    pub thumbnail: Option<String>,
    /// Language code.
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VolumesResponse {
    #[serde(default)]
    items: Vec<Volume>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Volume {
    #[serde(default)]
    id: String,
    #[serde(default)]
    volume_info: VolumeInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeInfo {
    title: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    categories: Vec<String>,
    description: Option<String>,
    #[serde(default)]
    industry_identifiers: Vec<IndustryIdentifier>,
    published_date: Option<String>,
    page_count: Option<u32>,
    image_links: Option<ImageLinks>,
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IndustryIdentifier {
    #[serde(rename = "type")]
    kind: String,
    identifier: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageLinks {
    thumbnail: Option<String>,
    small_thumbnail: Option<String>,
}

impl From<Volume> for ExternalBook {
    fn from(volume: Volume) -> Self {
        let info = volume.volume_info;

        let find_isbn = |kind: &str| {
            info.industry_identifiers
                .iter()
                .find(|id| id.kind == kind)
                .map(|id| id.identifier.clone())
        };
        let isbn = find_isbn("ISBN_13").or_else(|| find_isbn("ISBN_10"));

        let author = if info.authors.is_empty() {
            "Unknown Author".to_string()
        } else {
            info.authors.join(", ")
        };

        let thumbnail = info
            .image_links
            .and_then(|links| links.thumbnail.or(links.small_thumbnail))
            .map(|url| match url.strip_prefix("http://") {
                Some(rest) => format!("https://{}", rest),
                None => url,
            });

        Self {
            external_id: volume.id,
            title: info.title.unwrap_or_else(|| "Untitled".to_string()),
            author,
            genre: info.categories.into_iter().next(),
            description: info.description,
            isbn,
            published_date: info.published_date,
            page_count: info.page_count,
            thumbnail,
            language: info.language,
        }
    }
}

/// Client for the external catalog.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_results: u32,
}

impl CatalogClient {
    /// Build a client from configuration.
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("shelf-rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            max_results: config.max_results.clamp(1, 40),
        })
    }

    /// Whether an API key is configured.
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Look up volumes matching a free-text query.
    pub async fn search(&self, query: &str) -> Result<Vec<ExternalBook>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::BadRequest("Search query is required".to_string()));
        }

        let Some(api_key) = &self.api_key else {
            return Err(AppError::UpstreamUnavailable(
                "External search is not configured".to_string(),
            ));
        };

        let max_results = self.max_results.to_string();
        let response = self
            .http
            .get(format!("{}/volumes", self.base_url))
            .query(&[
                ("q", query),
                ("key", api_key.as_str()),
                ("maxResults", max_results.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "External search request failed");
                AppError::UpstreamUnavailable("External search failed".to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(status = status.as_u16(), "External search returned an error");
            return Err(AppError::UpstreamUnavailable(
                "External search failed".to_string(),
            ));
        }

        let body: VolumesResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "External search returned an unreadable body");
            AppError::UpstreamUnavailable("External search failed".to_string())
        })?;

        tracing::debug!(query, results = body.items.len(), "External search");
        Ok(body.items.into_iter().map(ExternalBook::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "kind": "books#volumes",
        "totalItems": 2,
        "items": [
            {
                "id": "B1hSG45JCX4C",
                "volumeInfo": {
                    "title": "Dune",
                    "authors": ["Frank Herbert", "Brian Herbert"],
                    "categories": ["Fiction", "Science"],
                    "description": "Desert planet.",
                    "industryIdentifiers": [
                        { "type": "ISBN_10", "identifier": "0441172717" },
                        { "type": "ISBN_13", "identifier": "9780441172719" }
                    ],
                    "publishedDate": "1990-09-01",
                    "pageCount": 535,
                    "imageLinks": { "thumbnail": "http://books.google.com/t.jpg" },
                    "language": "en"
                }
            },
            { "id": "bare", "volumeInfo": { "industryIdentifiers": [
                { "type": "ISBN_10", "identifier": "1234567890" }
            ] } }
        ]
    }"#;

    fn parse() -> Vec<ExternalBook> {
        let body: VolumesResponse = serde_json::from_str(FIXTURE).unwrap();
        body.items.into_iter().map(ExternalBook::from).collect()
    }

    #[test]
    fn maps_full_volume() {
        let books = parse();
        let dune = &books[0];
        assert_eq!(dune.external_id, "B1hSG45JCX4C");
        assert_eq!(dune.title, "Dune");
        assert_eq!(dune.author, "Frank Herbert, Brian Herbert");
        assert_eq!(dune.genre.as_deref(), Some("Fiction"));
        assert_eq!(dune.isbn.as_deref(), Some("9780441172719"));
        assert_eq!(dune.page_count, Some(535));
        assert_eq!(
            dune.thumbnail.as_deref(),
            Some("https://books.google.com/t.jpg")
        );
        assert_eq!(dune.language.as_deref(), Some("en"));
    }

    #[test]
    fn maps_sparse_volume() {
        let books = parse();
        let bare = &books[1];
        assert_eq!(bare.title, "Untitled");
        assert_eq!(bare.author, "Unknown Author");
        assert_eq!(bare.isbn.as_deref(), Some("1234567890"));
        assert!(bare.thumbnail.is_none());
    }

    #[test]
    fn empty_response_has_no_items() {
        let body: VolumesResponse = serde_json::from_str(r#"{"totalItems":0}"#).unwrap();
        assert!(body.items.is_empty());
    }

    #[tokio::test]
    async fn empty_query_rejected() {
        let client = CatalogClient::new(&CatalogConfig {
            api_key: Some("key".to_string()),
            ..CatalogConfig::default()
        })
        .unwrap();
        assert!(matches!(
            client.search("   ").await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn missing_key_is_unavailable() {
        let client = CatalogClient::new(&CatalogConfig::default()).unwrap();
        assert!(!client.is_configured());
        assert!(matches!(
            client.search("dune").await,
            Err(AppError::UpstreamUnavailable(_))
        ));
    }
}
