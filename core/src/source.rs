//! Remote image source and downloader over blocking HTTP.

use crate::config::SourceConfig;
use reqwest::blocking::{Client, Response};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    Status { status: StatusCode, url: String },
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// One candidate image as listed by the source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

impl ImageReference {
    /// Last path segment of the URL, used as the stored file name.
    pub fn file_name(&self) -> Result<String, SourceError> {
        let url = parse_url(&self.url)?;
        url.path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .ok_or_else(|| SourceError::InvalidUrl {
                url: self.url.clone(),
                reason: String::from("url has no file name"),
            })
    }

    /// Lowercase extension of the URL's file name, if any.
    pub fn extension(&self) -> Option<String> {
        let file_name = self.file_name().ok()?;
        let (_, extension) = file_name.rsplit_once('.')?;
        Some(extension.to_lowercase())
    }
}

/// Downloaded bytes together with the name and format derived from the URL.
#[derive(Clone, Debug)]
pub struct ImageAsset {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub format: String,
}

impl ImageAsset {
    pub fn new(reference: &ImageReference, bytes: Vec<u8>) -> Result<Self, SourceError> {
        Ok(Self {
            bytes,
            file_name: reference.file_name()?,
            format: reference.extension().unwrap_or_default(),
        })
    }

    pub fn has_supported_format(&self, extensions: &[String]) -> bool {
        extensions.iter().any(|extension| extension == &self.format)
    }
}

/// Paginated listing of candidate images.
pub trait ImageSource {
    /// Collects up to `count` references, requesting `page_size` per page.
    fn fetch_references(
        &self,
        count: usize,
        page_size: usize,
    ) -> Result<Vec<ImageReference>, SourceError>;
}

pub trait ImageDownloader {
    fn download(&self, reference: &ImageReference) -> Result<Vec<u8>, SourceError>;
}

/// Client for a Cat API style `images/search` endpoint.
pub struct CatApiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    extensions: Vec<String>,
}

impl CatApiClient {
    pub fn new(config: &SourceConfig, extensions: Vec<String>) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            extensions,
        })
    }

    fn fetch_page(
        &self,
        page_size: usize,
        page: usize,
    ) -> Result<Vec<ImageReference>, SourceError> {
        let url = page_url(&self.base_url, page_size, page)?;
        debug!(%url, "requesting page");
        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        let response = ensure_success(request.send()?)?;
        let body = response.bytes()?;
        Ok(serde_json::from_slice(&body)?)
    }
}

impl ImageSource for CatApiClient {
    fn fetch_references(
        &self,
        count: usize,
        page_size: usize,
    ) -> Result<Vec<ImageReference>, SourceError> {
        let mut collected = Vec::new();
        let mut fetched = 0usize;
        let mut page = 0usize;

        while collected.len() < count {
            let references = self.fetch_page(page_size, page)?;
            let page_len = references.len();
            fetched += page_len;
            let usable = filter_supported(references, &self.extensions);
            let nothing_usable = usable.is_empty();
            collected.extend(usable);
            page += 1;

            if page_len == 0 || (nothing_usable && !collected.is_empty()) {
                break;
            }
        }

        info!(
            requested = count,
            fetched,
            usable = collected.len(),
            extensions = %self.extensions.join(", "),
            "fetched image references"
        );
        collected.truncate(count);
        Ok(collected)
    }
}

/// Plain GET downloader.
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { client })
    }
}

impl ImageDownloader for HttpDownloader {
    fn download(&self, reference: &ImageReference) -> Result<Vec<u8>, SourceError> {
        let url = parse_url(&reference.url)?;
        let response = ensure_success(self.client.get(url).send()?)?;
        let bytes = response.bytes()?;
        debug!(id = %reference.id, size = bytes.len(), "downloaded image");
        Ok(bytes.to_vec())
    }
}

/// Builds the search URL for one page.
pub fn page_url(base_url: &str, page_size: usize, page: usize) -> Result<Url, SourceError> {
    Url::parse_with_params(
        base_url,
        &[
            ("limit", page_size.to_string()),
            ("page", page.to_string()),
            ("order", String::from("Rand")),
        ],
    )
    .map_err(|error| SourceError::InvalidUrl {
        url: base_url.to_string(),
        reason: error.to_string(),
    })
}

/// Keeps references whose URL extension is in `extensions`, preserving order.
pub fn filter_supported(
    references: Vec<ImageReference>,
    extensions: &[String],
) -> Vec<ImageReference> {
    references
        .into_iter()
        .filter(|reference| {
            reference
                .extension()
                .map(|extension| extensions.contains(&extension))
                .unwrap_or(false)
        })
        .collect()
}

fn parse_url(url: &str) -> Result<Url, SourceError> {
    Url::parse(url).map_err(|error| SourceError::InvalidUrl {
        url: url.to_string(),
        reason: error.to_string(),
    })
}

fn ensure_success(response: Response) -> Result<Response, SourceError> {
    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Status {
            status,
            url: response.url().to_string(),
        });
    }
    Ok(response)
}
