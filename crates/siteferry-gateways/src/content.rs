//! HTTP content gateway: lists the source site through its sitemap and
//! fetches item payloads.
//!
//! Deeper platform-specific discovery (crawling rendered pages for asset
//! URLs, export-API pagination) belongs to the source-platform collaborator;
//! this adapter keeps to the published surface: sitemap for pages, direct
//! GET for everything else.

use std::sync::LazyLock;

use regex::Regex;

use crate::http::{classify_status, classify_transport, client, retry_after_ms};
use siteferry_engine::config::types::SourceConfig;
use siteferry_engine::gateway::{ContentGateway, FetchedItem, ItemRef};
use siteferry_types::asset::{content_hash, AssetKind};
use siteferry_types::error::GatewayError;
use siteferry_types::plan::SourceRef;

static SITEMAP_LOC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<loc>\s*([^<\s]+)\s*</loc>").expect("valid sitemap regex"));

/// Extension-based kind guess for sitemap entries and direct paths.
fn kind_for_path(path: &str) -> AssetKind {
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext)
            if matches!(
                ext.as_str(),
                "css" | "js" | "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "ico" | "woff"
                    | "woff2" | "ttf"
            ) =>
        {
            AssetKind::StaticResource
        }
        _ => AssetKind::Page,
    }
}

/// Content gateway backed by plain HTTP against the public site.
pub struct HttpContentGateway {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpContentGateway {
    /// Build the gateway for the configured source.
    ///
    /// # Errors
    ///
    /// Returns a classified error if the HTTP client cannot be built.
    pub fn new(source: &SourceConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            client: client()?,
            base_url: source.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn absolute(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response, GatewayError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| classify_transport(&e))?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let retry_after = retry_after_ms(
                response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok()),
            );
            Err(classify_status(status.as_u16(), url, retry_after))
        }
    }

    /// Strip the site origin from a sitemap URL, leaving the path.
    fn relative_path(&self, url: &str) -> String {
        url.strip_prefix(&self.base_url)
            .map_or_else(|| url.to_string(), |rest| {
                if rest.is_empty() {
                    "/".to_string()
                } else {
                    rest.to_string()
                }
            })
    }

    /// Parse sitemap XML into item references.
    fn parse_sitemap(&self, xml: &str) -> Vec<ItemRef> {
        SITEMAP_LOC_RE
            .captures_iter(xml)
            .map(|cap| {
                let path = self.relative_path(&cap[1]);
                ItemRef {
                    kind: kind_for_path(&path),
                    path,
                    // The sitemap carries no content fingerprint; callers
                    // fall back to fetch-and-hash.
                    fingerprint: None,
                }
            })
            .collect()
    }
}

impl ContentGateway for HttpContentGateway {
    fn check(&self) -> Result<(), GatewayError> {
        self.get(&self.base_url).map(|_| ())
    }

    fn list_items(&self, source: &SourceRef) -> Result<Vec<ItemRef>, GatewayError> {
        let sitemap_url = format!("{}/sitemap.xml", self.base_url);
        let response = self.get(&sitemap_url)?;
        let xml = response
            .text()
            .map_err(|e| classify_transport(&e))?;
        let items = self.parse_sitemap(&xml);
        tracing::info!(
            source = source.base_url,
            items = items.len(),
            "Sitemap listing complete"
        );
        Ok(items)
    }

    fn fetch(&self, path: &str) -> Result<FetchedItem, GatewayError> {
        let url = self.absolute(path);
        let response = self.get(&url)?;
        let bytes = response
            .bytes()
            .map_err(|e| classify_transport(&e))?
            .to_vec();
        let hash = content_hash(&bytes);
        Ok(FetchedItem {
            bytes,
            content_hash: hash,
        })
    }
}
