//! URL normalization: shortlink resolution and the platform domain gate.

use reqwest::Client;
use tracing::debug;
use url::Url;

use super::{ParseError, ParseStage};
use crate::utils::error_chain;

/// Hosts accepted as canonical video-page hosts.
const CANONICAL_HOSTS: &[&str] = &["www.bilibili.com", "bilibili.com", "m.bilibili.com"];

/// Shortlink hosts that redirect to a canonical host.
const SHORTLINK_HOSTS: &[&str] = &["b23.tv", "bili2233.cn"];

/// Redirect budget for shortlink resolution.
pub(crate) const MAX_REDIRECT_HOPS: usize = 8;

/// Resolves a raw link into a canonical platform URL.
///
/// Canonical hosts pass through untouched. Shortlink hosts are resolved by
/// following redirects (bounded by [`MAX_REDIRECT_HOPS`]); anything else is
/// rejected without touching the network.
pub struct UrlNormalizer {
    http: Client,
    canonical_hosts: Vec<String>,
    shortlink_hosts: Vec<String>,
}

impl UrlNormalizer {
    pub fn new<S: Into<String>>(
        http: Client,
        canonical_hosts: impl IntoIterator<Item = S>,
        shortlink_hosts: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            http,
            canonical_hosts: canonical_hosts.into_iter().map(Into::into).collect(),
            shortlink_hosts: shortlink_hosts.into_iter().map(Into::into).collect(),
        }
    }

    /// Normalizer preloaded with the platform's known hosts.
    pub fn bilibili(http: Client) -> Self {
        Self::new(
            http,
            CANONICAL_HOSTS.iter().copied(),
            SHORTLINK_HOSTS.iter().copied(),
        )
    }

    pub async fn normalize(&self, raw: &str) -> Result<Url, ParseError> {
        let url = Url::parse(raw.trim()).map_err(|err| {
            ParseError::tagged(
                ParseStage::Normalize,
                "INVALID_URL",
                format!("'{}' is not a valid URL: {}", raw.trim(), err),
            )
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ParseError::tagged(
                ParseStage::Normalize,
                "INVALID_URL",
                format!("unsupported URL scheme '{}'", url.scheme()),
            ));
        }

        let host = url.host_str().ok_or_else(|| {
            ParseError::tagged(ParseStage::Normalize, "INVALID_URL", "URL has no host")
        })?;

        if self.is_shortlink(host) {
            self.resolve_shortlink(url.clone()).await
        } else if self.is_canonical(host) {
            Ok(url)
        } else {
            Err(ParseError::tagged(
                ParseStage::Normalize,
                "NOT_MATCHING_DOMAIN",
                format!("'{}' is not a recognized platform host", host),
            ))
        }
    }

    async fn resolve_shortlink(&self, url: Url) -> Result<Url, ParseError> {
        let response = self.http.get(url.clone()).send().await.map_err(|err| {
            ParseError::tagged(ParseStage::Normalize, "REDIRECT_FAILED", error_chain(&err))
        })?;

        let resolved = response.url().clone();
        debug!(from = %url, to = %resolved, "shortlink resolved");

        match resolved.host_str() {
            Some(host) if self.is_canonical(host) => Ok(resolved),
            Some(host) => Err(ParseError::tagged(
                ParseStage::Normalize,
                "NOT_MATCHING_DOMAIN",
                format!("shortlink resolved to foreign host '{}'", host),
            )),
            None => Err(ParseError::tagged(
                ParseStage::Normalize,
                "NOT_MATCHING_DOMAIN",
                "resolved URL has no host",
            )),
        }
    }

    fn is_canonical(&self, host: &str) -> bool {
        self.canonical_hosts.iter().any(|h| h == host)
    }

    fn is_shortlink(&self, host: &str) -> bool {
        self.shortlink_hosts.iter().any(|h| h == host)
    }
}
