//! Capability registry - pluggable link resolvers
//!
//! Video-site submissions name a page, not a file. A [`LinkResolver`] turns
//! such a page URL into something the engine can download. The registry is
//! built once at startup and handed to the service; there is no global
//! lookup.

use crate::error::DlrelayError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Resolves a page URL into a directly downloadable URI
#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Whether this resolver knows how to handle `url`
    fn supports(&self, url: &Url) -> bool;

    async fn resolve(&self, url: &Url) -> Result<String, DlrelayError>;
}

/// Accepts URLs that already point at a media file
#[derive(Debug, Clone)]
pub struct DirectMediaResolver {
    extensions: Vec<String>,
}

impl Default for DirectMediaResolver {
    fn default() -> Self {
        Self::new(["mp4", "mkv", "webm", "avi", "mov", "flv", "m4v", "mp3", "m4a", "ogg"])
    }
}

impl DirectMediaResolver {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.into().to_ascii_lowercase())
                .collect(),
        }
    }
}

#[async_trait]
impl LinkResolver for DirectMediaResolver {
    fn name(&self) -> &str {
        "direct-media"
    }

    fn supports(&self, url: &Url) -> bool {
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }
        let last = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or("");
        match last.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                self.extensions.iter().any(|known| known.eq_ignore_ascii_case(ext))
            }
            _ => false,
        }
    }

    async fn resolve(&self, url: &Url) -> Result<String, DlrelayError> {
        Ok(url.to_string())
    }
}

/// Ordered set of resolvers; the first one that supports a URL wins
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    resolvers: Vec<Arc<dyn LinkResolver>>,
}

impl CapabilityRegistry {
    /// Registry with no resolvers at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in resolvers
    pub fn with_defaults() -> Self {
        Self::empty().with_resolver(Arc::new(DirectMediaResolver::default()))
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn LinkResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn resolver_names(&self) -> Vec<&str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    /// Resolve a video page URL into an engine-downloadable URI
    pub async fn resolve_video(&self, url: &Url) -> Result<String, DlrelayError> {
        let resolver = self
            .resolvers
            .iter()
            .find(|r| r.supports(url))
            .ok_or_else(|| {
                DlrelayError::InvalidRequest(format!("no resolver supports {}", url))
            })?;

        debug!("Resolving {} with {}", url, resolver.name());
        let resolved = resolver.resolve(url).await?;
        if resolved.is_empty() {
            return Err(DlrelayError::InvalidRequest(format!(
                "{} produced no link for {}",
                resolver.name(),
                url
            )));
        }
        Ok(resolved)
    }
}
