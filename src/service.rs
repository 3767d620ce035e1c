//! Orchestrates classification, cached extraction and format processing for
//! the two operations the HTTP layer exposes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::ExtractionCache;
use crate::config::ServiceConfig;
use crate::error::MediaError;
use crate::formats::{self, Format, Media};
use crate::provider::{ByteStream, Provider, YtDlpProvider};
use crate::sources::Source;
use crate::ytdlp::{ExtractionResult, RawFormat, YtDlp};

const FALLBACK_FILENAME: &str = "download";

/// A format picked for download whose stream has not been opened yet.
pub struct ResolvedFormat {
    pub url: String,
    pub title: String,
    pub duration: f64,
    pub format: Format,
    raw: RawFormat,
    provider: Arc<dyn Provider>,
}

impl ResolvedFormat {
    /// Starts the transfer through the provider that produced the format.
    pub async fn open(self) -> Result<ResolvedDownload, MediaError> {
        let stream = self
            .provider
            .open_stream(&self.url, &self.raw)
            .await
            .map_err(MediaError::Stream)?;
        info!(
            url = %self.url,
            format_id = %self.raw.format_id,
            extension = %self.format.extension,
            "opened download stream"
        );
        Ok(ResolvedDownload {
            title: self.title,
            duration: self.duration,
            format: self.format,
            stream,
        })
    }
}

impl fmt::Debug for ResolvedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedFormat")
            .field("url", &self.url)
            .field("title", &self.title)
            .field("format", &self.format)
            .field("format_id", &self.raw.format_id)
            .finish_non_exhaustive()
    }
}

/// A format picked for download together with its open byte stream.
pub struct ResolvedDownload {
    pub title: String,
    pub duration: f64,
    pub format: Format,
    pub stream: ByteStream,
}

impl ResolvedDownload {
    /// `{title}.{extension}` with characters that would break a
    /// `Content-Disposition` header or a file path replaced.
    pub fn filename(&self) -> String {
        let mut name: String = self
            .title
            .trim()
            .chars()
            .map(|c| match c {
                '/' | '\\' | '"' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect();
        if name.is_empty() {
            name = FALLBACK_FILENAME.to_owned();
        }
        if !self.format.extension.is_empty() {
            name.push('.');
            name.push_str(&self.format.extension);
        }
        name
    }
}

impl fmt::Debug for ResolvedDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedDownload")
            .field("title", &self.title)
            .field("duration", &self.duration)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// Entry point for listing and downloading formats.
///
/// Cheap to share behind an `Arc`; every call is independent and the cache is
/// the only shared state.
pub struct MediaService {
    cache: Arc<ExtractionCache>,
    providers: HashMap<Source, Arc<dyn Provider>>,
}

impl MediaService {
    /// Service without providers; every URL is unsupported until some are
    /// registered with [`MediaService::with_provider`].
    pub fn new(cache: Arc<ExtractionCache>) -> Self {
        Self {
            cache,
            providers: HashMap::new(),
        }
    }

    /// Service with a fresh cache and a `yt-dlp` provider per known source.
    pub fn from_config(config: &ServiceConfig) -> Self {
        let ytdlp = YtDlp::new(config.ytdlp_path.clone()).with_timeout(config.extract_timeout);
        Self::from_ytdlp(ExtractionCache::new(config.cache), ytdlp)
    }

    /// Service serving every known source through the given `yt-dlp`.
    pub fn from_ytdlp(cache: Arc<ExtractionCache>, ytdlp: YtDlp) -> Self {
        Source::KNOWN
            .into_iter()
            .fold(Self::new(cache), |service, source| {
                service.with_provider(Arc::new(YtDlpProvider::new(source, ytdlp.clone())))
            })
    }

    /// Registers `provider` for its source, replacing any previous one.
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(provider.source(), provider);
        self
    }

    pub fn cache(&self) -> &Arc<ExtractionCache> {
        &self.cache
    }

    /// Lists the usable, de-duplicated formats of `url` in presentation order.
    pub async fn list_formats(&self, url: &str) -> Result<Media, MediaError> {
        let provider = self.provider_for(url)?;
        let extraction = self.extraction(url, provider.as_ref()).await?;

        let normalized = formats::normalize(provider.source(), &extraction.formats);
        let mut reduced = formats::reduce(normalized, provider.preferred_extension());
        formats::rank(&mut reduced);

        info!(
            %url,
            source = %provider.source(),
            raw = extraction.formats.len(),
            listed = reduced.len(),
            "listed formats"
        );
        Ok(Media {
            url: url.to_owned(),
            title: extraction.title.clone(),
            duration: extraction.duration.unwrap_or(0.0),
            formats: reduced,
        })
    }

    /// Finds the format whose stable identifier is `source_identifier` and
    /// opens its byte stream.
    pub async fn resolve_download(
        &self,
        url: &str,
        source_identifier: &str,
    ) -> Result<ResolvedDownload, MediaError> {
        self.resolve_format(url, source_identifier).await?.open().await
    }

    /// Finds the format whose stable identifier is `source_identifier`
    /// without starting a transfer.
    ///
    /// Every normalized format is eligible, not only the ones a listing
    /// shows. A cache miss triggers a fresh extraction.
    pub async fn resolve_format(
        &self,
        url: &str,
        source_identifier: &str,
    ) -> Result<ResolvedFormat, MediaError> {
        let provider = self.provider_for(url)?;
        let extraction = self.extraction(url, provider.as_ref()).await?;

        let format = formats::normalize(provider.source(), &extraction.formats)
            .into_iter()
            .find(|format| format.source_identifier == source_identifier)
            .ok_or_else(|| MediaError::FormatNotFound(source_identifier.to_owned()))?;
        let raw = extraction
            .formats
            .iter()
            .find(|raw| formats::stable_identifier(&raw.format_id) == source_identifier)
            .ok_or_else(|| MediaError::FormatNotFound(source_identifier.to_owned()))?;

        Ok(ResolvedFormat {
            url: url.to_owned(),
            title: extraction.title.clone(),
            duration: extraction.duration.unwrap_or(0.0),
            format,
            raw: raw.clone(),
            provider: provider.clone(),
        })
    }

    fn provider_for(&self, url: &str) -> Result<&Arc<dyn Provider>, MediaError> {
        let source = Source::classify(url);
        self.providers.get(&source).ok_or_else(|| {
            debug!(%url, %source, "rejecting unsupported source");
            MediaError::UnsupportedSource(format!("{source} ({url})"))
        })
    }

    /// Cached extraction for `url`, running the provider on a miss.
    ///
    /// Concurrent misses for the same URL each run the provider and the last
    /// write wins.
    async fn extraction(
        &self,
        url: &str,
        provider: &dyn Provider,
    ) -> Result<Arc<ExtractionResult>, MediaError> {
        if let Some(cached) = self.cache.get(url) {
            debug!(%url, "extraction cache hit");
            return Ok(cached);
        }

        debug!(%url, source = %provider.source(), "extraction cache miss");
        let result = provider.extract(url).await.map_err(|err| {
            warn!(%url, %err, "extraction failed");
            MediaError::from(err)
        })?;
        let result = Arc::new(result);
        self.cache.set(url, result.clone());
        Ok(result)
    }
}
