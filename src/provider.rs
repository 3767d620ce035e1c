//! Provider seam: one implementation per supported [`Source`].
//!
//! The media service picks the provider matching a URL's classification and
//! only talks to it through this trait, which keeps tests free of subprocesses.

use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::error::ExtractError;
use crate::sources::Source;
use crate::ytdlp::{ExtractionResult, RawFormat, YtDlp};

/// Pull-based byte stream of a single format. Dropping it cancels the
/// underlying transfer.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[async_trait]
pub trait Provider: Send + Sync {
    fn source(&self) -> Source;

    /// Container in which near-duplicate video formats are collapsed.
    fn preferred_extension(&self) -> &str {
        "mp4"
    }

    /// Fetches the metadata document for `url`.
    async fn extract(&self, url: &str) -> Result<ExtractionResult, ExtractError>;

    /// Opens the bytes of `format`, which came from a previous extraction of
    /// the same `url`.
    async fn open_stream(&self, url: &str, format: &RawFormat) -> io::Result<ByteStream>;
}

/// Provider backed by the `yt-dlp` executable, which handles every source in
/// the closed set.
#[derive(Debug, Clone)]
pub struct YtDlpProvider {
    source: Source,
    ytdlp: YtDlp,
}

impl YtDlpProvider {
    pub fn new(source: Source, ytdlp: YtDlp) -> Self {
        Self { source, ytdlp }
    }
}

#[async_trait]
impl Provider for YtDlpProvider {
    fn source(&self) -> Source {
        self.source
    }

    async fn extract(&self, url: &str) -> Result<ExtractionResult, ExtractError> {
        self.ytdlp.extract(url).await
    }

    async fn open_stream(&self, url: &str, format: &RawFormat) -> io::Result<ByteStream> {
        self.ytdlp.open_format(url, &format.format_id)
    }
}
