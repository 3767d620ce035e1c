#![forbid(unsafe_code)]

//! Public entry point for the media downloader core.
//!
//! The crate turns a resource URL into a ranked list of downloadable formats
//! by running `yt-dlp`, and streams a previously listed format back out. The
//! HTTP server in `src/bin/server.rs` is only glue around [`MediaService`].

pub mod cache;
pub mod config;
pub mod error;
pub mod formats;
pub mod provider;
pub mod service;
pub mod sources;
pub mod ytdlp;

pub use cache::{CacheConfig, ExpiringCache, ExtractionCache};
pub use error::{ExtractError, MediaError};
pub use formats::{AudioTrack, Format, Media, VideoTrack};
pub use provider::{ByteStream, Provider, YtDlpProvider};
pub use service::{MediaService, ResolvedDownload, ResolvedFormat};
pub use sources::Source;
pub use ytdlp::{ExtractionResult, RawFormat, YtDlp};
