//! Error types shared by the extraction layer and the media service.

use std::io;

/// Failures produced while running `yt-dlp` for metadata.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The process could not be started at all.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The process ran but reported a failure: stderr output, a non-zero
    /// exit status, or a timeout.
    #[error("{program} failed: {message}")]
    Tool { program: String, message: String },

    /// Standard output was not a metadata document we understand.
    #[error("failed to parse {program} output: {source}")]
    Parse {
        program: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ExtractError {
    pub fn tool(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            program: program.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by [`crate::MediaService`] operations.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// The URL does not belong to any supported provider.
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    #[error(transparent)]
    Extraction(#[from] ExtractError),

    /// No format with the given stable identifier exists in the current
    /// extraction, e.g. because the cached result expired in between.
    #[error("format not found: {0}")]
    FormatNotFound(String),

    /// The provider stream could not be opened.
    #[error("failed to open stream: {0}")]
    Stream(#[source] io::Error),
}

impl MediaError {
    /// True for failures caused by the caller's input rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::UnsupportedSource(_))
    }
}
