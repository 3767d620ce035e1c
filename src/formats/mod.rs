//! Provider-agnostic description of downloadable formats.
//!
//! Raw extractor records are turned into [`Format`]s by [`normalize`], thinned
//! out by [`reduce`] and put into presentation order by [`rank`]. The structs
//! here are what the API serializes back to the frontend.

mod normalize;
mod rank;
mod reduce;

pub use normalize::{normalize, stable_identifier};
pub use rank::rank;
pub use reduce::reduce;

use serde::Serialize;
use serde::ser::{SerializeStruct, Serializer};

use crate::sources::Source;

/// Video half of a format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoTrack {
    pub codec: String,
    /// Kilobits per second, 0 when the extractor did not report it.
    pub bitrate: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl VideoTrack {
    pub fn resolution(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Audio half of a format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioTrack {
    pub codec: String,
    /// Kilobits per second, 0 when the extractor did not report it.
    pub bitrate: f64,
    pub sample_rate: f64,
}

/// One downloadable variant of a resource.
///
/// A format may carry video, audio or both; the capability flags are derived
/// from which tracks are present so they can never disagree with them.
#[derive(Debug, Clone, PartialEq)]
pub struct Format {
    pub video: Option<VideoTrack>,
    pub audio: Option<AudioTrack>,
    pub extension: String,
    /// Best known size in bytes, 0 when unknown.
    pub size: u64,
    pub source: Source,
    /// Stable identifier, see [`stable_identifier`].
    pub source_identifier: String,
}

impl Format {
    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn is_audio_only(&self) -> bool {
        self.audio.is_some() && self.video.is_none()
    }

    pub fn video_bitrate(&self) -> f64 {
        self.video.as_ref().map_or(0.0, |video| video.bitrate)
    }

    pub fn audio_bitrate(&self) -> f64 {
        self.audio.as_ref().map_or(0.0, |audio| audio.bitrate)
    }
}

impl Serialize for Format {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Format", 8)?;
        state.serialize_field("has_video", &self.has_video())?;
        state.serialize_field("video", &self.video)?;
        state.serialize_field("has_audio", &self.has_audio())?;
        state.serialize_field("audio", &self.audio)?;
        state.serialize_field("extension", &self.extension)?;
        state.serialize_field("size", &self.size)?;
        state.serialize_field("source", &self.source)?;
        state.serialize_field("source_identifier", &self.source_identifier)?;
        state.end()
    }
}

/// Response for a format listing: resource metadata plus the ranked formats.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Media {
    pub url: String,
    pub title: String,
    /// Seconds, 0 when unknown (e.g. live streams).
    pub duration: f64,
    pub formats: Vec<Format>,
}
