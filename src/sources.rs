//! Maps resource URLs onto the closed set of supported providers.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "youtu.be",
    "www.youtu.be",
    "youtube-nocookie.com",
    "www.youtube-nocookie.com",
];

const VIMEO_HOSTS: &[&str] = &["vimeo.com", "www.vimeo.com", "player.vimeo.com"];

/// Provider a resource belongs to.
///
/// Serialized as a small integer so the frontend can hand it back verbatim in
/// the `source` query parameter of a download request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    YouTube,
    Vimeo,
    Unknown,
}

impl Source {
    /// Every provider that can actually be served, in classification order.
    pub const KNOWN: [Source; 2] = [Source::YouTube, Source::Vimeo];

    /// Classifies `url` by exact (lowercased) hostname match. Unparseable URLs
    /// and unlisted hosts, including unlisted subdomains, are `Unknown`.
    pub fn classify(url: &str) -> Source {
        let Ok(parsed) = Url::parse(url) else {
            return Source::Unknown;
        };
        let Some(host) = parsed.host_str() else {
            return Source::Unknown;
        };
        let host = host.to_ascii_lowercase();

        Self::KNOWN
            .into_iter()
            .find(|source| source.hostnames().contains(&host.as_str()))
            .unwrap_or(Source::Unknown)
    }

    pub fn hostnames(self) -> &'static [&'static str] {
        match self {
            Source::YouTube => YOUTUBE_HOSTS,
            Source::Vimeo => VIMEO_HOSTS,
            Source::Unknown => &[],
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Source::YouTube => 0,
            Source::Vimeo => 1,
            Source::Unknown => u8::MAX,
        }
    }

    /// Inverse of [`Source::id`]; unrecognized ids map to `Unknown`.
    pub fn from_id(id: u8) -> Source {
        match id {
            0 => Source::YouTube,
            1 => Source::Vimeo,
            _ => Source::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Source::YouTube => "YouTube",
            Source::Vimeo => "Vimeo",
            Source::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Source {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.id())
    }
}

impl<'de> Deserialize<'de> for Source {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u8::deserialize(deserializer).map(Source::from_id)
    }
}
