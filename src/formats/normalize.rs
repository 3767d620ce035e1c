use crate::sources::Source;
use crate::ytdlp::RawFormat;

use super::{AudioTrack, Format, VideoTrack};

const STORYBOARD_NOTE: &str = "storyboard";
const NO_CODEC: &str = "none";

/// Hex BLAKE3 digest of the provider's format id.
///
/// Only the id goes into the hash, so the same provider format slot maps to
/// the same identifier across extractions even when measured fields such as
/// bitrate drift between runs.
pub fn stable_identifier(format_id: &str) -> String {
    blake3::hash(format_id.as_bytes()).to_hex().to_string()
}

/// Converts raw extractor records into canonical formats, dropping
/// storyboards (thumbnail grids that are not playable media).
pub fn normalize(source: Source, raw: &[RawFormat]) -> Vec<Format> {
    raw.iter()
        .filter(|format| !is_storyboard(format))
        .map(|format| normalize_one(source, format))
        .collect()
}

fn normalize_one(source: Source, raw: &RawFormat) -> Format {
    let video = usable_codec(raw.vcodec.as_deref()).map(|codec| VideoTrack {
        codec: codec.to_owned(),
        bitrate: raw.vbr.unwrap_or(0.0),
        width: raw.width.unwrap_or(0),
        height: raw.height.unwrap_or(0),
        fps: raw.fps.unwrap_or(0.0),
    });
    let audio = usable_codec(raw.acodec.as_deref()).map(|codec| AudioTrack {
        codec: codec.to_owned(),
        bitrate: raw.abr.unwrap_or(0.0),
        sample_rate: raw.asr.unwrap_or(0.0),
    });

    Format {
        video,
        audio,
        extension: raw.ext.clone().unwrap_or_default(),
        size: raw
            .filesize
            .unwrap_or(0)
            .max(raw.filesize_approx.unwrap_or(0)),
        source,
        source_identifier: stable_identifier(&raw.format_id),
    }
}

fn is_storyboard(raw: &RawFormat) -> bool {
    raw.format_note
        .as_deref()
        .is_some_and(|note| note.trim().eq_ignore_ascii_case(STORYBOARD_NOTE))
}

fn usable_codec(codec: Option<&str>) -> Option<&str> {
    codec
        .map(str::trim)
        .filter(|codec| !codec.is_empty() && !codec.eq_ignore_ascii_case(NO_CODEC))
}
