use std::collections::HashMap;
use std::collections::hash_map::Entry;

use super::Format;

/// Drops unusable formats and collapses near-duplicates.
///
/// A format survives the pre-filter only if it has a known size and a
/// positive video or audio bitrate. Video formats in `preferred_extension`
/// are then grouped by (width, height, fps) and audio-only formats by
/// extension; each group keeps its highest-bitrate member, the first one
/// seen on ties. Everything else passes through, in input order.
pub fn reduce(formats: Vec<Format>, preferred_extension: &str) -> Vec<Format> {
    let formats: Vec<Format> = formats.into_iter().filter(is_usable).collect();
    let mut keep = vec![true; formats.len()];

    {
        let mut best_video: HashMap<(u32, u32, u64), usize> = HashMap::new();
        let mut best_audio: HashMap<&str, usize> = HashMap::new();

        for (index, format) in formats.iter().enumerate() {
            if let Some(video) = format
                .video
                .as_ref()
                .filter(|_| format.extension == preferred_extension)
            {
                let class = (video.width, video.height, video.fps.to_bits());
                track_best(&mut best_video, class, index, &formats, &mut keep, |f| {
                    f.video_bitrate()
                });
            } else if format.is_audio_only() {
                let class = format.extension.as_str();
                track_best(&mut best_audio, class, index, &formats, &mut keep, |f| {
                    f.audio_bitrate()
                });
            }
        }
    }

    formats
        .into_iter()
        .zip(keep)
        .filter_map(|(format, keep)| keep.then_some(format))
        .collect()
}

fn is_usable(format: &Format) -> bool {
    format.size > 0 && (format.video_bitrate() > 0.0 || format.audio_bitrate() > 0.0)
}

fn track_best<K: std::hash::Hash + Eq>(
    best: &mut HashMap<K, usize>,
    class: K,
    index: usize,
    formats: &[Format],
    keep: &mut [bool],
    bitrate: impl Fn(&Format) -> f64,
) {
    match best.entry(class) {
        Entry::Vacant(slot) => {
            slot.insert(index);
        }
        Entry::Occupied(mut slot) => {
            let current = *slot.get();
            if bitrate(&formats[index]) > bitrate(&formats[current]) {
                keep[current] = false;
                slot.insert(index);
            } else {
                keep[index] = false;
            }
        }
    }
}
