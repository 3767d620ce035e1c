use std::cmp::Ordering;

use super::Format;

/// Sorts formats for presentation: everything with video first (largest
/// resolution, then video bitrate, then size), then audio-only formats
/// (audio bitrate, then size). The sort is stable, so equal formats keep
/// their relative order and repeated calls give identical output.
pub fn rank(formats: &mut [Format]) {
    formats.sort_by(compare);
}

fn compare(a: &Format, b: &Format) -> Ordering {
    match (&a.video, &b.video) {
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(va), Some(vb)) => vb
            .resolution()
            .cmp(&va.resolution())
            .then_with(|| vb.bitrate.total_cmp(&va.bitrate))
            .then_with(|| b.size.cmp(&a.size)),
        (None, None) => b
            .audio_bitrate()
            .total_cmp(&a.audio_bitrate())
            .then_with(|| b.size.cmp(&a.size)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{AudioTrack, VideoTrack};
    use crate::sources::Source;

    fn video(id: &str, width: u32, height: u32, bitrate: f64, size: u64) -> Format {
        Format {
            video: Some(VideoTrack {
                codec: "avc1".into(),
                bitrate,
                width,
                height,
                fps: 30.0,
            }),
            audio: None,
            extension: "mp4".into(),
            size,
            source: Source::YouTube,
            source_identifier: id.into(),
        }
    }

    fn audio(id: &str, bitrate: f64, size: u64) -> Format {
        Format {
            video: None,
            audio: Some(AudioTrack {
                codec: "mp4a".into(),
                bitrate,
                sample_rate: 44100.0,
            }),
            extension: "m4a".into(),
            size,
            source: Source::YouTube,
            source_identifier: id.into(),
        }
    }

    fn ids(formats: &[Format]) -> Vec<&str> {
        formats
            .iter()
            .map(|format| format.source_identifier.as_str())
            .collect()
    }

    fn sample() -> Vec<Format> {
        vec![
            audio("audio-128", 128.0, 100),
            video("720p", 1280, 720, 2000.0, 500),
            audio("audio-160-small", 160.0, 50),
            video("1080p-low", 1920, 1080, 3000.0, 900),
            audio("audio-160-big", 160.0, 80),
            video("1080p-high", 1920, 1080, 5000.0, 800),
            video("1080p-high-bigger", 1920, 1080, 5000.0, 1200),
        ]
    }

    #[test]
    fn video_precedes_audio_and_orders_by_quality() {
        let mut formats = sample();
        rank(&mut formats);
        assert_eq!(
            ids(&formats),
            vec![
                "1080p-high-bigger",
                "1080p-high",
                "1080p-low",
                "720p",
                "audio-160-big",
                "audio-160-small",
                "audio-128",
            ]
        );
    }

    #[test]
    fn muxed_formats_rank_with_video() {
        let mut muxed = video("muxed", 640, 360, 500.0, 10);
        muxed.audio = Some(AudioTrack {
            codec: "mp4a".into(),
            bitrate: 320.0,
            sample_rate: 44100.0,
        });
        let mut formats = vec![audio("audio", 320.0, 10_000), muxed];
        rank(&mut formats);
        assert_eq!(ids(&formats), vec!["muxed", "audio"]);
    }

    #[test]
    fn ranking_is_deterministic_and_stable() {
        let mut once = sample();
        once.push(video("tie-a", 640, 360, 700.0, 10));
        once.push(video("tie-b", 640, 360, 700.0, 10));
        rank(&mut once);

        let mut twice = once.clone();
        rank(&mut twice);
        assert_eq!(once, twice);

        let tie_a = once.iter().position(|f| f.source_identifier == "tie-a");
        let tie_b = once.iter().position(|f| f.source_identifier == "tie-b");
        assert!(tie_a < tie_b);
    }
}
