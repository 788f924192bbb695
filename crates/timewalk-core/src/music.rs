//! Background music catalog.
//!
//! Matches an era/region/mood request from the guide to one of a small set of
//! curated tracks served by the frontend under `/music/`.

use serde::Serialize;

/// One curated track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MusicTrack {
    pub id: &'static str,
    pub title: &'static str,
    /// Path served by the frontend (e.g. `/music/ancient-mediterranean.mp3`).
    pub file: &'static str,
    pub era: &'static str,
    pub region: &'static str,
    pub mood: &'static str,
}

/// The fixed catalog. The first entry doubles as the fallback track.
pub const MUSIC_LIBRARY: &[MusicTrack] = &[
    MusicTrack {
        id: "ancient-mediterranean",
        title: "Glory of the Forum",
        file: "/music/ancient-mediterranean.mp3",
        era: "ancient",
        region: "europe",
        mood: "majestic",
    },
    MusicTrack {
        id: "medieval-europe-contemplative",
        title: "Stone Corridors",
        file: "/music/medieval-europe-contemplative.mp3",
        era: "medieval",
        region: "europe",
        mood: "contemplative",
    },
    MusicTrack {
        id: "ancient-egypt-dramatic",
        title: "Sands of the Delta",
        file: "/music/ancient-egypt-dramatic.mp3",
        era: "ancient",
        region: "africa",
        mood: "dramatic",
    },
    MusicTrack {
        id: "imperial-asia-peaceful",
        title: "Silk Road Dawn",
        file: "/music/imperial-asia-peaceful.mp3",
        era: "medieval",
        region: "asia",
        mood: "peaceful",
    },
    MusicTrack {
        id: "renaissance-adventurous",
        title: "New Horizons",
        file: "/music/renaissance-adventurous.mp3",
        era: "renaissance",
        region: "europe",
        mood: "adventurous",
    },
    MusicTrack {
        id: "modern-americas-contemplative",
        title: "City of Lights",
        file: "/music/modern-americas-contemplative.mp3",
        era: "modern",
        region: "americas",
        mood: "contemplative",
    },
];

fn score(track: &MusicTrack, era: &str, region: &str, mood: &str) -> u32 {
    let mut s = 0;
    if track.era.eq_ignore_ascii_case(era) {
        s += 2;
    }
    if track.region.eq_ignore_ascii_case(region) {
        s += 1;
    }
    if track.mood.eq_ignore_ascii_case(mood) {
        s += 1;
    }
    s
}

/// Pick the best track for `era`/`region`/`mood` from `library`.
///
/// Scoring: +2 era, +1 region, +1 mood. Ties keep catalog order. When nothing
/// matches at all the first track is returned; an empty library yields `None`.
pub fn select_from<'a>(
    library: &'a [MusicTrack],
    era: &str,
    region: &str,
    mood: &str,
) -> Option<&'a MusicTrack> {
    let mut best: Option<(&MusicTrack, u32)> = None;
    for track in library {
        let s = score(track, era.trim(), region.trim(), mood.trim());
        match best {
            Some((_, best_score)) if best_score >= s => {}
            _ => best = Some((track, s)),
        }
    }
    best.map(|(track, _)| track)
}

/// Pick the best track from [`MUSIC_LIBRARY`].
pub fn select_track(era: &str, region: &str, mood: &str) -> Option<&'static MusicTrack> {
    select_from(MUSIC_LIBRARY, era, region, mood)
}
