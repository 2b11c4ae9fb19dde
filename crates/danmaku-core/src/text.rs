//! Filename parsing, episode-range compression, and small text utilities
//! shared by the match/search fallback engine and the compat API layer.

use once_cell::sync::Lazy;
use regex::Regex;

/// The outcome of parsing a media filename into a title/season/episode
/// triple. `episode` is `None` exactly when the input is a bare movie
/// title with no episode marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    pub title: String,
    pub season: i32,
    pub episode: Option<i32>,
}

impl ParsedFilename {
    /// Whether this parse denotes a movie (no episode number recovered).
    pub fn is_movie(&self) -> bool {
        self.episode.is_none()
    }

    /// Rebuild a canonical `Title SxxExx` (or bare title, for movies)
    /// string from the parsed components, used to check parser
    /// idempotence: `parse(x.reconstructed_title()) == x` for inputs
    /// that came from the SxxExx family.
    pub fn reconstructed_title(&self) -> String {
        match self.episode {
            Some(ep) => format!("{} S{:02}E{:02}", self.title, self.season, ep),
            None => self.title.clone(),
        }
    }
}

static EXT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.(mkv|mp4|avi|flv|ts|webm|mov|wmv)$").unwrap());

static SXXEXX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.*?)[\s._-]*S(\d{1,2})E(\d{1,4})\b.*$").unwrap());

static TITLE_DASH_NN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.*?)[\s._-]+-[\s._-]*(\d{1,4})(?:[\s._-].*)?$").unwrap());

static TRAILING_TAGS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[\s._-]*(1080p|720p|2160p|4k|bluray|blu-ray|web-?dl|hdtv|x264|x265|hevc)\b.*$")
        .unwrap()
});

fn strip_extension(name: &str) -> &str {
    match EXT_RE.find(name) {
        Some(m) => &name[..m.start()],
        None => name,
    }
}

fn clean_title(raw: &str) -> String {
    let stripped = TRAILING_TAGS_RE.replace(raw, "");
    stripped.replace(['.', '_'], " ").trim().to_string()
}

/// Parse a filename using, in order: `SxxExx`, `Title - NN`, and a bare
/// movie title fallback (no episode number recovered).
pub fn parse_filename(filename: &str) -> ParsedFilename {
    let stem = strip_extension(filename.trim());

    if let Some(caps) = SXXEXX_RE.captures(stem) {
        let title = clean_title(&caps[1]);
        let season: i32 = caps[2].parse().unwrap_or(1);
        let episode: i32 = caps[3].parse().unwrap_or(0);
        return ParsedFilename {
            title,
            season,
            episode: Some(episode),
        };
    }

    if let Some(caps) = TITLE_DASH_NN_RE.captures(stem) {
        let title = clean_title(&caps[1]);
        let episode: i32 = caps[2].parse().unwrap_or(0);
        return ParsedFilename {
            title,
            season: 1,
            episode: Some(episode),
        };
    }

    ParsedFilename {
        title: clean_title(stem),
        season: 1,
        episode: None,
    }
}

/// Compress a sorted list of episode numbers into a human-readable
/// range string, e.g. `[1,2,3,5,6,7,10] -> "1-3,5-7,10"`.
///
/// Singleton runs render as a bare number; an empty input renders as
/// the empty string. Input need not be pre-sorted or de-duplicated.
pub fn format_episode_ranges(episodes: &[i32]) -> String {
    if episodes.is_empty() {
        return String::new();
    }
    let mut sorted: Vec<i32> = episodes.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges = Vec::new();
    let mut start = sorted[0];
    let mut prev = sorted[0];

    for &n in &sorted[1..] {
        if n == prev + 1 {
            prev = n;
            continue;
        }
        ranges.push(render_range(start, prev));
        start = n;
        prev = n;
    }
    ranges.push(render_range(start, prev));
    ranges.join(",")
}

fn render_range(start: i32, end: i32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sxxexx() {
        let p = parse_filename("Spy Family S01E03 1080p BluRay.mkv");
        assert_eq!(p.title, "Spy Family");
        assert_eq!(p.season, 1);
        assert_eq!(p.episode, Some(3));
        assert!(!p.is_movie());
    }

    #[test]
    fn parses_title_dash_nn() {
        let p = parse_filename("SomeShow - 25.mkv");
        assert_eq!(p.title, "SomeShow");
        assert_eq!(p.season, 1);
        assert_eq!(p.episode, Some(25));
    }

    #[test]
    fn parses_bare_movie_title() {
        let p = parse_filename("Your Name 2016 1080p BluRay.mkv");
        assert!(p.is_movie());
        assert_eq!(p.episode, None);
    }

    #[test]
    fn sxxexx_family_is_idempotent_on_reconstruction() {
        let original = parse_filename("Spy Family S01E03 1080p BluRay.mkv");
        let reparsed = parse_filename(&original.reconstructed_title());
        assert_eq!(reparsed.title, original.title);
        assert_eq!(reparsed.season, original.season);
        assert_eq!(reparsed.episode, original.episode);
    }

    #[test]
    fn format_episode_ranges_matches_spec_example() {
        assert_eq!(format_episode_ranges(&[1, 2, 3, 5, 6, 7, 10]), "1-3,5-7,10");
    }

    #[test]
    fn format_episode_ranges_singleton_and_empty() {
        assert_eq!(format_episode_ranges(&[4]), "4");
        assert_eq!(format_episode_ranges(&[]), "");
    }

    #[test]
    fn format_episode_ranges_handles_unsorted_and_duplicates() {
        assert_eq!(format_episode_ranges(&[3, 1, 2, 2, 5]), "1-3,5");
    }
}
