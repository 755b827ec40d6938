use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};

// From Radarr Radarr/src/NzbDrone.Core/MediaFiles/MediaFileExtensions.cs
pub const MEDIA_EXTENSIONS: &[&str] = &[
    ".m4v", ".3gp", ".nsv", ".ty", ".strm", ".rm", ".rmvb", ".m3u", ".ifo", ".mov", ".qt",
    ".divx", ".xvid", ".bivx", ".nrg", ".pva", ".wmv", ".asf", ".asx", ".ogm", ".ogv", ".m2v",
    ".avi", ".bin", ".dat", ".dvr-ms", ".mpg", ".mpeg", ".mp4", ".avc", ".vp3", ".svq3", ".nuv",
    ".viv", ".dv", ".fli", ".flv", ".wpl", ".img", ".iso", ".vob", ".mkv", ".mk3d", ".ts",
    ".wtv", ".m2ts", ".webm",
];

pub fn is_media_path(path: &str) -> bool {
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some(ext) => {
            let ext = format!(".{}", ext.to_ascii_lowercase());
            MEDIA_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

// From Radarr Radarr/src/NzbDrone.Core/Organizer/FileNameBuilder.cs
pub fn clean_file_name(name: &str) -> String {
    const BAD: &[char] = &['\\', '/', '<', '>', '?', '*', ':', '|', '"'];
    const GOOD: &[&str] = &["+", "+", "", "", "!", "-", "", "", ""];

    let mut result = name.to_owned();
    for (bad, good) in BAD.iter().zip(GOOD) {
        result = result.replace(*bad, good);
    }
    result.trim().to_owned()
}

// The original patterns are lookarounds; the regex crate has none, so the
// context is captured instead and re-emitted on substitution.
static SEASON_RANGE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\W_][Ss]eason[\W_])(\d[\W_]\d{1,2})([\W_])").unwrap());
static SEASON_RANGE_COMPACT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\W_][Ss])(\d{2}[\W_][Ss]?\d{2})([\W_])").unwrap());

static EPISODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"S(\d{2})E\d{2}").unwrap());
static EPISODE_SPAN_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\W_]\d{2}[\W_]").unwrap());

/// True when a release stem names a season range, e.g. `Season 1-3` or
/// `S01.S03`. Such grabs contain episodes of several seasons and get
/// split into per-season completed folders.
pub fn is_multi_season(stem: &str) -> bool {
    SEASON_RANGE_WORD.is_match(stem) || SEASON_RANGE_COMPACT.is_match(stem)
}

/// Rewrite a multi-season stem into the folder name for one season:
/// every season-range occurrence is replaced by the given two-digit
/// season (word form takes it without the leading zero).
pub fn season_folder_stem(stem: &str, season: &str) -> String {
    let short = season.strip_prefix('0').unwrap_or(season);
    let stem = SEASON_RANGE_WORD.replace_all(stem, |c: &Captures| {
        format!("{}{}{}", &c[1], short, &c[3])
    });
    SEASON_RANGE_COMPACT
        .replace_all(&stem, |c: &Captures| format!("{}{}{}", &c[1], season, &c[3]))
        .into_owned()
}

/// The two-digit season of an `SxxEyy` episode filename.
pub fn episode_season(filename: &str) -> Option<&str> {
    EPISODE
        .captures(filename)
        .map(|c| c.get(1).unwrap().as_str())
}

/// True for filenames naming exactly one episode (`S01E02`), false for
/// multi-episode spans (`S01E01.02`) and season packs.
pub fn is_single_episode(name: &str) -> bool {
    EPISODE
        .find_iter(name)
        .any(|m| !EPISODE_SPAN_TAIL.is_match(&name[m.end()..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_media_path() {
        assert!(is_media_path("Show.S01E01.mkv"));
        assert!(is_media_path("some/dir/Movie.MP4"));
        assert!(is_media_path("old.dvr-ms"));
        assert!(!is_media_path("sample.nfo"));
        assert!(!is_media_path("no_extension"));
    }

    #[test]
    fn test_clean_file_name() {
        assert_eq!(clean_file_name("a/b?c"), "a+b!c");
        assert_eq!(clean_file_name("Movie: The \"Sequel\""), "Movie The Sequel");
        assert_eq!(clean_file_name("what*ever|else\\x"), "what-everelse+x");
        // Trimmed after substitution.
        assert_eq!(clean_file_name(" name< "), "name");
    }

    #[test]
    fn test_multi_season_detection() {
        assert!(is_multi_season("Show.Name.Season.1.3.1080p"));
        assert!(is_multi_season("Show.Name.S01.S02.1080p"));
        assert!(is_multi_season("Show_Name_S01_02_WEB"));
        assert!(!is_multi_season("Show.Name.S01.1080p"));
        assert!(!is_multi_season("Show.Name.S01E02.1080p"));
    }

    #[test]
    fn test_season_folder_stem_word_form() {
        assert_eq!(
            season_folder_stem("Show.Name.Season.1.3.1080p", "03"),
            "Show.Name.Season.3.1080p"
        );
    }

    #[test]
    fn test_season_folder_stem_compact_form() {
        assert_eq!(
            season_folder_stem("Show.Name.S01.S02.1080p", "01"),
            "Show.Name.S01.1080p"
        );
        assert_eq!(
            season_folder_stem("Show.Name.S01.S02.1080p", "02"),
            "Show.Name.S02.1080p"
        );
    }

    #[test]
    fn test_episode_season() {
        assert_eq!(episode_season("Show.S03E07.mkv"), Some("03"));
        assert_eq!(episode_season("Show.Season.3.mkv"), None);
    }

    #[test]
    fn test_is_single_episode() {
        assert!(is_single_episode("Show.S01E02.1080p.mkv"));
        assert!(!is_single_episode("Show.S01E01.02.1080p.mkv"));
        assert!(!is_single_episode("Show.S01.1080p.mkv"));
    }
}
