use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const FORBIDDEN: &[char] = &['\\', '/', ':', '*', '?', '"', '\'', '<', '>', '|'];

const FALLBACK_STEM: &str = "untitled";

const MAX_EXTENSION_LEN: usize = 5;

/// True for characters that never survive sanitization: the reserved set of
/// the strictest filesystem plus control and invisible format characters.
pub fn is_forbidden(c: char) -> bool {
    FORBIDDEN.contains(&c) || c.is_control() || is_invisible(c)
}

fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{206F}'
            | '\u{FEFF}'
            | '\u{FFF9}'..='\u{FFFB}'
            | '\u{E000}'..='\u{F8FF}'
    )
}

/// Accepts `mp3`, `m4a`, `webm`: 1 to 5 ASCII alphanumerics.
pub fn is_extension(ext: &str) -> bool {
    (1..=MAX_EXTENSION_LEN).contains(&ext.len()) && ext.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Splits `name` into stem and extension, the extension keeping its dot.
/// A leading dot never starts an extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 && is_extension(&name[pos + 1..]) => name.split_at(pos),
        _ => (name, ""),
    }
}

fn clean(raw: &str) -> String {
    let name: String = raw.nfkc().collect();
    let name = WS_RE.replace_all(&name, " ");
    let stripped: String = name.chars().filter(|c| !is_forbidden(*c)).collect();
    let name: String = stripped.nfkc().collect();
    let name = WS_RE.replace_all(&name, " ");
    name.trim().to_string()
}

/// True when `s` is already in the form `sanitize` produces for its characters.
pub fn is_clean(s: &str) -> bool {
    clean(s) == s
}

/// Turns an arbitrary title into a file name that is safe on every supported
/// filesystem and at most `max_bytes` long in UTF-8.
///
/// Truncation drops whole characters from the end of the stem, never from the
/// extension, and appends `marker` when there is room for it. Applying the
/// function to its own output returns the output unchanged.
pub fn sanitize(raw: &str, max_bytes: usize, marker: &str) -> String {
    let name = fit(&clean(raw), max_bytes, marker);
    // a cut name can end in something that reads as an extension (`abc .defgh`);
    // one more pass settles it into a form that fits unchanged
    fit(&name, max_bytes, marker)
}

fn fit(cleaned: &str, max_bytes: usize, marker: &str) -> String {
    let (stem, ext) = match cleaned.strip_prefix('.') {
        Some(rest) if is_extension(rest) => ("", cleaned),
        _ => split_extension(cleaned),
    };

    let (stem, ext) = if ext.len() >= max_bytes {
        (cleaned, "")
    } else {
        (stem.trim_end(), ext)
    };

    let stem = if stem.is_empty() { FALLBACK_STEM } else { stem };

    if stem.len() + ext.len() <= max_bytes {
        return format!("{}{}", stem, ext);
    }

    let budget = max_bytes - ext.len();
    if !marker.is_empty() && marker.len() < budget {
        let truncated = take_prefix(stem, budget - marker.len());
        if !truncated.is_empty() {
            return format!("{}{}{}", truncated, marker, ext);
        }
    }

    let kept = match take_prefix(stem, budget) {
        "" => take_prefix(FALLBACK_STEM, budget),
        kept => kept,
    };
    format!("{}{}", kept, ext)
}

/// Longest whole-character prefix of `s` within `budget` bytes, minus
/// trailing whitespace.
fn take_prefix(s: &str, budget: usize) -> &str {
    let mut end = 0;
    for (idx, ch) in s.char_indices() {
        if idx + ch.len_utf8() > budget {
            break;
        }
        end = idx + ch.len_utf8();
    }
    s[..end].trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 85;

    fn s(raw: &str) -> String {
        sanitize(raw, MAX, "...")
    }

    #[test]
    fn sanitize_strips_forbidden_chars() {
        assert_eq!(s("a:b?c.mp3"), "abc.mp3");
        assert_eq!(s("AC/DC - \"Back\" <In> |Black|*.mp3"), "ACDC - Back In Black.mp3");
        assert_eq!(s("Don't Stop.mp3"), "Dont Stop.mp3");
    }

    #[test]
    fn sanitize_windows_forbidden_paths() {
        for c in FORBIDDEN {
            let input = format!("test{}file.mp3", c);
            let result = s(&input);
            assert!(!result.contains(*c), "char '{}' should be removed", c);
            assert_eq!(result, "testfile.mp3");
        }
    }

    #[test]
    fn sanitize_collapses_whitespace() {
        assert_eq!(s("hello \t\n  world.mp3"), "hello world.mp3");
        assert_eq!(s("  padded  .mp3"), "padded.mp3");
    }

    #[test]
    fn sanitize_removes_invisible_chars() {
        assert_eq!(s("zero\u{200B}width\u{FEFF}.mp3"), "zerowidth.mp3");
        assert_eq!(s("bell\u{7}.mp3"), "bell.mp3");
    }

    #[test]
    fn sanitize_unicode_normalization() {
        let decomposed = "e\u{0301}.mp3";
        assert_eq!(s(decomposed), "\u{00e9}.mp3");
        assert_eq!(s("\u{FF21}\u{FF22}.mp3"), "AB.mp3");
    }

    #[test]
    fn stripping_between_base_and_combining_mark_still_composes() {
        assert_eq!(s("e?\u{0301}.mp3"), "\u{00e9}.mp3");
    }

    #[test]
    fn empty_title_falls_back() {
        assert_eq!(s("???.mp3"), "untitled.mp3");
        assert_eq!(s(""), "untitled");
    }

    #[test]
    fn extension_detection() {
        assert_eq!(split_extension("song.mp3"), ("song", ".mp3"));
        assert_eq!(split_extension("Mr. Brown goes home"), ("Mr. Brown goes home", ""));
        assert_eq!(split_extension(".hidden"), (".hidden", ""));
        assert_eq!(split_extension("trailing."), ("trailing.", ""));
    }

    #[test]
    fn truncation_keeps_extension_and_appends_marker() {
        let long = format!("{}.mp3", "a".repeat(200));
        let out = sanitize(&long, 20, "...");
        assert_eq!(out, format!("{}....mp3", "a".repeat(13)));
        assert_eq!(out.len(), 20);
    }

    #[test]
    fn truncation_without_marker() {
        let long = format!("{}.mp3", "b".repeat(50));
        assert_eq!(sanitize(&long, 20, ""), format!("{}.mp3", "b".repeat(16)));
    }

    #[test]
    fn multibyte_title_is_cut_on_char_boundary() {
        let title = format!("{}.mp3", "あ".repeat(40));
        let out = sanitize(&title, 20, "...");
        assert!(out.len() <= 20, "{} bytes", out.len());
        assert!(out.ends_with(".mp3"));
        let (stem, _) = split_extension(&out);
        let kept = stem.trim_end_matches("...");
        assert!(kept.chars().all(|c| c == 'あ'));
        assert_eq!(kept.chars().count(), 4);
    }

    #[test]
    fn truncation_trims_dangling_space() {
        let out = sanitize("abcdefghij klmnop.mp3", 16, "~");
        assert_eq!(out, "abcdefghij~.mp3");
    }

    #[test]
    fn oversized_extension_is_treated_as_stem() {
        let out = sanitize("abcdef.mp3", 4, "");
        assert_eq!(out, "abcd");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let samples = [
            "Video: \"Best of 2024\" <HD> | 1080p.mp4",
            "e?\u{0301} combining.mp3",
            "\u{FF34}\u{FF49}\u{FF54}\u{FF4C}\u{FF45}\u{3000}\u{FF08}fullwidth\u{FF09}",
            "   spaced   out   ",
            "v1.2 release notes and a lot more words to force truncation here",
            "日本語のタイトルがとても長い場合にはどうなるでしょうか、確認してみましょう.mp3",
            "emoji 🎵🎶🎸 party mix with a very long tail that keeps going and going.m4a",
            "abc .defgh zzzzzzzz",
            "a .mp3x",
            ".abあいう",
            "あ.mp3",
            "あいう",
            "...",
            "",
        ];
        for marker in ["...", "", "~"] {
            for max in [4usize, 5, 6, 10, 16, 20, 33, 85] {
                for raw in samples {
                    let once = sanitize(raw, max, marker);
                    let twice = sanitize(&once, max, marker);
                    assert_eq!(
                        once, twice,
                        "not idempotent for {:?} at {} with {:?}",
                        raw, max, marker
                    );
                }
            }
        }
    }

    #[test]
    fn cut_tail_that_looks_like_an_extension_is_settled() {
        assert_eq!(sanitize("abc .defgh zzzzzzzz", 10, ""), "abc.defgh");
    }

    #[test]
    fn stem_too_small_for_one_char_falls_back() {
        assert_eq!(sanitize("あ.mp3", 6, "..."), "un.mp3");
        assert_eq!(sanitize("あいう", 2, ""), "un");
    }

    #[test]
    fn byte_length_bound_holds() {
        let samples = [
            "a".repeat(300),
            "é".repeat(120),
            format!("{}.webm", "🎵".repeat(60)),
            format!("{} {}.mp3", "word".repeat(30), "ü".repeat(30)),
        ];
        for max in [16usize, 17, 18, 19, 20, 50, 85] {
            for raw in &samples {
                let out = sanitize(raw, max, "...");
                assert!(out.len() <= max, "{:?} is {} bytes > {}", out, out.len(), max);
            }
        }
    }

    #[test]
    fn clean_check() {
        assert!(is_clean("..."));
        assert!(is_clean("~"));
        assert!(!is_clean("\u{2026}"));
        assert!(!is_clean(" x"));
        assert!(!is_clean("a?"));
    }
}
