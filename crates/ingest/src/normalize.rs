//! Chapter label normalization.
//!
//! Sources disagree wildly on chapter labels ("Chapter 10.5", "ch. 3",
//! "#12", "Extra: hot springs"). Normalization reduces every label to a
//! numeric value (when one exists), a kind, and a slug; the canonical
//! number string is the logical chapter identity within a series, with
//! `"-1"` standing in for unnumbered chapters.

use sha2::{Digest, Sha256};

use mangatrack_core::ChapterKind;

/// Result of normalizing one raw chapter label.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedChapter {
    pub number: Option<f64>,
    pub kind: ChapterKind,
    pub slug: String,
}

const SPECIAL_TOKENS: &[&str] = &["special", "oneshot", "one-shot", "one shot"];
const EXTRA_TOKENS: &[&str] = &["extra", "omake"];

/// Normalize a raw label (and optional title, used for the slug fallback).
pub fn normalize_label(label: &str, title: Option<&str>) -> NormalizedChapter {
    let lower = label.trim().to_lowercase();
    let stripped = strip_prefixes(&lower);

    let kind = detect_kind(&lower);
    let number = parse_first_number(stripped);

    let slug = match number {
        Some(n) => format!("{}-{}", kind.as_str(), canonical_number(n)),
        None => {
            let basis = title.filter(|t| !t.trim().is_empty()).unwrap_or(label);
            format!("{}-{}", kind.as_str(), title_hash20(basis))
        }
    };

    NormalizedChapter { number, kind, slug }
}

/// Strip leading chapter-word prefixes: `chapter`, `ch`, `ch.`, `#`.
fn strip_prefixes(label: &str) -> &str {
    let mut rest = label.trim_start();
    loop {
        let before = rest;
        for prefix in ["chapter", "ch.", "ch", "#"] {
            if let Some(tail) = rest.strip_prefix(prefix) {
                rest = tail.trim_start_matches(['.', ':', ' ', '\t']);
                break;
            }
        }
        if rest == before {
            return rest;
        }
    }
}

fn detect_kind(label: &str) -> ChapterKind {
    if SPECIAL_TOKENS.iter().any(|t| label.contains(t)) {
        ChapterKind::Special
    } else if EXTRA_TOKENS.iter().any(|t| label.contains(t)) {
        ChapterKind::Extra
    } else {
        ChapterKind::Normal
    }
}

/// First decimal numeric match in the string ("12", "10.5").
fn parse_first_number(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let start = bytes.iter().position(|b| b.is_ascii_digit())?;
    let mut end = start;
    let mut seen_dot = false;
    while end < bytes.len() {
        let b = bytes[end];
        if b.is_ascii_digit() {
            end += 1;
        } else if b == b'.' && !seen_dot && end + 1 < bytes.len() && bytes[end + 1].is_ascii_digit()
        {
            seen_dot = true;
            end += 1;
        } else {
            break;
        }
    }
    text[start..end].parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Canonical string for a chapter number: trailing zeros removed
/// (`1.00 → "1"`, `1.50 → "1.5"`).
pub fn canonical_number(n: f64) -> String {
    // f64 Display already prints the shortest round-trip representation.
    format!("{}", n)
}

/// Identity key for `(series, chapter)`: the canonical number, or the
/// `"-1"` sentinel for unnumbered chapters.
pub fn identity_key(number: Option<f64>) -> String {
    match number {
        Some(n) => canonical_number(n),
        None => "-1".to_string(),
    }
}

/// First 20 hex chars of the SHA-256 of a title, for unnumbered slugs.
pub fn title_hash20(title: &str) -> String {
    let digest = Sha256::digest(title.trim().to_lowercase().as_bytes());
    hex::encode(digest)[..20].to_string()
}

/// The preceding integer chapter a gap check should look for, when
/// `number` is above 1: `2.5 → 2`, `3 → 2`. Returns `None` at or below 1.
pub fn missing_previous_integer(number: f64) -> Option<i64> {
    if number <= 1.0 {
        return None;
    }
    let prev = if number.fract() > 0.0 { number.floor() } else { number - 1.0 };
    (prev >= 1.0).then_some(prev as i64)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_numbers() {
        let n = normalize_label("12", None);
        assert_eq!(n.number, Some(12.0));
        assert_eq!(n.kind, ChapterKind::Normal);
        assert_eq!(n.slug, "normal-12");
    }

    #[test]
    fn test_prefixes_stripped() {
        for label in ["Chapter 7", "ch 7", "ch.7", "#7", "CH 7", "chapter: 7"] {
            let n = normalize_label(label, None);
            assert_eq!(n.number, Some(7.0), "label {:?}", label);
        }
    }

    #[test]
    fn test_decimal_chapters() {
        let n = normalize_label("Chapter 10.5", None);
        assert_eq!(n.number, Some(10.5));
        assert_eq!(n.slug, "normal-10.5");
    }

    #[test]
    fn test_number_embedded_in_text() {
        let n = normalize_label("vol 2 ch 3", None);
        // First numeric match wins.
        assert_eq!(n.number, Some(2.0));
    }

    #[test]
    fn test_kind_detection() {
        assert_eq!(normalize_label("Extra 2", None).kind, ChapterKind::Extra);
        assert_eq!(normalize_label("omake", None).kind, ChapterKind::Extra);
        assert_eq!(normalize_label("Special chapter", None).kind, ChapterKind::Special);
        assert_eq!(normalize_label("Oneshot", None).kind, ChapterKind::Special);
        assert_eq!(normalize_label("Chapter 4", None).kind, ChapterKind::Normal);
    }

    #[test]
    fn test_unnumbered_uses_title_hash() {
        let n = normalize_label("Oneshot", Some("The Garden"));
        assert_eq!(n.number, None);
        assert!(n.slug.starts_with("special-"));
        let hash = n.slug.strip_prefix("special-").unwrap();
        assert_eq!(hash.len(), 20);
        assert_eq!(hash, title_hash20("The Garden"));
        // Same title, same slug.
        assert_eq!(normalize_label("Oneshot", Some("the garden")).slug, n.slug);
    }

    #[test]
    fn test_unnumbered_without_title_hashes_label() {
        let n = normalize_label("extra", None);
        assert_eq!(n.number, None);
        assert_eq!(n.slug, format!("extra-{}", title_hash20("extra")));
    }

    #[test]
    fn test_canonical_number_strips_trailing_zeros() {
        assert_eq!(canonical_number(1.00), "1");
        assert_eq!(canonical_number(1.50), "1.5");
        assert_eq!(canonical_number(10.25), "10.25");
        assert_eq!(canonical_number(100.0), "100");
    }

    #[test]
    fn test_identity_key_sentinel() {
        assert_eq!(identity_key(Some(2.0)), "2");
        assert_eq!(identity_key(None), "-1");
    }

    #[test]
    fn test_missing_previous_integer() {
        assert_eq!(missing_previous_integer(3.0), Some(2));
        assert_eq!(missing_previous_integer(2.5), Some(2));
        assert_eq!(missing_previous_integer(2.0), Some(1));
        assert_eq!(missing_previous_integer(1.0), None);
        assert_eq!(missing_previous_integer(0.5), None);
        assert_eq!(missing_previous_integer(1.5), Some(1));
    }

    #[test]
    fn test_trailing_dot_not_swallowed() {
        let n = normalize_label("Chapter 12. The End", None);
        assert_eq!(n.number, Some(12.0));
    }
}
