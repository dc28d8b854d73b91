//! Filename and title handling
//!
//! Local and remote saves are joined on a *base name*: the file name without
//! its extension and without the sync timestamp suffix that uploads carry
//! (` [YYYY-MM-DD HH-MM-SS-mmm]`). This module owns those rules, the timestamp
//! formats written into backup and upload names, and the title normalization
//! and edit-distance similarity used for fuzzy identity matching.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Trailing timestamp appended to uploaded save names
static TIMESTAMP_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r" \[\d{4}-\d{2}-\d{2} \d{2}-\d{2}-\d{2}-\d{3}\]$").expect("valid timestamp regex")
});

/// Parenthesized tags such as `(USA)` or `(GBA)`
static PAREN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((.*?)\)").expect("valid tag regex"));

/// Bracketed tags such as `[!]` or `[T+Eng]`
static BRACKET_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[.*?\]").expect("valid bracket regex"));

/// Ordering prefixes some firmwares put on folder names, e.g. `01) `
static ORDER_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\)\s").expect("valid order prefix regex"));

const UPLOAD_TIMESTAMP_FORMAT: &str = "[%Y-%m-%d %H-%M-%S-%3f]";
const BACKUP_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H-%M-%S";

/// Split a file name into stem and extension
///
/// The extension is the text after the last `.` when it is non-empty and
/// purely alphanumeric, so titles such as `Super Mario Bros. 3` keep their
/// trailing words. The returned extension includes the leading dot.
pub fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => {
            let ext = &file_name[idx + 1..];
            if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
                (&file_name[..idx], &file_name[idx..])
            } else {
                (file_name, "")
            }
        }
        _ => (file_name, ""),
    }
}

/// File name without its extension
pub fn strip_extension(file_name: &str) -> &str {
    split_extension(file_name).0
}

/// Extension of a file name including the leading dot, or `""`
pub fn extension(file_name: &str) -> &str {
    split_extension(file_name).1
}

/// Ensure an extension starts with a dot (`"sav"` becomes `".sav"`)
pub fn normalize_extension(ext: &str) -> String {
    if ext.is_empty() || ext.starts_with('.') {
        ext.to_string()
    } else {
        format!(".{}", ext)
    }
}

/// Remove a trailing ` [YYYY-MM-DD HH-MM-SS-mmm]` suffix if present
///
/// ```
/// use savesync::naming::strip_timestamp_suffix;
///
/// assert_eq!(strip_timestamp_suffix("Pokemon Red [2024-01-02 15-04-05-000]"), "Pokemon Red");
/// assert_eq!(strip_timestamp_suffix("Pokemon Red"), "Pokemon Red");
/// ```
pub fn strip_timestamp_suffix(name: &str) -> &str {
    match TIMESTAMP_SUFFIX.find(name) {
        Some(m) => &name[..m.start()],
        None => name,
    }
}

/// Format the suffix appended to staged uploads
pub fn upload_timestamp(time: &DateTime<Utc>) -> String {
    time.format(UPLOAD_TIMESTAMP_FORMAT).to_string()
}

/// Name for a backup copy: `<stem> [YYYY-MM-DD HH-MM-SS]<ext>`
pub fn backup_file_name(file_name: &str, modified: &DateTime<Utc>) -> String {
    let (stem, ext) = split_extension(file_name);
    format!("{} [{}]{}", stem, modified.format(BACKUP_TIMESTAMP_FORMAT), ext)
}

/// Extract the parenthesized tag(s) from a directory name
///
/// Multiple tags are joined with a single space; `None` when there are none.
///
/// ```
/// use savesync::naming::parse_tag;
///
/// assert_eq!(parse_tag("Game Boy Advance (GBA)"), Some("GBA".to_string()));
/// assert_eq!(parse_tag("Roms"), None);
/// ```
pub fn parse_tag(name: &str) -> Option<String> {
    let tags: Vec<&str> = PAREN_TAG
        .captures_iter(name)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();

    if tags.is_empty() {
        return None;
    }

    let joined = tags.join(" ");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// Normalize a file name or catalog title for fuzzy comparison
///
/// Strips the extension and any `(...)` / `[...]` tags, lowercases, turns
/// `-`, `_` and `.` into spaces and collapses whitespace.
pub fn normalize_for_comparison(name: &str) -> String {
    let mut cleaned = PAREN_TAG.replace_all(strip_extension(name), "").into_owned();

    if let Some(prefix) = ORDER_PREFIX.find(&cleaned) {
        let prefix = prefix.as_str().to_string();
        cleaned = cleaned.replace(&prefix, "");
    }

    let cleaned = cleaned.replace(':', " -");
    let cleaned = BRACKET_TAG.replace_all(cleaned.trim(), "");

    let lowered: String = cleaned
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if matches!(c, '-' | '_' | '.') { ' ' } else { c })
        .collect();

    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Levenshtein edit distance over Unicode scalar values
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// Similarity in `[0, 1]`: `1 - distance / max(len(a), len(b))`
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }

    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }

    1.0 - edit_distance(a, b) as f64 / max_len as f64
}
