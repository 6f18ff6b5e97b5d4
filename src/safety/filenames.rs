//! Upload file name sanitization.

use std::collections::HashSet;

/// Name used when sanitization leaves nothing usable.
const FALLBACK_NAME: &str = "upload";

/// Stems already taken within one run.
///
/// Uniqueness is tracked on the stem because derived artifacts (`.ply`,
/// `.preview.jpg`, `.mp4`) are named after it.
pub type UsedNames = HashSet<String>;

/// Strip directory components and drop characters outside `[A-Za-z0-9._-]`.
///
/// Whitespace becomes `_`. Unicode letters and digits are kept. A result that
/// is empty or made only of dots falls back to `"upload"`.
pub fn safe_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let filtered: String = base
        .chars()
        .map(|ch| if ch.is_whitespace() { '_' } else { ch })
        .filter(|ch| ch.is_alphanumeric() || matches!(ch, '.' | '_' | '-'))
        .collect();

    if filtered.trim_matches('.').is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        filtered
    }
}

/// Split `name` into stem and extension (the extension keeps its dot).
///
/// A leading dot (`.hidden`) or a trailing dot (`name.`) does not start an
/// extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 && i < name.len() - 1 => name.split_at(i),
        _ => (name, ""),
    }
}

/// Make `name` unique within a run by inserting `-N` before the extension.
pub fn unique_filename(name: &str, used: &mut UsedNames) -> String {
    let (stem, ext) = split_extension(name);
    let mut candidate = stem.to_string();
    let mut counter = 1;
    while used.contains(&candidate) {
        candidate = format!("{}-{}", stem, counter);
        counter += 1;
    }
    let unique = format!("{}{}", candidate, ext);
    used.insert(candidate);
    unique
}

/// Prefix with the two-digit, 1-based submission index.
pub fn indexed_filename(index: usize, name: &str) -> String {
    format!("{:02}_{}", index, name)
}
