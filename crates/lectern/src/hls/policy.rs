//! Heuristics kept as small named functions so their edge cases can be
//! tested on their own.

use url::Url;

/// Filename markers of tracks that carry no program content.
const NON_PROGRAM_MARKERS: &[&str] = &["thumbnail", "thumbs", "sprite", "subtitle", "caption"];

/// Language codes recognised as a trailing subtitle filename token.
const LANGUAGE_CODES: &[&str] = &[
    "en", "ko", "ja", "jp", "zh", "cn", "tw", "es", "fr", "de", "it", "pt", "ru", "vi", "th",
    "ar", "tr", "nl", "pl", "sv", "eng", "kor", "jpn", "chi", "zho", "spa", "fra",
    "fre", "deu", "ger", "ita", "por", "rus", "vie",
];

/// Query parameter names that mark a URL as already signed.
const SIGNING_PARAMS: &[&str] = &[
    "policy",
    "signature",
    "key-pair-id",
    "token",
    "sig",
    "expires",
    "hdnts",
    "hmac",
    "auth",
];

/// Characters that cannot appear in file or directory names.
const FORBIDDEN_NAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Path part of a URI: query and fragment dropped, and for absolute URIs the
/// scheme and host as well.
fn uri_path(uri: &str) -> &str {
    let end = uri.find(['?', '#']).unwrap_or(uri.len());
    let path = &uri[..end];
    match path.find("://") {
        Some(pos) => {
            let rest = &path[pos + 3..];
            rest.find('/').map_or("", |slash| &rest[slash..])
        }
        None => path,
    }
}

fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(pos) if pos > 0 => &name[..pos],
        _ => name,
    }
}

/// Filename stem and the name of the directory holding it.
fn track_names(uri: &str) -> (&str, &str) {
    let mut parts = uri_path(uri).rsplit('/');
    let name = parts.next().unwrap_or("");
    let parent = parts.next().unwrap_or("");
    (strip_extension(name), parent)
}

/// Trailing language code of a filename stem, e.g. `ko` in `lecture_ko` or
/// `en` in `en.m3u8`.
pub fn trailing_language_code(uri: &str) -> Option<&str> {
    let (stem, _) = track_names(uri);
    let token = stem.rsplit(['_', '-', '.']).next()?;
    let lower = token.to_ascii_lowercase();
    LANGUAGE_CODES
        .iter()
        .find(|code| **code == lower)
        .map(|_| token)
}

/// Whether a rendition URI points at a thumbnail or subtitle/caption track.
/// Only the filename and its directory are inspected; course slugs and hosts
/// higher up the path never disqualify a rendition.
pub fn is_non_program_track(uri: &str) -> bool {
    let path = uri_path(uri).to_ascii_lowercase();
    if path.ends_with(".vtt") || path.ends_with(".webvtt") {
        return true;
    }
    let (stem, parent) = track_names(uri);
    let (stem, parent) = (stem.to_ascii_lowercase(), parent.to_ascii_lowercase());
    if NON_PROGRAM_MARKERS
        .iter()
        .any(|m| stem.contains(m) || parent.contains(m))
    {
        return true;
    }
    trailing_language_code(uri).is_some()
}

/// Rendition comparison: only a strictly longer duration replaces the
/// current best, so ties keep the first-seen candidate.
pub fn is_longer(candidate_secs: f64, best_secs: f64) -> bool {
    candidate_secs > best_secs
}

/// Picks the item with the strictly greatest duration.
pub fn pick_longest<T>(items: impl IntoIterator<Item = (T, f64)>) -> Option<(T, f64)> {
    let mut best: Option<(T, f64)> = None;
    for (item, secs) in items {
        match &best {
            Some((_, best_secs)) if !is_longer(secs, *best_secs) => {}
            _ => best = Some((item, secs)),
        }
    }
    best
}

/// Leading decimal number of a label, e.g. `12` for `"12 - Closures"`.
pub fn numeric_prefix(label: &str) -> Option<u32> {
    let trimmed = label.trim_start();
    let digits: &str = &trimmed[..trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len())];
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Whether the URL already carries its own signing or token parameters.
pub fn has_signing_params(url: &Url) -> bool {
    url.query_pairs().any(|(name, _)| {
        let name = name.to_ascii_lowercase();
        SIGNING_PARAMS.contains(&name.as_str())
    })
}

/// Appends a raw query string to the URL, keeping any existing parameters.
pub fn with_inherited_query(url: &Url, query: &str) -> Url {
    let query = query.trim_start_matches('?');
    let mut out = url.clone();
    let merged = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{query}"),
        _ => query.to_string(),
    };
    out.set_query(Some(&merged));
    out
}

/// Removes characters that are not allowed in file or directory names.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| !FORBIDDEN_NAME_CHARS.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}
