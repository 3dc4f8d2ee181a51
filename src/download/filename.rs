//! Save-name derivation for downloads without an explicit target path.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use url::Url;

const FALLBACK_NAME: &str = "download.bin";

/// File name for `url`: its last path segment, percent-decoded and sanitized.
///
/// Falls back to `download.bin` when the path has no usable last segment
/// (e.g. `https://example.com/`).
#[must_use]
pub fn default_filename(url: &Url) -> String {
    let last = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty());
    let Some(last) = last else {
        return FALLBACK_NAME.to_string();
    };

    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
    let sanitized = sanitize_filename(&decoded);
    if sanitized.trim_matches('_').is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        sanitized
    }
}

/// Replaces characters that are invalid on common filesystems
/// (`/ \ : * ? " < > |` and control characters) and neutralises `.`/`..`.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }
    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized.replace('.', "_")
    }
}

/// `dir/filename`, or `dir/stem_N.ext` with the first free `N`.
///
/// A candidate is taken if it exists on disk or is already in `reserved`.
pub(crate) fn resolve_unique_path(
    dir: &Path,
    filename: &str,
    reserved: &HashSet<PathBuf>,
) -> PathBuf {
    let taken = |candidate: &Path| candidate.exists() || reserved.contains(candidate);
    let base_path = dir.join(filename);
    if !taken(&base_path) {
        return base_path;
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename, ""),
    };
    (1..)
        .map(|i| dir.join(format!("{stem}_{i}{ext}")))
        .find(|candidate| !taken(candidate))
        .unwrap_or(base_path)
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}
