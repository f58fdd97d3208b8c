//! Output filename derivation and collision handling.
//!
//! Filenames come, in order of preference, from the `Content-Disposition`
//! header, the last non-empty URL path segment, or a `Content-Type`-based
//! fallback. The result is sanitized for Linux filesystems, then resolved
//! against the target directory exactly once per task so an earlier download
//! with the same name is never clobbered.

mod content_disposition;
mod path;
mod sanitize;

pub use content_disposition::parse_content_disposition_filename;
pub use path::filename_from_url_path;
pub use sanitize::sanitize_filename;

use std::path::{Path, PathBuf};

/// Filename stem used when neither the headers nor the URL yield a name.
const FALLBACK_STEM: &str = "unknown_file";

/// Derive a local filename (no path) for a response.
///
/// Order: `Content-Disposition` filename, then the last non-empty path
/// segment of `url`, then `unknown_file<ext>` with the extension looked up
/// from `content_type` (just `unknown_file` when that fails too).
pub fn derive_filename(
    url: &str,
    content_disposition: Option<&str>,
    content_type: Option<&str>,
) -> String {
    let candidate = content_disposition
        .and_then(parse_content_disposition_filename)
        .filter(|s| !s.is_empty())
        .or_else(|| filename_from_url_path(url));

    if let Some(raw) = candidate {
        let sanitized = sanitize_filename(&raw);
        if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
            return sanitized;
        }
    }

    match content_type.and_then(extension_for_content_type) {
        Some(ext) => format!("{FALLBACK_STEM}{ext}"),
        None => FALLBACK_STEM.to_string(),
    }
}

/// Map a `Content-Type` value (parameters ignored) to a filename extension.
fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    let ext = match essence.as_str() {
        "text/plain" => ".txt",
        "text/html" => ".html",
        "text/css" => ".css",
        "text/csv" => ".csv",
        "application/json" => ".json",
        "application/xml" | "text/xml" => ".xml",
        "application/pdf" => ".pdf",
        "application/zip" => ".zip",
        "application/gzip" => ".gz",
        "application/x-tar" => ".tar",
        "application/x-bzip2" => ".bz2",
        "application/x-xz" => ".xz",
        "application/x-iso9660-image" => ".iso",
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/svg+xml" => ".svg",
        "audio/mpeg" => ".mp3",
        "audio/ogg" => ".ogg",
        "video/mp4" => ".mp4",
        "video/webm" => ".webm",
        _ => return None,
    };
    Some(ext)
}

/// Resolve `dir/name` to a path that does not exist yet.
///
/// If the plain path is free it is returned as-is; otherwise `(1)`, `(2)`, …
/// is inserted before the extension until a free candidate is found.
pub fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let plain = dir.join(name);
    if !plain.exists() {
        return plain;
    }

    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => name.split_at(i),
        _ => (name, ""),
    };
    for n in 1u32.. {
        let candidate = dir.join(format!("{stem}({n}){ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!("unique_path: exhausted counter");
}
