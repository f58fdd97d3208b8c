//! Filename extraction from URL path.

/// Last non-empty path segment of a URL, for use as a filename hint.
///
/// Returns `None` when the URL cannot be parsed or its path has no usable
/// segment (root, trailing slash only, or `.`/`..`).
pub fn filename_from_url_path(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path().split('/').filter(|s| !s.is_empty()).last()?;
    if segment == "." || segment == ".." {
        return None;
    }
    Some(segment.to_string())
}
