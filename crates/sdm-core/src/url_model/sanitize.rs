//! Filesystem-safe filename sanitization.

/// Linux NAME_MAX.
const MAX_LEN: usize = 255;

/// Sanitize a candidate filename for safe use as a single path component.
///
/// Path separators, NUL, and control characters become `_`; leading and
/// trailing dots and whitespace are trimmed; the result is capped at 255
/// bytes on a char boundary. May return an empty string for degenerate
/// input; callers fall back to a default name in that case.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());

    if trimmed.len() <= MAX_LEN {
        return trimmed.to_string();
    }
    let mut cut = MAX_LEN;
    while cut > 0 && !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    trimmed[..cut].to_string()
}
