//! Parse HTTP response header lines into ProbeResult.

use super::ProbeResult;

/// Fold collected header lines into a ProbeResult. Unknown headers are
/// ignored; a repeated header keeps the last value.
pub(crate) fn parse_headers(lines: &[String]) -> ProbeResult {
    let mut result = ProbeResult::default();

    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            if let Ok(n) = value.parse::<u64>() {
                result.content_length = Some(n);
            }
        } else if name.eq_ignore_ascii_case("accept-ranges") {
            result.accept_ranges = value.eq_ignore_ascii_case("bytes");
        } else if name.eq_ignore_ascii_case("content-disposition") {
            result.content_disposition = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-type") {
            result.content_type = Some(value.to_string());
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn content_length_and_ranges() {
        let r = parse_headers(&lines(&[
            "HTTP/1.1 200 OK",
            "Content-Length: 12345",
            "Accept-Ranges: bytes",
        ]));
        assert_eq!(r.content_length, Some(12345));
        assert!(r.accept_ranges);
        assert!(r.content_disposition.is_none());
    }

    #[test]
    fn accept_ranges_none_is_not_support() {
        let r = parse_headers(&lines(&["Content-Length: 999", "Accept-Ranges: none"]));
        assert_eq!(r.content_length, Some(999));
        assert!(!r.accept_ranges);
    }

    #[test]
    fn disposition_and_type() {
        let r = parse_headers(&lines(&[
            "Content-Disposition: attachment; filename=\"report.pdf\"",
            "Content-Type: application/pdf",
        ]));
        assert!(r.content_disposition.as_deref().unwrap().contains("report.pdf"));
        assert_eq!(r.content_type.as_deref(), Some("application/pdf"));
    }

    #[test]
    fn header_names_are_case_insensitive() {
        let r = parse_headers(&lines(&["content-length: 7", "ACCEPT-RANGES: Bytes"]));
        assert_eq!(r.content_length, Some(7));
        assert!(r.accept_ranges);
    }

    #[test]
    fn missing_length_stays_unknown() {
        let r = parse_headers(&lines(&["HTTP/1.1 200 OK", "Content-Type: text/plain"]));
        assert_eq!(r.content_length, None);
        assert!(!r.accept_ranges);
    }

    #[test]
    fn malformed_length_is_ignored() {
        let r = parse_headers(&lines(&["Content-Length: many"]));
        assert_eq!(r.content_length, None);
    }
}
