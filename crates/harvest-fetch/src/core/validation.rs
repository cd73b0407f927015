use url::Url;

/// Returns `true` if the HTTP status code indicates a redirect.
///
/// # Recognized Redirect Codes
///
/// - 301: Moved Permanently
/// - 302: Found
/// - 303: See Other
/// - 307: Temporary Redirect
/// - 308: Permanent Redirect
///
/// # Examples
///
/// ```
/// use harvest_fetch::core::is_redirect;
///
/// assert!(is_redirect(301));
/// assert!(is_redirect(308));
/// assert!(!is_redirect(200));
/// assert!(!is_redirect(304));
/// ```
pub fn is_redirect(status: u16) -> bool { matches!(status, 301 | 302 | 303 | 307 | 308) }

/// `Range` header value asking for everything from `offset` on.
pub fn range_header(offset: u64) -> String { format!("bytes={offset}-") }

/// First byte position of a `Content-Range: bytes <start>-<end>/<total>` value.
///
/// ```
/// use harvest_fetch::core::parse_content_range_start;
///
/// assert_eq!(parse_content_range_start("bytes 5-9/10"), Some(5));
/// assert_eq!(parse_content_range_start("bytes */10"), None);
/// ```
pub fn parse_content_range_start(value: &str) -> Option<u64> {
    let spec = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, _total) = spec.split_once('/')?;
    let (start, _end) = range.split_once('-')?;
    start.trim().parse().ok()
}

/// Last non-empty path segment of `url`, percent-decoded when it is plain UTF-8.
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed
        .path_segments()?
        .rev()
        .find(|segment| !segment.is_empty())?
        .to_string();
    Some(percent_decode(&segment).unwrap_or(segment))
}

fn percent_decode(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// `host` or `host:port` of a URL, for log fields and cross-host checks.
pub fn url_authority(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_redirect_all_codes() {
        assert!(is_redirect(301));
        assert!(is_redirect(302));
        assert!(is_redirect(303));
        assert!(is_redirect(307));
        assert!(is_redirect(308));
    }

    #[test]
    fn test_is_redirect_comprehensive_coverage() {
        let non_redirect_codes = [
            100, 101, 200, 201, 204, 206, 300, 304, 305, 306, 400, 401, 403, 404, 408, 416, 429,
            500, 502, 503, 504, 0, 600,
        ];
        for code in &non_redirect_codes {
            assert!(!is_redirect(*code), "Code {} should NOT be a redirect", code);
        }
    }

    #[test]
    fn test_content_range_start() {
        assert_eq!(parse_content_range_start("bytes 0-4/5"), Some(0));
        assert_eq!(parse_content_range_start("bytes 100-199/*"), Some(100));
        assert_eq!(parse_content_range_start(" bytes  3-5/6 "), Some(3));
        assert_eq!(parse_content_range_start("items 0-4/5"), None);
        assert_eq!(parse_content_range_start("bytes x-4/5"), None);
        assert_eq!(parse_content_range_start(""), None);
    }

    #[test]
    fn test_range_header() {
        assert_eq!(range_header(0), "bytes=0-");
        assert_eq!(range_header(1024), "bytes=1024-");
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://example.org/data/file.csv").as_deref(),
            Some("file.csv")
        );
        assert_eq!(
            filename_from_url("https://example.org/data/dir/").as_deref(),
            Some("dir")
        );
        assert_eq!(
            filename_from_url("https://example.org/a%20b.txt?x=1").as_deref(),
            Some("a b.txt")
        );
        assert_eq!(filename_from_url("https://example.org/"), None);
        assert_eq!(filename_from_url("not a url"), None);
    }

    #[test]
    fn test_url_authority() {
        let url = Url::parse("https://example.org:8443/x").unwrap();
        assert_eq!(url_authority(&url).as_deref(), Some("example.org:8443"));
        let url = Url::parse("https://example.org/x").unwrap();
        assert_eq!(url_authority(&url).as_deref(), Some("example.org"));
    }
}
