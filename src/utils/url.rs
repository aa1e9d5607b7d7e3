//! Joining configured base URLs with endpoint paths.

use reqwest::Url;

/// Strips trailing slashes so that appended paths never produce `//`.
///
/// ```
/// use cambista::utils::url::normalize_base_url;
///
/// assert_eq!(
///     normalize_base_url("https://v6.exchangerate-api.com/v6/"),
///     "https://v6.exchangerate-api.com/v6"
/// );
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Appends `segments` to `base_url`, one `/` between each.
///
/// ```
/// use cambista::utils::url::join_segments;
///
/// assert_eq!(
///     join_segments("https://v6.exchangerate-api.com/v6/", &["KEY", "pair", "INR", "USD"]),
///     "https://v6.exchangerate-api.com/v6/KEY/pair/INR/USD"
/// );
/// ```
pub fn join_segments(base_url: &str, segments: &[&str]) -> String {
    let mut url = normalize_base_url(base_url);
    for segment in segments {
        let segment = segment.trim_matches('/');
        if segment.is_empty() {
            continue;
        }
        url.push('/');
        url.push_str(segment);
    }
    url
}

/// Appends each of `segments` to the path of `base_url` as a single
/// percent-encoded segment. Empty, `.` and `..` segments are rejected.
///
/// ```
/// use cambista::utils::url::append_path_segments;
///
/// let url = append_path_segments("http://127.0.0.1:9000/v6/", &["KEY", "pair", "USD/../codes?x="])
///     .expect("valid url");
/// assert_eq!(url.path(), "/v6/KEY/pair/USD%2F..%2Fcodes%3Fx=");
/// ```
pub fn append_path_segments(base_url: &str, segments: &[&str]) -> Result<Url, String> {
    if segments
        .iter()
        .any(|segment| matches!(*segment, "" | "." | ".."))
    {
        return Err("path segments must not be empty, '.' or '..'".to_string());
    }
    let mut url = Url::parse(&normalize_base_url(base_url))
        .map_err(|err| format!("invalid base URL '{base_url}': {err}"))?;
    url.path_segments_mut()
        .map_err(|_| format!("base URL '{base_url}' cannot take a path"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Builds an endpoint URL such as `{base}/chat/completions`.
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    join_segments(base_url, &[endpoint])
}
