use url::Url;

/// Returns the key under which per-host state (rate buckets, robots rules)
/// is kept: scheme, host and effective port
///
/// Robots.txt applies per origin, so `http://a.com` and `https://a.com`
/// get separate entries.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_probe::url::host_key;
///
/// let url = Url::parse("https://example.com/a?b=c").unwrap();
/// assert_eq!(host_key(&url), "https://example.com:443");
/// ```
pub fn host_key(url: &Url) -> String {
    format!(
        "{}://{}:{}",
        url.scheme(),
        url.host_str().unwrap_or("").to_lowercase(),
        url.port_or_known_default().unwrap_or(0)
    )
}
