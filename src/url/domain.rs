use url::Url;

/// Extracts the domain from a URL
///
/// Returns the lowercase host, or None if the URL has no host.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use ink_lantern::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns the host with a leading `www.` label removed
pub fn site_host(url: &Url) -> Option<String> {
    extract_domain(url).map(|host| match host.strip_prefix("www.") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => host,
    })
}

/// Returns the origin key used to scope per-domain state such as robots.txt
///
/// The key is `scheme://host:port` with the effective port spelled out.
pub fn origin_key(url: &Url) -> Option<String> {
    let host = extract_domain(url)?;
    let port = url.port_or_known_default()?;
    Some(format!("{}://{}:{}", url.scheme(), host, port))
}

/// Checks whether a discovered URL belongs to the same site as the crawl root
///
/// Hosts are compared after dropping a leading `www.`. Explicit non-default ports must
/// match; the scheme is not compared, so an http link on an https site still counts.
pub fn same_site(root: &Url, candidate: &Url) -> bool {
    match (site_host(root), site_host(candidate)) {
        (Some(a), Some(b)) => a == b && root.port() == candidate.port(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_extract_simple_domain() {
        assert_eq!(
            extract_domain(&url("https://example.com/")),
            Some("example.com".to_string())
        );
    }

    #[test]
    fn test_extract_subdomain() {
        assert_eq!(
            extract_domain(&url("https://blog.example.com/post")),
            Some("blog.example.com".to_string())
        );
    }

    #[test]
    fn test_same_site_ignores_www() {
        let root = url("https://www.example.com/");
        assert!(same_site(&root, &url("https://example.com/about")));
        assert!(same_site(&url("https://example.com/"), &root));
    }

    #[test]
    fn test_same_site_rejects_subdomains_and_other_hosts() {
        let root = url("https://example.com/");
        assert!(!same_site(&root, &url("https://blog.example.com/")));
        assert!(!same_site(&root, &url("https://example.org/")));
        assert!(!same_site(&root, &url("https://notexample.com/")));
    }

    #[test]
    fn test_same_site_compares_explicit_ports() {
        let root = url("http://127.0.0.1:4000/");
        assert!(same_site(&root, &url("http://127.0.0.1:4000/a")));
        assert!(!same_site(&root, &url("http://127.0.0.1:4001/a")));
        assert!(same_site(
            &url("https://example.com/"),
            &url("https://example.com:443/x")
        ));
        assert!(same_site(
            &url("https://example.com/"),
            &url("http://example.com/x")
        ));
    }

    #[test]
    fn test_origin_key() {
        assert_eq!(
            origin_key(&url("https://Example.com/a/b")),
            Some("https://example.com:443".to_string())
        );
        assert_eq!(
            origin_key(&url("http://127.0.0.1:8080/")),
            Some("http://127.0.0.1:8080".to_string())
        );
    }
}
