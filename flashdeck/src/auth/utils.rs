//! Authentication utility functions.

use axum::http::{HeaderMap, header};

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Where the browser goes to end its identity-proxy session.
///
/// The base is taken from `Origin`, else `X-Forwarded-Host` (with `X-Forwarded-Proto`), else
/// `Host`. With none of them the bare path is returned.
pub fn logout_url(headers: &HeaderMap, logout_path: &str) -> String {
    let path = if logout_path.starts_with('/') {
        logout_path.to_string()
    } else {
        format!("/{logout_path}")
    };

    if let Some(origin) = header_str(headers, header::ORIGIN.as_str()) {
        return format!("{}{path}", origin.trim_end_matches('/'));
    }

    let proto = header_str(headers, "x-forwarded-proto")
        .and_then(|p| p.split(',').next())
        .map(str::trim)
        .unwrap_or("http");
    if let Some(host) = header_str(headers, "x-forwarded-host") {
        let host = host.split(',').next().unwrap_or(host).trim();
        return format!("{proto}://{}{path}", host.trim_end_matches('/'));
    }

    match header_str(headers, header::HOST.as_str()) {
        Some(host) => format!("http://{host}{path}"),
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const PATH: &str = "/cdn-cgi/access/logout";

    fn headers(entries: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in entries {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_origin_wins() {
        let map = headers(&[
            ("origin", "https://cards.example.com/"),
            ("x-forwarded-host", "proxy.internal"),
            ("host", "localhost:3001"),
        ]);
        assert_eq!(logout_url(&map, PATH), "https://cards.example.com/cdn-cgi/access/logout");
    }

    #[test]
    fn test_forwarded_host_uses_forwarded_proto() {
        let map = headers(&[
            ("x-forwarded-host", "cards.example.com"),
            ("x-forwarded-proto", "https"),
            ("host", "localhost:3001"),
        ]);
        assert_eq!(logout_url(&map, PATH), "https://cards.example.com/cdn-cgi/access/logout");
    }

    #[test]
    fn test_host_fallback() {
        let map = headers(&[("host", "localhost:3001")]);
        assert_eq!(logout_url(&map, PATH), "http://localhost:3001/cdn-cgi/access/logout");
    }

    #[test]
    fn test_no_headers_returns_path() {
        assert_eq!(logout_url(&HeaderMap::new(), "cdn-cgi/access/logout"), PATH);
    }
}
