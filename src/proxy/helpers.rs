//! Request parsing helpers.
//!
//! Everything here works on a [`RequestHeader`] so it can be exercised
//! without a live session.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use pingora_http::RequestHeader;

use crate::identity::session::{bearer_token, cookie_value};

/// Path prefix of content routes
pub const CONTENT_PREFIX: &str = "/content/";

/// Extract query parameters from URI.
///
/// Values are URL-decoded.
pub fn extract_query_params(req: &RequestHeader) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(query) = req.uri.query() {
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some((key, value)) => {
                    params.insert(
                        key.to_string(),
                        urlencoding::decode(value).unwrap_or_default().to_string(),
                    );
                }
                None if !pair.is_empty() => {
                    params.insert(pair.to_string(), String::new());
                }
                None => {}
            }
        }
    }
    params
}

/// Whether `?download=1` (or `true`, or a bare `download`) was passed.
pub fn wants_download(req: &RequestHeader) -> bool {
    extract_query_params(req)
        .get("download")
        .map(|v| v.is_empty() || v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Asset id of a `/content/{asset_id}` path. The id is returned as-is and
/// validated by the gateway.
pub fn content_asset_id(path: &str) -> Option<&str> {
    path.strip_prefix(CONTENT_PREFIX)
}

/// Session token from `Authorization: Bearer`, else from the session cookie.
pub fn session_token(req: &RequestHeader, cookie_name: Option<&str>) -> Option<String> {
    if let Some(token) = req
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
    {
        return Some(token.to_string());
    }

    let cookie_name = cookie_name?;
    req.headers
        .get_all("cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|header| cookie_value(header, cookie_name))
        .map(str::to_string)
}

/// Client IP address.
///
/// `X-Forwarded-For` is only honored when the gateway sits behind a trusted
/// proxy; its first entry is the original client. Otherwise the socket peer
/// is used.
pub fn client_ip(req: &RequestHeader, peer: Option<IpAddr>, trust_forwarded_for: bool) -> IpAddr {
    if trust_forwarded_for {
        let forwarded = req
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ip;
        }
    }
    peer.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str) -> RequestHeader {
        RequestHeader::build("GET", path.as_bytes(), None).unwrap()
    }

    #[test]
    fn test_content_asset_id() {
        assert_eq!(content_asset_id("/content/a1"), Some("a1"));
        assert_eq!(content_asset_id("/content/"), Some(""));
        assert_eq!(content_asset_id("/content/a/b"), Some("a/b"));
        assert_eq!(content_asset_id("/health"), None);
    }

    #[test]
    fn test_download_flag() {
        assert!(wants_download(&request("/content/a1?download=1")));
        assert!(wants_download(&request("/content/a1?download=true")));
        assert!(wants_download(&request("/content/a1?x=2&download")));
        assert!(!wants_download(&request("/content/a1?download=0")));
        assert!(!wants_download(&request("/content/a1")));
    }

    #[test]
    fn test_bearer_wins_over_cookie() {
        let mut req = request("/content/a1");
        req.insert_header("Cookie", "theme=dark; session=from-cookie")
            .unwrap();
        assert_eq!(
            session_token(&req, Some("session")).as_deref(),
            Some("from-cookie")
        );
        assert_eq!(session_token(&req, None), None);

        req.insert_header("Authorization", "Bearer from-header").unwrap();
        assert_eq!(
            session_token(&req, Some("session")).as_deref(),
            Some("from-header")
        );
    }

    #[test]
    fn test_forwarded_for_only_when_trusted() {
        let mut req = request("/content/a1");
        req.insert_header("X-Forwarded-For", "203.0.113.7, 10.0.0.1")
            .unwrap();
        let peer: IpAddr = "10.0.0.1".parse().unwrap();

        assert_eq!(
            client_ip(&req, Some(peer), true),
            "203.0.113.7".parse::<IpAddr>().unwrap()
        );
        assert_eq!(client_ip(&req, Some(peer), false), peer);
    }

    #[test]
    fn test_unparseable_forwarded_for_falls_back_to_peer() {
        let mut req = request("/content/a1");
        req.insert_header("X-Forwarded-For", "not-an-ip").unwrap();
        let peer: IpAddr = "192.0.2.1".parse().unwrap();
        assert_eq!(client_ip(&req, Some(peer), true), peer);
        assert_eq!(
            client_ip(&req, None, false),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        );
    }
}
