//! Caller identifier derivation.

use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap, Request};
use sha2::{Digest, Sha256};
use std::net::{IpAddr, SocketAddr};

/// Hex characters of the client signature hash kept in a key.
const SIGNATURE_HASH_LEN: usize = 8;

/// An authenticated caller identity attached to a request by upstream
/// middleware. When present it is used as the rate-limit key verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

/// The request fields a caller key is derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    /// Caller-supplied identity, preferred when non-empty
    pub principal: Option<String>,
    /// Raw `X-Forwarded-For` header value
    pub forwarded_for: Option<String>,
    /// Directly connected peer
    pub peer_addr: Option<IpAddr>,
    /// Raw `User-Agent` header value
    pub user_agent: Option<String>,
}

impl RequestMeta {
    /// Collect metadata from an HTTP request.
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let headers = req.headers();
        Self {
            principal: req
                .extensions()
                .get::<Principal>()
                .map(|principal| principal.0.clone()),
            forwarded_for: header_str(headers, "x-forwarded-for"),
            peer_addr: req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip()),
            user_agent: header_str(headers, header::USER_AGENT.as_str()),
        }
    }

    /// Network origin: first forwarded hop, else the peer, else `unknown`.
    pub fn origin(&self) -> String {
        self.forwarded_for
            .as_deref()
            .and_then(|chain| chain.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .map(str::to_string)
            .or_else(|| self.peer_addr.map(|ip| ip.to_string()))
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// The rate-limit key for this caller.
    ///
    /// Origin alone would merge every client behind one NAT, and the
    /// signature alone is trivially forged, so both go into the key.
    pub fn identifier(&self) -> String {
        if let Some(principal) = self.principal.as_deref().filter(|p| !p.is_empty()) {
            return principal.to_string();
        }

        format!(
            "{}:{}",
            self.origin(),
            signature_hash(self.user_agent.as_deref().unwrap_or(""))
        )
    }
}

/// Default key extractor for HTTP requests.
pub fn request_identifier<B>(req: &Request<B>) -> String {
    RequestMeta::from_request(req).identifier()
}

fn signature_hash(signature: &str) -> String {
    let digest = Sha256::digest(signature.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(SIGNATURE_HASH_LEN);
    hash
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> RequestMeta {
        RequestMeta {
            principal: None,
            forwarded_for: None,
            peer_addr: None,
            user_agent: Some("curl/8.4.0".to_string()),
        }
    }

    #[test]
    fn test_principal_wins() {
        let meta = RequestMeta {
            principal: Some("user-42".to_string()),
            forwarded_for: Some("203.0.113.7".to_string()),
            ..meta()
        };
        assert_eq!(meta.identifier(), "user-42");
    }

    #[test]
    fn test_empty_principal_is_ignored() {
        let meta = RequestMeta {
            principal: Some(String::new()),
            peer_addr: Some("10.0.0.1".parse().unwrap()),
            ..meta()
        };
        assert!(meta.identifier().starts_with("10.0.0.1:"));
    }

    #[test]
    fn test_first_forwarded_hop_is_origin() {
        let meta = RequestMeta {
            forwarded_for: Some(" 203.0.113.7 , 10.0.0.2, 10.0.0.3".to_string()),
            peer_addr: Some("10.0.0.3".parse().unwrap()),
            ..meta()
        };
        assert_eq!(meta.origin(), "203.0.113.7");
    }

    #[test]
    fn test_origin_fallbacks() {
        let meta = RequestMeta {
            forwarded_for: Some(" ,10.0.0.2".to_string()),
            peer_addr: Some("192.168.1.9".parse().unwrap()),
            ..meta()
        };
        assert_eq!(meta.origin(), "192.168.1.9");

        assert_eq!(RequestMeta::default().origin(), "unknown");
    }

    #[test]
    fn test_signature_separates_clients_behind_one_origin() {
        let firefox = RequestMeta {
            peer_addr: Some("198.51.100.1".parse().unwrap()),
            user_agent: Some("Mozilla/5.0 Firefox/120.0".to_string()),
            ..meta()
        };
        let chrome = RequestMeta {
            user_agent: Some("Mozilla/5.0 Chrome/120.0".to_string()),
            ..firefox.clone()
        };

        assert_ne!(firefox.identifier(), chrome.identifier());
        assert_eq!(firefox.identifier(), firefox.clone().identifier());
    }

    #[test]
    fn test_identifier_format() {
        let id = RequestMeta::default().identifier();
        // SHA-256 of the empty string starts with e3b0c442.
        assert_eq!(id, "unknown:e3b0c442");
    }

    #[test]
    fn test_from_request() {
        let mut req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7")
            .header("user-agent", "curl/8.4.0")
            .body(())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo("10.1.1.1:5555".parse::<SocketAddr>().unwrap()));

        let meta = RequestMeta::from_request(&req);
        assert_eq!(meta.forwarded_for.as_deref(), Some("203.0.113.7"));
        assert_eq!(meta.peer_addr, Some("10.1.1.1".parse().unwrap()));
        assert_eq!(meta.user_agent.as_deref(), Some("curl/8.4.0"));
        assert_eq!(meta.principal, None);

        req.extensions_mut().insert(Principal("svc-billing".to_string()));
        assert_eq!(request_identifier(&req), "svc-billing");
    }
}
