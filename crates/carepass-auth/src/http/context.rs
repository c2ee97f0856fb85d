//! Request context extraction.
//!
//! Pulls the correlation ID, user agent and client IP out of the request
//! headers. The correlation ID is echoed back in `X-Correlation-Id`.

use std::convert::Infallible;

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, HeaderName, HeaderValue, header::USER_AGENT, request::Parts},
    response::Response,
};

use crate::flow::RequestContext;

/// Header carrying the correlation ID in requests and responses.
pub const CORRELATION_ID_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

/// Alternative inbound correlation header set by some gateways.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const MAX_CORRELATION_ID_LEN: usize = 128;
const MAX_USER_AGENT_LEN: usize = 512;

impl RequestContext {
    /// Builds a context from request headers.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut ctx = match correlation_id(headers) {
            Some(id) => Self::with_correlation_id(id),
            None => Self::new(),
        };
        ctx.user_agent = header_str(headers, &USER_AGENT)
            .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect());
        ctx.source_ip = client_ip(headers);
        ctx
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

/// Client IP: first `X-Forwarded-For` hop, then `X-Real-IP`.
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = header_str(headers, "x-forwarded-for")
        && let Some(first) = forwarded.split(',').next()
        && !first.trim().is_empty()
    {
        return Some(first.trim().to_string());
    }

    header_str(headers, "x-real-ip").map(str::to_string)
}

/// Attaches the correlation ID to a response.
#[must_use]
pub fn with_correlation_id(ctx: &RequestContext, mut response: Response) -> Response {
    if let Ok(value) = HeaderValue::from_str(&ctx.correlation_id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

fn correlation_id(headers: &HeaderMap) -> Option<String> {
    [CORRELATION_ID_HEADER, REQUEST_ID_HEADER]
        .iter()
        .filter_map(|name| header_str(headers, name))
        .find(|id| {
            id.len() <= MAX_CORRELATION_ID_LEN && id.bytes().all(|b| b.is_ascii_graphic())
        })
        .map(str::to_string)
}

fn header_str<K>(headers: &HeaderMap, name: K) -> Option<&str>
where
    K: axum::http::header::AsHeaderName,
{
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_client_ip_prefers_forwarded_first_hop() {
        let map = headers(&[
            ("x-forwarded-for", "203.0.113.9, 10.0.0.1"),
            ("x-real-ip", "10.0.0.2"),
        ]);
        assert_eq!(client_ip(&map).as_deref(), Some("203.0.113.9"));

        let map = headers(&[("x-real-ip", "198.51.100.1")]);
        assert_eq!(client_ip(&map).as_deref(), Some("198.51.100.1"));

        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn test_correlation_id_sources() {
        let ctx = RequestContext::from_headers(&headers(&[
            ("x-request-id", "req-1"),
            ("x-correlation-id", "corr-1"),
        ]));
        assert_eq!(ctx.correlation_id, "corr-1");

        let ctx = RequestContext::from_headers(&headers(&[("x-request-id", "req-1")]));
        assert_eq!(ctx.correlation_id, "req-1");

        let ctx = RequestContext::from_headers(&HeaderMap::new());
        assert_eq!(ctx.correlation_id.len(), 36);
    }

    #[test]
    fn test_oversized_correlation_id_replaced() {
        let long = "x".repeat(200);
        let mut map = HeaderMap::new();
        map.insert(CORRELATION_ID_HEADER, HeaderValue::from_str(&long).unwrap());
        let ctx = RequestContext::from_headers(&map);
        assert_ne!(ctx.correlation_id, long);
    }

    #[test]
    fn test_user_agent_and_echo() {
        let ctx = RequestContext::from_headers(&headers(&[
            ("user-agent", "CarePass/2.1 (iPhone; iOS 19.0)"),
            ("x-correlation-id", "corr-9"),
        ]));
        assert_eq!(
            ctx.user_agent.as_deref(),
            Some("CarePass/2.1 (iPhone; iOS 19.0)")
        );

        let response = with_correlation_id(&ctx, ().into_response());
        assert_eq!(response.headers()[CORRELATION_ID_HEADER], "corr-9");
    }
}
