//! Rate-limit key extractors for the three differentiated limits named in
//! [`fleet_domain::config::RateLimitConfig`] (§4.8). Registration and the
//! token endpoint are limited per source IP, which `tower_governor`'s
//! built-in [`PeerIpKeyExtractor`] already does. The MCP relay additionally
//! needs a per-connection bucket, since one AI client IP can hold several
//! `endpointUuid`s and a single misbehaving connection shouldn't throttle
//! its siblings.

use tower_governor::key_extractor::KeyExtractor;
use tower_governor::GovernorError;

/// Buckets MCP requests by the `endpointUuid` path segment rather than by
/// caller IP.
#[derive(Clone, Copy, Debug)]
pub struct McpConnectionKeyExtractor;

impl KeyExtractor for McpConnectionKeyExtractor {
    type Key = String;

    fn extract<T>(&self, req: &http::Request<T>) -> Result<Self::Key, GovernorError> {
        req.uri()
            .path()
            .strip_prefix("/mcp/")
            .filter(|rest| !rest.is_empty())
            .map(|rest| rest.to_owned())
            .ok_or(GovernorError::UnableToExtractKey)
    }

    fn name(&self) -> &'static str {
        "mcp_connection"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_endpoint_uuid_from_path() {
        let req = http::Request::builder()
            .uri("/mcp/abc-123")
            .body(())
            .unwrap();
        assert_eq!(McpConnectionKeyExtractor.extract(&req).unwrap(), "abc-123");
    }

    #[test]
    fn rejects_paths_without_an_endpoint() {
        let req = http::Request::builder().uri("/mcp/").body(()).unwrap();
        assert!(McpConnectionKeyExtractor.extract(&req).is_err());
    }
}
