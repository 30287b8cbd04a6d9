//! Resolving the connecting user at the transport boundary.

use std::collections::HashMap;

use axum::http::HeaderMap;
use rtchat_core::UserId;

/// Query parameter consulted when the identity header is absent.
pub const USER_QUERY_PARAM: &str = "user";

/// Maps an incoming request to an already-authenticated user.
///
/// Authentication itself happens upstream (a reverse proxy or session
/// layer); this only reads its result.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap, query: &HashMap<String, String>) -> Option<UserId>;
}

/// Reads the user from a request header, falling back to `?user=`.
#[derive(Clone, Debug)]
pub struct HeaderIdentity {
    header: String,
}

impl HeaderIdentity {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into().to_ascii_lowercase(),
        }
    }
}

impl Default for HeaderIdentity {
    fn default() -> Self {
        Self::new("x-user-id")
    }
}

impl IdentityResolver for HeaderIdentity {
    fn resolve(&self, headers: &HeaderMap, query: &HashMap<String, String>) -> Option<UserId> {
        headers
            .get(self.header.as_str())
            .and_then(|value| value.to_str().ok())
            .or_else(|| query.get(USER_QUERY_PARAM).map(String::as_str))
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .map(UserId::from)
    }
}
