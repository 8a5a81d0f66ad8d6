//! Session identity and per-request context.

use http::HeaderMap;

const X_CLUSTER_CLIENT_IP: &str = "x-cluster-client-ip";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const FALLBACK_IP: &str = "127.0.0.1";

/// Identity of the session a request belongs to.
///
/// Sessions are owned by the host application; the token store only reads
/// these two values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// Session identifier, mixed into token entropy
    pub id: String,
    /// Stable storage partition key for this session
    pub cache_key: String,
}

impl SessionContext {
    pub fn new(id: impl Into<String>, cache_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cache_key: cache_key.into(),
        }
    }
}

/// What the token store needs to know about the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    session: Option<SessionContext>,
    client_ip: String,
}

impl RequestContext {
    /// A request with no session management.
    pub fn anonymous() -> Self {
        Self {
            session: None,
            client_ip: FALLBACK_IP.to_string(),
        }
    }

    /// A request bound to `session`.
    pub fn with_session(session: SessionContext) -> Self {
        Self {
            session: Some(session),
            client_ip: FALLBACK_IP.to_string(),
        }
    }

    /// Build from request headers and the peer address.
    pub fn from_headers(
        session: Option<SessionContext>,
        headers: &HeaderMap,
        remote_addr: Option<&str>,
    ) -> Self {
        Self {
            session,
            client_ip: resolve_client_ip(headers, remote_addr),
        }
    }

    /// Override the client address.
    pub fn client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = ip.into();
        self
    }

    pub fn session(&self) -> Option<&SessionContext> {
        self.session.as_ref()
    }

    pub fn ip(&self) -> &str {
        &self.client_ip
    }
}

/// Resolve the originating client address.
///
/// Prefers `x-cluster-client-ip`, then the first hop of `X-Forwarded-For`,
/// then the socket peer, and finally the loopback address.
pub fn resolve_client_ip(headers: &HeaderMap, remote_addr: Option<&str>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(ip) = header(X_CLUSTER_CLIENT_IP) {
        return ip.to_string();
    }

    if let Some(first) = header(X_FORWARDED_FOR)
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return first.to_string();
    }

    remote_addr
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or(FALLBACK_IP)
        .to_string()
}
