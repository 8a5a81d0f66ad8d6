use crate::error::{CsrfError, Result};
use crate::store::TokenStore;
use crate::session::RequestContext;
use http::{HeaderMap, Method, Request};

/// Automatic CSRF verification for inbound requests.
///
/// When `auto_verify` is on, requests whose method is listed in
/// `verify_methods` and which carry the configured header are checked
/// against the session's default token. Requests without the header pass;
/// form posts are expected to verify their field explicitly.
#[derive(Debug, Clone)]
pub struct CsrfVerifier {
    store: TokenStore,
}

impl CsrfVerifier {
    /// Create new verifier
    pub fn new(store: TokenStore) -> Self {
        Self { store }
    }

    /// Check if a request with `method` is subject to verification
    pub fn needs_verification(&self, method: &Method) -> bool {
        self.store.config().requires_verification(method)
    }

    /// Verify a request given its parts.
    pub async fn verify_request(
        &self,
        ctx: &RequestContext,
        method: &Method,
        headers: &HeaderMap,
    ) -> Result<()> {
        if !self.needs_verification(method) {
            return Ok(());
        }

        let Some(token) = self.token_from_header(headers) else {
            return Ok(());
        };

        if self.store.verify(ctx, token, None).await? {
            Ok(())
        } else {
            let header = self.store.config().header_name.clone();
            tracing::debug!(header = %header, method = %method, "Rejecting request with invalid CSRF token");
            Err(CsrfError::TokenInvalid { header })
        }
    }

    /// Verify an `http::Request`.
    pub async fn verify<B>(&self, ctx: &RequestContext, request: &Request<B>) -> Result<()> {
        self.verify_request(ctx, request.method(), request.headers())
            .await
    }

    /// Get token from the configured header
    fn token_from_header<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        headers
            .get(self.store.config().header_name.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Render a hidden form field carrying the token for `key`.
pub async fn hidden_field(
    store: &TokenStore,
    ctx: &RequestContext,
    key: Option<&str>,
    force_new: bool,
) -> Result<String> {
    let token = store.generate(ctx, key, force_new).await?;
    Ok(format!(
        "<input type='hidden' name='csrf' id='csrf' value='{}'>",
        token
    ))
}
