//! The `fetch` capability
//!
//! Network access is off for every script call except the one holding the
//! [`NetworkGrant`]. While a grant is held, each request is still checked
//! against the engine's [`NetworkPolicy`] before it leaves the process.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::{DomainRequest, NetworkPolicy};

/// Errors surfaced to the script as a thrown `Error`
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("access to `fetch` is denied in the sandbox")]
    NotGranted,

    #[error("network access to `{0}` denied by policy")]
    Denied(String),

    #[error("invalid fetch URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported URL scheme `{0}`")]
    UnsupportedScheme(String),

    #[error("invalid fetch request: {0}")]
    InvalidRequest(String),

    #[error("fetch failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Request shape produced by the prelude's `fetch` wrapper
#[derive(Debug, Clone, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Response handed back to the prelude, which wraps it in a Response-like object
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Temporary network permission for a single script function
#[derive(Debug, Clone, Default)]
pub struct NetworkGrant {
    holder: Rc<RefCell<Option<String>>>,
}

impl NetworkGrant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant network access to `function` until the returned guard drops
    pub fn grant(&self, function: &str) -> GrantGuard {
        *self.holder.borrow_mut() = Some(function.to_string());
        tracing::debug!(function, "network grant issued");
        GrantGuard {
            holder: Rc::clone(&self.holder),
        }
    }

    /// Name of the function currently holding the grant
    pub fn holder(&self) -> Option<String> {
        self.holder.borrow().clone()
    }
}

/// Revokes the network grant on drop
#[must_use = "the grant is revoked as soon as the guard is dropped"]
#[derive(Debug)]
pub struct GrantGuard {
    holder: Rc<RefCell<Option<String>>>,
}

impl Drop for GrantGuard {
    fn drop(&mut self) {
        if let Some(function) = self.holder.borrow_mut().take() {
            tracing::debug!(function = %function, "network grant revoked");
        }
    }
}

/// Policy-checked HTTP access for sandboxed scripts
pub struct NetworkGate<N: NetworkPolicy> {
    policy: Arc<N>,
    grant: NetworkGrant,
    timeout: Duration,
}

impl<N: NetworkPolicy> NetworkGate<N> {
    pub fn new(policy: Arc<N>, grant: NetworkGrant, timeout: Duration) -> Self {
        Self {
            policy,
            grant,
            timeout,
        }
    }

    /// Check the grant and policy for a request without sending it
    pub fn authorize(&self, request: &FetchRequest) -> Result<Url, FetchError> {
        let function = self.grant.holder().ok_or(FetchError::NotGranted)?;

        let url = Url::parse(&request.url).map_err(|e| FetchError::InvalidUrl {
            url: request.url.clone(),
            reason: e.to_string(),
        })?;

        let scheme = url.scheme().to_string();
        if scheme != "http" && scheme != "https" {
            return Err(FetchError::UnsupportedScheme(scheme));
        }

        let host = url
            .host_str()
            .ok_or_else(|| FetchError::InvalidUrl {
                url: request.url.clone(),
                reason: "missing host".to_string(),
            })?
            .to_string();
        let port = url.port_or_known_default().unwrap_or_default();

        let domain = DomainRequest::new(host.clone(), port, scheme, function);
        let allowed = futures_lite::future::block_on(self.policy.check(&domain));
        if !allowed {
            tracing::info!(host = %host, port, "fetch denied by network policy");
            return Err(FetchError::Denied(host));
        }

        Ok(url)
    }

    /// Perform the request, blocking the engine thread until it completes
    pub fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = self.authorize(&request)?;

        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;

        tracing::debug!(method = %method, url = %url, "fetch");

        let client = Client::builder().timeout(self.timeout).build()?;
        let mut builder = client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send()?;
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text()?;

        Ok(FetchResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{AllowAll, AllowList, DenyAll};

    fn get(url: &str) -> FetchRequest {
        FetchRequest {
            url: url.to_string(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    fn gate<N: NetworkPolicy>(policy: N) -> (NetworkGate<N>, NetworkGrant) {
        let grant = NetworkGrant::new();
        let gate = NetworkGate::new(Arc::new(policy), grant.clone(), Duration::from_secs(5));
        (gate, grant)
    }

    #[test]
    fn test_fetch_without_grant_is_denied() {
        let (gate, _grant) = gate(AllowAll);

        let err = gate.authorize(&get("https://example.com")).unwrap_err();
        assert!(matches!(err, FetchError::NotGranted));
        assert_eq!(err.to_string(), "access to `fetch` is denied in the sandbox");
    }

    #[test]
    fn test_policy_applies_under_grant() {
        let (gate, grant) = gate(DenyAll);
        let _guard = grant.grant("testConnection");

        let err = gate.authorize(&get("https://example.com/health")).unwrap_err();
        assert!(matches!(err, FetchError::Denied(ref host) if host == "example.com"));
    }

    #[test]
    fn test_allow_list_authorizes_listed_host() {
        let (gate, grant) = gate(AllowList::new(["*.example.com"]));
        let _guard = grant.grant("testConnection");

        let url = gate.authorize(&get("https://api.example.com/v1")).unwrap();
        assert_eq!(url.host_str(), Some("api.example.com"));
        assert!(gate.authorize(&get("https://example.org")).is_err());
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        let (gate, grant) = gate(AllowAll);
        let _guard = grant.grant("testConnection");

        let err = gate.authorize(&get("file:///etc/passwd")).unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedScheme(ref s) if s == "file"));
    }

    #[test]
    fn test_grant_revoked_when_guard_drops() {
        let (gate, grant) = gate(AllowAll);
        {
            let _guard = grant.grant("testConnection");
            assert_eq!(grant.holder().as_deref(), Some("testConnection"));
        }
        assert_eq!(grant.holder(), None);
        assert!(matches!(
            gate.authorize(&get("https://example.com")),
            Err(FetchError::NotGranted)
        ));
    }
}
