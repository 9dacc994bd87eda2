use std::collections::HashSet;
use std::future::Future;

/// Information about an outbound request made by a sandboxed script
#[derive(Debug, Clone)]
pub struct DomainRequest {
    host: String,
    port: u16,
    scheme: String,
    function: String,
}

impl DomainRequest {
    /// Create a new domain request (internal use)
    pub(crate) fn new(
        host: impl Into<String>,
        port: u16,
        scheme: impl Into<String>,
        function: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            scheme: scheme.into(),
            function: function.into(),
        }
    }

    /// The domain or IP being accessed
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port number
    pub fn port(&self) -> u16 {
        self.port
    }

    /// URL scheme, `http` or `https`
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The script function holding the network grant
    pub fn function(&self) -> &str {
        &self.function
    }
}

/// Async network policy trait - determines if a request is allowed
pub trait NetworkPolicy: Send + Sync + 'static {
    /// Check if a network request should be allowed
    fn check(&self, request: &DomainRequest) -> impl Future<Output = bool> + Send;
}

/// Deny all network access (default policy)
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl NetworkPolicy for DenyAll {
    async fn check(&self, _request: &DomainRequest) -> bool {
        false
    }
}

/// Allow all network access
#[derive(Debug, Clone, Copy)]
pub struct AllowAll;

impl NetworkPolicy for AllowAll {
    async fn check(&self, _request: &DomainRequest) -> bool {
        true
    }
}

/// Allow access to specific domains only
#[derive(Debug, Clone)]
pub struct AllowList {
    allowed: HashSet<String>,
}

impl AllowList {
    /// Create a new allow list from an iterator of domains
    pub fn new(domains: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allowed: domains
                .into_iter()
                .map(|d| d.into().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Check if a domain matches the allow list
    fn matches(&self, target: &str) -> bool {
        let target = target.to_ascii_lowercase();
        if self.allowed.contains(&target) {
            return true;
        }

        // Subdomain match (e.g., "api.example.com" matches "*.example.com")
        self.allowed.iter().any(|allowed| {
            allowed
                .strip_prefix('*')
                .is_some_and(|suffix| suffix.starts_with('.') && target.ends_with(suffix))
        })
    }
}

impl NetworkPolicy for AllowList {
    async fn check(&self, request: &DomainRequest) -> bool {
        self.matches(request.host())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(host: &str) -> DomainRequest {
        DomainRequest::new(host, 443, "https", "testConnection")
    }

    #[tokio::test]
    async fn test_deny_all() {
        assert!(!DenyAll.check(&request("example.com")).await);
    }

    #[tokio::test]
    async fn test_allow_all() {
        assert!(AllowAll.check(&request("example.com")).await);
    }

    #[test]
    fn test_allow_list_exact() {
        let policy = AllowList::new(["example.com", "api.test.com"]);

        assert!(policy.matches("example.com"));
        assert!(policy.matches("API.test.com"));
        assert!(!policy.matches("other.com"));
        assert!(!policy.matches("sub.example.com"));
    }

    #[test]
    fn test_allow_list_wildcard() {
        let policy = AllowList::new(["*.example.com"]);

        assert!(policy.matches("api.example.com"));
        assert!(policy.matches("sub.api.example.com"));
        assert!(!policy.matches("example.com")); // Exact domain not matched by wildcard
        assert!(!policy.matches("badexample.com"));
    }

    #[tokio::test]
    async fn test_allow_list_checks_request_host() {
        let policy = AllowList::new(["hooks.example.com"]);

        assert!(policy.check(&request("hooks.example.com")).await);
        assert!(!policy.check(&request("evil.com")).await);
    }
}
