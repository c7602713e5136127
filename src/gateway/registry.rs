//! Provider Registry (C1): a name-keyed, read-only-after-startup set of
//! provider handlers plus the per-provider upstream transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::providers::ProviderHandler;

/// One registry slot: the handler plus its own connection-pooled client,
/// configured per spec §4.2 (HTTP/2 attempt, 30s dial, 90s idle, 10s TLS
/// handshake, 3min response-header timeout, compression disabled).
pub struct ProviderEntry {
    pub handler: Arc<dyn ProviderHandler>,
    pub client: reqwest::Client,
}

#[derive(Default)]
pub struct ProviderRegistry {
    entries: HashMap<&'static str, ProviderEntry>,
}

/// Error returned when a path claims a provider prefix the registry
/// doesn't recognise.
#[derive(Debug, thiserror::Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Build a per-provider `reqwest::Client` with the connection-pool
    /// parameters spec §4.2 requires. Deliberately does NOT set an overall
    /// `.timeout()` — that would bound the full response body read, which
    /// is wrong for streaming responses that can legitimately run far
    /// longer than the 3-minute response-header budget. The header-only
    /// timeout is instead applied by `pipeline::run`, which wraps just the
    /// `send()` call in a `tokio::time::timeout`.
    fn build_client() -> reqwest::Client {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .build()
            .expect("reqwest client configuration is valid")
    }

    pub fn register(&mut self, handler: Arc<dyn ProviderHandler>) {
        let client = Self::build_client();
        self.entries.insert(
            handler.name(),
            ProviderEntry {
                handler,
                client,
            },
        );
    }

    pub fn lookup(&self, name: &str) -> Option<&ProviderEntry> {
        self.entries.get(name)
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::providers::openai::OpenAiHandler;

    #[test]
    fn lookup_and_is_known_agree() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(OpenAiHandler::new("https://api.openai.com".into())));
        assert!(registry.is_known("openai"));
        assert!(registry.lookup("openai").is_some());
        assert!(!registry.is_known("unknownprovider"));
        assert!(registry.lookup("unknownprovider").is_none());
    }
}
