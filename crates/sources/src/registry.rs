//! Runtime dispatch from source name to client, plus the shared breaker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mangatrack_core::SourceName;

use crate::breaker::CircuitBreaker;
use crate::client::SourceClient;
use crate::comick::ComickClient;
use crate::error::SourceError;
use crate::mangadex::MangaDexClient;
use crate::SourceResult;

pub struct SourceRegistry {
    clients: HashMap<SourceName, Arc<dyn SourceClient>>,
    breaker: Arc<CircuitBreaker>,
}

impl SourceRegistry {
    /// Build the standard registry with one shared HTTP client.
    pub fn new() -> SourceResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("mangatrack/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut clients: HashMap<SourceName, Arc<dyn SourceClient>> = HashMap::new();
        clients.insert(
            SourceName::MangaDex,
            Arc::new(MangaDexClient::new(http.clone())),
        );
        clients.insert(SourceName::Comick, Arc::new(ComickClient::new(http)));
        // weebcentral / mangaplus have no adapter yet; the poll worker
        // marks their sources inactive via NotImplemented.

        Ok(Self { clients, breaker: Arc::new(CircuitBreaker::default()) })
    }

    /// Registry over explicit clients (tests).
    pub fn with_clients(clients: Vec<Arc<dyn SourceClient>>) -> Self {
        Self {
            clients: clients.into_iter().map(|c| (c.name(), c)).collect(),
            breaker: Arc::new(CircuitBreaker::default()),
        }
    }

    pub fn client(&self, source: SourceName) -> SourceResult<Arc<dyn SourceClient>> {
        self.clients
            .get(&source)
            .cloned()
            .ok_or(SourceError::NotImplemented(source))
    }

    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        self.breaker.clone()
    }

    pub fn implemented(&self) -> Vec<SourceName> {
        self.clients.keys().copied().collect()
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unimplemented_source_is_typed() {
        let registry = SourceRegistry::new().unwrap();
        let err = registry.client(SourceName::MangaPlus).err().unwrap();
        assert!(matches!(err, SourceError::NotImplemented(SourceName::MangaPlus)));
    }

    #[test]
    fn test_standard_registry_has_adapters() {
        let registry = SourceRegistry::new().unwrap();
        assert!(registry.client(SourceName::MangaDex).is_ok());
        assert!(registry.client(SourceName::Comick).is_ok());
        let mut implemented = registry.implemented();
        implemented.sort_by_key(|s| s.as_str());
        assert_eq!(implemented, vec![SourceName::Comick, SourceName::MangaDex]);
    }
}
