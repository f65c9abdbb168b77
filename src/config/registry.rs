// ABOUTME: Registry of server descriptors from every loaded configuration source.
// ABOUTME: Keys are unique; a failing source is reported without affecting the others.

use super::error::ConfigError;
use super::openssh::ConfigSource;
use super::server::ServerDescriptor;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

/// A source that could not be ingested.
#[derive(Debug)]
pub struct SourceFailure {
    pub source_id: String,
    pub error: ConfigError,
}

#[derive(Debug, Default, Clone)]
pub struct Registry {
    servers: BTreeMap<String, ServerDescriptor>,
}

impl Registry {
    /// Ingest every source, collecting failures instead of aborting.
    pub fn load(sources: &[ConfigSource]) -> (Self, Vec<SourceFailure>) {
        let mut registry = Self::default();
        let mut failures = Vec::new();

        for source in sources {
            match source.load() {
                Ok(servers) => {
                    tracing::debug!("loaded {} server(s) from {}", servers.len(), source.id());
                    registry.extend(servers);
                }
                Err(error) => {
                    tracing::warn!("skipping config source {}: {}", source.id(), error);
                    failures.push(SourceFailure {
                        source_id: source.id().to_string(),
                        error,
                    });
                }
            }
        }

        (registry, failures)
    }

    /// Insert a descriptor. An existing key keeps its first descriptor.
    pub fn insert(&mut self, key: impl Into<String>, server: ServerDescriptor) -> bool {
        match self.servers.entry(key.into()) {
            Entry::Vacant(slot) => {
                slot.insert(server);
                true
            }
            Entry::Occupied(slot) => {
                tracing::warn!("duplicate server entry ignored: {}", slot.key());
                false
            }
        }
    }

    pub fn extend(&mut self, servers: impl IntoIterator<Item = (String, ServerDescriptor)>) {
        for (key, server) in servers {
            self.insert(key, server);
        }
    }

    pub fn get(&self, key: &str) -> Option<&ServerDescriptor> {
        self.servers.get(key)
    }

    /// Keys matching `name` exactly, or by host token after the `<source>:` prefix.
    pub fn find(&self, name: &str) -> Vec<&str> {
        if let Some((key, _)) = self.servers.get_key_value(name) {
            return vec![key.as_str()];
        }
        self.keys()
            .filter(|key| key.rsplit_once(':').is_some_and(|(_, host)| host == name))
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ServerDescriptor)> {
        self.servers.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
