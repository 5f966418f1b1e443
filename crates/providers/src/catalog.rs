//! The model catalog: alias resolution, client construction, and the
//! free-model rotation order.
//!
//! The catalog is an injected value — the processor holds a reference and
//! tests substitute scripted clients via [`ModelCatalog::register_client`].

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use dr_domain::config::{ModelEntry, ModelsConfig};
use dr_domain::error::{Error, Result};

use crate::openai_compat::OpenAiCompatClient;
use crate::traits::ModelClient;

pub struct ModelCatalog {
    entries: Vec<ModelEntry>,
    free_rotation: Vec<String>,
    request_timeout_secs: u64,
    clients: RwLock<HashMap<String, Arc<dyn ModelClient>>>,
}

impl ModelCatalog {
    pub fn from_config(cfg: &ModelsConfig) -> Self {
        Self {
            entries: cfg.catalog.clone(),
            free_rotation: cfg.free_rotation.clone(),
            request_timeout_secs: cfg.request_timeout_secs,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a catalog entry by alias.
    pub fn entry(&self, alias: &str) -> Option<&ModelEntry> {
        self.entries.iter().find(|e| e.alias == alias)
    }

    /// Context window for an alias; unknown aliases get a conservative
    /// default so budget math never divides by zero.
    pub fn max_context(&self, alias: &str) -> usize {
        self.entry(alias).map(|e| e.max_context).unwrap_or(131_072)
    }

    pub fn is_free(&self, alias: &str) -> bool {
        self.entry(alias).map(|e| e.free).unwrap_or(false)
    }

    pub fn supports_parallel_tools(&self, alias: &str) -> bool {
        self.entry(alias)
            .map(|e| e.supports_parallel_tools)
            .unwrap_or(false)
    }

    /// The client for an alias. Injected clients win; otherwise an
    /// OpenAI-compatible client is built once and cached.
    pub fn client(&self, alias: &str) -> Result<Arc<dyn ModelClient>> {
        if let Some(client) = self.clients.read().get(alias) {
            return Ok(client.clone());
        }

        let entry = self.entry(alias).ok_or_else(|| Error::Config(format!(
            "unknown model alias '{alias}'"
        )))?;
        let client: Arc<dyn ModelClient> =
            Arc::new(OpenAiCompatClient::from_entry(entry, self.request_timeout_secs)?);

        self.clients
            .write()
            .entry(alias.to_string())
            .or_insert(client.clone());
        Ok(client)
    }

    /// Substitute the client for an alias (tests, custom transports).
    pub fn register_client(&self, alias: &str, client: Arc<dyn ModelClient>) {
        self.clients.write().insert(alias.to_string(), client);
    }

    /// The next free-rotation alias not yet tried for this task.
    pub fn next_free_alias(&self, tried: &BTreeSet<String>) -> Option<String> {
        self.free_rotation
            .iter()
            .find(|alias| !tried.contains(*alias))
            .cloned()
    }

    /// Wire model name for an alias (falls back to the alias itself).
    pub fn wire_model(&self, alias: &str) -> String {
        self.entry(alias)
            .map(|e| e.model.clone())
            .unwrap_or_else(|| alias.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ModelCatalog {
        ModelCatalog::from_config(&ModelsConfig {
            catalog: vec![
                ModelEntry {
                    alias: "paid".into(),
                    model: "paid-1".into(),
                    base_url: "https://api.example.com/v1".into(),
                    max_context: 200_000,
                    free: false,
                    supports_parallel_tools: true,
                    supports_streaming: true,
                    api_key_env: None,
                },
                ModelEntry {
                    alias: "free-a".into(),
                    model: "free-a-1".into(),
                    base_url: "https://free.example.com/v1".into(),
                    max_context: 131_072,
                    free: true,
                    supports_parallel_tools: false,
                    supports_streaming: true,
                    api_key_env: None,
                },
                ModelEntry {
                    alias: "free-b".into(),
                    model: "free-b-1".into(),
                    base_url: "https://free.example.com/v1".into(),
                    max_context: 65_536,
                    free: true,
                    supports_parallel_tools: true,
                    supports_streaming: false,
                    api_key_env: None,
                },
            ],
            free_rotation: vec!["free-a".into(), "free-b".into()],
            ..Default::default()
        })
    }

    #[test]
    fn rotation_skips_tried_aliases() {
        let cat = catalog();
        let mut tried = BTreeSet::new();
        assert_eq!(cat.next_free_alias(&tried).as_deref(), Some("free-a"));
        tried.insert("free-a".to_string());
        assert_eq!(cat.next_free_alias(&tried).as_deref(), Some("free-b"));
        tried.insert("free-b".to_string());
        assert_eq!(cat.next_free_alias(&tried), None);
    }

    #[test]
    fn unknown_alias_gets_default_context() {
        let cat = catalog();
        assert_eq!(cat.max_context("ghost"), 131_072);
        assert!(!cat.is_free("ghost"));
    }

    #[test]
    fn capability_lookup() {
        let cat = catalog();
        assert!(cat.supports_parallel_tools("paid"));
        assert!(!cat.supports_parallel_tools("free-a"));
        assert_eq!(cat.wire_model("free-b"), "free-b-1");
    }
}
