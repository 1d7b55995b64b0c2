//! Job kind and alias to provider model path

use crate::provider::JobKind;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("No model configured for job kind {0}")]
    NoModel(JobKind),

    #[error("Unknown model alias: {0}")]
    UnknownAlias(String),
}

pub trait ModelCatalog: Send + Sync {
    fn resolve(&self, kind: JobKind, alias: Option<&str>) -> Result<String, CatalogError>;
}

/// Per-kind defaults plus named aliases
#[derive(Debug, Clone, Default)]
pub struct ConfiguredCatalog {
    defaults: HashMap<JobKind, String>,
    aliases: HashMap<String, String>,
}

impl ConfiguredCatalog {
    pub fn new(defaults: HashMap<JobKind, String>, aliases: HashMap<String, String>) -> Self {
        Self { defaults, aliases }
    }

    /// Build from string-keyed config tables; unknown kinds are ignored
    pub fn from_tables(
        defaults: &HashMap<String, String>,
        aliases: &HashMap<String, String>,
    ) -> Self {
        let defaults = defaults
            .iter()
            .filter_map(|(kind, model)| Some((kind.parse::<JobKind>().ok()?, model.clone())))
            .collect();
        Self::new(defaults, aliases.clone())
    }
}

impl ModelCatalog for ConfiguredCatalog {
    fn resolve(&self, kind: JobKind, alias: Option<&str>) -> Result<String, CatalogError> {
        match alias.map(str::trim).filter(|a| !a.is_empty()) {
            Some(alias) => self
                .aliases
                .get(alias)
                .cloned()
                .ok_or_else(|| CatalogError::UnknownAlias(alias.to_string())),
            None => self
                .defaults
                .get(&kind)
                .cloned()
                .ok_or(CatalogError::NoModel(kind)),
        }
    }
}
