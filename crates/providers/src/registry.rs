//! Startup-time provider registry.

use std::{collections::HashMap, sync::Arc};

use crate::{error::ProviderError, types::ProviderDef};

/// Immutable map of provider name → definition, built once at boot.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<ProviderDef>>,
}

impl ProviderRegistry {
    /// Build a registry from definitions. Later duplicates replace earlier
    /// ones, letting deployments override a built-in with a patched record.
    #[must_use]
    pub fn new(definitions: Vec<ProviderDef>) -> Self {
        let mut providers = HashMap::new();
        for def in definitions {
            providers.insert(def.name.clone(), Arc::new(def));
        }
        Self { providers }
    }

    /// Registry with the built-in catalog.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(crate::catalog::builtin_providers())
    }

    pub fn get(&self, name: &str) -> Result<Arc<ProviderDef>, ProviderError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(name.to_string()))
    }

    #[must_use]
    pub fn list(&self) -> Vec<Arc<ProviderDef>> {
        let mut all: Vec<_> = self.providers.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_resolves_known_providers() {
        let registry = ProviderRegistry::builtin();
        assert!(registry.get("github").is_ok());
        assert!(registry.get("gitlab").is_ok());
        assert!(registry.get("jira").is_ok());
        assert_eq!(registry.list().len(), 3);
    }

    #[test]
    fn unknown_provider_is_a_typed_error() {
        let registry = ProviderRegistry::builtin();
        assert!(matches!(
            registry.get("bitbucket"),
            Err(ProviderError::UnknownProvider(_))
        ));
    }

    #[test]
    fn later_definition_overrides_earlier() {
        let mut defs = crate::catalog::builtin_providers();
        let mut patched = defs[0].clone();
        patched.base_url = "https://github.example.internal".into();
        defs.push(patched.clone());

        let registry = ProviderRegistry::new(defs);
        assert_eq!(
            registry.get(&patched.name).unwrap().base_url,
            "https://github.example.internal"
        );
    }
}
