use std::fmt;

use indexmap::IndexMap;

/// What a model is asked to do during a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Instruction-driven image edits.
    Edit,
    /// Prompt ideas for a freshly uploaded panorama.
    Suggest,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Edit => "edit",
            Capability::Suggest => "suggest",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A model name and the backend that serves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub backend: String,
    pub capabilities: Vec<Capability>,
}

impl ModelSpec {
    pub fn new(name: &str, backend: &str, capabilities: &[Capability]) -> Self {
        Self {
            name: name.to_string(),
            backend: backend.to_string(),
            capabilities: capabilities.to_vec(),
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Known models keyed by name. Registration order doubles as the
/// preference order when a request has to fall back.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::from_models([
            ModelSpec::new("gemini-2.5-flash-image-preview", "gemini", &[Capability::Edit]),
            ModelSpec::new("gemini-2.5-flash-image", "gemini", &[Capability::Edit]),
            ModelSpec::new("gemini-2.5-flash", "gemini", &[Capability::Suggest]),
            ModelSpec::new("gemini-2.5-pro", "gemini", &[Capability::Suggest]),
            ModelSpec::new(
                "dryrun-image-1",
                "dryrun",
                &[Capability::Edit, Capability::Suggest],
            ),
        ])
    }
}

impl ModelRegistry {
    pub fn from_models(models: impl IntoIterator<Item = ModelSpec>) -> Self {
        Self {
            models: models
                .into_iter()
                .map(|model| (model.name.clone(), model))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    /// Models able to serve `capability`, most preferred first.
    pub fn candidates(&self, capability: Capability) -> impl Iterator<Item = &ModelSpec> {
        self.models
            .values()
            .filter(move |model| model.supports(capability))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(registry: &ModelRegistry, capability: Capability) -> Vec<&str> {
        registry
            .candidates(capability)
            .map(|model| model.name.as_str())
            .collect()
    }

    #[test]
    fn default_registry_prefers_gemini_and_keeps_dryrun_last() {
        let registry = ModelRegistry::default();
        assert_eq!(
            names(&registry, Capability::Edit),
            vec!["gemini-2.5-flash-image-preview", "gemini-2.5-flash-image", "dryrun-image-1"]
        );
        assert_eq!(
            names(&registry, Capability::Suggest),
            vec!["gemini-2.5-flash", "gemini-2.5-pro", "dryrun-image-1"]
        );
    }

    #[test]
    fn lookup_is_by_exact_name() {
        let registry = ModelRegistry::default();
        assert_eq!(
            registry.get("dryrun-image-1").map(|model| model.backend.as_str()),
            Some("dryrun")
        );
        assert!(registry.get("Dryrun-Image-1").is_none());
    }

    #[test]
    fn capability_labels() {
        assert_eq!(Capability::Edit.to_string(), "edit");
        assert_eq!(Capability::Suggest.as_str(), "suggest");
    }
}
