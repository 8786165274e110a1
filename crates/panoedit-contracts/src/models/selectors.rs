use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

use super::registry::{Capability, ModelRegistry, ModelSpec};

/// Why a session ended up on a model other than the one asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    NotRequested,
    UnknownModel(String),
    Unsupported { model: String, capability: Capability },
    BackendUnavailable { model: String, backend: String },
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::NotRequested => f.write_str("No model specified; using default."),
            FallbackReason::UnknownModel(model) => write!(f, "Unknown model '{model}'."),
            FallbackReason::Unsupported { model, capability } => {
                write!(f, "Model '{model}' cannot be used to {capability}.")
            }
            FallbackReason::BackendUnavailable { model, backend } => {
                write!(f, "Model '{model}' needs the '{backend}' backend, which is not available.")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no {capability} model is served by an available backend")]
pub struct NoModelAvailable {
    pub capability: Capability,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub capability: Capability,
    pub requested: Option<String>,
    pub fallback: Option<FallbackReason>,
}

/// The two models a session runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPair {
    pub edit: ModelSelection,
    pub suggest: ModelSelection,
}

/// Resolves requested model names against the registry, only ever landing
/// on a model whose backend is actually registered.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    registry: ModelRegistry,
    backends: BTreeSet<String>,
}

impl ModelSelector {
    pub fn new<I, S>(registry: ModelRegistry, backends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            registry,
            backends: backends.into_iter().map(Into::into).collect(),
        }
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        capability: Capability,
    ) -> Result<ModelSelection, NoModelAvailable> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let fallback = match requested.map(|name| (name, self.registry.get(name))) {
            None => FallbackReason::NotRequested,
            Some((name, None)) => FallbackReason::UnknownModel(name.to_string()),
            Some((_, Some(model))) if !model.supports(capability) => FallbackReason::Unsupported {
                model: model.name.clone(),
                capability,
            },
            Some((_, Some(model))) if !self.backends.contains(&model.backend) => {
                FallbackReason::BackendUnavailable {
                    model: model.name.clone(),
                    backend: model.backend.clone(),
                }
            }
            Some((name, Some(model))) => {
                return Ok(ModelSelection {
                    model: model.clone(),
                    capability,
                    requested: Some(name.to_string()),
                    fallback: None,
                });
            }
        };

        let model = self
            .registry
            .candidates(capability)
            .find(|model| self.backends.contains(&model.backend))
            .cloned()
            .ok_or(NoModelAvailable { capability })?;
        Ok(ModelSelection {
            model,
            capability,
            requested: requested.map(str::to_string),
            fallback: Some(fallback),
        })
    }

    pub fn select_pair(
        &self,
        edit: Option<&str>,
        suggest: Option<&str>,
    ) -> Result<ModelPair, NoModelAvailable> {
        Ok(ModelPair {
            edit: self.select(edit, Capability::Edit)?,
            suggest: self.select(suggest, Capability::Suggest)?,
        })
    }
}
