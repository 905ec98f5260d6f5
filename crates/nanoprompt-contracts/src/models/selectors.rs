use thiserror::Error;

use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

impl ModelSelection {
    /// Name of the service that serves the chosen model (`gemini`, `dryrun`).
    pub fn provider(&self) -> &str {
        &self.model.provider
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("No models available for capability '{capability}'.")]
    NoModels { capability: String },
    #[error("No {provider} models available for capability '{capability}'.")]
    NoProviderModels { provider: String, capability: String },
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, SelectionError> {
        self.select_from(requested, capability, None)
    }

    /// Like [`select`](Self::select), restricted to one provider when given.
    /// A requested model served by another provider falls back with a reason.
    pub fn select_from(
        &self,
        requested: Option<&str>,
        capability: &str,
        provider: Option<&str>,
    ) -> Result<ModelSelection, SelectionError> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let fallback_reason = match requested {
            Some(name) => match self.registry.ensure(name, capability) {
                Some(model) if provider.map_or(true, |wanted| model.provider == wanted) => {
                    return Ok(ModelSelection {
                        model,
                        requested: Some(name.to_string()),
                        fallback_reason: None,
                    });
                }
                Some(model) => format!(
                    "Requested model '{name}' is served by '{}', not '{}'.",
                    model.provider,
                    provider.unwrap_or_default()
                ),
                None => {
                    format!("Requested model '{name}' unavailable for capability '{capability}'.")
                }
            },
            None => "No model specified; using default.".to_string(),
        };

        let model = self
            .registry
            .by_capability(capability)
            .into_iter()
            .find(|model| provider.map_or(true, |wanted| model.provider == wanted));
        let Some(model) = model else {
            return Err(match provider {
                Some(wanted) => SelectionError::NoProviderModels {
                    provider: wanted.to_string(),
                    capability: capability.to_string(),
                },
                None => SelectionError::NoModels {
                    capability: capability.to_string(),
                },
            });
        };
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason: Some(fallback_reason),
        })
    }
}
