//! Pluggable networks and the architecture registry
//!
//! Generators and discriminators are opaque, named transforms behind the
//! [`Network`] trait. A registered [`ArchitectureFactory`] produces the full
//! [`ModelBundle`] a cycle needs: both generators, both discriminators, and
//! the per-domain normalizers.

pub mod mlp;

use std::collections::HashMap;
use std::sync::Arc;

use candle_core::{DType, Tensor, Var};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::config::{ModelConfig, NormalizerConfig};
use crate::context::Context;
use crate::error::{Error, Result};

pub use mlp::{MlpDiscriminator, MlpFactory, MlpGenerator};

/// A named, stateful transform with a trainable parameter set.
///
/// Constructed once per orchestrator instantiation; parameters are mutated
/// only by the optimizer.
pub trait Network: Send + Sync {
    /// Network name, used for logging and checkpoint tensor keys.
    fn name(&self) -> &str;

    /// Apply the transform to a batch.
    fn transform(&self, batch: &Tensor) -> Result<Tensor>;

    /// Trainable parameters, sorted by name for deterministic ordering.
    fn trainable_variables(&self) -> Vec<(String, Var)>;

    /// L2 weight-decay lambda for this network's parameters.
    fn weight_lambda(&self) -> f64 {
        0.0
    }
}

/// L2 mean-square-of-parameters penalty scaled by the network's lambda.
///
/// A zero lambda short-circuits to a zero scalar without touching the
/// parameter set.
pub fn weight_loss(net: &dyn Network, ctx: &Context) -> Result<Tensor> {
    let lambda = net.weight_lambda();
    if lambda == 0.0 {
        return Ok(Tensor::zeros((), DType::F32, ctx.device())?);
    }
    let vars = net.trainable_variables();
    if vars.is_empty() {
        return Ok(Tensor::zeros((), DType::F32, ctx.device())?);
    }
    let mut acc = Tensor::zeros((), DType::F32, ctx.device())?;
    for (_, var) in &vars {
        acc = (acc + var.as_tensor().sqr()?.mean_all()?)?;
    }
    Ok(((acc / vars.len() as f64)? * lambda)?)
}

/// Affine raw-units <-> training-units mapping for one domain.
///
/// `normalize(raw) = raw * scale + offset`; `denormalize` inverts it. The
/// constants are baked into frozen export artifacts so external callers deal
/// only in raw domain units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Normalizer {
    scale: f64,
    offset: f64,
}

impl Normalizer {
    /// Create a normalizer with the given affine constants.
    pub fn new(scale: f64, offset: f64) -> Self {
        Self { scale, offset }
    }

    /// Identity mapping.
    pub fn identity() -> Self {
        Self::new(1.0, 0.0)
    }

    /// Map raw units into training units.
    pub fn normalize(&self, raw: &Tensor) -> Result<Tensor> {
        Ok(raw.affine(self.scale, self.offset)?)
    }

    /// Map training units back into raw units.
    pub fn denormalize(&self, normalized: &Tensor) -> Result<Tensor> {
        Ok(normalized.affine(1.0 / self.scale, -self.offset / self.scale)?)
    }
}

impl From<NormalizerConfig> for Normalizer {
    fn from(config: NormalizerConfig) -> Self {
        Self::new(config.scale, config.offset)
    }
}

/// Everything an architecture must supply for one cycle of training.
pub struct ModelBundle {
    /// Generator mapping domain X into domain Y
    pub xy_generator: Arc<dyn Network>,
    /// Generator mapping domain Y into domain X
    pub yx_generator: Arc<dyn Network>,
    /// Discriminator judging domain X samples
    pub x_discriminator: Arc<dyn Network>,
    /// Discriminator judging domain Y samples
    pub y_discriminator: Arc<dyn Network>,
    /// Raw-units mapping for domain X
    pub x_normalizer: Normalizer,
    /// Raw-units mapping for domain Y
    pub y_normalizer: Normalizer,
    /// Sample shape of domain X (no batch dimension)
    pub x_shape: Vec<usize>,
    /// Sample shape of domain Y (no batch dimension)
    pub y_shape: Vec<usize>,
}

impl std::fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBundle")
            .field("x_normalizer", &self.x_normalizer)
            .field("y_normalizer", &self.y_normalizer)
            .field("x_shape", &self.x_shape)
            .field("y_shape", &self.y_shape)
            .finish_non_exhaustive()
    }
}

/// Factory producing a [`ModelBundle`] for a registered architecture.
pub trait ArchitectureFactory: Send + Sync {
    /// Build the bundle on the given context.
    fn build(&self, ctx: &Context, config: &ModelConfig) -> Result<ModelBundle>;
}

/// Registry mapping architecture identifiers to bundle factories.
///
/// Replaces by-name dynamic module import with an explicit strategy table.
pub struct ModelRegistry {
    factories: HashMap<String, Arc<dyn ArchitectureFactory>>,
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry preloaded with the builtin architectures.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("mlp", Arc::new(MlpFactory));
        registry
    }

    /// Register a factory under an architecture identifier.
    pub fn register(&mut self, arch: impl Into<String>, factory: Arc<dyn ArchitectureFactory>) {
        self.factories.insert(arch.into(), factory);
    }

    /// Build a bundle for the architecture named in the model config.
    pub fn build(&self, ctx: &Context, config: &ModelConfig) -> Result<ModelBundle> {
        let factory = self.factories.get(&config.arch).ok_or_else(|| {
            let mut known: Vec<_> = self.factories.keys().cloned().collect();
            known.sort();
            Error::config(format!(
                "unknown architecture '{}', registered: {}",
                config.arch,
                known.join(", ")
            ))
        })?;
        factory.build(ctx, config)
    }

    /// Registered architecture identifiers.
    pub fn architectures(&self) -> Vec<String> {
        let mut archs: Vec<_> = self.factories.keys().cloned().collect();
        archs.sort();
        archs
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

static BUILTIN_REGISTRY: Lazy<ModelRegistry> = Lazy::new(ModelRegistry::with_builtins);

/// The registry of builtin architectures.
pub fn builtin_registry() -> &'static ModelRegistry {
    &BUILTIN_REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn normalizer_roundtrip() {
        let ctx = Context::cpu();
        let norm = Normalizer::new(1.0 / 127.5, -1.0);
        let raw = Tensor::new(&[0f32, 127.5, 255.0], ctx.device()).unwrap();
        let normalized = norm.normalize(&raw).unwrap();
        let values = normalized.to_vec1::<f32>().unwrap();
        assert_relative_eq!(values[0], -1.0, epsilon = 1e-6);
        assert_relative_eq!(values[1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(values[2], 1.0, epsilon = 1e-6);

        let back = norm.denormalize(&normalized).unwrap();
        let raw_again = back.to_vec1::<f32>().unwrap();
        assert_relative_eq!(raw_again[1], 127.5, epsilon = 1e-3);
    }

    #[test]
    fn registry_rejects_unknown_architecture() {
        let registry = ModelRegistry::with_builtins();
        let mut config = ModelConfig::default();
        config.arch = "resnet-900".to_string();
        let err = registry.build(&Context::cpu(), &config).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn builtin_registry_lists_mlp() {
        assert!(builtin_registry()
            .architectures()
            .contains(&"mlp".to_string()));
    }
}
