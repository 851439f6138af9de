//! Builtin fully-connected architecture for flat and point-cloud domains
//!
//! A linear-stack generator/discriminator pair. The generator optionally adds
//! a residual skip from its input and clamps its output to [-1, 1]; the
//! discriminator uses a leaky-ReLU body and an optional sigmoid head (left
//! off for Wasserstein critics).

use candle_core::{Tensor, Var};
use candle_nn::{Linear, Module, VarBuilder, VarMap};

use crate::config::ModelConfig;
use crate::context::Context;
use crate::error::{Error, Result};

use super::{ArchitectureFactory, ModelBundle, Network, Normalizer};

fn flat_dim(shape: &[usize]) -> usize {
    shape.iter().product()
}

fn leaky_relu(x: &Tensor, slope: f64) -> Result<Tensor> {
    Ok(x.maximum(&(x * slope)?)?)
}

fn sorted_vars(var_map: &VarMap) -> Vec<(String, Var)> {
    let data = var_map.data().lock().unwrap();
    let mut vars: Vec<_> = data
        .iter()
        .map(|(name, var)| (name.clone(), var.clone()))
        .collect();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    vars
}

fn build_layers(
    vb: &VarBuilder,
    in_dim: usize,
    hidden_dims: &[usize],
    out_dim: usize,
) -> Result<Vec<Linear>> {
    let mut dims = Vec::with_capacity(hidden_dims.len() + 2);
    dims.push(in_dim);
    dims.extend_from_slice(hidden_dims);
    dims.push(out_dim);

    let mut layers = Vec::with_capacity(dims.len() - 1);
    for i in 0..dims.len() - 1 {
        layers.push(candle_nn::linear(
            dims[i],
            dims[i + 1],
            vb.pp(format!("l{i}")),
        )?);
    }
    Ok(layers)
}

/// Fully-connected generator over flattened samples.
pub struct MlpGenerator {
    name: String,
    var_map: VarMap,
    layers: Vec<Linear>,
    in_shape: Vec<usize>,
    out_shape: Vec<usize>,
    residual: bool,
    clamp_output: bool,
    weight_lambda: f64,
}

impl MlpGenerator {
    /// Build a generator mapping `in_shape` samples to `out_shape` samples.
    pub fn new(
        ctx: &Context,
        name: impl Into<String>,
        in_shape: &[usize],
        out_shape: &[usize],
        hidden_dims: &[usize],
        residual: bool,
        clamp_output: bool,
        weight_lambda: f64,
    ) -> Result<Self> {
        if residual && in_shape != out_shape {
            return Err(Error::config(
                "residual generators require matching input and output shapes",
            ));
        }
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, ctx.dtype(), ctx.device());
        let layers = build_layers(&vb, flat_dim(in_shape), hidden_dims, flat_dim(out_shape))?;
        Ok(Self {
            name: name.into(),
            var_map,
            layers,
            in_shape: in_shape.to_vec(),
            out_shape: out_shape.to_vec(),
            residual,
            clamp_output,
            weight_lambda,
        })
    }

    /// Sample shape consumed by this generator.
    pub fn in_shape(&self) -> &[usize] {
        &self.in_shape
    }

    /// Sample shape produced by this generator.
    pub fn out_shape(&self) -> &[usize] {
        &self.out_shape
    }
}

impl std::fmt::Debug for MlpGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MlpGenerator")
            .field("name", &self.name)
            .field("in_shape", &self.in_shape)
            .field("out_shape", &self.out_shape)
            .field("residual", &self.residual)
            .field("clamp_output", &self.clamp_output)
            .field("weight_lambda", &self.weight_lambda)
            .finish_non_exhaustive()
    }
}

impl Network for MlpGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, batch: &Tensor) -> Result<Tensor> {
        let batch_size = batch.dim(0)?;
        let flat = batch.flatten_from(1)?;

        let mut out = flat.clone();
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            out = layer.forward(&out)?;
            if i < last {
                out = out.relu()?;
            }
        }

        if self.residual {
            out = (out + &flat)?;
        }
        if self.clamp_output {
            out = out.clamp(-1f32, 1f32)?;
        }

        let mut shape = Vec::with_capacity(self.out_shape.len() + 1);
        shape.push(batch_size);
        shape.extend_from_slice(&self.out_shape);
        Ok(out.reshape(shape)?)
    }

    fn trainable_variables(&self) -> Vec<(String, Var)> {
        sorted_vars(&self.var_map)
    }

    fn weight_lambda(&self) -> f64 {
        self.weight_lambda
    }
}

/// Fully-connected discriminator producing one score per sample.
pub struct MlpDiscriminator {
    name: String,
    var_map: VarMap,
    layers: Vec<Linear>,
    sigmoid_head: bool,
    weight_lambda: f64,
}

impl MlpDiscriminator {
    /// Build a discriminator over `in_shape` samples.
    pub fn new(
        ctx: &Context,
        name: impl Into<String>,
        in_shape: &[usize],
        hidden_dims: &[usize],
        sigmoid_head: bool,
        weight_lambda: f64,
    ) -> Result<Self> {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, ctx.dtype(), ctx.device());
        let layers = build_layers(&vb, flat_dim(in_shape), hidden_dims, 1)?;
        Ok(Self {
            name: name.into(),
            var_map,
            layers,
            sigmoid_head,
            weight_lambda,
        })
    }
}

impl Network for MlpDiscriminator {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, batch: &Tensor) -> Result<Tensor> {
        let mut out = batch.flatten_from(1)?;
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            out = layer.forward(&out)?;
            if i < last {
                out = leaky_relu(&out, 0.2)?;
            }
        }
        if self.sigmoid_head {
            out = candle_nn::ops::sigmoid(&out)?;
        }
        Ok(out)
    }

    fn trainable_variables(&self) -> Vec<(String, Var)> {
        sorted_vars(&self.var_map)
    }

    fn weight_lambda(&self) -> f64 {
        self.weight_lambda
    }
}

/// Factory for the builtin `mlp` architecture.
pub struct MlpFactory;

impl ArchitectureFactory for MlpFactory {
    fn build(&self, ctx: &Context, config: &ModelConfig) -> Result<ModelBundle> {
        let xy_generator = MlpGenerator::new(
            ctx,
            "xy-gen",
            &config.x_shape,
            &config.y_shape,
            &config.hidden_dims,
            config.residual,
            config.clamp_output,
            config.gen_weight_lambda,
        )?;
        let yx_generator = MlpGenerator::new(
            ctx,
            "yx-gen",
            &config.y_shape,
            &config.x_shape,
            &config.hidden_dims,
            config.residual,
            config.clamp_output,
            config.gen_weight_lambda,
        )?;
        let x_discriminator = MlpDiscriminator::new(
            ctx,
            "x-dis",
            &config.x_shape,
            &config.hidden_dims,
            config.dis_sigmoid,
            config.dis_weight_lambda,
        )?;
        let y_discriminator = MlpDiscriminator::new(
            ctx,
            "y-dis",
            &config.y_shape,
            &config.hidden_dims,
            config.dis_sigmoid,
            config.dis_weight_lambda,
        )?;

        Ok(ModelBundle {
            xy_generator: std::sync::Arc::new(xy_generator),
            yx_generator: std::sync::Arc::new(yx_generator),
            x_discriminator: std::sync::Arc::new(x_discriminator),
            y_discriminator: std::sync::Arc::new(y_discriminator),
            x_normalizer: Normalizer::from(config.x_norm),
            y_normalizer: Normalizer::from(config.y_norm),
            x_shape: config.x_shape.clone(),
            y_shape: config.y_shape.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            x_shape: vec![4],
            y_shape: vec![4],
            hidden_dims: vec![8],
            ..ModelConfig::default()
        }
    }

    #[test]
    fn generator_preserves_batch_and_shape() {
        let ctx = Context::cpu();
        let gen = MlpGenerator::new(&ctx, "g", &[4], &[6], &[8], false, false, 0.0).unwrap();
        let x = Tensor::zeros((3, 4), ctx.dtype(), ctx.device()).unwrap();
        let y = gen.transform(&x).unwrap();
        assert_eq!(y.dims(), &[3, 6]);
    }

    #[test]
    fn residual_requires_matching_shapes() {
        let ctx = Context::cpu();
        let err = MlpGenerator::new(&ctx, "g", &[4], &[6], &[8], true, false, 0.0).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn clamped_generator_stays_in_range() {
        let ctx = Context::cpu();
        let gen = MlpGenerator::new(&ctx, "g", &[4], &[4], &[8], false, true, 0.0).unwrap();
        let x = Tensor::full(100f32, (2, 4), ctx.device()).unwrap();
        let y = gen.transform(&x).unwrap();
        let flat = y.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(flat.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn discriminator_scores_one_per_sample() {
        let ctx = Context::cpu();
        let dis = MlpDiscriminator::new(&ctx, "d", &[4], &[8], true, 0.0).unwrap();
        let x = Tensor::zeros((5, 4), ctx.dtype(), ctx.device()).unwrap();
        let scores = dis.transform(&x).unwrap();
        assert_eq!(scores.dims(), &[5, 1]);
        let flat = scores.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(flat.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn factory_builds_consistent_bundle() {
        let ctx = Context::cpu();
        let bundle = MlpFactory.build(&ctx, &tiny_config()).unwrap();
        assert_eq!(bundle.x_shape, vec![4]);
        assert!(!bundle.xy_generator.trainable_variables().is_empty());
        assert!(!bundle.y_discriminator.trainable_variables().is_empty());
    }
}
