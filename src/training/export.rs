//! Frozen inference artifacts
//!
//! One artifact per translation direction: a tensor file holding the
//! direction's generator and both discriminators with their parameters baked
//! in, plus a JSON manifest recording the architecture, shapes, step, and the
//! normalization constants. A loaded [`FrozenTranslator`] exposes exactly
//! four ports — `input`, `output`, `d_input`, `d_output` — and deals only in
//! raw domain units.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::Tensor;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{ModelConfig, TrainingConfig};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::models::{ModelRegistry, Network, Normalizer};
use crate::training::checkpoints::CheckpointManager;
use crate::training::objective::AdversarialObjective;

/// The four ports every artifact exposes.
pub const PORTS: [&str; 4] = ["input", "output", "d_input", "d_output"];

/// Translation direction within the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Domain X into domain Y
    X2Y,
    /// Domain Y into domain X
    Y2X,
}

/// Self-describing metadata stored next to an artifact's tensors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    /// Direction of this artifact
    pub direction: Direction,
    /// File stem, e.g. `X2Y`
    pub stem: String,
    /// Training step the parameters were frozen at
    pub step: usize,
    /// Architecture configuration needed to rebuild the networks
    pub model: ModelConfig,
    /// Sample shape of the input domain
    pub in_shape: Vec<usize>,
    /// Sample shape of the output domain
    pub out_shape: Vec<usize>,
    /// Raw-units mapping applied to the input
    pub input_norm: Normalizer,
    /// Raw-units mapping applied to the output
    pub output_norm: Normalizer,
    /// Port names, fixed across artifacts
    pub ports: Vec<String>,
}

/// Export directory for a run and step:
/// `<checkpoints_root>/../export/<run_id>/<step>/`.
pub fn export_dir(checkpoints_root: &Path, run_id: &str, step: usize) -> PathBuf {
    let parent = checkpoints_root
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    parent.join("export").join(run_id).join(step.to_string())
}

/// Write frozen artifacts for both directions of a live cycle.
pub fn export_directions(
    dir: &Path,
    config: &TrainingConfig,
    step: usize,
    xy: &AdversarialObjective,
    yx: &AdversarialObjective,
    x_normalizer: &Normalizer,
    y_normalizer: &Normalizer,
) -> Result<Vec<PathBuf>> {
    let x_name = &config.runtime.x_name;
    let y_name = &config.runtime.y_name;

    let forward = write_artifact(
        dir,
        &format!("{x_name}2{y_name}"),
        Direction::X2Y,
        step,
        &config.model,
        xy.in_shape(),
        xy.out_shape(),
        xy.generator().as_ref(),
        yx.discriminator().as_ref(),
        xy.discriminator().as_ref(),
        x_normalizer,
        y_normalizer,
    )?;
    let backward = write_artifact(
        dir,
        &format!("{y_name}2{x_name}"),
        Direction::Y2X,
        step,
        &config.model,
        yx.in_shape(),
        yx.out_shape(),
        yx.generator().as_ref(),
        xy.discriminator().as_ref(),
        yx.discriminator().as_ref(),
        y_normalizer,
        x_normalizer,
    )?;
    Ok(vec![forward, backward])
}

/// Write one direction's artifact: generator, input-domain discriminator,
/// output-domain discriminator, and the manifest.
#[allow(clippy::too_many_arguments)]
fn write_artifact(
    dir: &Path,
    stem: &str,
    direction: Direction,
    step: usize,
    model: &ModelConfig,
    in_shape: &[usize],
    out_shape: &[usize],
    generator: &dyn Network,
    in_dis: &dyn Network,
    out_dis: &dyn Network,
    input_norm: &Normalizer,
    output_norm: &Normalizer,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let mut tensors = HashMap::new();
    for (prefix, net) in [("gen", generator), ("in_dis", in_dis), ("out_dis", out_dis)] {
        for (name, var) in net.trainable_variables() {
            tensors.insert(format!("{prefix}/{name}"), var.as_tensor().copy()?);
        }
    }

    let tensor_path = dir.join(format!("{stem}.safetensors"));
    candle_core::safetensors::save(&tensors, &tensor_path)
        .map_err(|e| Error::export(format!("writing {}: {e}", tensor_path.display())))?;

    let manifest = ArtifactManifest {
        direction,
        stem: stem.to_string(),
        step,
        model: model.clone(),
        in_shape: in_shape.to_vec(),
        out_shape: out_shape.to_vec(),
        input_norm: *input_norm,
        output_norm: *output_norm,
        ports: PORTS.iter().map(|p| p.to_string()).collect(),
    };
    let manifest_path = dir.join(format!("{stem}.json"));
    fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;

    Ok(tensor_path)
}

/// Export both directions from an existing run directory's latest
/// checkpoint, without a live training session.
pub fn export_from_checkpoint(
    ctx: &Context,
    registry: &ModelRegistry,
    checkpoints_root: &Path,
    run_id: &str,
) -> Result<(usize, Vec<PathBuf>)> {
    let manager = CheckpointManager::new(checkpoints_root.join(run_id), usize::MAX)?;
    let config = manager.read_config()?;
    let info = manager
        .latest()?
        .ok_or_else(|| Error::export(format!("run {run_id} has no checkpoint to export")))?;

    let bundle = registry.build(ctx, &config.model)?;
    let tensors = manager.load(&info, ctx.device())?;
    let branches: [(&str, &dyn Network); 4] = [
        ("xy_gen", bundle.xy_generator.as_ref()),
        ("yx_gen", bundle.yx_generator.as_ref()),
        ("x_dis", bundle.x_discriminator.as_ref()),
        ("y_dis", bundle.y_discriminator.as_ref()),
    ];
    for (branch, net) in branches {
        for (name, var) in net.trainable_variables() {
            let key = format!("model/{branch}/{name}");
            let tensor = tensors
                .get(&key)
                .ok_or_else(|| Error::export(format!("checkpoint is missing tensor {key}")))?;
            var.set(tensor)?;
        }
    }

    let (xy, yx) = crate::training::orchestrator::build_objectives(&config, &bundle);
    let dir = export_dir(checkpoints_root, run_id, info.step);
    let paths = export_directions(
        &dir,
        &config,
        info.step,
        &xy,
        &yx,
        &bundle.x_normalizer,
        &bundle.y_normalizer,
    )?;
    info!(
        "Exported run {} at step {} to {}",
        run_id,
        info.step,
        dir.display()
    );
    Ok((info.step, paths))
}

/// Outputs of one frozen inference call, in raw domain units.
#[derive(Debug)]
pub struct FrozenOutputs {
    /// Translated batch in the output domain's raw units
    pub output: Tensor,
    /// Mean discriminator score on the normalized input
    pub d_input: f32,
    /// Mean discriminator score on the generated output
    pub d_output: f32,
}

/// A loaded frozen artifact: one direction of the cycle, inference only.
pub struct FrozenTranslator {
    manifest: ArtifactManifest,
    generator: std::sync::Arc<dyn Network>,
    in_dis: std::sync::Arc<dyn Network>,
    out_dis: std::sync::Arc<dyn Network>,
}

impl FrozenTranslator {
    /// Load an artifact from its manifest path (`<stem>.json`).
    pub fn load(ctx: &Context, registry: &ModelRegistry, manifest_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(manifest_path).map_err(|e| {
            Error::export(format!("reading {}: {e}", manifest_path.display()))
        })?;
        let manifest: ArtifactManifest = serde_json::from_str(&content)?;

        let tensor_path = manifest_path.with_extension("safetensors");
        let tensors = candle_core::safetensors::load(&tensor_path, ctx.device())
            .map_err(|e| Error::export(format!("reading {}: {e}", tensor_path.display())))?;

        let bundle = registry.build(ctx, &manifest.model)?;
        let (generator, in_dis, out_dis) = match manifest.direction {
            Direction::X2Y => (
                bundle.xy_generator,
                bundle.x_discriminator,
                bundle.y_discriminator,
            ),
            Direction::Y2X => (
                bundle.yx_generator,
                bundle.y_discriminator,
                bundle.x_discriminator,
            ),
        };

        for (prefix, net) in [
            ("gen", generator.as_ref()),
            ("in_dis", in_dis.as_ref()),
            ("out_dis", out_dis.as_ref()),
        ] {
            for (name, var) in net.trainable_variables() {
                let key = format!("{prefix}/{name}");
                let tensor = tensors
                    .get(&key)
                    .ok_or_else(|| Error::export(format!("artifact is missing tensor {key}")))?;
                var.set(tensor)?;
            }
        }

        Ok(Self {
            manifest,
            generator,
            in_dis,
            out_dis,
        })
    }

    /// The artifact's manifest.
    pub fn manifest(&self) -> &ArtifactManifest {
        &self.manifest
    }

    /// Translate a raw-units batch, producing all output ports.
    pub fn run(&self, raw: &Tensor) -> Result<FrozenOutputs> {
        let expected: &[usize] = &self.manifest.in_shape;
        if raw.dims().len() != expected.len() + 1 || &raw.dims()[1..] != expected {
            return Err(Error::shape(format!(
                "frozen {} input expects [batch, {:?}], got {:?}",
                self.manifest.stem,
                expected,
                raw.dims()
            )));
        }

        let input = self.manifest.input_norm.normalize(raw)?;
        let generated = self.generator.transform(&input)?;
        let output = self.manifest.output_norm.denormalize(&generated)?;
        let d_input = self.in_dis.transform(&input)?.mean_all()?.to_scalar::<f32>()?;
        let d_output = self
            .out_dis
            .transform(&generated)?
            .mean_all()?
            .to_scalar::<f32>()?;

        Ok(FrozenOutputs {
            output,
            d_input,
            d_output,
        })
    }
}
