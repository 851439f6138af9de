//! Configuration structures for cygan training runs
//!
//! The whole run is described by one immutable [`TrainingConfig`] constructed
//! up front (from a JSON file, the CLI, or code) and passed by reference into
//! the orchestrator. There is no global mutable flag state.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Adversarial objective family selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GanType {
    /// Standard saturating GAN with log-probability losses
    Gan,
    /// Least-squares GAN
    Lsgan,
    /// Wasserstein GAN with gradient penalty
    Wgan,
}

impl std::str::FromStr for GanType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gan" => Ok(Self::Gan),
            "lsgan" => Ok(Self::Lsgan),
            "wgan" => Ok(Self::Wgan),
            other => Err(Error::config(format!(
                "unknown GAN type '{other}', expected one of gan/lsgan/wgan"
            ))),
        }
    }
}

/// Main configuration for a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Architecture and shape configuration
    pub model: ModelConfig,
    /// Loss-family selection and per-branch weighting
    pub objective: ObjectiveConfig,
    /// Step budget, learning-rate and cycle-lambda schedules
    pub schedule: ScheduleConfig,
    /// Replay buffer (history) configuration
    pub history: HistoryConfig,
    /// Checkpoint/export configuration
    pub checkpointing: CheckpointingConfig,
    /// Run-level settings
    pub runtime: RuntimeConfig,
}

/// Architecture selection and shape contracts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Registered architecture identifier
    pub arch: String,
    /// Sample shape of domain X (without the batch dimension)
    pub x_shape: Vec<usize>,
    /// Sample shape of domain Y (without the batch dimension)
    pub y_shape: Vec<usize>,
    /// Hidden layer widths for the builtin architectures
    pub hidden_dims: Vec<usize>,
    /// L2 weight-decay lambda applied to each generator
    pub gen_weight_lambda: f64,
    /// L2 weight-decay lambda applied to each discriminator
    pub dis_weight_lambda: f64,
    /// Add a residual skip from generator input to output
    pub residual: bool,
    /// Clamp generator output to [-1, 1]
    pub clamp_output: bool,
    /// Apply a sigmoid head to discriminator scores (disable for WGAN critics)
    pub dis_sigmoid: bool,
    /// Raw-units to training-units mapping for domain X: `x * scale + offset`
    pub x_norm: NormalizerConfig,
    /// Raw-units to training-units mapping for domain Y
    pub y_norm: NormalizerConfig,
}

/// Affine normalization constants for one domain
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Multiplicative factor applied to raw units
    pub scale: f64,
    /// Additive offset applied after scaling
    pub offset: f64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: 0.0,
        }
    }
}

/// Loss-family selection and the per-branch lambdas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectiveConfig {
    /// Which adversarial objective family to train with
    pub gan_type: GanType,
    /// Generator adversarial-loss lambda, X->Y branch
    pub xy_gen_lambda: f64,
    /// Generator adversarial-loss lambda, Y->X branch
    pub yx_gen_lambda: f64,
    /// Discriminator loss lambda, X->Y branch
    pub xy_dis_lambda: f64,
    /// Discriminator loss lambda, Y->X branch
    pub yx_dis_lambda: f64,
    /// Self-regularization lambda, X->Y branch (0 disables)
    pub xy_selfreg_lambda: f64,
    /// Self-regularization lambda, Y->X branch (0 disables)
    pub yx_selfreg_lambda: f64,
    /// Gradient-penalty lambda, X->Y branch (WGAN only)
    pub xy_grad_lambda: f64,
    /// Gradient-penalty lambda, Y->X branch (WGAN only)
    pub yx_grad_lambda: f64,
    /// Penalize only gradient norms exceeding 1 (WGAN)
    pub one_sided_penalty: bool,
    /// Smoothed "real" target label for GAN/LSGAN losses
    pub real_label: f64,
}

impl Default for ObjectiveConfig {
    fn default() -> Self {
        Self {
            gan_type: GanType::Lsgan,
            xy_gen_lambda: 2.0,
            yx_gen_lambda: 2.0,
            xy_dis_lambda: 2.0,
            yx_dis_lambda: 2.0,
            xy_selfreg_lambda: 0.0,
            yx_selfreg_lambda: 0.0,
            xy_grad_lambda: 10.0,
            yx_grad_lambda: 10.0,
            one_sided_penalty: false,
            real_label: 0.9,
        }
    }
}

/// Step budget and the decay schedules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Total training step budget
    pub steps: usize,
    /// Fraction of the step budget after which the learning rate decays
    pub decay_from_fraction: f64,
    /// Base learning rate for all four optimizers
    pub learning_rate: f64,
    /// Adam first-moment decay
    pub beta1: f64,
    /// Cycle-consistency lambda at step 0
    pub cycle_lambda: f64,
    /// Cycle-consistency lambda at the final step
    pub cycle_lambda_end: f64,
    /// Generator updates per outer step
    pub gen_train: usize,
    /// Discriminator updates per outer step
    pub dis_train: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            steps: 200_000,
            decay_from_fraction: 0.5,
            learning_rate: 2e-4,
            beta1: 0.5,
            cycle_lambda: 10.0,
            cycle_lambda_end: 10.0,
            gen_train: 1,
            dis_train: 1,
        }
    }
}

impl ScheduleConfig {
    /// Absolute step at which learning-rate decay begins.
    pub fn decay_from(&self) -> usize {
        (self.decay_from_fraction * self.steps as f64).round() as usize
    }
}

/// Replay buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Feed discriminators from a pool of previously generated fakes
    pub enabled: bool,
    /// Pool capacity; -1 turns the pool into a pass-through
    pub pool_size: i64,
    /// Probability of serving a pooled item instead of the fresh one
    pub old_prob: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pool_size: 50,
            old_prob: 0.5,
        }
    }
}

/// Checkpoint and export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointingConfig {
    /// Root directory holding one subdirectory per run
    pub checkpoints_root: PathBuf,
    /// Resume a named run instead of allocating a fresh directory
    pub resume: Option<String>,
    /// Steps between regular checkpoints
    pub save_interval: usize,
    /// Steps between never-pruned long-term checkpoints
    pub long_term_interval: usize,
    /// Number of regular checkpoints retained
    pub keep_limit: usize,
    /// Write frozen inference artifacts when training completes
    pub export_final: bool,
}

impl Default for CheckpointingConfig {
    fn default() -> Self {
        Self {
            checkpoints_root: PathBuf::from("checkpoints"),
            resume: None,
            save_interval: 5000,
            long_term_interval: 50_000,
            keep_limit: 5,
            export_final: true,
        }
    }
}

/// Run-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Display name of domain X
    pub x_name: String,
    /// Display name of domain Y
    pub y_name: String,
    /// Batch size shared by both domain feeders
    pub batch_size: usize,
    /// Steps between loss log lines
    pub log_interval: usize,
    /// Seed for the replay buffers and feeder shuffling
    pub seed: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            x_name: "X".to_string(),
            y_name: "Y".to_string(),
            batch_size: 1,
            log_interval: 250,
            seed: 0,
        }
    }
}

impl TrainingConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, failing fast on contract violations
    pub fn validate(&self) -> Result<()> {
        if self.model.x_shape.is_empty() || self.model.y_shape.is_empty() {
            return Err(Error::config("domain sample shapes must be non-empty"));
        }

        if self.runtime.batch_size == 0 {
            return Err(Error::config("batch size must be > 0"));
        }

        if self.schedule.steps == 0 {
            return Err(Error::config("step budget must be > 0"));
        }

        if !(0.0..=1.0).contains(&self.schedule.decay_from_fraction) {
            return Err(Error::config("decay_from_fraction must lie in [0, 1]"));
        }

        if self.schedule.learning_rate <= 0.0 {
            return Err(Error::config("learning rate must be > 0"));
        }

        if self.schedule.gen_train == 0 || self.schedule.dis_train == 0 {
            return Err(Error::config(
                "gen_train and dis_train must each be at least 1",
            ));
        }

        if !(0.0..=1.0).contains(&self.objective.real_label) {
            return Err(Error::config("real_label must lie in [0, 1]"));
        }

        if self.history.enabled
            && self.history.pool_size != -1
            && (self.history.pool_size as usize) < self.runtime.batch_size
        {
            return Err(Error::config(
                "history pool size must be -1 or at least the batch size",
            ));
        }

        if !(0.0..=1.0).contains(&self.history.old_prob) {
            return Err(Error::config("history old_prob must lie in [0, 1]"));
        }

        if self.checkpointing.save_interval == 0 || self.checkpointing.long_term_interval == 0 {
            return Err(Error::config("checkpoint intervals must be > 0"));
        }

        Ok(())
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            arch: "mlp".to_string(),
            x_shape: vec![64],
            y_shape: vec![64],
            hidden_dims: vec![128, 128],
            gen_weight_lambda: 0.0,
            dis_weight_lambda: 0.0,
            residual: false,
            clamp_output: false,
            dis_sigmoid: true,
            x_norm: NormalizerConfig::default(),
            y_norm: NormalizerConfig::default(),
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            objective: ObjectiveConfig::default(),
            schedule: ScheduleConfig::default(),
            history: HistoryConfig::default(),
            checkpointing: CheckpointingConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}
