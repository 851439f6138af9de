//! Cycle-consistent adversarial training orchestrator
//!
//! Owns the two adversarial objectives (X->Y and Y->X), the two domain
//! feeders, the replay buffers, and the four per-branch optimizers; runs the
//! alternating update loop with learning-rate decay, periodic checkpointing,
//! resume, and frozen export.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use candle_core::Tensor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::{GanType, ObjectiveConfig, TrainingConfig};
use crate::context::Context;
use crate::data::DataFeeder;
use crate::error::{Error, Result};
use crate::models::{weight_loss, ModelBundle, ModelRegistry, Network, Normalizer};
use crate::training::buffer::ReplayBuffer;
use crate::training::checkpoints::{allocate_run_dir, CheckpointInfo, CheckpointManager};
use crate::training::export;
use crate::training::objective::{AdversarialObjective, GanVariant};
use crate::training::optimizers::{AdamOptimizer, DecaySchedule, LambdaSchedule};

/// Training lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TrainingStatus {
    /// Constructed, not yet training
    NotStarted,
    /// Inside the step loop
    Running,
    /// Persisting a checkpoint
    Checkpointing,
    /// Writing frozen artifacts
    Exporting,
    /// Step budget exhausted
    Completed,
    /// Stopped cleanly before the budget (stop request or end of stream)
    Stopped,
    /// Step loop aborted with an error
    Failed {
        /// The propagated error message
        error: String,
    },
}

/// Mutable training state, serialized into run reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingState {
    /// Global step counter, advanced exactly once per outer iteration
    pub step: usize,
    /// Lifecycle status
    pub status: TrainingStatus,
    /// Wall-clock start of the current `train()` call
    pub started_at: DateTime<Utc>,
}

impl TrainingState {
    fn new() -> Self {
        Self {
            step: 0,
            status: TrainingStatus::NotStarted,
            started_at: Utc::now(),
        }
    }
}

/// Scalar losses of one outer step, for logging and finiteness checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepLosses {
    /// Cycle-consistency loss (shared by both generator branches)
    pub cycle: f32,
    /// X->Y generator full loss
    pub xy_gen_full: f32,
    /// Y->X generator full loss
    pub yx_gen_full: f32,
    /// Domain-X discriminator full loss
    pub x_dis_full: f32,
    /// Domain-Y discriminator full loss
    pub y_dis_full: f32,
}

impl StepLosses {
    fn all_finite(&self) -> bool {
        self.cycle.is_finite()
            && self.xy_gen_full.is_finite()
            && self.yx_gen_full.is_finite()
            && self.x_dis_full.is_finite()
            && self.y_dis_full.is_finite()
    }
}

/// Summary of a completed (or cleanly stopped) training run.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    /// Run identifier (checkpoint directory name)
    pub run_id: String,
    /// Run directory
    pub run_dir: PathBuf,
    /// Step counter at exit
    pub final_step: usize,
    /// Whether the run restored state from an earlier checkpoint
    pub resumed: bool,
    /// Whether the run stopped before exhausting the step budget
    pub stopped_early: bool,
    /// Wall-clock training duration
    pub duration: Duration,
    /// Frozen artifacts written at completion
    pub export_paths: Vec<PathBuf>,
}

/// The cycle training orchestrator.
pub struct CycleOrchestrator {
    ctx: Context,
    config: TrainingConfig,
    xy: AdversarialObjective,
    yx: AdversarialObjective,
    x_feed: Box<dyn DataFeeder>,
    y_feed: Box<dyn DataFeeder>,
    x_normalizer: Normalizer,
    y_normalizer: Normalizer,
    x_pool: Option<ReplayBuffer>,
    y_pool: Option<ReplayBuffer>,
    xy_gen_opt: AdamOptimizer,
    yx_gen_opt: AdamOptimizer,
    x_dis_opt: AdamOptimizer,
    y_dis_opt: AdamOptimizer,
    cycle_schedule: LambdaSchedule,
    checkpoints: CheckpointManager,
    run_id: String,
    resumed: bool,
    state: TrainingState,
    stop_flag: Arc<AtomicBool>,
}

impl std::fmt::Debug for CycleOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleOrchestrator")
            .field("run_id", &self.run_id)
            .field("resumed", &self.resumed)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl CycleOrchestrator {
    /// Wire two objectives, two feeders, and the normalizer pair into an
    /// orchestrator.
    ///
    /// Shape contracts are validated here and never deferred to
    /// mid-training: the two objectives must have swapped input/output
    /// shapes, the feeders must share the configured batch size, and each
    /// feeder's sample shape must match its objective's input shape.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: Context,
        config: TrainingConfig,
        xy: AdversarialObjective,
        yx: AdversarialObjective,
        x_feed: Box<dyn DataFeeder>,
        y_feed: Box<dyn DataFeeder>,
        x_normalizer: Normalizer,
        y_normalizer: Normalizer,
    ) -> Result<Self> {
        config.validate()?;

        if xy.in_shape() != yx.out_shape() || xy.out_shape() != yx.in_shape() {
            return Err(Error::config(format!(
                "objective shape chains are inconsistent: {}: {:?} -> {:?}, {}: {:?} -> {:?}",
                xy.name(),
                xy.in_shape(),
                xy.out_shape(),
                yx.name(),
                yx.in_shape(),
                yx.out_shape()
            )));
        }
        if x_feed.batch_size() != y_feed.batch_size() {
            return Err(Error::config(format!(
                "domain feeders disagree on batch size: {} vs {}",
                x_feed.batch_size(),
                y_feed.batch_size()
            )));
        }
        if x_feed.batch_size() != config.runtime.batch_size {
            return Err(Error::config(format!(
                "feeder batch size {} does not match configured batch size {}",
                x_feed.batch_size(),
                config.runtime.batch_size
            )));
        }
        if x_feed.sample_shape() != xy.in_shape() {
            return Err(Error::config(format!(
                "domain {} feeder shape {:?} does not match objective input shape {:?}",
                config.runtime.x_name,
                x_feed.sample_shape(),
                xy.in_shape()
            )));
        }
        if y_feed.sample_shape() != yx.in_shape() {
            return Err(Error::config(format!(
                "domain {} feeder shape {:?} does not match objective input shape {:?}",
                config.runtime.y_name,
                y_feed.sample_shape(),
                yx.in_shape()
            )));
        }

        let (run_id, run_dir) = match &config.checkpointing.resume {
            Some(name) => {
                let dir = config.checkpointing.checkpoints_root.join(name);
                (name.clone(), dir)
            }
            None => allocate_run_dir(&config.checkpointing.checkpoints_root)?,
        };
        let checkpoints = CheckpointManager::new(run_dir, config.checkpointing.keep_limit)?;

        let schedule = &config.schedule;
        let decay = DecaySchedule::new(
            schedule.learning_rate,
            schedule.decay_from(),
            schedule.steps,
        );
        let xy_gen_opt = AdamOptimizer::new(
            "xy_gen",
            xy.generator().trainable_variables(),
            decay,
            schedule.beta1,
        );
        let yx_gen_opt = AdamOptimizer::new(
            "yx_gen",
            yx.generator().trainable_variables(),
            decay,
            schedule.beta1,
        );
        // The discriminator of domain X lives in the Y->X objective and vice
        // versa.
        let x_dis_opt = AdamOptimizer::new(
            "x_dis",
            yx.discriminator().trainable_variables(),
            decay,
            schedule.beta1,
        );
        let y_dis_opt = AdamOptimizer::new(
            "y_dis",
            xy.discriminator().trainable_variables(),
            decay,
            schedule.beta1,
        );

        let (x_pool, y_pool) = if config.history.enabled {
            let history = &config.history;
            (
                Some(ReplayBuffer::seeded(
                    history.pool_size,
                    config.runtime.batch_size,
                    history.old_prob,
                    config.runtime.seed,
                )?),
                Some(ReplayBuffer::seeded(
                    history.pool_size,
                    config.runtime.batch_size,
                    history.old_prob,
                    config.runtime.seed.wrapping_add(1),
                )?),
            )
        } else {
            (None, None)
        };

        let cycle_schedule = LambdaSchedule::new(
            schedule.cycle_lambda,
            schedule.cycle_lambda_end,
            schedule.steps,
        );

        info!(
            "Cycle orchestrator instantiated: {}_shape={:?} {}_shape={:?} cycle_lambda={} \
             learning_rate={} beta1={} steps={} decay_from={}",
            config.runtime.x_name,
            xy.in_shape(),
            config.runtime.y_name,
            yx.in_shape(),
            schedule.cycle_lambda,
            schedule.learning_rate,
            schedule.beta1,
            schedule.steps,
            schedule.decay_from(),
        );

        Ok(Self {
            ctx,
            config,
            xy,
            yx,
            x_feed,
            y_feed,
            x_normalizer,
            y_normalizer,
            x_pool,
            y_pool,
            xy_gen_opt,
            yx_gen_opt,
            x_dis_opt,
            y_dis_opt,
            cycle_schedule,
            checkpoints,
            run_id,
            resumed: false,
            state: TrainingState::new(),
            stop_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Build an orchestrator from a config and a model registry.
    pub fn from_config(
        ctx: &Context,
        config: TrainingConfig,
        registry: &ModelRegistry,
        x_feed: Box<dyn DataFeeder>,
        y_feed: Box<dyn DataFeeder>,
    ) -> Result<Self> {
        config.validate()?;
        let bundle = registry.build(ctx, &config.model)?;
        let (xy, yx) = build_objectives(&config, &bundle);
        let x_normalizer = bundle.x_normalizer;
        let y_normalizer = bundle.y_normalizer;
        Self::new(
            ctx.clone(),
            config,
            xy,
            yx,
            x_feed,
            y_feed,
            x_normalizer,
            y_normalizer,
        )
    }

    /// Run identifier (checkpoint directory name).
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Current training state.
    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// Handle for requesting a stop; takes effect at the next step boundary.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    /// Run the training loop to completion, clean stop, or failure.
    ///
    /// On failure a best-effort final checkpoint is attempted before the
    /// error propagates.
    pub fn train(&mut self) -> Result<TrainingReport> {
        let started = Instant::now();
        self.checkpoints.write_config_once(&self.config)?;

        if let Some(info) = self.checkpoints.latest()? {
            let step = info.step;
            self.restore(&info)?;
            self.resumed = true;
            info!("Resumed run {} from checkpoint at step {}", self.run_id, step);
        } else {
            self.state.step = 0;
            info!("Starting fresh run {}", self.run_id);
        }

        self.state.status = TrainingStatus::Running;
        self.state.started_at = Utc::now();

        match self.run_loop() {
            Ok(stopped_early) => {
                self.save_checkpoint(false)?;
                let export_paths = if self.config.checkpointing.export_final {
                    self.export()?
                } else {
                    Vec::new()
                };
                self.state.status = if stopped_early {
                    TrainingStatus::Stopped
                } else {
                    info!("Stopping after {} iterations", self.config.schedule.steps);
                    TrainingStatus::Completed
                };
                Ok(TrainingReport {
                    run_id: self.run_id.clone(),
                    run_dir: self.checkpoints.run_dir().to_path_buf(),
                    final_step: self.state.step,
                    resumed: self.resumed,
                    stopped_early,
                    duration: started.elapsed(),
                    export_paths,
                })
            }
            Err(e) => {
                error!("Training interrupted at step {}: {}", self.state.step, e);
                self.state.status = TrainingStatus::Failed {
                    error: e.to_string(),
                };
                if let Err(save_err) = self.save_checkpoint(false) {
                    error!("Final checkpoint after interruption failed: {}", save_err);
                }
                Err(e)
            }
        }
    }

    fn run_loop(&mut self) -> Result<bool> {
        let steps = self.config.schedule.steps;
        let save_interval = self.config.checkpointing.save_interval;
        let long_term_interval = self.config.checkpointing.long_term_interval;
        let log_interval = self.config.runtime.log_interval;

        while self.state.step < steps {
            if self.stop_flag.load(Ordering::Relaxed) {
                info!("Stop requested, leaving the step loop");
                return Ok(true);
            }

            let Some(x) = self.x_feed.next_batch()? else {
                info!(
                    "Domain {} feed exhausted, stopping cleanly",
                    self.config.runtime.x_name
                );
                return Ok(true);
            };
            let Some(y) = self.y_feed.next_batch()? else {
                info!(
                    "Domain {} feed exhausted, stopping cleanly",
                    self.config.runtime.y_name
                );
                return Ok(true);
            };

            let step = self.state.step;
            let losses = self.train_step(&x, &y, step)?;
            if !losses.all_finite() {
                return Err(Error::Other(anyhow::anyhow!(
                    "non-finite loss at step {step}: {losses:?}"
                )));
            }

            if step % log_interval == 0 {
                self.log_losses(step, &losses);
            } else {
                debug!(step, ?losses, "step complete");
            }

            if step % save_interval == 0 {
                self.save_checkpoint(step % long_term_interval == 0)?;
            }

            self.state.step += 1;
        }

        Ok(false)
    }

    /// One outer training step over a pair of domain batches.
    fn train_step(&mut self, x: &Tensor, y: &Tensor, step: usize) -> Result<StepLosses> {
        let gen_train = self.config.schedule.gen_train;
        let dis_train = self.config.schedule.dis_train;
        let mut losses = StepLosses::default();
        let mut buffered: Option<(Tensor, Tensor)> = None;

        for _ in 0..gen_train {
            let fake_y = self.xy.generate(x)?;
            let fake_x = self.yx.generate(y)?;

            let pair = match (&mut self.x_pool, &mut self.y_pool) {
                (Some(x_pool), Some(y_pool)) => (
                    x_pool.query(&fake_x.detach(), step)?,
                    y_pool.query(&fake_y.detach(), step)?,
                ),
                _ => (fake_x.detach(), fake_y.detach()),
            };
            buffered = Some(pair);

            self.update_generators(x, y, &fake_x, &fake_y, step, &mut losses)?;
        }

        let (dis_fake_x, dis_fake_y) =
            buffered.ok_or_else(|| Error::config("gen_train must be at least 1"))?;

        for _ in 0..dis_train {
            self.update_discriminators(x, y, &dis_fake_x, &dis_fake_y, step, &mut losses)?;
        }

        Ok(losses)
    }

    /// Update both generators from the adversarial, weight, cycle, and
    /// self-regularization terms.
    ///
    /// Both gradient stores are computed before either parameter set moves so
    /// the two branches update from the same forward values.
    fn update_generators(
        &mut self,
        x: &Tensor,
        y: &Tensor,
        fake_x: &Tensor,
        fake_y: &Tensor,
        step: usize,
        losses: &mut StepLosses,
    ) -> Result<()> {
        let cycle = self.cycle_loss(x, y, step)?;

        let xy_adv = self.xy.generator_loss(x)?;
        let xy_weight = weight_loss(self.xy.generator().as_ref(), &self.ctx)?;
        let xy_selfreg = self.xy.self_regularization_loss(x, fake_y)?;
        let xy_full = (((xy_adv + xy_weight)? + &cycle)? + xy_selfreg)?;

        let yx_adv = self.yx.generator_loss(y)?;
        let yx_weight = weight_loss(self.yx.generator().as_ref(), &self.ctx)?;
        let yx_selfreg = self.yx.self_regularization_loss(y, fake_x)?;
        let yx_full = (((yx_adv + yx_weight)? + &cycle)? + yx_selfreg)?;

        let xy_grads = xy_full.backward()?;
        let yx_grads = yx_full.backward()?;
        self.xy_gen_opt.step(&xy_grads, step)?;
        self.yx_gen_opt.step(&yx_grads, step)?;

        losses.cycle = cycle.to_scalar::<f32>()?;
        losses.xy_gen_full = xy_full.to_scalar::<f32>()?;
        losses.yx_gen_full = yx_full.to_scalar::<f32>()?;
        Ok(())
    }

    /// Update both discriminators against real samples and buffered fakes.
    fn update_discriminators(
        &mut self,
        x: &Tensor,
        y: &Tensor,
        dis_fake_x: &Tensor,
        dis_fake_y: &Tensor,
        step: usize,
        losses: &mut StepLosses,
    ) -> Result<()> {
        let x_adv = match self.yx.variant() {
            GanVariant::Wasserstein { .. } => {
                self.yx.wasserstein_discriminator_loss(x, dis_fake_x)?
            }
            _ => self.yx.discriminator_loss(x, dis_fake_x)?,
        };
        let x_full = (x_adv + weight_loss(self.yx.discriminator().as_ref(), &self.ctx)?)?;

        let y_adv = match self.xy.variant() {
            GanVariant::Wasserstein { .. } => {
                self.xy.wasserstein_discriminator_loss(y, dis_fake_y)?
            }
            _ => self.xy.discriminator_loss(y, dis_fake_y)?,
        };
        let y_full = (y_adv + weight_loss(self.xy.discriminator().as_ref(), &self.ctx)?)?;

        let x_grads = x_full.backward()?;
        let y_grads = y_full.backward()?;
        self.x_dis_opt.step(&x_grads, step)?;
        self.y_dis_opt.step(&y_grads, step)?;

        losses.x_dis_full = x_full.to_scalar::<f32>()?;
        losses.y_dis_full = y_full.to_scalar::<f32>()?;
        Ok(())
    }

    /// Cycle-consistency loss under the decaying lambda.
    fn cycle_loss(&self, x: &Tensor, y: &Tensor, step: usize) -> Result<Tensor> {
        cycle_consistency_loss(&self.xy, &self.yx, x, y, self.cycle_schedule.value(step))
    }

    fn log_losses(&self, step: usize, losses: &StepLosses) {
        let x = &self.config.runtime.x_name;
        let y = &self.config.runtime.y_name;
        info!("------ Step {} ------", step);
        info!("\tcycle:\t{:.8}", losses.cycle);
        info!("\t{}-{}_gen_full:\t{:.8}", x, y, losses.xy_gen_full);
        info!("\t{}-{}_gen_full:\t{:.8}", y, x, losses.yx_gen_full);
        info!("\t{}_dis_full:\t{:.8}", x, losses.x_dis_full);
        info!("\t{}_dis_full:\t{:.8}", y, losses.y_dis_full);
    }

    /// Branch name to network mapping used for checkpoint tensor keys.
    fn branches(&self) -> [(&'static str, &Arc<dyn Network>); 4] {
        [
            ("xy_gen", self.xy.generator()),
            ("yx_gen", self.yx.generator()),
            ("x_dis", self.yx.discriminator()),
            ("y_dis", self.xy.discriminator()),
        ]
    }

    fn collect_state(&self) -> Result<HashMap<String, Tensor>> {
        let mut tensors = HashMap::new();
        for (branch, net) in self.branches() {
            for (name, var) in net.trainable_variables() {
                tensors.insert(format!("model/{branch}/{name}"), var.as_tensor().copy()?);
            }
        }
        let optimizers = [
            &self.xy_gen_opt,
            &self.yx_gen_opt,
            &self.x_dis_opt,
            &self.y_dis_opt,
        ];
        for opt in optimizers {
            for (key, tensor) in opt.state_tensors(self.ctx.device())? {
                tensors.insert(format!("optim/{}/{}", opt.name(), key), tensor);
            }
        }
        Ok(tensors)
    }

    fn save_checkpoint(&mut self, long_term: bool) -> Result<()> {
        self.state.status = TrainingStatus::Checkpointing;
        let tensors = self.collect_state()?;
        self.checkpoints.save(self.state.step, &tensors, long_term)?;
        self.state.status = TrainingStatus::Running;
        Ok(())
    }

    fn restore(&mut self, info: &CheckpointInfo) -> Result<()> {
        let tensors = self.checkpoints.load(info, self.ctx.device())?;

        for (branch, net) in self.branches() {
            for (name, var) in net.trainable_variables() {
                let key = format!("model/{branch}/{name}");
                let tensor = tensors.get(&key).ok_or_else(|| {
                    Error::checkpoint(format!("checkpoint is missing tensor {key}"))
                })?;
                var.set(tensor)?;
            }
        }

        let optimizers = [
            &mut self.xy_gen_opt,
            &mut self.yx_gen_opt,
            &mut self.x_dis_opt,
            &mut self.y_dis_opt,
        ];
        for opt in optimizers {
            let prefix = format!("optim/{}/", opt.name());
            let state: HashMap<String, Tensor> = tensors
                .iter()
                .filter_map(|(k, v)| {
                    k.strip_prefix(&prefix).map(|rest| (rest.to_string(), v.clone()))
                })
                .collect();
            opt.load_state(&state)?;
        }

        self.state.step = info.step;
        Ok(())
    }

    /// Write frozen inference artifacts for both directions at the current
    /// step.
    pub fn export(&mut self) -> Result<Vec<PathBuf>> {
        self.state.status = TrainingStatus::Exporting;
        let export_dir = export::export_dir(
            &self.config.checkpointing.checkpoints_root,
            &self.run_id,
            self.state.step,
        );
        let paths = export::export_directions(
            &export_dir,
            &self.config,
            self.state.step,
            &self.xy,
            &self.yx,
            &self.x_normalizer,
            &self.y_normalizer,
        )?;
        self.state.status = TrainingStatus::Running;
        for path in &paths {
            info!("Frozen artifact written to {}", path.display());
        }
        Ok(paths)
    }
}

/// Cycle-consistency loss: mean absolute round-trip error of both domains,
/// scaled by the current lambda.
pub fn cycle_consistency_loss(
    xy: &AdversarialObjective,
    yx: &AdversarialObjective,
    x: &Tensor,
    y: &Tensor,
    lambda: f64,
) -> Result<Tensor> {
    let x_roundtrip = yx.generate(&xy.generate(x)?)?;
    let y_roundtrip = xy.generate(&yx.generate(y)?)?;
    let x_diff = (x_roundtrip - x)?.abs()?.mean_all()?;
    let y_diff = (y_roundtrip - y)?.abs()?.mean_all()?;
    Ok(((x_diff + y_diff)? * lambda)?)
}

/// Build the two directional objectives from a config and a model bundle.
pub fn build_objectives(
    config: &TrainingConfig,
    bundle: &ModelBundle,
) -> (AdversarialObjective, AdversarialObjective) {
    let objective = &config.objective;
    let x_name = &config.runtime.x_name;
    let y_name = &config.runtime.y_name;

    let xy = AdversarialObjective::new(
        format!("{x_name}-{y_name}"),
        bundle.xy_generator.clone(),
        bundle.y_discriminator.clone(),
        bundle.x_shape.clone(),
        bundle.y_shape.clone(),
        variant_for(objective, true),
        objective.xy_gen_lambda,
        objective.xy_dis_lambda,
        objective.xy_selfreg_lambda,
        None,
    );
    let yx = AdversarialObjective::new(
        format!("{y_name}-{x_name}"),
        bundle.yx_generator.clone(),
        bundle.x_discriminator.clone(),
        bundle.y_shape.clone(),
        bundle.x_shape.clone(),
        variant_for(objective, false),
        objective.yx_gen_lambda,
        objective.yx_dis_lambda,
        objective.yx_selfreg_lambda,
        None,
    );
    (xy, yx)
}

fn variant_for(objective: &ObjectiveConfig, xy_branch: bool) -> GanVariant {
    match objective.gan_type {
        GanType::Gan => GanVariant::Standard,
        GanType::Lsgan => GanVariant::LeastSquares {
            real_label: objective.real_label,
        },
        GanType::Wgan => GanVariant::Wasserstein {
            grad_lambda: if xy_branch {
                objective.xy_grad_lambda
            } else {
                objective.yx_grad_lambda
            },
            one_sided: objective.one_sided_penalty,
        },
    }
}
