use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use cygan::config::{
    CheckpointingConfig, HistoryConfig, ModelConfig, NormalizerConfig, ObjectiveConfig,
    RuntimeConfig, ScheduleConfig, TrainingConfig,
};
use cygan::data::BinaryFeeder;
use cygan::training::export::export_from_checkpoint;
use cygan::training::CycleOrchestrator;
use cygan::{builtin_registry, Context, GanType, Normalizer};

#[derive(Parser)]
#[command(name = "cygan")]
#[command(about = "Cycle-consistent adversarial domain-translation trainer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a cycle of generators and discriminators on two domains
    Train(TrainArgs),

    /// Export frozen inference artifacts from an existing run's latest checkpoint
    Export {
        /// Checkpoints root directory
        #[arg(long, default_value = "checkpoints")]
        checkpoints_dir: PathBuf,

        /// Run identifier under the checkpoints root
        #[arg(long)]
        run: String,
    },

    /// Show build information and registered architectures
    Info,
}

#[derive(Args)]
struct TrainArgs {
    /// Load a full training configuration from a JSON file (other flags ignored)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Registered architecture identifier
    #[arg(long, default_value = "mlp")]
    arch: String,

    /// Binary record file for domain X
    #[arg(long)]
    x_data: Option<PathBuf>,

    /// Binary record file for domain Y
    #[arg(long)]
    y_data: Option<PathBuf>,

    /// Sample shape of domain X, comma separated (e.g. 64 or 32,3)
    #[arg(long, value_delimiter = ',', default_value = "64")]
    x_shape: Vec<usize>,

    /// Sample shape of domain Y, comma separated
    #[arg(long, value_delimiter = ',', default_value = "64")]
    y_shape: Vec<usize>,

    /// Adversarial objective family: gan, lsgan, or wgan
    #[arg(long, default_value = "lsgan")]
    gan_type: String,

    /// Lambda for the X->Y generator loss
    #[arg(long, default_value_t = 2.0)]
    xy_gen_lambda: f64,

    /// Lambda for the Y->X generator loss
    #[arg(long, default_value_t = 2.0)]
    yx_gen_lambda: f64,

    /// Lambda for the X->Y discriminator loss
    #[arg(long, default_value_t = 2.0)]
    xy_dis_lambda: f64,

    /// Lambda for the Y->X discriminator loss
    #[arg(long, default_value_t = 2.0)]
    yx_dis_lambda: f64,

    /// Generator weight-decay lambda
    #[arg(long, default_value_t = 0.0)]
    gen_weight_lambda: f64,

    /// Discriminator weight-decay lambda
    #[arg(long, default_value_t = 0.0)]
    dis_weight_lambda: f64,

    /// Self-regularization lambda for the X->Y branch
    #[arg(long, default_value_t = 0.0)]
    xy_selfreg_lambda: f64,

    /// Self-regularization lambda for the Y->X branch
    #[arg(long, default_value_t = 0.0)]
    yx_selfreg_lambda: f64,

    /// Gradient-penalty lambda for the X->Y branch (WGAN)
    #[arg(long, default_value_t = 10.0)]
    xy_grad_lambda: f64,

    /// Gradient-penalty lambda for the Y->X branch (WGAN)
    #[arg(long, default_value_t = 10.0)]
    yx_grad_lambda: f64,

    /// Penalize only gradient norms above 1 (WGAN)
    #[arg(long)]
    one_sided_penalty: bool,

    /// Cycle-consistency lambda at step 0
    #[arg(long, default_value_t = 10.0)]
    cycle_lambda: f64,

    /// Cycle-consistency lambda at the final step (defaults to the start value)
    #[arg(long)]
    cycle_lambda_end: Option<f64>,

    /// Batch size for both domains
    #[arg(long, default_value_t = 1)]
    batch_size: usize,

    /// Total training step budget
    #[arg(long, default_value_t = 200_000)]
    steps: usize,

    /// Fraction of the budget after which the learning rate decays to zero
    #[arg(long, default_value_t = 0.5)]
    decay_from: f64,

    /// Base learning rate for the Adam optimizers
    #[arg(long, default_value_t = 2e-4)]
    learning_rate: f64,

    /// Adam first-moment decay
    #[arg(long, default_value_t = 0.5)]
    beta1: f64,

    /// Generator updates per outer step
    #[arg(long, default_value_t = 1)]
    gen_train: usize,

    /// Discriminator updates per outer step
    #[arg(long, default_value_t = 1)]
    dis_train: usize,

    /// Disable the replay buffer feeding the discriminators
    #[arg(long)]
    no_history: bool,

    /// Replay pool capacity (-1 disables pooling)
    #[arg(long, default_value_t = 50)]
    pool_size: i64,

    /// Checkpoints root directory
    #[arg(long, default_value = "checkpoints")]
    checkpoints_dir: PathBuf,

    /// Resume a named run instead of starting a fresh one
    #[arg(long)]
    resume: Option<String>,

    /// Seed for replay buffers and feeder shuffling
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train(args) => train(args)?,
        Commands::Export {
            checkpoints_dir,
            run,
        } => export(checkpoints_dir, run)?,
        Commands::Info => show_info(),
    }

    Ok(())
}

fn train(args: TrainArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => TrainingConfig::from_file(path)
            .with_context(|| format!("loading training config from {}", path.display()))?,
        None => config_from_args(&args)?,
    };

    let x_data = args
        .x_data
        .context("--x-data is required (or provide --config)")?;
    let y_data = args
        .y_data
        .context("--y-data is required (or provide --config)")?;

    let ctx = Context::cpu();
    let registry = builtin_registry();

    let x_feed = BinaryFeeder::open(
        &ctx,
        &x_data,
        &config.model.x_shape,
        config.runtime.batch_size,
        Normalizer::from(config.model.x_norm),
        true,
        config.runtime.seed,
    )
    .with_context(|| format!("opening domain X data {}", x_data.display()))?;
    let y_feed = BinaryFeeder::open(
        &ctx,
        &y_data,
        &config.model.y_shape,
        config.runtime.batch_size,
        Normalizer::from(config.model.y_norm),
        true,
        config.runtime.seed.wrapping_add(1),
    )
    .with_context(|| format!("opening domain Y data {}", y_data.display()))?;

    info!(
        "Training {} <-> {} for {} steps",
        x_data.display(),
        y_data.display(),
        config.schedule.steps
    );

    let mut orchestrator = CycleOrchestrator::from_config(
        &ctx,
        config,
        registry,
        Box::new(x_feed),
        Box::new(y_feed),
    )?;
    let report = orchestrator.train()?;

    info!(
        "Run {} finished at step {} in {:?}",
        report.run_id, report.final_step, report.duration
    );
    for path in &report.export_paths {
        info!("Artifact: {}", path.display());
    }
    Ok(())
}

fn config_from_args(args: &TrainArgs) -> Result<TrainingConfig> {
    let gan_type: GanType = args.gan_type.parse()?;
    let config = TrainingConfig {
        model: ModelConfig {
            arch: args.arch.clone(),
            x_shape: args.x_shape.clone(),
            y_shape: args.y_shape.clone(),
            gen_weight_lambda: args.gen_weight_lambda,
            dis_weight_lambda: args.dis_weight_lambda,
            // Wasserstein critics need unbounded scores.
            dis_sigmoid: gan_type != GanType::Wgan,
            x_norm: NormalizerConfig::default(),
            y_norm: NormalizerConfig::default(),
            ..ModelConfig::default()
        },
        objective: ObjectiveConfig {
            gan_type,
            xy_gen_lambda: args.xy_gen_lambda,
            yx_gen_lambda: args.yx_gen_lambda,
            xy_dis_lambda: args.xy_dis_lambda,
            yx_dis_lambda: args.yx_dis_lambda,
            xy_selfreg_lambda: args.xy_selfreg_lambda,
            yx_selfreg_lambda: args.yx_selfreg_lambda,
            xy_grad_lambda: args.xy_grad_lambda,
            yx_grad_lambda: args.yx_grad_lambda,
            one_sided_penalty: args.one_sided_penalty,
            ..ObjectiveConfig::default()
        },
        schedule: ScheduleConfig {
            steps: args.steps,
            decay_from_fraction: args.decay_from,
            learning_rate: args.learning_rate,
            beta1: args.beta1,
            cycle_lambda: args.cycle_lambda,
            cycle_lambda_end: args.cycle_lambda_end.unwrap_or(args.cycle_lambda),
            gen_train: args.gen_train,
            dis_train: args.dis_train,
        },
        history: HistoryConfig {
            enabled: !args.no_history,
            pool_size: args.pool_size,
            ..HistoryConfig::default()
        },
        checkpointing: CheckpointingConfig {
            checkpoints_root: args.checkpoints_dir.clone(),
            resume: args.resume.clone(),
            ..CheckpointingConfig::default()
        },
        runtime: RuntimeConfig {
            batch_size: args.batch_size,
            seed: args.seed,
            ..RuntimeConfig::default()
        },
    };
    config.validate()?;
    Ok(config)
}

fn export(checkpoints_dir: PathBuf, run: String) -> Result<()> {
    let ctx = Context::cpu();
    let (step, paths) = export_from_checkpoint(&ctx, builtin_registry(), &checkpoints_dir, &run)?;
    info!("Exported run {} at step {}", run, step);
    for path in paths {
        println!("{}", path.display());
    }
    Ok(())
}

fn show_info() {
    println!("cygan - cycle-consistent adversarial domain translation");
    println!();
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Registered architectures:");
    for arch in builtin_registry().architectures() {
        println!("  - {arch}");
    }
    println!();
    println!("Hardware support:");

    #[cfg(feature = "cuda")]
    println!("  CUDA: enabled");
    #[cfg(not(feature = "cuda"))]
    println!("  CUDA: not compiled");

    #[cfg(feature = "metal")]
    println!("  Metal: enabled");
    #[cfg(not(feature = "metal"))]
    println!("  Metal: not compiled");

    println!("  CPU: always available");
    println!();
    println!("Usage:");
    println!("  cygan train --x-data x.bin --y-data y.bin --x-shape 64 --y-shape 64");
    println!("  cygan export --checkpoints-dir checkpoints --run <run-id>");
}
