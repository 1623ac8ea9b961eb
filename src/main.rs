//! DCGAN command line: train on a directory of grayscale images, or sample a
//! trained model.
//!
//! Examples:
//!   # Train on ./data/nist14/*.jpg at 650x650
//!   dcgan --train
//!
//!   # Smaller run on PNG digits, writing test images afterwards
//!   dcgan --train --dataset digits --input-fname-pattern '*.png' \
//!         --input-height 28 --crop false --output-height 28 --visualize
//!
//!   # Sample 300 images from the latest checkpoint
//!   dcgan --dataset digits --output-height 28

use std::path::PathBuf;

use anyhow::Context;
use candle_core::Device;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;

use grayscale_dcgan::config::model_key;
use grayscale_dcgan::models::loader::load_trained_model;
use grayscale_dcgan::sampling::generate_test_images;
use grayscale_dcgan::training::{run_training, CheckpointStore, TrainingConfig};
use grayscale_dcgan::{DatasetConfig, DcganConfig, Generator};

#[derive(Parser, Debug)]
#[command(name = "dcgan")]
#[command(about = "Deep convolutional GAN for single-channel images")]
#[command(version)]
struct Args {
    /// Epochs to train
    #[arg(long, default_value = "25")]
    epoch: usize,

    /// Adam learning rate
    #[arg(long, default_value = "0.0002")]
    learning_rate: f64,

    /// Adam momentum term
    #[arg(long, default_value = "0.5")]
    beta1: f64,

    /// Cap on images used per epoch (all by default)
    #[arg(long)]
    train_size: Option<usize>,

    /// Images per batch
    #[arg(long, default_value = "4")]
    batch_size: usize,

    /// Height of the center crop taken from input images
    #[arg(long, default_value = "650")]
    input_height: usize,

    /// Width of the center crop (defaults to the height)
    #[arg(long)]
    input_width: Option<usize>,

    /// Height of generated images
    #[arg(long, default_value = "650")]
    output_height: usize,

    /// Width of generated images (defaults to the height)
    #[arg(long)]
    output_width: Option<usize>,

    /// Dimension of the latent vector
    #[arg(long, default_value = "100")]
    z_dim: usize,

    /// Base channel depth of the generator
    #[arg(long, default_value = "64")]
    gf_dim: usize,

    /// Base channel depth of the discriminator
    #[arg(long, default_value = "64")]
    df_dim: usize,

    /// Architecture JSON; replaces the size and depth flags above
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dataset directory name under --data-dir
    #[arg(long, default_value = "nist14")]
    dataset: String,

    /// Glob pattern for image file names
    #[arg(long, default_value = "*.jpg")]
    input_fname_pattern: String,

    /// Root directory of datasets
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Directory for checkpoints
    #[arg(long, default_value = "checkpoint")]
    checkpoint_dir: PathBuf,

    /// Directory for sample images
    #[arg(long, default_value = "samples")]
    sample_dir: PathBuf,

    /// Directory for training summaries
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Write summaries every N steps
    #[arg(long, default_value = "100")]
    summary_steps: u64,

    /// Export a sample grid every N steps
    #[arg(long, default_value = "100")]
    eval_steps: u64,

    /// Save a checkpoint every N steps
    #[arg(long, default_value = "100")]
    save_ckpt_steps: u64,

    /// Checkpoints retained per run
    #[arg(long, default_value = "5")]
    max_to_keep: usize,

    /// Train; otherwise load the latest checkpoint and sample
    #[arg(long)]
    train: bool,

    /// Center-crop inputs before resizing
    #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
    crop: bool,

    /// Write test images after training
    #[arg(long)]
    visualize: bool,

    /// Number of test images to generate
    #[arg(long, default_value = "300")]
    generate_test_images: usize,

    /// Seed for latent draws and shuffling
    #[arg(long)]
    seed: Option<u64>,

    /// Use CPU even if CUDA is available
    #[arg(long)]
    cpu: bool,
}

fn write_test_images(
    generator: &Generator,
    args: &Args,
    device: &Device,
) -> anyhow::Result<()> {
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(2)),
        None => StdRng::from_entropy(),
    };
    generate_test_images(
        generator,
        args.generate_test_images,
        args.batch_size,
        &args.sample_dir,
        &mut rng,
        device,
    )
    .context("failed to write test images")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::info!("{:#?}", args);

    let model_config = match &args.config {
        Some(path) => DcganConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => DcganConfig {
            output_height: args.output_height,
            output_width: args.output_width.unwrap_or(args.output_height),
            z_dim: args.z_dim,
            gf_dim: args.gf_dim,
            df_dim: args.df_dim,
            ..DcganConfig::default()
        },
    };
    model_config.validate()?;

    let dataset = DatasetConfig {
        data_dir: args.data_dir.clone(),
        dataset_name: args.dataset.clone(),
        input_fname_pattern: args.input_fname_pattern.clone(),
        input_height: args.input_height,
        input_width: args.input_width.unwrap_or(args.input_height),
        crop: args.crop,
    };

    std::fs::create_dir_all(&args.checkpoint_dir)?;
    std::fs::create_dir_all(&args.sample_dir)?;

    // Device setup - Try CUDA first, fallback to CPU
    let device = if !args.cpu && candle_core::utils::cuda_is_available() {
        Device::new_cuda(0)?
    } else {
        Device::Cpu
    };
    log::info!("Using device: {:?}", device);

    if args.train {
        let training_config = TrainingConfig {
            epochs: args.epoch,
            batch_size: args.batch_size,
            learning_rate: args.learning_rate,
            beta1: args.beta1,
            train_size: args.train_size,
            summary_steps: args.summary_steps,
            eval_steps: args.eval_steps,
            save_ckpt_steps: args.save_ckpt_steps,
            checkpoint_dir: args.checkpoint_dir.clone(),
            sample_dir: args.sample_dir.clone(),
            log_dir: args.log_dir.clone(),
            max_to_keep: args.max_to_keep,
            seed: args.seed,
            ..TrainingConfig::default()
        };

        let trainer = run_training(model_config, dataset, training_config, device.clone())?;
        log::info!("Finished at step {}", trainer.step());

        if args.visualize {
            write_test_images(&trainer.model().generator, &args, &device)?;
        }
    } else {
        let key = model_key(
            &args.dataset,
            args.batch_size,
            model_config.output_height,
            model_config.output_width,
        );
        let store = CheckpointStore::new(&args.checkpoint_dir, &key);
        let (model, step) = load_trained_model(model_config, &store, &device)
            .context("[!] Train a model first, then run test mode")?;
        log::info!("Loaded {} at step {}", key, step);
        model.log_summary()?;

        write_test_images(&model.generator, &args, &device)?;
    }

    Ok(())
}
