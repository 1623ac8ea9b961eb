/// Adversarial training loop for the DCGAN
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::checkpoint::{CheckpointStore, Restored};
use super::losses::{discriminator_loss, generator_loss};
use super::summary::SummaryWriter;
use crate::config::{model_key, DatasetConfig, DcganConfig};
use crate::data::{BatchDataLoader, ImageDataLoader};
use crate::layers::Mode;
use crate::models::Dcgan;
use crate::utils::uniform_latent;
use crate::{sampling, DcganError};

/// Training configuration
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Number of training epochs
    pub epochs: usize,
    /// Images per batch
    pub batch_size: usize,
    /// Adam learning rate for both networks
    pub learning_rate: f64,
    /// Adam first-moment decay
    pub beta1: f64,
    /// Adam second-moment decay
    pub beta2: f64,
    /// Cap on images used per epoch (`None` uses all)
    pub train_size: Option<usize>,
    /// Size of the held-out monitoring batch (defaults to `batch_size`)
    pub sample_num: Option<usize>,
    /// Write summaries every N steps
    pub summary_steps: u64,
    /// Export a sample grid every N steps
    pub eval_steps: u64,
    /// Save a checkpoint every N steps
    pub save_ckpt_steps: u64,
    /// Root of per-run checkpoint directories
    pub checkpoint_dir: PathBuf,
    /// Where sample grids are written
    pub sample_dir: PathBuf,
    /// Where summary files are written
    pub log_dir: PathBuf,
    /// Checkpoints retained per run
    pub max_to_keep: usize,
    /// Seed for latent draws and shuffling (`None` seeds from entropy)
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 25,
            batch_size: 4,
            learning_rate: 2e-4,
            beta1: 0.5,
            beta2: 0.999,
            train_size: None,
            sample_num: None,
            summary_steps: 100,
            eval_steps: 100,
            save_ckpt_steps: 100,
            checkpoint_dir: PathBuf::from("checkpoint"),
            sample_dir: PathBuf::from("samples"),
            log_dir: PathBuf::from("logs"),
            max_to_keep: 5,
            seed: None,
        }
    }
}

impl TrainingConfig {
    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.batch_size == 0 {
            return Err(DcganError::Config("batch_size must be > 0".to_string()));
        }

        if self.summary_steps == 0 || self.eval_steps == 0 || self.save_ckpt_steps == 0 {
            return Err(DcganError::Config(
                "summary_steps, eval_steps and save_ckpt_steps must be > 0".to_string(),
            ));
        }

        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(DcganError::Config(format!(
                "learning_rate must be > 0, got {}",
                self.learning_rate
            )));
        }

        if !(0.0..1.0).contains(&self.beta1) || !(0.0..1.0).contains(&self.beta2) {
            return Err(DcganError::Config(format!(
                "beta1 and beta2 must be in [0, 1), got {} and {}",
                self.beta1, self.beta2
            )));
        }

        if self.sample_num == Some(0) {
            return Err(DcganError::Config("sample_num must be > 0".to_string()));
        }

        Ok(())
    }

    pub fn sample_num(&self) -> usize {
        self.sample_num.unwrap_or(self.batch_size)
    }

    fn rng(&self, stream: u64) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
            None => StdRng::from_entropy(),
        }
    }
}

/// Losses and probabilities of one discriminator update
#[derive(Debug, Clone)]
pub struct DiscriminatorUpdate {
    pub d_loss_real: f32,
    pub d_loss_fake: f32,
    /// D(x) for the real batch
    pub real_probs: Tensor,
    /// D(G(z)) before the update
    pub fake_probs: Tensor,
}

/// Loss and probabilities of one generator update
#[derive(Debug, Clone)]
pub struct GeneratorUpdate {
    pub g_loss: f32,
    /// D(G(z)) before the update
    pub fake_probs: Tensor,
}

/// Everything one training step produced
#[derive(Debug, Clone)]
pub struct StepReport {
    pub d_loss_real: f32,
    pub d_loss_fake: f32,
    pub g_loss: f32,
    pub z: Tensor,
    pub real_probs: Tensor,
    pub fake_probs: Tensor,
}

impl StepReport {
    pub fn d_loss(&self) -> f32 {
        self.d_loss_real + self.d_loss_fake
    }
}

/// Inference-mode losses on the held-out batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalReport {
    pub d_loss: f32,
    pub g_loss: f32,
}

/// Trainer for the DCGAN
///
/// Owns one optimizer per network; each optimizer only ever sees its own
/// network's trainable variables.
pub struct Trainer {
    model: Dcgan,
    d_optim: AdamW,
    g_optim: AdamW,
    config: TrainingConfig,
    checkpoints: CheckpointStore,
    summary: Option<SummaryWriter>,
    device: Device,
    rng: StdRng,
    step: u64,
    d_updates: u64,
    g_updates: u64,
}

impl Trainer {
    /// Create new trainer with freshly initialized networks
    ///
    /// # Arguments
    /// * `model_config` - Network architecture
    /// * `training_config` - Optimization and cadence settings
    /// * `dataset_name` - Used with batch and output size to key the run
    /// * `device` - Device to train on
    pub fn new(
        model_config: DcganConfig,
        training_config: TrainingConfig,
        dataset_name: &str,
        device: Device,
    ) -> crate::Result<Self> {
        training_config.validate()?;

        let key = model_key(
            dataset_name,
            training_config.batch_size,
            model_config.output_height,
            model_config.output_width,
        );
        let model = Dcgan::new(model_config, &device)?;
        model.log_summary()?;

        let adam = ParamsAdamW {
            lr: training_config.learning_rate,
            beta1: training_config.beta1,
            beta2: training_config.beta2,
            eps: 1e-8,
            weight_decay: 0.0,
        };
        let d_optim = AdamW::new(model.discriminator.params().trainable_vars(), adam.clone())?;
        let g_optim = AdamW::new(model.generator.params().trainable_vars(), adam)?;

        let checkpoints = CheckpointStore::new(&training_config.checkpoint_dir, &key)
            .with_max_to_keep(training_config.max_to_keep);

        let summary = match SummaryWriter::create(&training_config.log_dir, &key) {
            Ok(writer) => Some(writer),
            Err(e) => {
                log::warn!("Summaries disabled: {}", e);
                None
            }
        };

        let rng = training_config.rng(1);

        Ok(Self {
            model,
            d_optim,
            g_optim,
            config: training_config,
            checkpoints,
            summary,
            device,
            rng,
            step: 0,
            d_updates: 0,
            g_updates: 0,
        })
    }

    pub fn model(&self) -> &Dcgan {
        &self.model
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Completed training steps, including those restored from a checkpoint
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Discriminator optimizer updates applied by this trainer
    pub fn d_updates(&self) -> u64 {
        self.d_updates
    }

    /// Generator optimizer updates applied by this trainer
    pub fn g_updates(&self) -> u64 {
        self.g_updates
    }

    /// Restore the latest checkpoint, continuing the step count from it
    pub fn resume(&mut self) -> crate::Result<Restored> {
        let restored = self
            .checkpoints
            .load(&self.model.parameter_sets(), &self.device)?;
        self.step = restored.step();
        Ok(restored)
    }

    pub fn save_checkpoint(&self) -> crate::Result<PathBuf> {
        self.checkpoints
            .save(&self.model.parameter_sets(), self.step)
    }

    /// Draw a uniform latent batch from the trainer's generator
    pub fn draw_latent(&mut self, batch_size: usize) -> crate::Result<Tensor> {
        Ok(uniform_latent(
            &mut self.rng,
            batch_size,
            self.model.config.z_dim,
            &self.device,
        )?)
    }

    /// One discriminator update on real images and `G(z)`
    ///
    /// The generated batch is detached, so no gradient reaches the generator.
    pub fn update_discriminator(
        &mut self,
        real: &Tensor,
        z: &Tensor,
    ) -> crate::Result<DiscriminatorUpdate> {
        let fake = self.model.generator.forward(z, Mode::Train)?.detach();

        let real_out = self.model.discriminator.forward(real, Mode::Train)?;
        let fake_out = self.model.discriminator.forward(&fake, Mode::Train)?;
        let loss = discriminator_loss(&real_out.logits, &fake_out.logits)?;

        self.d_optim.backward_step(&loss.total)?;
        self.d_updates += 1;

        Ok(DiscriminatorUpdate {
            d_loss_real: loss.real.to_scalar::<f32>()?,
            d_loss_fake: loss.fake.to_scalar::<f32>()?,
            real_probs: real_out.probs.detach(),
            fake_probs: fake_out.probs.detach(),
        })
    }

    /// One generator update towards fooling the discriminator on `G(z)`
    pub fn update_generator(&mut self, z: &Tensor) -> crate::Result<GeneratorUpdate> {
        let fake = self.model.generator.forward(z, Mode::Train)?;
        let fake_out = self.model.discriminator.forward(&fake, Mode::Train)?;
        let loss = generator_loss(&fake_out.logits)?;

        self.g_optim.backward_step(&loss)?;
        self.g_updates += 1;

        Ok(GeneratorUpdate {
            g_loss: loss.to_scalar::<f32>()?,
            fake_probs: fake_out.probs.detach(),
        })
    }

    /// One training step: a discriminator update, then two generator
    /// updates with the same latent batch
    pub fn train_step(&mut self, real: &Tensor) -> crate::Result<StepReport> {
        let batch_size = real.dim(0)?;
        let z = self.draw_latent(batch_size)?;

        let d = self.update_discriminator(real, &z)?;
        self.update_generator(&z)?;
        let g = self.update_generator(&z)?;

        self.step += 1;

        Ok(StepReport {
            d_loss_real: d.d_loss_real,
            d_loss_fake: d.d_loss_fake,
            g_loss: g.g_loss,
            z,
            real_probs: d.real_probs,
            fake_probs: g.fake_probs,
        })
    }

    /// Score the held-out batch and write a sample grid to `path`
    ///
    /// Runs both networks in inference mode, so neither the parameters nor the
    /// running statistics change.
    pub fn evaluate(
        &self,
        sample_z: &Tensor,
        sample_inputs: &Tensor,
        path: &Path,
    ) -> crate::Result<EvalReport> {
        let samples = self.model.generator.sample(sample_z)?;

        let real = self
            .model
            .discriminator
            .forward(sample_inputs, Mode::Inference)?;
        let fake = self.model.discriminator.forward(&samples, Mode::Inference)?;

        let d_loss = discriminator_loss(&real.logits, &fake.logits)?
            .total
            .to_scalar::<f32>()?;
        let g_loss = generator_loss(&fake.logits)?.to_scalar::<f32>()?;

        sampling::save_grid(&samples, path)?;

        Ok(EvalReport { d_loss, g_loss })
    }

    fn write_summaries(&mut self, report: &StepReport) {
        let step = self.step;
        let Some(writer) = self.summary.as_mut() else {
            return;
        };

        let result = (|| -> crate::Result<()> {
            writer.add_scalar("d_loss_real", report.d_loss_real as f64, step)?;
            writer.add_scalar("d_loss_fake", report.d_loss_fake as f64, step)?;
            writer.add_scalar("d_loss", report.d_loss() as f64, step)?;
            writer.add_scalar("g_loss", report.g_loss as f64, step)?;
            writer.add_histogram("z", &report.z, step)?;
            writer.add_histogram("d", &report.real_probs, step)?;
            writer.add_histogram("d_", &report.fake_probs, step)?;
            writer.flush()
        })();

        if let Err(e) = result {
            log::warn!("Failed to write summaries at step {}: {}", step, e);
        }
    }

    /// Train for one epoch
    ///
    /// Returns the mean discriminator and generator losses over the epoch.
    pub fn train_epoch(
        &mut self,
        dataloader: &mut impl BatchDataLoader,
        epoch: usize,
        sample_z: &Tensor,
        sample_inputs: &Tensor,
        start: Instant,
    ) -> crate::Result<(f32, f32)> {
        dataloader.reset()?;
        let num_batches = dataloader.num_batches();

        let (mut d_total, mut g_total) = (0.0f32, 0.0f32);
        let mut idx = 0usize;

        while let Some(batch) = dataloader.next_batch(&self.device)? {
            let report = self.train_step(&batch)?;
            d_total += report.d_loss();
            g_total += report.g_loss;

            log::info!(
                "Epoch: [{:2}/{:2}] [{:4}/{:4}] time: {:4.4}, d_loss: {:.8}, g_loss: {:.8}",
                epoch,
                self.config.epochs,
                idx,
                num_batches,
                start.elapsed().as_secs_f64(),
                report.d_loss(),
                report.g_loss
            );

            if self.step % self.config.summary_steps == 0 {
                self.write_summaries(&report);
            }

            if self.step % self.config.eval_steps == 0 {
                let path = self
                    .config
                    .sample_dir
                    .join(format!("train_{:02}_{:04}.png", epoch, idx));
                match self.evaluate(sample_z, sample_inputs, &path) {
                    Ok(eval) => log::info!(
                        "[Sample] d_loss: {:.8}, g_loss: {:.8} -> {}",
                        eval.d_loss,
                        eval.g_loss,
                        path.display()
                    ),
                    Err(e) => log::warn!("Sample export failed at step {}: {}", self.step, e),
                }
            }

            if self.step % self.config.save_ckpt_steps == 0 {
                self.save_checkpoint()?;
            }

            idx += 1;
        }

        if idx == 0 {
            return Ok((0.0, 0.0));
        }
        Ok((d_total / idx as f32, g_total / idx as f32))
    }

    /// Full training loop
    pub fn train(&mut self, dataloader: &mut impl BatchDataLoader) -> crate::Result<()> {
        log::info!("Starting training for {} epochs", self.config.epochs);
        log::info!("Total batches per epoch: {}", dataloader.num_batches());
        if dataloader.num_batches() == 0 {
            return Err(DcganError::Training(format!(
                "no full batch of {} images per epoch (train_size {:?})",
                self.config.batch_size, self.config.train_size
            )));
        }

        let sample_num = self.config.sample_num();
        let sample_inputs = dataloader.held_out_batch(sample_num, &self.device)?;
        let sample_z = self.draw_latent(sample_num)?;
        fs::create_dir_all(&self.config.sample_dir)?;

        let start = Instant::now();
        for epoch in 0..self.config.epochs {
            let (d_loss, g_loss) =
                self.train_epoch(dataloader, epoch, &sample_z, &sample_inputs, start)?;

            log::info!(
                "Epoch {} complete: avg d_loss={:.4}, avg g_loss={:.4}, step={}",
                epoch,
                d_loss,
                g_loss,
                self.step
            );
        }

        if let Some(writer) = self.summary.as_mut() {
            if let Err(e) = writer.flush() {
                log::warn!("Failed to flush summaries: {}", e);
            }
        }

        log::info!("Training complete!");
        Ok(())
    }
}

/// Build the data pipeline and trainer, resume if possible, then train
///
/// The dataset is scanned before any network is built, so a missing or
/// too-small dataset fails immediately with a configuration error.
pub fn run_training(
    model_config: DcganConfig,
    dataset: DatasetConfig,
    training_config: TrainingConfig,
    device: Device,
) -> crate::Result<Trainer> {
    model_config.validate()?;
    training_config.validate()?;

    let mut loader = ImageDataLoader::new(
        dataset.clone(),
        (model_config.output_height, model_config.output_width),
        training_config.batch_size,
        training_config.train_size,
        training_config.rng(0),
    )?;

    let mut trainer = Trainer::new(model_config, training_config, &dataset.dataset_name, device)?;
    match trainer.resume()? {
        Restored::Found { step, path } => {
            log::info!(" [*] Load SUCCESS from {} (step {})", path.display(), step)
        }
        Restored::NotFound => log::info!(" [!] Load failed, starting from scratch"),
    }

    trainer.train(&mut loader)?;
    Ok(trainer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedLoader {
        batches: usize,
        batch_size: usize,
        size: (usize, usize),
        served: usize,
    }

    impl BatchDataLoader for FixedLoader {
        fn next_batch(&mut self, device: &Device) -> crate::Result<Option<Tensor>> {
            if self.served == self.batches {
                return Ok(None);
            }
            self.served += 1;
            let (h, w) = self.size;
            Ok(Some(
                Tensor::rand(-1f32, 1.0, (self.batch_size, h, w, 1), device)?,
            ))
        }

        fn reset(&mut self) -> crate::Result<()> {
            self.served = 0;
            Ok(())
        }

        fn num_batches(&self) -> usize {
            self.batches
        }

        fn held_out_batch(&self, size: usize, device: &Device) -> crate::Result<Tensor> {
            let (h, w) = self.size;
            Ok(Tensor::zeros((size, h, w, 1), candle_core::DType::F32, device)?)
        }
    }

    fn small_model() -> DcganConfig {
        DcganConfig {
            output_height: 16,
            output_width: 16,
            z_dim: 4,
            gf_dim: 2,
            df_dim: 2,
            ..DcganConfig::default()
        }
    }

    fn training_config(root: &Path) -> TrainingConfig {
        TrainingConfig {
            epochs: 1,
            batch_size: 4,
            checkpoint_dir: root.join("checkpoint"),
            sample_dir: root.join("samples"),
            log_dir: root.join("logs"),
            seed: Some(42),
            ..TrainingConfig::default()
        }
    }

    fn snapshot(vars: &[candle_core::Var]) -> crate::Result<HashMap<usize, Vec<f32>>> {
        let mut values = HashMap::new();
        for (i, var) in vars.iter().enumerate() {
            values.insert(i, var.flatten_all()?.to_vec1::<f32>()?);
        }
        Ok(values)
    }

    #[test]
    fn test_validate_rejects_zero_cadence() {
        let config = TrainingConfig {
            eval_steps: 0,
            ..TrainingConfig::default()
        };
        assert!(matches!(config.validate(), Err(DcganError::Config(_))));
    }

    #[test]
    fn test_step_updates_each_network_on_its_own() -> crate::Result<()> {
        let root = tempfile::tempdir()?;
        let mut trainer =
            Trainer::new(small_model(), training_config(root.path()), "unit", Device::Cpu)?;

        let d_vars = trainer.model().discriminator.params().trainable_vars();
        let g_vars = trainer.model().generator.params().trainable_vars();
        let d_before = snapshot(&d_vars)?;
        let g_before = snapshot(&g_vars)?;

        let real = Tensor::rand(-1f32, 1.0, (4, 16, 16, 1), &Device::Cpu)?;
        let z = trainer.draw_latent(4)?;

        // a discriminator update leaves the generator untouched
        trainer.update_discriminator(&real, &z)?;
        assert_ne!(snapshot(&d_vars)?, d_before);
        assert_eq!(snapshot(&g_vars)?, g_before);

        // a generator update leaves the discriminator untouched
        let d_after = snapshot(&d_vars)?;
        trainer.update_generator(&z)?;
        assert_eq!(snapshot(&d_vars)?, d_after);
        assert_ne!(snapshot(&g_vars)?, g_before);
        Ok(())
    }

    #[test]
    fn test_train_step_counts_updates() -> crate::Result<()> {
        let root = tempfile::tempdir()?;
        let mut trainer =
            Trainer::new(small_model(), training_config(root.path()), "unit", Device::Cpu)?;

        let real = Tensor::rand(-1f32, 1.0, (4, 16, 16, 1), &Device::Cpu)?;
        let report = trainer.train_step(&real)?;

        assert_eq!(trainer.step(), 1);
        assert_eq!(trainer.d_updates(), 1);
        assert_eq!(trainer.g_updates(), 2);
        assert!(report.d_loss().is_finite() && report.g_loss.is_finite());
        assert_eq!(report.z.dims(), &[4, 4]);
        Ok(())
    }

    #[test]
    fn test_evaluate_does_not_touch_parameters() -> crate::Result<()> {
        let root = tempfile::tempdir()?;
        let mut trainer =
            Trainer::new(small_model(), training_config(root.path()), "unit", Device::Cpu)?;

        let mut everything = Vec::new();
        for params in trainer.model().parameter_sets() {
            everything.extend(params.trainable_vars());
            everything.extend(params.statistics_vars());
        }
        let before = snapshot(&everything)?;

        let z = trainer.draw_latent(4)?;
        let inputs = Tensor::zeros((4, 16, 16, 1), candle_core::DType::F32, &Device::Cpu)?;
        let path = root.path().join("eval.png");
        trainer.evaluate(&z, &inputs, &path)?;

        assert_eq!(snapshot(&everything)?, before);
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn test_cadences_and_resume() -> crate::Result<()> {
        let root = tempfile::tempdir()?;
        let config = TrainingConfig {
            epochs: 2,
            summary_steps: 1,
            eval_steps: 2,
            save_ckpt_steps: 3,
            ..training_config(root.path())
        };
        let mut loader = FixedLoader {
            batches: 2,
            batch_size: 4,
            size: (16, 16),
            served: 0,
        };

        let mut trainer = Trainer::new(small_model(), config.clone(), "unit", Device::Cpu)?;
        trainer.train(&mut loader)?;
        assert_eq!(trainer.step(), 4);
        assert_eq!(trainer.d_updates(), 4);
        assert_eq!(trainer.g_updates(), 8);

        // step 2 is epoch 0 batch 1, step 4 is epoch 1 batch 1
        assert!(config.sample_dir.join("train_00_0001.png").exists());
        assert!(config.sample_dir.join("train_01_0001.png").exists());
        assert!(!config.sample_dir.join("train_00_0000.png").exists());

        let records = crate::training::summary::read_summaries(
            config.log_dir.join("events.unit_4_16_16.jsonl"),
        )?;
        // 4 scalars + 3 histograms per step
        assert_eq!(records.len(), 4 * 7);

        // only step 3 was a checkpoint step
        let mut resumed = Trainer::new(small_model(), config, "unit", Device::Cpu)?;
        assert_eq!(resumed.resume()?.step(), 3);
        assert_eq!(resumed.step(), 3);
        Ok(())
    }
}
