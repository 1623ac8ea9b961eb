/// Convolutional real/fake classifier
use candle_core::{bail, DType, Device, Result, Tensor};

use crate::config::DcganConfig;
use crate::layers::{leaky_relu, BatchNorm, Conv2dSame, Linear, Mode};

use super::params::NetworkParams;

/// Discriminator outputs for one batch
#[derive(Debug, Clone)]
pub struct DiscriminatorOutput {
    /// `sigmoid(logits)`: [batch, 1]
    pub probs: Tensor,
    /// Raw scores: [batch, 1]
    pub logits: Tensor,
}

/// Four stride-2 convolutions followed by one linear logit
///
/// Depths are `df, 2df, 4df, 8df`; stages two to four are batch-normalized and
/// every stage uses the leaky rectifier.
pub struct Discriminator {
    h0: Conv2dSame,
    h1: Conv2dSame,
    bn1: BatchNorm,
    h2: Conv2dSame,
    bn2: BatchNorm,
    h3: Conv2dSame,
    bn3: BatchNorm,
    h4: Linear,
    leak: f64,
    input_size: (usize, usize),
    params: NetworkParams,
}

impl Discriminator {
    pub fn new(config: &DcganConfig, device: &Device) -> crate::Result<Self> {
        config.validate()?;

        let params = NetworkParams::new("discriminator", DType::F32, device);
        let vb = params.trainable_builder();
        let stats = params.statistics_builder();

        let df = config.df_dim;
        let k = config.kernel_size;
        let std = config.init_stddev;
        let batch_norm = |features: usize, name: &str| {
            BatchNorm::new(
                features,
                config.bn_momentum,
                config.bn_eps,
                vb.pp(name),
                stats.pp(name),
            )
        };

        let h0 = Conv2dSame::new(1, df, k, std, vb.pp("h0"))?;
        let h1 = Conv2dSame::new(df, df * 2, k, std, vb.pp("h1"))?;
        let bn1 = batch_norm(df * 2, "bn1")?;
        let h2 = Conv2dSame::new(df * 2, df * 4, k, std, vb.pp("h2"))?;
        let bn2 = batch_norm(df * 4, "bn2")?;
        let h3 = Conv2dSame::new(df * 4, df * 8, k, std, vb.pp("h3"))?;
        let bn3 = batch_norm(df * 8, "bn3")?;
        let h4 = Linear::new(config.disc_flat_features(), 1, std, vb.pp("h4"))?;

        Ok(Self {
            h0,
            h1,
            bn1,
            h2,
            bn2,
            h3,
            bn3,
            h4,
            leak: config.leak,
            input_size: (config.output_height, config.output_width),
            params,
        })
    }

    /// Classify a batch of images
    ///
    /// # Arguments
    /// * `images` - `[batch, height, width, 1]` in [-1, 1], at the configured output size
    /// * `mode` - Batch-norm mode
    pub fn forward(&self, images: &Tensor, mode: Mode) -> Result<DiscriminatorOutput> {
        let (_, h, w, c) = images.dims4()?;
        if (h, w) != self.input_size || c != 1 {
            bail!(
                "discriminator expects [b, {}, {}, 1], got {:?}",
                self.input_size.0,
                self.input_size.1,
                images.dims()
            );
        }

        let x = images.permute((0, 3, 1, 2))?.contiguous()?;

        let x = leaky_relu(&self.h0.forward(&x)?, self.leak)?;
        let x = leaky_relu(&self.bn1.forward(&self.h1.forward(&x)?, mode)?, self.leak)?;
        let x = leaky_relu(&self.bn2.forward(&self.h2.forward(&x)?, mode)?, self.leak)?;
        let x = leaky_relu(&self.bn3.forward(&self.h3.forward(&x)?, mode)?, self.leak)?;

        let logits = self.h4.forward(&x.flatten_from(1)?)?;
        let probs = candle_nn::ops::sigmoid(&logits)?;

        Ok(DiscriminatorOutput { probs, logits })
    }

    pub fn input_size(&self) -> (usize, usize) {
        self.input_size
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(height: usize, width: usize) -> DcganConfig {
        DcganConfig {
            output_height: height,
            output_width: width,
            z_dim: 8,
            gf_dim: 4,
            df_dim: 4,
            ..DcganConfig::default()
        }
    }

    #[test]
    fn test_output_shapes() -> crate::Result<()> {
        let device = Device::Cpu;
        let disc = Discriminator::new(&small_config(32, 24), &device)?;

        let images = Tensor::randn(0f32, 1.0, (3, 32, 24, 1), &device)?;
        let out = disc.forward(&images, Mode::Train)?;
        assert_eq!(out.logits.dims(), &[3, 1]);
        assert_eq!(out.probs.dims(), &[3, 1]);

        let probs = out.probs.flatten_all()?.to_vec1::<f32>()?;
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
        Ok(())
    }

    #[test]
    fn test_odd_resolution() -> crate::Result<()> {
        let device = Device::Cpu;
        let disc = Discriminator::new(&small_config(37, 21), &device)?;
        let images = Tensor::zeros((2, 37, 21, 1), DType::F32, &device)?;
        assert_eq!(disc.forward(&images, Mode::Inference)?.logits.dims(), &[2, 1]);
        Ok(())
    }

    #[test]
    fn test_rejects_wrong_size() -> crate::Result<()> {
        let device = Device::Cpu;
        let disc = Discriminator::new(&small_config(32, 32), &device)?;
        let images = Tensor::zeros((2, 16, 16, 1), DType::F32, &device)?;
        assert!(disc.forward(&images, Mode::Train).is_err());
        Ok(())
    }

    #[test]
    fn test_three_normalization_layers() -> crate::Result<()> {
        let disc = Discriminator::new(&small_config(16, 16), &Device::Cpu)?;
        // running mean + variance for bn1..bn3
        assert_eq!(disc.params().statistics_vars().len(), 6);
        // 4 convs + linear (weight, bias) and 3 norms (scale, shift)
        assert_eq!(disc.params().trainable_vars().len(), 16);
        Ok(())
    }
}
