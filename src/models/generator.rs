/// Latent-to-image network and its inference-mode sampler
use candle_core::{bail, DType, Device, Result, Tensor};

use crate::config::DcganConfig;
use crate::layers::{BatchNorm, ConvTranspose2dSame, Linear, Mode};

use super::params::NetworkParams;

/// Linear projection to a `8gf x h/16 x w/16` map, then four transposed
/// convolutions to `4gf, 2gf, gf, 1` channels
///
/// Each upsampling stage is pinned to the matching level of the halving chain,
/// so the final image is exactly `output_height x output_width` even for odd
/// sizes.
pub struct Generator {
    h0: Linear,
    bn0: BatchNorm,
    h1: ConvTranspose2dSame,
    bn1: BatchNorm,
    h2: ConvTranspose2dSame,
    bn2: BatchNorm,
    h3: ConvTranspose2dSame,
    bn3: BatchNorm,
    h4: ConvTranspose2dSame,
    gf_dim: usize,
    z_dim: usize,
    sizes: [(usize, usize); 5],
    params: NetworkParams,
}

impl Generator {
    pub fn new(config: &DcganConfig, device: &Device) -> crate::Result<Self> {
        config.validate()?;

        let params = NetworkParams::new("generator", DType::F32, device);
        let vb = params.trainable_builder();
        let stats = params.statistics_builder();

        let gf = config.gf_dim;
        let k = config.kernel_size;
        let std = config.init_stddev;
        let sizes = config.stage_sizes();
        let (h16, w16) = sizes[4];
        let batch_norm = |features: usize, name: &str| {
            BatchNorm::new(
                features,
                config.bn_momentum,
                config.bn_eps,
                vb.pp(name),
                stats.pp(name),
            )
        };

        let h0 = Linear::new(config.z_dim, gf * 8 * h16 * w16, std, vb.pp("h0"))?;
        let bn0 = batch_norm(gf * 8, "bn0")?;
        let h1 = ConvTranspose2dSame::new(gf * 8, gf * 4, k, sizes[3], std, vb.pp("h1"))?;
        let bn1 = batch_norm(gf * 4, "bn1")?;
        let h2 = ConvTranspose2dSame::new(gf * 4, gf * 2, k, sizes[2], std, vb.pp("h2"))?;
        let bn2 = batch_norm(gf * 2, "bn2")?;
        let h3 = ConvTranspose2dSame::new(gf * 2, gf, k, sizes[1], std, vb.pp("h3"))?;
        let bn3 = batch_norm(gf, "bn3")?;
        let h4 = ConvTranspose2dSame::new(gf, 1, k, sizes[0], std, vb.pp("h4"))?;

        Ok(Self {
            h0,
            bn0,
            h1,
            bn1,
            h2,
            bn2,
            h3,
            bn3,
            h4,
            gf_dim: gf,
            z_dim: config.z_dim,
            sizes,
            params,
        })
    }

    /// Map latent vectors to images
    ///
    /// # Arguments
    /// * `z` - `[batch, z_dim]`
    /// * `mode` - Batch-norm mode
    ///
    /// # Returns
    /// `[batch, height, width, 1]` in [-1, 1]
    pub fn forward(&self, z: &Tensor, mode: Mode) -> Result<Tensor> {
        let (batch, z_dim) = z.dims2()?;
        if z_dim != self.z_dim {
            bail!("generator expects z of width {}, got {}", self.z_dim, z_dim);
        }

        let (h16, w16) = self.sizes[4];
        let x = self
            .h0
            .forward(z)?
            .reshape((batch, self.gf_dim * 8, h16, w16))?;
        let x = self.bn0.forward(&x, mode)?.relu()?;

        let x = self.bn1.forward(&self.h1.forward(&x)?, mode)?.relu()?;
        let x = self.bn2.forward(&self.h2.forward(&x)?, mode)?.relu()?;
        let x = self.bn3.forward(&self.h3.forward(&x)?, mode)?.relu()?;
        let x = self.h4.forward(&x)?.tanh()?;

        x.permute((0, 2, 3, 1))?.contiguous()
    }

    /// Generate with the running normalization statistics
    ///
    /// Shares every weight with [`Generator::forward`] and never updates the
    /// statistics, so repeated calls with the same `z` are identical.
    pub fn sample(&self, z: &Tensor) -> Result<Tensor> {
        self.forward(z, Mode::Inference)
    }

    pub fn z_dim(&self) -> usize {
        self.z_dim
    }

    pub fn output_size(&self) -> (usize, usize) {
        self.sizes[0]
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }
}
