/// Configuration for the DCGAN networks and their input pipeline
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::stage_sizes;

/// Architecture of the generator/discriminator pair
///
/// Images are always single-channel. Defaults follow the fingerprint setup the
/// model was first trained on (650x650, z_dim 100).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcganConfig {
    /// Height of generated (and discriminated) images
    pub output_height: usize,

    /// Width of generated (and discriminated) images
    pub output_width: usize,

    /// Dimension of the latent vector z
    pub z_dim: usize,

    /// Channel depth of the generator's last hidden stage (first stage is 8x)
    pub gf_dim: usize,

    /// Channel depth of the discriminator's first convolution
    pub df_dim: usize,

    /// Square kernel size of every (transposed) convolution
    pub kernel_size: usize,

    /// Negative slope of the discriminator's leaky ReLU
    pub leak: f64,

    /// Standard deviation of the normal weight initializer
    pub init_stddev: f64,

    /// Decay of the batch-norm running statistics
    pub bn_momentum: f64,

    /// Batch-norm variance epsilon
    pub bn_eps: f64,
}

impl Default for DcganConfig {
    fn default() -> Self {
        Self {
            output_height: 650,
            output_width: 650,
            z_dim: 100,
            gf_dim: 64,
            df_dim: 64,
            kernel_size: 5,
            leak: 0.2,
            init_stddev: 0.02,
            bn_momentum: 0.9,
            bn_eps: 1e-5,
        }
    }
}

impl DcganConfig {
    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.output_height == 0 || self.output_width == 0 {
            return Err(crate::DcganError::Config(
                "output_height and output_width must be > 0".to_string(),
            ));
        }

        if self.z_dim == 0 {
            return Err(crate::DcganError::Config("z_dim must be > 0".to_string()));
        }

        if self.gf_dim == 0 || self.df_dim == 0 {
            return Err(crate::DcganError::Config(
                "gf_dim and df_dim must be > 0".to_string(),
            ));
        }

        // "same" padding needs an odd kernel, and upsampling needs one wider than 1
        if self.kernel_size < 3 || self.kernel_size % 2 == 0 {
            return Err(crate::DcganError::Config(format!(
                "kernel_size must be odd and >= 3, got {}",
                self.kernel_size
            )));
        }

        if !(0.0..1.0).contains(&self.bn_momentum) {
            return Err(crate::DcganError::Config(format!(
                "bn_momentum must be in [0, 1), got {}",
                self.bn_momentum
            )));
        }

        Ok(())
    }

    /// Spatial size at every resolution level, from full size down to 1/16th
    pub fn stage_sizes(&self) -> [(usize, usize); 5] {
        stage_sizes(self.output_height, self.output_width)
    }

    /// Number of features the discriminator flattens before its linear layer
    pub fn disc_flat_features(&self) -> usize {
        let (h16, w16) = self.stage_sizes()[4];
        self.df_dim * 8 * h16 * w16
    }

    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as pretty JSON
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}

/// Where training images come from and how they are prepared
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Root directory holding one sub-directory per dataset
    pub data_dir: PathBuf,

    /// Dataset name, also part of the checkpoint key
    pub dataset_name: String,

    /// Glob pattern (`*` and `?`) matched against file names
    pub input_fname_pattern: String,

    /// Height of the center crop taken before resizing
    pub input_height: usize,

    /// Width of the center crop taken before resizing
    pub input_width: usize,

    /// Center-crop to `input_height` x `input_width` before resizing
    pub crop: bool,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            dataset_name: "nist14".to_string(),
            input_fname_pattern: "*.jpg".to_string(),
            input_height: 650,
            input_width: 650,
            crop: true,
        }
    }
}

impl DatasetConfig {
    /// Directory scanned for images: `data_dir/dataset_name`
    pub fn dataset_dir(&self) -> PathBuf {
        self.data_dir.join(&self.dataset_name)
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.dataset_name.is_empty() {
            return Err(crate::DcganError::Config(
                "dataset_name must not be empty".to_string(),
            ));
        }

        if self.input_fname_pattern.is_empty() {
            return Err(crate::DcganError::Config(
                "input_fname_pattern must not be empty".to_string(),
            ));
        }

        if self.crop && (self.input_height == 0 || self.input_width == 0) {
            return Err(crate::DcganError::Config(
                "input_height and input_width must be > 0 when cropping".to_string(),
            ));
        }

        Ok(())
    }
}

/// Directory name that namespaces the checkpoints of one run configuration
pub fn model_key(
    dataset_name: &str,
    batch_size: usize,
    output_height: usize,
    output_width: usize,
) -> String {
    format!(
        "{}_{}_{}_{}",
        dataset_name, batch_size, output_height, output_width
    )
}
