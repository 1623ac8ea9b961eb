/// Generator/discriminator pair
use candle_core::Device;

use crate::config::DcganConfig;

pub mod discriminator;
pub mod generator;
pub mod loader;
pub mod params;

pub use discriminator::{Discriminator, DiscriminatorOutput};
pub use generator::Generator;
pub use params::{NetworkParams, ParamInfo};

/// Both DCGAN networks built from one configuration
///
/// Each network owns its parameters; nothing is shared between them.
pub struct Dcgan {
    pub config: DcganConfig,
    pub discriminator: Discriminator,
    pub generator: Generator,
}

impl Dcgan {
    /// Create both networks with freshly initialized weights
    pub fn new(config: DcganConfig, device: &Device) -> crate::Result<Self> {
        config.validate()?;

        let discriminator = Discriminator::new(&config, device)?;
        let generator = Generator::new(&config, device)?;

        Ok(Self {
            config,
            discriminator,
            generator,
        })
    }

    /// Parameter stores in checkpoint order
    pub fn parameter_sets(&self) -> [&NetworkParams; 2] {
        [self.discriminator.params(), self.generator.params()]
    }

    /// Total trainable scalars across both networks
    pub fn num_parameters(&self) -> usize {
        self.parameter_sets()
            .iter()
            .map(|p| p.num_parameters())
            .sum()
    }

    /// Log every variable with its shape and size
    pub fn log_summary(&self) -> crate::Result<()> {
        for params in self.parameter_sets() {
            let rows = params.summary()?;
            let trainable: usize = rows.iter().filter(|r| r.trainable).map(|r| r.count).sum();
            log::info!(
                "{}: {} variables, {} trainable parameters",
                params.name(),
                rows.len(),
                trainable
            );
            for row in rows {
                log::info!(
                    "  {:<40} {:<20} {:>10}{}",
                    row.name,
                    format!("{:?}", row.shape),
                    row.count,
                    if row.trainable { "" } else { " (statistics)" }
                );
            }
        }
        log::info!("Total trainable parameters: {}", self.num_parameters());
        Ok(())
    }
}
