/// Training infrastructure for the DCGAN
pub mod checkpoint;
pub mod losses;
pub mod summary;
pub mod trainer;

pub use checkpoint::{CheckpointStore, Restored};
pub use losses::{discriminator_loss, generator_loss, sigmoid_cross_entropy_with_logits};
pub use summary::SummaryWriter;
pub use trainer::{run_training, Trainer, TrainingConfig};
