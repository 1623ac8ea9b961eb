/// Data loading for DCGAN training
pub mod images;

pub use images::{load_image, ImageDataLoader, ImageTransform};

use candle_core::{Device, Tensor};

/// Generic image batch loader
pub trait BatchDataLoader {
    /// Get next batch of images `[batch, height, width, 1]`, `None` at epoch end
    fn next_batch(&mut self, device: &Device) -> crate::Result<Option<Tensor>>;

    /// Reset loader for new epoch
    fn reset(&mut self) -> crate::Result<()>;

    /// Get total number of batches per epoch
    fn num_batches(&self) -> usize;

    /// Fixed images used to monitor training, identical across epochs
    fn held_out_batch(&self, size: usize, device: &Device) -> crate::Result<Tensor>;
}
