/// Loading trained models for sampling
use candle_core::Device;

use super::Dcgan;
use crate::config::DcganConfig;
use crate::training::checkpoint::{CheckpointStore, Restored};
use crate::DcganError;

/// Build a model and restore its latest checkpoint
///
/// # Arguments
/// * `config` - Architecture the checkpoint was trained with
/// * `store` - Checkpoint store of the run
/// * `device` - Device to load model on
///
/// # Returns
/// The restored model and the step it was saved at. Fails with
/// [`DcganError::CheckpointNotFound`] when the run has no checkpoint.
pub fn load_trained_model(
    config: DcganConfig,
    store: &CheckpointStore,
    device: &Device,
) -> crate::Result<(Dcgan, u64)> {
    let model = Dcgan::new(config, device)?;

    match store.load(&model.parameter_sets(), device)? {
        Restored::Found { step, .. } => Ok((model, step)),
        Restored::NotFound => Err(DcganError::CheckpointNotFound(store.dir().to_path_buf())),
    }
}
