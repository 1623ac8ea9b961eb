//! Grayscale DCGAN - Rust implementation
//!
//! Trains a deep convolutional GAN that maps low-dimensional uniform noise to
//! single-channel images of a fixed resolution, and samples trained models.
//!
//! # Architecture
//!
//! - **Discriminator**: four stride-2 convolutions (batch-normalized from the
//!   second stage on) with leaky ReLU, then a single linear logit
//! - **Generator**: linear projection followed by four transposed convolutions,
//!   each doubling resolution, ending in `tanh`
//! - **Training**: one discriminator update and two generator updates per batch,
//!   periodic samples, summaries and checkpoints
//!
//! # Example
//!
//! ```ignore
//! use grayscale_dcgan::{Dcgan, DcganConfig};
//! use grayscale_dcgan::layers::Mode;
//!
//! let model = Dcgan::new(DcganConfig::default(), &device)?;
//! let images = model.generator.forward(&z, Mode::Inference)?;
//! ```

pub mod config;
pub mod data;
pub mod layers;
pub mod models;
pub mod sampling;
pub mod training;
pub mod utils;

use std::path::PathBuf;

// Re-export commonly used items
pub use config::{DatasetConfig, DcganConfig};
pub use models::{Dcgan, Discriminator, Generator};

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum DcganError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("No checkpoint found in {}", .0.display())]
    CheckpointNotFound(PathBuf),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Sample export error: {0}")]
    SampleExport(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DcganError>;
