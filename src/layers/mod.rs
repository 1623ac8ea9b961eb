/// Neural network layer primitives
///
/// This module contains the building blocks shared by both DCGAN networks:
/// - Strided and transposed convolutions with "same" sizing
/// - Batch normalization with running statistics and an explicit mode
/// - A dense layer and the leaky rectifier

pub mod activations;
pub mod conv;
pub mod normalization;

pub use activations::{leaky_relu, Linear};
pub use conv::{Conv2dSame, ConvTranspose2dSame};
pub use normalization::{BatchNorm, Mode};
