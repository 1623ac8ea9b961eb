/// Adversarial losses on raw discriminator logits
use candle_core::{Result, Tensor};

/// Mean sigmoid cross-entropy of `logits` against a constant `target`
///
/// Uses `max(x, 0) - x * z + log(1 + exp(-|x|))`, which stays finite for
/// logits of any magnitude.
pub fn sigmoid_cross_entropy_with_logits(logits: &Tensor, target: f64) -> Result<Tensor> {
    let softplus_neg_abs = ((logits.abs()?.neg()?.exp()? + 1.0)?).log()?;
    let loss = ((logits.relu()? - (logits * target)?)? + softplus_neg_abs)?;
    loss.mean_all()
}

/// Discriminator losses for one batch
#[derive(Debug, Clone)]
pub struct DiscriminatorLoss {
    /// Real images scored against label 1
    pub real: Tensor,
    /// Generated images scored against label 0
    pub fake: Tensor,
    /// `real + fake`, the quantity the discriminator minimizes
    pub total: Tensor,
}

/// Discriminator loss: real images should score 1, generated ones 0
pub fn discriminator_loss(real_logits: &Tensor, fake_logits: &Tensor) -> Result<DiscriminatorLoss> {
    let real = sigmoid_cross_entropy_with_logits(real_logits, 1.0)?;
    let fake = sigmoid_cross_entropy_with_logits(fake_logits, 0.0)?;
    let total = (&real + &fake)?;
    Ok(DiscriminatorLoss { real, fake, total })
}

/// Generator loss: generated images should score 1
pub fn generator_loss(fake_logits: &Tensor) -> Result<Tensor> {
    sigmoid_cross_entropy_with_logits(fake_logits, 1.0)
}
