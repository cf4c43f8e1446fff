use crate::tensor::{Context, Tensor};
use rand::Rng;

/// One batch of synthetic image pairs with binary same/different labels.
pub struct PairBatch<'a> {
    pub first: Tensor<'a>,
    pub second: Tensor<'a>,
    /// [batch, 1], 0.0 = same class, 1.0 = different class
    pub labels: Tensor<'a>,
}

/// Generates a batch of random image pairs: uniform [0, 1) pixels and
/// fair-coin labels. Purely illustrative stand-in for a real paired
/// dataset.
pub fn random_pair_batch<'a>(
    ctx: &'a Context,
    batch: usize,
    channels: usize,
    height: usize,
    width: usize,
) -> PairBatch<'a> {
    let mut rng = rand::rng();
    let pixels = batch * channels * height * width;
    let shape = [batch, channels, height, width];

    let first_data: Vec<f32> = (0..pixels).map(|_| rng.random::<f32>()).collect();
    let second_data: Vec<f32> = (0..pixels).map(|_| rng.random::<f32>()).collect();
    let label_data: Vec<f32> = (0..batch)
        .map(|_| if rng.random::<bool>() { 1.0 } else { 0.0 })
        .collect();

    PairBatch {
        first: ctx.tensor(&first_data, &shape),
        second: ctx.tensor(&second_data, &shape),
        labels: ctx.tensor(&label_data, &[batch, 1]),
    }
}
