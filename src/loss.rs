use crate::tensor::{Context, Tensor};

/// Contrastive loss over a batch of embedding pairs.
///
/// `labels` is [batch, 1] with 0 = same class, 1 = different class.
/// Per sample, with d the Euclidean distance between the embeddings:
/// (1 - y) * d^2 + y * max(margin - d, 0)^2, averaged over the batch.
pub fn contrastive_loss<'a>(
    ctx: &'a Context,
    out1: Tensor<'a>,
    out2: Tensor<'a>,
    labels: Tensor<'a>,
    margin: f32,
) -> Tensor<'a> {
    let batch = labels.shape()[0];

    let diff = out1 - out2;
    let dist_sq = diff.pow(2.0).sum_axis(1); // [batch, 1]
    let dist = dist_sq.pow(0.5);

    let ones = ctx.tensor(&vec![1.0; batch], &[batch, 1]);
    let same = ones - labels; // 1 - y

    let margins = ctx.tensor(&vec![margin; batch], &[batch, 1]);
    let hinge = (margins - dist).relu().pow(2.0);

    (same * dist_sq + labels * hinge).mean()
}
