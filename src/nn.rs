use crate::tensor::{Context, Tensor, conv2d, matmul};
use rand::Rng;

/// A fully connected (linear) layer: y = x @ W + b
pub struct Linear<'a> {
    pub weight: Tensor<'a>,
    pub bias: Tensor<'a>,
}

impl<'a> Linear<'a> {
    /// Creates a new linear layer with Xavier/Glorot initialization
    pub fn new(ctx: &'a Context, in_features: usize, out_features: usize) -> Self {
        let mut rng = rand::rng();

        // Xavier/Glorot initialization
        let scale = (2.0 / (in_features + out_features) as f32).sqrt();
        let weight_data: Vec<f32> = (0..in_features * out_features)
            .map(|_| (rng.random::<f32>() - 0.5) * 2.0 * scale)
            .collect();
        let bias_data = vec![0.0; out_features];

        Self {
            weight: ctx.tensor(&weight_data, &[in_features, out_features]),
            bias: ctx.tensor(&bias_data, &[1, out_features]),
        }
    }

    /// Forward pass: y = x @ W + b
    pub fn forward(&self, x: Tensor<'a>) -> Tensor<'a> {
        matmul(x, self.weight) + self.bias
    }

    /// Returns all trainable parameters
    pub fn params(&self) -> Vec<Tensor<'a>> {
        vec![self.weight, self.bias]
    }
}

/// A 2D convolution layer (stride 1, no padding) over [batch, in_ch, h, w]
/// inputs with a square kernel.
pub struct Conv2d<'a> {
    pub weight: Tensor<'a>,
    pub bias: Tensor<'a>,
}

impl<'a> Conv2d<'a> {
    /// Creates a new conv layer with He initialization over the fan-in.
    pub fn new(ctx: &'a Context, in_channels: usize, out_channels: usize, kernel: usize) -> Self {
        let mut rng = rand::rng();

        let fan_in = in_channels * kernel * kernel;
        let scale = (2.0 / fan_in as f32).sqrt();
        let weight_data: Vec<f32> = (0..out_channels * fan_in)
            .map(|_| (rng.random::<f32>() - 0.5) * 2.0 * scale)
            .collect();
        let bias_data = vec![0.0; out_channels];

        Self {
            weight: ctx.tensor(&weight_data, &[out_channels, in_channels, kernel, kernel]),
            bias: ctx.tensor(&bias_data, &[out_channels]),
        }
    }

    pub fn forward(&self, x: Tensor<'a>) -> Tensor<'a> {
        conv2d(x, self.weight, self.bias)
    }

    pub fn params(&self) -> Vec<Tensor<'a>> {
        vec![self.weight, self.bias]
    }
}

/// A mixture-of-experts feed-forward layer: a softmax gate assigns one
/// mixing weight per expert and per sample, every expert runs on every
/// input, and the outputs are combined as a gate-weighted sum.
///
/// All experts are evaluated densely; only the mixing is gated. True
/// sparse routing would pick top-k experts and skip the rest.
pub struct MoeLayer<'a> {
    pub gate: Linear<'a>,
    pub experts: Vec<Linear<'a>>,
}

impl<'a> MoeLayer<'a> {
    /// Creates a gate over `num_experts` experts, each mapping
    /// `input_dim` -> `output_dim`.
    pub fn new(ctx: &'a Context, input_dim: usize, output_dim: usize, num_experts: usize) -> Self {
        let gate = Linear::new(ctx, input_dim, num_experts);
        let experts = (0..num_experts)
            .map(|_| Linear::new(ctx, input_dim, output_dim))
            .collect();
        Self { gate, experts }
    }

    /// Gate distribution for a batch: [batch, num_experts], each row
    /// non-negative and summing to 1.
    pub fn gate_weights(&self, x: Tensor<'a>) -> Tensor<'a> {
        self.gate.forward(x).softmax()
    }

    /// Forward pass: output = sum_e gate[:, e] * expert_e(x),
    /// shape [batch, output_dim].
    pub fn forward(&self, x: Tensor<'a>) -> Tensor<'a> {
        let weights = self.gate_weights(x);

        let mut combined: Option<Tensor<'a>> = None;
        for (e, expert) in self.experts.iter().enumerate() {
            let weighted = weights.select_col(e) * expert.forward(x);
            combined = Some(match combined {
                Some(acc) => acc + weighted,
                None => weighted,
            });
        }
        combined.expect("MoeLayer requires at least one expert")
    }

    /// Returns all trainable parameters (gate first, then experts).
    pub fn params(&self) -> Vec<Tensor<'a>> {
        let mut params = self.gate.params();
        params.extend(self.experts.iter().flat_map(|e| e.params()));
        params
    }
}

/// A Siamese convolutional feature extractor: two conv+ReLU+max-pool
/// blocks followed by two fully connected layers. Both branches of a
/// pair go through the same parameter tensors, so identical inputs
/// produce identical embeddings.
pub struct SiameseConvNet<'a> {
    pub conv1: Conv2d<'a>,
    pub conv2: Conv2d<'a>,
    pub fc1: Linear<'a>,
    pub fc2: Linear<'a>,
    flat_dim: usize,
}

impl<'a> SiameseConvNet<'a> {
    const KERNEL: usize = 3;
    const POOL: usize = 2;
    const CHANNELS1: usize = 4;
    const CHANNELS2: usize = 8;

    /// Builds the extractor for [batch, in_channels, height, width] inputs,
    /// producing `embed_dim` embeddings.
    pub fn new(
        ctx: &'a Context,
        in_channels: usize,
        height: usize,
        width: usize,
        embed_dim: usize,
    ) -> Self {
        let conv1 = Conv2d::new(ctx, in_channels, Self::CHANNELS1, Self::KERNEL);
        let conv2 = Conv2d::new(ctx, Self::CHANNELS1, Self::CHANNELS2, Self::KERNEL);

        // spatial size after each conv (kernel 3, no padding) and 2x2 pool
        let (h, w) = (
            ((height - Self::KERNEL + 1) / Self::POOL - Self::KERNEL + 1) / Self::POOL,
            ((width - Self::KERNEL + 1) / Self::POOL - Self::KERNEL + 1) / Self::POOL,
        );
        let flat_dim = Self::CHANNELS2 * h * w;

        let fc1 = Linear::new(ctx, flat_dim, 2 * embed_dim);
        let fc2 = Linear::new(ctx, 2 * embed_dim, embed_dim);

        Self {
            conv1,
            conv2,
            fc1,
            fc2,
            flat_dim,
        }
    }

    /// Embeds one batch of images: [batch, in_ch, h, w] -> [batch, embed_dim].
    pub fn forward(&self, x: Tensor<'a>) -> Tensor<'a> {
        let batch = x.shape()[0];
        let x = self.conv1.forward(x).relu().max_pool2d(Self::POOL);
        let x = self.conv2.forward(x).relu().max_pool2d(Self::POOL);
        let x = x.reshape(&[batch, self.flat_dim]);
        let x = self.fc1.forward(x).relu();
        self.fc2.forward(x)
    }

    /// Embeds both halves of a pair with the shared parameters.
    pub fn forward_pair(&self, x1: Tensor<'a>, x2: Tensor<'a>) -> (Tensor<'a>, Tensor<'a>) {
        (self.forward(x1), self.forward(x2))
    }

    /// Returns all trainable parameters from all layers.
    pub fn params(&self) -> Vec<Tensor<'a>> {
        let mut params = self.conv1.params();
        params.extend(self.conv2.params());
        params.extend(self.fc1.params());
        params.extend(self.fc2.params());
        params
    }
}
