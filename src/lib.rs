pub mod data;
pub mod loss;
pub mod nn;
pub mod optim;
pub mod tensor;

pub use data::{PairBatch, random_pair_batch};
pub use loss::contrastive_loss;
pub use nn::{Conv2d, Linear, MoeLayer, SiameseConvNet};
pub use optim::sgd_step;
pub use tensor::{Context, Tensor, conv2d, matmul};
