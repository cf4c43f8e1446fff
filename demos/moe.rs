use mixgrad::{Context, MoeLayer};
use rand::Rng;

fn main() {
    let ctx = Context::new();

    let input_dim = 10;
    let output_dim = 5;
    let num_experts = 2;
    let batch = 4;

    let moe = MoeLayer::new(&ctx, input_dim, output_dim, num_experts);

    let mut rng = rand::rng();
    let input_data: Vec<f32> = (0..batch * input_dim)
        .map(|_| rng.random::<f32>() - 0.5)
        .collect();
    let x = ctx.tensor(&input_data, &[batch, input_dim]);

    let weights = moe.gate_weights(x);
    let output = moe.forward(x);

    println!("Gate distribution per sample:");
    let w = weights.data();
    for b in 0..batch {
        let row: Vec<f32> = (0..num_experts).map(|e| w[[b, e]]).collect();
        let sum: f32 = row.iter().sum();
        println!("  sample {}: {:?} (sum = {:.6})", b, row, sum);
    }

    println!("\nMixed output shape: {:?}", output.shape());
    println!("{:?}", output.data());
}
