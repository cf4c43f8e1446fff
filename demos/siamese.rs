use mixgrad::{Context, SiameseConvNet, contrastive_loss, random_pair_batch, sgd_step};

fn main() {
    let ctx = Context::new();

    let (channels, height, width) = (1, 16, 16);
    let embed_dim = 8;
    let batch = 8;
    let batches_per_epoch = 5;
    let margin = 2.0;
    let lr = 0.01;

    let net = SiameseConvNet::new(&ctx, channels, height, width, embed_dim);
    let params_count = ctx.len();

    for epoch in 0..10 {
        let mut total_loss = 0.0;

        for _ in 0..batches_per_epoch {
            ctx.zero_grad();

            let pairs = random_pair_batch(&ctx, batch, channels, height, width);
            let (out1, out2) = net.forward_pair(pairs.first, pairs.second);
            let loss = contrastive_loss(&ctx, out1, out2, pairs.labels, margin);
            total_loss += loss.data()[[0]];

            loss.backward();
            sgd_step(&net.params(), lr);

            // drop this batch's intermediate tensors, keep the parameters
            ctx.prune(params_count);
        }

        println!(
            "Epoch {}: loss = {:.4}",
            epoch,
            total_loss / batches_per_epoch as f32
        );
    }
}
