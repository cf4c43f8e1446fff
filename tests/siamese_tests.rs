use mixgrad::{Context, SiameseConvNet, contrastive_loss, random_pair_batch, sgd_step};

#[test]
fn test_embedding_shape() {
    let ctx = Context::new();
    let net = SiameseConvNet::new(&ctx, 1, 12, 12, 4);

    let pairs = random_pair_batch(&ctx, 3, 1, 12, 12);
    let (out1, out2) = net.forward_pair(pairs.first, pairs.second);

    assert_eq!(out1.shape(), vec![3, 4]);
    assert_eq!(out2.shape(), vec![3, 4]);
}

#[test]
fn test_branches_share_weights() {
    let ctx = Context::new();
    let net = SiameseConvNet::new(&ctx, 1, 12, 12, 4);

    let pixels: Vec<f32> = (0..144).map(|v| (v % 7) as f32 / 7.0).collect();
    let x1 = ctx.tensor(&pixels, &[1, 1, 12, 12]);
    let x2 = ctx.tensor(&pixels, &[1, 1, 12, 12]);

    // identical inputs through the shared parameters give bit-identical
    // embeddings
    let (out1, out2) = net.forward_pair(x1, x2);
    assert_eq!(out1.data(), out2.data());
}

#[test]
fn test_pair_batch_labels_are_binary() {
    let ctx = Context::new();
    let pairs = random_pair_batch(&ctx, 16, 1, 8, 8);

    assert_eq!(pairs.first.shape(), vec![16, 1, 8, 8]);
    assert_eq!(pairs.labels.shape(), vec![16, 1]);
    for &y in pairs.labels.data().iter() {
        assert!(y == 0.0 || y == 1.0, "label must be 0 or 1, got {}", y);
    }
}

#[test]
fn test_loss_zero_for_identical_same_pair() {
    let ctx = Context::new();
    let out1 = ctx.tensor(&[0.0; 4], &[1, 4]);
    let out2 = ctx.tensor(&[0.0; 4], &[1, 4]);
    let label = ctx.tensor(&[0.0], &[1, 1]);

    let loss = contrastive_loss(&ctx, out1, out2, label, 2.0);
    assert_eq!(loss.data()[[0]], 0.0);
}

#[test]
fn test_loss_margin_squared_for_identical_different_pair() {
    let ctx = Context::new();
    let out1 = ctx.tensor(&[0.0; 4], &[1, 4]);
    let out2 = ctx.tensor(&[0.0; 4], &[1, 4]);
    let label = ctx.tensor(&[1.0], &[1, 1]);

    // distance 0 with label 1 costs the full margin^2
    let loss = contrastive_loss(&ctx, out1, out2, label, 2.0);
    assert!((loss.data()[[0]] - 4.0).abs() < 1e-6);
}

#[test]
fn test_loss_zero_beyond_margin_for_different_pair() {
    let ctx = Context::new();
    let out1 = ctx.tensor(&[3.0, 0.0, 0.0, 0.0], &[1, 4]);
    let out2 = ctx.tensor(&[0.0; 4], &[1, 4]);
    let label = ctx.tensor(&[1.0], &[1, 1]);

    // distance 3 >= margin 2, so the hinge is floored at 0
    let loss = contrastive_loss(&ctx, out1, out2, label, 2.0);
    assert_eq!(loss.data()[[0]], 0.0);
}

#[test]
fn test_loss_monotone_in_distance() {
    let ctx = Context::new();

    let loss_at = |d: f32, label: f32| {
        let out1 = ctx.tensor(&[d, 0.0, 0.0], &[1, 3]);
        let out2 = ctx.tensor(&[0.0; 3], &[1, 3]);
        let y = ctx.tensor(&[label], &[1, 1]);
        contrastive_loss(&ctx, out1, out2, y, 2.0).data()[[0]]
    };

    // same-class loss grows with distance
    assert!(loss_at(0.5, 0.0) < loss_at(1.0, 0.0));
    assert!(loss_at(1.0, 0.0) < loss_at(1.5, 0.0));

    // different-class loss shrinks with distance until the margin floor
    assert!(loss_at(0.5, 1.0) > loss_at(1.0, 1.0));
    assert!(loss_at(1.0, 1.0) > loss_at(1.5, 1.0));
    assert_eq!(loss_at(2.5, 1.0), 0.0);
}

#[test]
fn test_loss_batch_mean() {
    let ctx = Context::new();
    // sample 0: same pair at distance 1 -> 1.0
    // sample 1: different pair at distance 0 -> margin^2 = 4.0
    let out1 = ctx.tensor(&[1.0, 0.0, 0.0, 0.0], &[2, 2]);
    let out2 = ctx.tensor(&[0.0, 0.0, 0.0, 0.0], &[2, 2]);
    let labels = ctx.tensor(&[0.0, 1.0], &[2, 1]);

    let loss = contrastive_loss(&ctx, out1, out2, labels, 2.0);
    assert!((loss.data()[[0]] - 2.5).abs() < 1e-6);
}

#[test]
fn test_training_reduces_loss() {
    let ctx = Context::new();

    let (channels, height, width) = (1, 12, 12);
    let net = SiameseConvNet::new(&ctx, channels, height, width, 4);

    // one fixed batch of pairs with fixed labels
    let pixels = channels * height * width;
    let first_data: Vec<f32> = (0..4 * pixels).map(|v| ((v * 13) % 17) as f32 / 17.0).collect();
    let second_data: Vec<f32> = (0..4 * pixels).map(|v| ((v * 7) % 19) as f32 / 19.0).collect();
    let first = ctx.tensor(&first_data, &[4, channels, height, width]);
    let second = ctx.tensor(&second_data, &[4, channels, height, width]);
    let labels = ctx.tensor(&[0.0, 1.0, 0.0, 1.0], &[4, 1]);
    let keep = ctx.len();

    let eval = || {
        let (out1, out2) = net.forward_pair(first, second);
        contrastive_loss(&ctx, out1, out2, labels, 2.0).data()[[0]]
    };

    let initial_loss = eval();
    ctx.prune(keep);

    for _ in 0..30 {
        ctx.zero_grad();
        let (out1, out2) = net.forward_pair(first, second);
        let loss = contrastive_loss(&ctx, out1, out2, labels, 2.0);
        loss.backward();
        sgd_step(&net.params(), 0.05);
        ctx.prune(keep);
    }

    let final_loss = eval();
    assert!(
        final_loss < initial_loss,
        "Loss should decrease after training: {} -> {}",
        initial_loss,
        final_loss
    );
}
