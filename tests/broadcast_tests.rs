use mixgrad::Context;

/// Tests for broadcasting support in the backward pass. When tensors of
/// different shapes are combined (a [batch, features] activation against a
/// [1, features] bias, or a [batch, 1] gate column against a [batch, out]
/// expert output), gradients must be summed back over the broadcast axes.

#[test]
fn test_add_broadcast_forward() {
    let ctx = Context::new();
    // [2, 3] + [1, 3] should broadcast
    let a = ctx.tensor(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let b = ctx.tensor(&[10.0, 20.0, 30.0], &[1, 3]);

    let c = a + b;
    assert_eq!(c.shape(), vec![2, 3]);
    assert_eq!(
        c.data().as_slice().unwrap(),
        &[11.0, 22.0, 33.0, 14.0, 25.0, 36.0]
    );
}

#[test]
fn test_add_broadcast_backward() {
    let ctx = Context::new();
    // Simulates: batch [2, 3] + bias [1, 3]
    let a = ctx.tensor(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let b = ctx.tensor(&[10.0, 20.0, 30.0], &[1, 3]);

    let c = a + b;
    let loss = c.sum();
    loss.backward();

    // grad_a should be all 1s (same shape as a)
    assert_eq!(a.grad().unwrap().shape(), &[2, 3]);
    assert_eq!(
        a.grad().unwrap().as_slice().unwrap(),
        &[1.0, 1.0, 1.0, 1.0, 1.0, 1.0]
    );

    // grad_b should be summed over the batch dimension: [2.0, 2.0, 2.0]
    assert_eq!(b.grad().unwrap().shape(), &[1, 3]);
    assert_eq!(b.grad().unwrap().as_slice().unwrap(), &[2.0, 2.0, 2.0]);
}

#[test]
fn test_sub_broadcast_backward() {
    let ctx = Context::new();
    // Simulates: batch [2, 3] - bias [1, 3]
    let a = ctx.tensor(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let b = ctx.tensor(&[10.0, 20.0, 30.0], &[1, 3]);

    let c = a - b;
    let loss = c.sum();
    loss.backward();

    // grad_a should be all 1s
    assert_eq!(a.grad().unwrap().shape(), &[2, 3]);
    assert_eq!(
        a.grad().unwrap().as_slice().unwrap(),
        &[1.0, 1.0, 1.0, 1.0, 1.0, 1.0]
    );

    // grad_b should be summed and negated: [-2.0, -2.0, -2.0]
    assert_eq!(b.grad().unwrap().shape(), &[1, 3]);
    assert_eq!(b.grad().unwrap().as_slice().unwrap(), &[-2.0, -2.0, -2.0]);
}

#[test]
fn test_mul_column_broadcast_forward() {
    let ctx = Context::new();
    // [2, 3] * [2, 1]: one scale factor per row, the MoE gating shape
    let a = ctx.tensor(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let w = ctx.tensor(&[2.0, 10.0], &[2, 1]);

    let c = w * a;
    assert_eq!(c.shape(), vec![2, 3]);
    assert_eq!(
        c.data().as_slice().unwrap(),
        &[2.0, 4.0, 6.0, 40.0, 50.0, 60.0]
    );
}

#[test]
fn test_mul_column_broadcast_backward() {
    let ctx = Context::new();
    let a = ctx.tensor(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let w = ctx.tensor(&[2.0, 10.0], &[2, 1]);

    let c = w * a;
    c.sum().backward();

    // grad_a = w broadcast across each row
    assert_eq!(a.grad().unwrap().shape(), &[2, 3]);
    assert_eq!(
        a.grad().unwrap().as_slice().unwrap(),
        &[2.0, 2.0, 2.0, 10.0, 10.0, 10.0]
    );

    // grad_w = row sums of a: [1+2+3, 4+5+6]
    assert_eq!(w.grad().unwrap().shape(), &[2, 1]);
    assert_eq!(w.grad().unwrap().as_slice().unwrap(), &[6.0, 15.0]);
}
