use mixgrad::{Context, MoeLayer};

fn main() {
    let ctx = Context::new();
    let moe = MoeLayer::new(&ctx, 4, 2, 3);

    let x = ctx.tensor(&[1., 2., 3., 4.], &[1, 4]);
    let y = moe.forward(x);
    y.sum().backward();

    println!("{}", ctx);
}
