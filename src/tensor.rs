use std::{
    cell::RefCell,
    fmt,
    ops::{Add, Mul, Sub},
};

use ndarray::{ArrayD, Axis};

#[derive(Debug)]
pub struct Context {
    tensors: RefCell<Vec<TensorData>>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            tensors: RefCell::new(Vec::new()),
        }
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn zero_grad(&self) {
        for t in self.tensors.borrow_mut().iter_mut() {
            t.grad = None;
        }
    }

    /// Prune all tensors after the given index, keeping only the first `keep` tensors.
    /// Use this to remove intermediate computation tensors while preserving parameters.
    /// Returns the number of pruned tensors.
    pub fn prune(&self, keep: usize) -> usize {
        let mut tensors = self.tensors.borrow_mut();
        let old_len = tensors.len();
        tensors.truncate(keep);
        old_len - keep
    }

    /// Returns the current number of tensors in the arena.
    pub fn len(&self) -> usize {
        self.tensors.borrow().len()
    }

    /// Returns true if the arena contains no tensors.
    pub fn is_empty(&self) -> bool {
        self.tensors.borrow().is_empty()
    }

    pub fn tensor(&self, data: &[f32], shape: &[usize]) -> Tensor<'_> {
        let data = ArrayD::from_shape_vec(shape, data.to_vec()).unwrap();

        let idx = TensorIdx(self.tensors.borrow().len());
        self.tensors.borrow_mut().push(TensorData {
            data,
            grad: None,
            op: Op::None,
        });
        Tensor { idx, ctx: self }
    }

    fn backward(&self, idx: TensorIdx) {
        let mut tensors = self.tensors.borrow_mut();

        let shape = tensors[idx.0].data.shape().to_vec();
        tensors[idx.0].grad = Some(ArrayD::ones(shape));

        for i in (0..=idx.0).rev() {
            let grad = tensors[i].grad.clone();
            if let Some(grad) = grad {
                match tensors[i].op.clone() {
                    Op::None => {}
                    Op::Add(a, b) => {
                        let a_delta = reduce_to_shape(grad.clone(), tensors[a.0].data.shape());
                        let b_delta = reduce_to_shape(grad, tensors[b.0].data.shape());
                        accumulate(&mut tensors[a.0].grad, a_delta);
                        accumulate(&mut tensors[b.0].grad, b_delta);
                    }
                    Op::Sub(a, b) => {
                        let a_delta = reduce_to_shape(grad.clone(), tensors[a.0].data.shape());
                        let b_delta = reduce_to_shape(grad.mapv(|x| -x), tensors[b.0].data.shape());
                        accumulate(&mut tensors[a.0].grad, a_delta);
                        accumulate(&mut tensors[b.0].grad, b_delta);
                    }
                    Op::Mul(a, b) => {
                        // grad_a = grad * b and grad_b = grad * a, each summed
                        // back over any broadcast axes
                        let a_raw = broadcast_mul(&tensors[b.0].data, &grad);
                        let b_raw = broadcast_mul(&tensors[a.0].data, &grad);
                        let a_delta = reduce_to_shape(a_raw, tensors[a.0].data.shape());
                        let b_delta = reduce_to_shape(b_raw, tensors[b.0].data.shape());
                        accumulate(&mut tensors[a.0].grad, a_delta);
                        accumulate(&mut tensors[b.0].grad, b_delta);
                    }
                    Op::MatMul(a, b) => {
                        let grad_2d = grad.view().into_dimensionality::<ndarray::Ix2>().unwrap();
                        let a_2d = tensors[a.0]
                            .data
                            .view()
                            .into_dimensionality::<ndarray::Ix2>()
                            .unwrap();
                        let b_2d = tensors[b.0]
                            .data
                            .view()
                            .into_dimensionality::<ndarray::Ix2>()
                            .unwrap();

                        // grad_A = grad_C @ B^T
                        let a_delta = grad_2d.dot(&b_2d.t()).into_dyn();
                        // grad_B = A^T @ grad_C
                        let b_delta = a_2d.t().dot(&grad_2d).into_dyn();

                        accumulate(&mut tensors[a.0].grad, a_delta);
                        accumulate(&mut tensors[b.0].grad, b_delta);
                    }
                    Op::ReLU(a) => {
                        let a_delta =
                            &tensors[a.0].data.mapv(|x| if x > 0.0 { 1.0 } else { 0.0 }) * &grad;
                        accumulate(&mut tensors[a.0].grad, a_delta);
                    }
                    Op::Sum(a) => {
                        // grad is a scalar, distributed to all elements
                        let scalar = grad[[0]];
                        let a_shape = tensors[a.0].data.shape().to_vec();
                        accumulate(&mut tensors[a.0].grad, ArrayD::from_elem(a_shape, scalar));
                    }
                    Op::SumAxis(a, _axis) => {
                        // grad kept the reduced axis with size 1, so it
                        // broadcasts straight back to the input shape
                        let a_shape = tensors[a.0].data.shape().to_vec();
                        let a_delta = grad.broadcast(a_shape).unwrap().to_owned();
                        accumulate(&mut tensors[a.0].grad, a_delta);
                    }
                    Op::Mean(a, n) => {
                        // grad is a scalar, distributed to all elements divided by n
                        let scalar = grad[[0]] / n as f32;
                        let a_shape = tensors[a.0].data.shape().to_vec();
                        accumulate(&mut tensors[a.0].grad, ArrayD::from_elem(a_shape, scalar));
                    }
                    Op::Pow(a, exp) => {
                        // d/dx(x^n) = n * x^(n-1)
                        let a_delta = &tensors[a.0].data.mapv(|x| exp * x.powf(exp - 1.0)) * &grad;
                        accumulate(&mut tensors[a.0].grad, a_delta);
                    }
                    Op::Softmax(a) => {
                        // softmax backward: grad_input = softmax * (grad - sum(grad * softmax))
                        let softmax_out = &tensors[i].data;
                        let shape = softmax_out.shape();
                        let rows = shape[0];
                        let cols = shape[1];
                        let mut a_delta = softmax_out.clone();

                        for row in 0..rows {
                            // sum(grad * softmax) for this row
                            let dot: f32 = (0..cols)
                                .map(|j| grad[[row, j]] * softmax_out[[row, j]])
                                .sum();
                            for j in 0..cols {
                                a_delta[[row, j]] = softmax_out[[row, j]] * (grad[[row, j]] - dot);
                            }
                        }

                        accumulate(&mut tensors[a.0].grad, a_delta);
                    }
                    Op::SelectCol(a, col) => {
                        // scatter the [rows, 1] grad back into the selected column
                        let a_shape = tensors[a.0].data.shape().to_vec();
                        let rows = a_shape[0];
                        let mut a_delta = ArrayD::zeros(a_shape);
                        for row in 0..rows {
                            a_delta[[row, col]] = grad[[row, 0]];
                        }
                        accumulate(&mut tensors[a.0].grad, a_delta);
                    }
                    Op::Reshape(a) => {
                        let a_shape = tensors[a.0].data.shape().to_vec();
                        let a_delta = grad.into_shape_with_order(a_shape).unwrap();
                        accumulate(&mut tensors[a.0].grad, a_delta);
                    }
                    Op::Conv2d(x, w, b) => {
                        let (x_delta, w_delta, b_delta) =
                            conv2d_backward(&tensors[x.0].data, &tensors[w.0].data, &grad);
                        accumulate(&mut tensors[x.0].grad, x_delta);
                        accumulate(&mut tensors[w.0].grad, w_delta);
                        accumulate(&mut tensors[b.0].grad, b_delta);
                    }
                    Op::MaxPool2d(a, k) => {
                        // route each window's grad to its argmax, recomputed
                        // from the input
                        let input = &tensors[a.0].data;
                        let shape = input.shape();
                        let (batch, chans) = (shape[0], shape[1]);
                        let g_shape = grad.shape();
                        let (out_h, out_w) = (g_shape[2], g_shape[3]);
                        let mut a_delta = ArrayD::zeros(shape.to_vec());

                        for n in 0..batch {
                            for c in 0..chans {
                                for oh in 0..out_h {
                                    for ow in 0..out_w {
                                        let mut best = (oh * k, ow * k);
                                        let mut best_val = f32::NEG_INFINITY;
                                        for kh in 0..k {
                                            for kw in 0..k {
                                                let (ih, iw) = (oh * k + kh, ow * k + kw);
                                                let v = input[[n, c, ih, iw]];
                                                if v > best_val {
                                                    best_val = v;
                                                    best = (ih, iw);
                                                }
                                            }
                                        }
                                        a_delta[[n, c, best.0, best.1]] += grad[[n, c, oh, ow]];
                                    }
                                }
                            }
                        }

                        accumulate(&mut tensors[a.0].grad, a_delta);
                    }
                }
            }
        }
    }
}

/// Adds `delta` into a gradient slot, initializing the slot if empty.
fn accumulate(slot: &mut Option<ArrayD<f32>>, delta: ArrayD<f32>) {
    if let Some(ref mut g) = slot {
        *g += &delta;
    } else {
        *slot = Some(delta);
    }
}

/// Elementwise product where one operand may need broadcasting to the other's
/// shape (e.g. a [batch, 1] gate column against a [batch, out] tensor).
fn broadcast_mul(a: &ArrayD<f32>, b: &ArrayD<f32>) -> ArrayD<f32> {
    if a.shape() == b.shape() {
        a * b
    } else if a.len() >= b.len() {
        a * &b.broadcast(a.shape().to_vec()).unwrap().to_owned()
    } else {
        &a.broadcast(b.shape().to_vec()).unwrap().to_owned() * b
    }
}

/// Reduces `grad` back to `shape` by summing over every axis that was
/// broadcast (size 1 in the target but larger in the gradient).
fn reduce_to_shape(grad: ArrayD<f32>, shape: &[usize]) -> ArrayD<f32> {
    if grad.shape() == shape {
        return grad;
    }
    let mut reduced = grad;
    for (axis, &target) in shape.iter().enumerate() {
        if target == 1 && reduced.shape()[axis] != 1 {
            reduced = reduced.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        }
    }
    reduced
}

fn conv2d_backward(
    input: &ArrayD<f32>,
    weight: &ArrayD<f32>,
    grad: &ArrayD<f32>,
) -> (ArrayD<f32>, ArrayD<f32>, ArrayD<f32>) {
    let in_shape = input.shape();
    let w_shape = weight.shape();
    let (batch, in_ch) = (in_shape[0], in_shape[1]);
    let (out_ch, kernel) = (w_shape[0], w_shape[2]);
    let g_shape = grad.shape();
    let (out_h, out_w) = (g_shape[2], g_shape[3]);

    let mut x_delta = ArrayD::zeros(in_shape.to_vec());
    let mut w_delta = ArrayD::zeros(w_shape.to_vec());
    let mut b_delta = ArrayD::zeros(vec![out_ch]);

    for n in 0..batch {
        for oc in 0..out_ch {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let g = grad[[n, oc, oh, ow]];
                    b_delta[[oc]] += g;
                    for ic in 0..in_ch {
                        for kh in 0..kernel {
                            for kw in 0..kernel {
                                let (ih, iw) = (oh + kh, ow + kw);
                                x_delta[[n, ic, ih, iw]] += g * weight[[oc, ic, kh, kw]];
                                w_delta[[oc, ic, kh, kw]] += g * input[[n, ic, ih, iw]];
                            }
                        }
                    }
                }
            }
        }
    }

    (x_delta, w_delta, b_delta)
}

#[derive(Debug, Clone, Copy)]
struct TensorIdx(usize);

#[derive(Debug, Clone, Copy)]
pub struct Tensor<'a> {
    idx: TensorIdx,
    ctx: &'a Context,
}

#[derive(Debug, Clone)]
enum Op {
    None,
    Add(TensorIdx, TensorIdx),
    Sub(TensorIdx, TensorIdx),
    Mul(TensorIdx, TensorIdx),
    MatMul(TensorIdx, TensorIdx),
    ReLU(TensorIdx),
    Sum(TensorIdx),
    SumAxis(TensorIdx, usize), // reduced axis is kept with size 1
    Mean(TensorIdx, usize),    // stores input idx and number of elements
    Pow(TensorIdx, f32),
    Softmax(TensorIdx), // row-wise softmax
    SelectCol(TensorIdx, usize),
    Reshape(TensorIdx),
    Conv2d(TensorIdx, TensorIdx, TensorIdx), // input, weight, bias
    MaxPool2d(TensorIdx, usize),             // square window, stride = window
}

#[derive(Debug)]
struct TensorData {
    data: ArrayD<f32>,
    grad: Option<ArrayD<f32>>,
    op: Op,
}

impl<'a> Tensor<'a> {
    pub fn shape(&self) -> Vec<usize> {
        self.ctx.tensors.borrow()[self.idx.0].data.shape().to_vec()
    }

    pub fn backward(&self) {
        self.ctx.backward(self.idx);
    }

    fn push(&self, data: ArrayD<f32>, op: Op) -> Tensor<'a> {
        let mut tensors = self.ctx.tensors.borrow_mut();
        let idx = TensorIdx(tensors.len());
        tensors.push(TensorData {
            data,
            grad: None,
            op,
        });
        Tensor { idx, ctx: self.ctx }
    }

    pub fn relu(&self) -> Tensor<'a> {
        let result_data = {
            let tensors = self.ctx.tensors.borrow();
            tensors[self.idx.0].data.mapv(|x| x.max(0.0))
        };
        self.push(result_data, Op::ReLU(self.idx))
    }

    pub fn sum(&self) -> Tensor<'a> {
        let result_data = {
            let tensors = self.ctx.tensors.borrow();
            let sum = tensors[self.idx.0].data.sum();
            ArrayD::from_elem(vec![1], sum)
        };
        self.push(result_data, Op::Sum(self.idx))
    }

    /// Sums along one axis, keeping it with size 1 (e.g. [batch, features]
    /// -> [batch, 1] for per-sample reductions).
    pub fn sum_axis(&self, axis: usize) -> Tensor<'a> {
        let result_data = {
            let tensors = self.ctx.tensors.borrow();
            tensors[self.idx.0]
                .data
                .sum_axis(Axis(axis))
                .insert_axis(Axis(axis))
        };
        self.push(result_data, Op::SumAxis(self.idx, axis))
    }

    pub fn mean(&self) -> Tensor<'a> {
        let (result_data, n) = {
            let tensors = self.ctx.tensors.borrow();
            let data = &tensors[self.idx.0].data;
            let n = data.len();
            let mean = data.sum() / n as f32;
            (ArrayD::from_elem(vec![1], mean), n)
        };
        self.push(result_data, Op::Mean(self.idx, n))
    }

    pub fn pow(&self, exp: f32) -> Tensor<'a> {
        let result_data = {
            let tensors = self.ctx.tensors.borrow();
            tensors[self.idx.0].data.mapv(|x| x.powf(exp))
        };
        self.push(result_data, Op::Pow(self.idx, exp))
    }

    /// Row-wise softmax: softmax(x)_ij = exp(x_ij) / sum_k(exp(x_ik))
    pub fn softmax(&self) -> Tensor<'a> {
        let result_data = {
            let tensors = self.ctx.tensors.borrow();
            let data = &tensors[self.idx.0].data;
            // Numerically stable softmax: subtract max per row
            let shape = data.shape();
            let rows = shape[0];
            let cols = shape[1];
            let mut result = data.clone();
            for i in 0..rows {
                let row_max = (0..cols)
                    .map(|j| result[[i, j]])
                    .fold(f32::NEG_INFINITY, f32::max);
                let mut row_sum = 0.0;
                for j in 0..cols {
                    result[[i, j]] = (result[[i, j]] - row_max).exp();
                    row_sum += result[[i, j]];
                }
                for j in 0..cols {
                    result[[i, j]] /= row_sum;
                }
            }
            result
        };
        self.push(result_data, Op::Softmax(self.idx))
    }

    /// Extracts one column of a 2D tensor as a [rows, 1] tensor.
    pub fn select_col(&self, col: usize) -> Tensor<'a> {
        let result_data = {
            let tensors = self.ctx.tensors.borrow();
            let data = tensors[self.idx.0]
                .data
                .view()
                .into_dimensionality::<ndarray::Ix2>()
                .unwrap();
            data.column(col).to_owned().insert_axis(Axis(1)).into_dyn()
        };
        self.push(result_data, Op::SelectCol(self.idx, col))
    }

    /// Reshapes to a new shape with the same number of elements.
    pub fn reshape(&self, shape: &[usize]) -> Tensor<'a> {
        let result_data = {
            let tensors = self.ctx.tensors.borrow();
            tensors[self.idx.0]
                .data
                .clone()
                .into_shape_with_order(shape.to_vec())
                .unwrap()
        };
        self.push(result_data, Op::Reshape(self.idx))
    }

    /// Non-overlapping max pooling over square windows of side `k` on a
    /// [batch, channels, h, w] tensor. Trailing rows/cols that do not fill
    /// a window are dropped.
    pub fn max_pool2d(&self, k: usize) -> Tensor<'a> {
        let result_data = {
            let tensors = self.ctx.tensors.borrow();
            let data = &tensors[self.idx.0].data;
            let shape = data.shape();
            let (batch, chans, h, w) = (shape[0], shape[1], shape[2], shape[3]);
            let (out_h, out_w) = (h / k, w / k);
            let mut result = ArrayD::zeros(vec![batch, chans, out_h, out_w]);
            for n in 0..batch {
                for c in 0..chans {
                    for oh in 0..out_h {
                        for ow in 0..out_w {
                            let mut best = f32::NEG_INFINITY;
                            for kh in 0..k {
                                for kw in 0..k {
                                    best = best.max(data[[n, c, oh * k + kh, ow * k + kw]]);
                                }
                            }
                            result[[n, c, oh, ow]] = best;
                        }
                    }
                }
            }
            result
        };
        self.push(result_data, Op::MaxPool2d(self.idx, k))
    }

    pub fn data(&self) -> ArrayD<f32> {
        self.ctx.tensors.borrow()[self.idx.0].data.clone()
    }

    pub fn grad(&self) -> Option<ArrayD<f32>> {
        self.ctx.tensors.borrow()[self.idx.0].grad.clone()
    }

    pub fn set_data(&self, data: ArrayD<f32>) {
        self.ctx.tensors.borrow_mut()[self.idx.0].data = data;
    }
}

impl<'a> Add for Tensor<'a> {
    type Output = Tensor<'a>;

    fn add(self, rhs: Self) -> Self::Output {
        let result_data = {
            let tensors = self.ctx.tensors.borrow();
            &tensors[self.idx.0].data + &tensors[rhs.idx.0].data
        };
        self.push(result_data, Op::Add(self.idx, rhs.idx))
    }
}

impl<'a> Sub for Tensor<'a> {
    type Output = Tensor<'a>;

    fn sub(self, rhs: Self) -> Self::Output {
        let result_data = {
            let tensors = self.ctx.tensors.borrow();
            &tensors[self.idx.0].data - &tensors[rhs.idx.0].data
        };
        self.push(result_data, Op::Sub(self.idx, rhs.idx))
    }
}

impl<'a> Mul for Tensor<'a> {
    type Output = Tensor<'a>;

    fn mul(self, rhs: Self) -> Self::Output {
        let result_data = {
            let tensors = self.ctx.tensors.borrow();
            broadcast_mul(&tensors[self.idx.0].data, &tensors[rhs.idx.0].data)
        };
        self.push(result_data, Op::Mul(self.idx, rhs.idx))
    }
}

pub fn matmul<'a>(a: Tensor<'a>, b: Tensor<'a>) -> Tensor<'a> {
    let result_data = {
        let tensors = a.ctx.tensors.borrow();
        let a_2d = tensors[a.idx.0]
            .data
            .view()
            .into_dimensionality::<ndarray::Ix2>()
            .unwrap();
        let b_2d = tensors[b.idx.0]
            .data
            .view()
            .into_dimensionality::<ndarray::Ix2>()
            .unwrap();
        a_2d.dot(&b_2d).into_dyn()
    };
    a.push(result_data, Op::MatMul(a.idx, b.idx))
}

/// 2D convolution, stride 1, no padding. `x` is [batch, in_ch, h, w],
/// `weight` is [out_ch, in_ch, k, k], `bias` is [out_ch].
pub fn conv2d<'a>(x: Tensor<'a>, weight: Tensor<'a>, bias: Tensor<'a>) -> Tensor<'a> {
    let result_data = {
        let tensors = x.ctx.tensors.borrow();
        let input = &tensors[x.idx.0].data;
        let w = &tensors[weight.idx.0].data;
        let b = &tensors[bias.idx.0].data;

        let in_shape = input.shape();
        let w_shape = w.shape();
        let (batch, in_ch, h, width) = (in_shape[0], in_shape[1], in_shape[2], in_shape[3]);
        let (out_ch, kernel) = (w_shape[0], w_shape[2]);
        let (out_h, out_w) = (h - kernel + 1, width - kernel + 1);

        let mut result = ArrayD::zeros(vec![batch, out_ch, out_h, out_w]);
        for n in 0..batch {
            for oc in 0..out_ch {
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        let mut val = b[[oc]];
                        for ic in 0..in_ch {
                            for kh in 0..kernel {
                                for kw in 0..kernel {
                                    val += input[[n, ic, oh + kh, ow + kw]] * w[[oc, ic, kh, kw]];
                                }
                            }
                        }
                        result[[n, oc, oh, ow]] = val;
                    }
                }
            }
        }
        result
    };
    x.push(result_data, Op::Conv2d(x.idx, weight.idx, bias.idx))
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tensors = self.tensors.borrow();
        for (i, t) in tensors.iter().enumerate() {
            writeln!(f, "Tensor {}", i)?;
            writeln!(f, "  data:  {:?}", t.data)?;
            if let Some(ref g) = t.grad {
                writeln!(f, "  grad:  {:?}", g)?;
            }
            writeln!(f, "  op:    {:?}", t.op)?;
        }
        Ok(())
    }
}
