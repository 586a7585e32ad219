// Compares the analytic gradients of the affine layer against central finite
// differences of the loss L(Y) = 0.5 * sum(Y²), whose output derivative is Y.
// L is quadratic in every input and parameter, so central differences are
// exact up to rounding for any step size.

use affine_layer::{AffineTransform, optimization::TrainOptions};
use ndarray::{Array1, Array2, ArrayView2};

const STEP: f32 = 0.5;
const TOLERANCE: f64 = 1e-4;

fn layer() -> AffineTransform {
    let mut layer = AffineTransform::new(4, 3);
    let w = Array2::from_shape_fn((3, 4), |(i, j)| ((i * 4 + j) as f32 * 0.37).sin());
    let b = Array1::from_shape_fn(3, |i| 0.25 - 0.1 * i as f32);
    layer.set_weight(w.view()).unwrap();
    layer.set_bias(b.view()).unwrap();
    layer
}

fn input() -> Array2<f32> {
    Array2::from_shape_fn((2, 4), |(i, j)| ((i * 4 + j) as f32 * 0.71).cos())
}

fn loss(layer: &AffineTransform, x: ArrayView2<f32>) -> f64 {
    let y = layer.forward(x).unwrap();
    0.5 * y.iter().map(|&v| (v as f64).powi(2)).sum::<f64>()
}

fn assert_close(analytic: f32, numeric: f64, what: &str) {
    let analytic = analytic as f64;
    let scale = analytic.abs().max(numeric.abs()).max(1.0);
    let rel = (analytic - numeric).abs() / scale;
    assert!(
        rel < TOLERANCE,
        "{what}: analytic {analytic} vs numeric {numeric} (relative error {rel})"
    );
}

/// Runs forward and backward once and returns the input derivative.
fn analytic(layer: &mut AffineTransform, x: ArrayView2<f32>) -> Array2<f32> {
    let y = layer.forward(x).unwrap();
    layer
        .backward(x, y.view(), y.view(), &TrainOptions::new(0.1, 0.0))
        .unwrap()
}

#[test]
fn input_gradient_matches_finite_differences() {
    let mut layer = layer();
    let x = input();
    let dx = analytic(&mut layer, x.view());

    for ((i, j), &g) in dx.indexed_iter() {
        let mut plus = x.clone();
        plus[[i, j]] += STEP;
        let mut minus = x.clone();
        minus[[i, j]] -= STEP;

        let numeric =
            (loss(&layer, plus.view()) - loss(&layer, minus.view())) / (2. * STEP as f64);
        assert_close(g, numeric, &format!("dx[{i}, {j}]"));
    }
}

#[test]
fn weight_gradient_matches_finite_differences() {
    let mut layer = layer();
    let x = input();
    analytic(&mut layer, x.view());
    let grad = layer.weight_grad().to_owned();
    let w = layer.weight().to_owned();

    for ((i, j), &g) in grad.indexed_iter() {
        let mut probe = layer.clone();

        let mut plus = w.clone();
        plus[[i, j]] += STEP;
        probe.set_weight(plus.view()).unwrap();
        let l_plus = loss(&probe, x.view());

        let mut minus = w.clone();
        minus[[i, j]] -= STEP;
        probe.set_weight(minus.view()).unwrap();
        let l_minus = loss(&probe, x.view());

        assert_close(g, (l_plus - l_minus) / (2. * STEP as f64), &format!("dW[{i}, {j}]"));
    }
}

#[test]
fn bias_gradient_matches_finite_differences() {
    let mut layer = layer();
    let x = input();
    analytic(&mut layer, x.view());
    let grad = layer.bias_grad().to_owned();
    let b = layer.bias().to_owned();

    for (i, &g) in grad.indexed_iter() {
        let mut probe = layer.clone();

        let mut plus = b.clone();
        plus[i] += STEP;
        probe.set_bias(plus.view()).unwrap();
        let l_plus = loss(&probe, x.view());

        let mut minus = b.clone();
        minus[i] -= STEP;
        probe.set_bias(minus.view()).unwrap();
        let l_minus = loss(&probe, x.view());

        assert_close(g, (l_plus - l_minus) / (2. * STEP as f64), &format!("db[{i}]"));
    }
}

#[test]
fn clipping_bounds_every_gradient_entry() {
    let mut layer = layer();
    layer.set_max_grad(0.05);
    let x = input() * 10.;

    let opts = TrainOptions::new(0.1, 0.9);
    for _ in 0..3 {
        let y = layer.forward(x.view()).unwrap();
        layer.backward(x.view(), y.view(), y.view(), &opts).unwrap();

        assert!(layer.weight_grad().iter().all(|g| g.abs() <= 0.05));
        assert!(layer.bias_grad().iter().all(|g| g.abs() <= 0.05));
    }
}
