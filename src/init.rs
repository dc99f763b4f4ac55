//! Weight initializers: Xavier (Glorot) uniform and He normal. Pure
//! functions over the thread-local RNG in [`crate::runtime`]; deterministic
//! for a fixed seed.

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::runtime::with_rng;
use crate::shape::Shape;
use crate::tensor::{Float, Tensor};
use crate::variable::Variable;

/// Xavier (Glorot) uniform: scale = `sqrt(6 / (fan_in + fan_out))`, fan_in
/// and fan_out taken from the first two dimensions of a rank >= 2 shape.
/// Rank < 2 shapes are left zero-filled (no well-defined fan-in/fan-out).
pub fn xavier_uniform(shape: &Shape) -> Tensor {
    let dims = shape.dims();
    if dims.len() < 2 {
        return Tensor::zeros(shape.clone());
    }
    let fan_in = dims[0] as Float;
    let fan_out = dims[1] as Float;
    let scale = (6.0 / (fan_in + fan_out)).sqrt();
    fill_with(shape, |rng| rng.gen_range(-scale..=scale))
}

/// He-normal initializer: samples `N(0, sqrt(4 / fan_in))` per element.
/// Fan-in follows a rank-dependent rule: the sum of the first two dims for
/// rank 2 (in-features plus out-features of a linear weight laid out
/// `[in, out]`), the product of the last two for rank 3 (1-D conv kernel
/// `[Oc, Ic, K]`), the product of the last three for rank 4 (2-D conv
/// kernel `[Oc, Ic, Kh, Kw]`). Rank 0/1 (biases) are zero-initialized.
pub fn he_normal(shape: &Shape) -> Tensor {
    let dims = shape.dims();
    let fan_in = match dims.len() {
        0 | 1 => return Tensor::zeros(shape.clone()),
        2 => (dims[0] + dims[1]) as Float,
        3 => (dims[1] * dims[2]) as Float,
        _ => dims[dims.len() - 3..].iter().product::<usize>() as Float,
    };
    let std_dev = (4.0 / fan_in).sqrt();
    let normal = Normal::new(0.0, std_dev).expect("positive fan-in yields a valid std dev");
    fill_with(shape, |rng| normal.sample(rng))
}

fn fill_with(shape: &Shape, mut sample: impl FnMut(&mut rand::rngs::StdRng) -> Float) -> Tensor {
    let n = shape.size();
    let data: Vec<Float> = with_rng(|rng| (0..n).map(|_| sample(rng)).collect());
    Tensor::from_vec(shape.clone(), data).expect("generated buffer matches shape size")
}

/// Re-initialize a trainable [`Variable`]'s tensor in place with He-normal
/// values; the variable's gradient (if any) is left untouched.
pub fn he_init(var: &Variable) {
    let fresh = he_normal(var.tensor.shape());
    for i in 0..fresh.size() {
        var.tensor.set_unchecked(i, fresh.get_unchecked(i));
    }
    var.tensor.wrap_for_broadcasting();
}

/// Re-initialize a trainable [`Variable`]'s tensor in place with Xavier
/// uniform values.
pub fn xavier_init(var: &Variable) {
    let fresh = xavier_uniform(var.tensor.shape());
    for i in 0..fresh.size() {
        var.tensor.set_unchecked(i, fresh.get_unchecked(i));
    }
    var.tensor.wrap_for_broadcasting();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::set_seed;

    #[test]
    fn he_normal_zero_for_bias_rank() {
        set_seed(1);
        let t = he_normal(&Shape::new(vec![4]).unwrap());
        for i in 0..t.size() {
            assert_eq!(t.get_unchecked(i), 0.0);
        }
    }

    #[test]
    fn he_normal_nonzero_for_rank2() {
        set_seed(7);
        let t = he_normal(&Shape::new(vec![16, 32]).unwrap());
        let nonzero = (0..t.size()).any(|i| t.get_unchecked(i) != 0.0);
        assert!(nonzero, "He-normal fill should not all be zero");
    }

    #[test]
    fn xavier_uniform_within_bounds() {
        set_seed(3);
        let shape = Shape::new(vec![8, 8]).unwrap();
        let scale = (6.0f32 / 16.0).sqrt();
        let t = xavier_uniform(&shape);
        for i in 0..t.size() {
            let v = t.get_unchecked(i);
            assert!(v >= -scale && v <= scale);
        }
    }
}
