//! End-to-end training without the classification-specific `Trainer`:
//! linear regression `y = 2*x1 + 3*x2 + 1 + noise`, fit by hand with
//! `Mse` + `Sgd`, exercising the same forward/backward/optimize pipeline
//! `Trainer` uses internally.

use rand::Rng;
use tensorlane::nn::{Linear, Mse, Module};
use tensorlane::optimizer::{Optimizer, Sgd, SgdConfig};
use tensorlane::{set_seed, with_rng, ExprNode, Shape, Tensor, Variable};

const TRUE_W: [f32; 2] = [2.0, 3.0];
const TRUE_B: f32 = 1.0;
const N_SAMPLES: usize = 100;
const EPOCHS: usize = 300;

fn make_dataset() -> Vec<(Tensor, Tensor)> {
    set_seed(42);
    let mut samples = Vec::with_capacity(N_SAMPLES);
    for _ in 0..N_SAMPLES {
        let (x1, x2, noise) = with_rng(|rng| {
            let x1 = rng.gen_range(-1.0f32..=1.0);
            let x2 = rng.gen_range(-1.0f32..=1.0);
            let noise = rng.gen_range(-0.05f32..=0.05);
            (x1, x2, noise)
        });
        let y = TRUE_W[0] * x1 + TRUE_W[1] * x2 + TRUE_B + noise;
        let input = Tensor::from_vec(Shape::new(vec![1, 2]).unwrap(), vec![x1, x2]).unwrap();
        let target = Tensor::from_vec(Shape::new(vec![1, 1]).unwrap(), vec![y]).unwrap();
        samples.push((input, target));
    }
    samples
}

fn run_epoch(model: &Linear, opt: &mut Sgd, samples: &[(Tensor, Tensor)]) -> f32 {
    let mut total = 0.0;
    for (x, y) in samples {
        let input = Variable::constant(x.clone());
        let expr = model.forward(ExprNode::leaf(input));
        let mse = Mse::new(&expr, y);
        total += mse.loss;

        for v in model.parameters() {
            v.zero_grad();
        }
        mse.backward();

        opt.step(&model.parameters(), 1).unwrap();
    }
    total / samples.len() as f32
}

#[test]
fn linear_regression_loss_decreases() {
    set_seed(123);
    let samples = make_dataset();

    let mut model = Linear::new(2, 1);
    model.init_xavier();
    let mut opt = Sgd::new(SgdConfig { lr: 0.05 });

    let first = run_epoch(&model, &mut opt, &samples);
    let mut last = first;
    for _ in 1..EPOCHS {
        last = run_epoch(&model, &mut opt, &samples);
    }

    assert!(last < first, "loss should decrease: initial {} final {}", first, last);
}

#[test]
fn linear_regression_recovers_true_weights() {
    set_seed(456);
    let samples = make_dataset();

    let mut model = Linear::new(2, 1);
    model.init_xavier();
    let mut opt = Sgd::new(SgdConfig { lr: 0.05 });

    for _ in 0..EPOCHS {
        run_epoch(&model, &mut opt, &samples);
    }

    let w0 = model.weight.tensor.index(&[0, 0]).unwrap();
    let w1 = model.weight.tensor.index(&[1, 0]).unwrap();
    let b0 = model.bias.tensor.index_flat(0).unwrap();

    assert!((w0 - TRUE_W[0]).abs() < 0.3, "weight[0] {} ~ {}", w0, TRUE_W[0]);
    assert!((w1 - TRUE_W[1]).abs() < 0.3, "weight[1] {} ~ {}", w1, TRUE_W[1]);
    assert!((b0 - TRUE_B).abs() < 0.3, "bias {} ~ {}", b0, TRUE_B);
}
