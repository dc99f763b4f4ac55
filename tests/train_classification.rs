//! End-to-end classification: MLP2 + softmax cross-entropy, driven through
//! `Trainer`, on a synthetic two-class 2-D dataset.

use rand::Rng;
use tensorlane::data::InMemoryDataset;
use tensorlane::optimizer::{Sgd, SgdConfig};
use tensorlane::train::{Trainer, TrainConfig};
use tensorlane::{set_seed, with_rng, Shape, Tensor, MLP2};

const N_SAMPLES: usize = 200;
const EPOCHS: usize = 40;

/// Class 0 clusters near (-1,-1), class 1 near (1,1).
fn make_dataset() -> InMemoryDataset {
    set_seed(42);
    let mut samples = Vec::with_capacity(N_SAMPLES);
    for _ in 0..N_SAMPLES {
        let (x1, x2, label) = with_rng(|rng| {
            let c: usize = rng.gen_range(0..2);
            let center = if c == 0 { -1.0 } else { 1.0 };
            let x1 = center + rng.gen_range(-0.4f32..0.4);
            let x2 = center + rng.gen_range(-0.4f32..0.4);
            (x1, x2, c)
        });
        let input = Tensor::from_vec(Shape::new(vec![2]).unwrap(), vec![x1, x2]).unwrap();
        samples.push((input, label));
    }
    InMemoryDataset::new(samples)
}

#[test]
fn mlp_classification_loss_decreases_and_fits() {
    set_seed(123);
    let dataset = make_dataset();

    let mut model = MLP2::new(2, 8, 2);
    model.init_he();

    let optimizer = Sgd::new(SgdConfig { lr: 0.2 });
    // Drop the learning rate partway through, exercising `Trainer::fit`'s
    // piecewise schedule alongside its epoch-driving loop.
    let config = TrainConfig { epochs: EPOCHS, batch_size: 16, lr_schedule: vec![(EPOCHS / 2, 0.05)] };
    let mut trainer = Trainer::new(model, optimizer, config);

    let epochs = trainer.fit(&dataset).unwrap();
    let first = epochs.first().copied().unwrap();
    let last = epochs.last().copied().unwrap();

    assert!(
        last.avg_loss < first.avg_loss,
        "cross-entropy loss should decrease: {} -> {}",
        first.avg_loss,
        last.avg_loss
    );
    assert!(last.accuracy > 0.9, "expected the MLP to separate well-clustered classes, got {}", last.accuracy);
}
