//! Save/load a state dict: init a model, save it, load into a fresh model,
//! and check the two produce identical forward output.

use tensorlane::{load_state_dict, save_state_dict, set_seed, ExprNode, Linear, Module, Shape, Tensor, Variable};

#[test]
fn linear_state_dict_roundtrips_forward_output() {
    set_seed(99);

    let mut model = Linear::new(2, 1);
    model.init_xavier();

    let x = Tensor::from_vec(Shape::new(vec![1, 2]).unwrap(), vec![1.0, 2.0]).unwrap();
    let input = Variable::constant(x.clone());
    let before = model.forward(ExprNode::leaf(input)).eval();

    let path = std::env::temp_dir().join("tensorlane_state_dict_roundtrip.json");
    save_state_dict(&path, &vec![("weight", &model.weight), ("bias", &model.bias)]).unwrap();

    let model2 = Linear::new(2, 1);
    load_state_dict(&path, &vec![("weight", &model2.weight), ("bias", &model2.bias)]).unwrap();

    let input2 = Variable::constant(x);
    let after = model2.forward(ExprNode::leaf(input2)).eval();

    assert_eq!(before.size(), after.size());
    for i in 0..before.size() {
        assert!(
            (before.get_unchecked(i) - after.get_unchecked(i)).abs() < 1e-5,
            "forward mismatch at {}: {} vs {}",
            i,
            before.get_unchecked(i),
            after.get_unchecked(i)
        );
    }

    std::fs::remove_file(&path).ok();
}

#[test]
fn missing_variable_in_checkpoint_is_an_error() {
    let model = Linear::new(2, 1);
    let path = std::env::temp_dir().join("tensorlane_state_dict_missing.json");
    save_state_dict(&path, &vec![("weight", &model.weight)]).unwrap();

    let model2 = Linear::new(2, 1);
    let err = load_state_dict(&path, &vec![("weight", &model2.weight), ("bias", &model2.bias)]).unwrap_err();
    assert!(matches!(err, tensorlane::StateIoError::MissingVariable(_)));

    std::fs::remove_file(&path).ok();
}
