// Integration tests for the wren facade: Model, CompiledModel and fit()

use rand::rngs::StdRng;
use rand::SeedableRng;

use wren::optim::AdamConfig;
use wren::prelude::*;
use wren::Allocator;

// Linear model x . w + b with zero-initialized parameters.
fn linear(inputs: usize, outputs: usize) -> (Model, NodeId, NodeId) {
    let mut g = Graph::new();
    let x = g.named_placeholder("x");
    let w = g.variable(Tensor::zeros((inputs, outputs)));
    let b = g.variable(Tensor::zeros(outputs));
    let xw = g.matmul(x, w);
    let y = g.add(xw, b);
    (Model::new(g, x, y), w, b)
}

// 64 samples of y = x . [1, -2, 0.5] + 0.3
fn regression_data() -> Result<(Tensor, Tensor)> {
    let mut rng = StdRng::seed_from_u64(11);
    let x = Tensor::normal((64, 3), 0.0, 1.0, &mut rng)?;
    let w = Tensor::from_vec(vec![1.0, -2.0, 0.5], (3, 1))?;
    let y = x.matmul(&w)?.add_scalar(0.3);
    Ok((x, y))
}

// Adam steps by learning_rate / batch_size, so callers pass a rate sized
// for the batches they train on.
fn regression_model(learning_rate: f32) -> CompiledModel<Adam> {
    let (model, _, _) = linear(3, 1);
    model.compile(
        mean_squared_error,
        Adam::with_config(AdamConfig::default().with_learning_rate(learning_rate)),
    )
}

#[test]
fn test_predict() -> Result<()> {
    let mut g = Graph::new();
    let x = g.placeholder();
    let w = g.variable(Tensor::from_vec(vec![1.0, 2.0], (2, 1))?);
    let y = g.matmul(x, w);
    let mut model = Model::new(g, x, y);

    let out = model.predict(&Tensor::from_vec(vec![1.0, 1.0, 0.0, 3.0], (2, 2))?)?;
    assert_eq!(out.dims(), &[2, 1]);
    assert_eq!(out.to_vec(), vec![3.0, 6.0]);

    // predict rebinds; a second call sees the new input
    let out = model.predict(&Tensor::zeros((1, 2)))?;
    assert_eq!(out.to_vec(), vec![0.0]);
    Ok(())
}

#[test]
fn test_train_on_batch_reduces_loss() -> Result<()> {
    let (x, y) = regression_data()?;
    let mut model = regression_model(3.2);
    let first = model.train_on_batch(&x, &y)?;
    let mut last = first;
    for _ in 0..200 {
        last = model.train_on_batch(&x, &y)?;
    }
    assert!(last < first * 0.1, "first {first}, last {last}");
    Ok(())
}

#[test]
fn test_fit_with_validation_split() -> Result<()> {
    let (x, y) = regression_data()?;
    let mut model = regression_model(0.8);
    let config = FitConfig::default()
        .with_batch_size(16)
        .with_epochs(100)
        .with_validation_split(0.25)
        .with_seed(3);
    let history = model.fit(&x, &y, &config)?;

    assert_eq!(history.len(), 100);
    assert_eq!(history.val_losses().len(), 100);
    let first = history.epochs[0];
    let last = *history.last().unwrap();
    assert!(last.loss < first.loss * 0.1, "{history}");
    assert!(last.val_loss.unwrap() < first.val_loss.unwrap());
    Ok(())
}

#[test]
fn test_fit_without_split_has_no_val_loss() -> Result<()> {
    let (x, y) = regression_data()?;
    let mut model = regression_model(1.6);
    let history = model.fit(&x, &y, &FitConfig::default().with_batch_size(32).with_epochs(2))?;
    assert!(history.epochs.iter().all(|e| e.val_loss.is_none()));
    Ok(())
}

#[test]
fn test_fit_is_reproducible_with_seed() -> Result<()> {
    let (x, y) = regression_data()?;
    let config = FitConfig::default()
        .with_batch_size(8)
        .with_epochs(5)
        .with_seed(42);
    let a = regression_model(0.4).fit(&x, &y, &config)?;
    let b = regression_model(0.4).fit(&x, &y, &config)?;
    assert_eq!(a.losses(), b.losses());
    Ok(())
}

#[test]
fn test_fit_rejects_bad_config() -> Result<()> {
    let (x, y) = regression_data()?;
    let mut model = regression_model(0.4);
    assert!(model
        .fit(&x, &y, &FitConfig::default().with_batch_size(128))
        .is_err());
    assert!(model
        .fit(&x, &y, &FitConfig::default().with_validation_split(1.5))
        .is_err());
    // two batches, a 0.9 split leaves none to train on
    assert!(model
        .fit(
            &x,
            &y,
            &FitConfig::default().with_batch_size(32).with_validation_split(0.9)
        )
        .is_err());
    Ok(())
}

#[test]
fn test_evaluate_uses_full_batches() -> Result<()> {
    let mut g = Graph::new();
    let x = g.placeholder();
    let w = g.variable(Tensor::ones((2, 1)));
    let y = g.matmul(x, w);
    let mut model = Model::new(g, x, y).compile(mean_squared_error, Sgd::new(0.1));

    // predictions 1, 1, 2, 2 against zero targets
    let xs = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 0.0], (4, 2))?;
    let ys = Tensor::zeros((4, 1));
    assert!((model.evaluate(&xs, &ys, 2)? - 2.5).abs() < 1e-6);
    // the fourth sample does not fill a batch of 3
    assert!((model.evaluate(&xs, &ys, 3)? - 2.0).abs() < 1e-6);
    // evaluating never updates
    assert_eq!(model.model().graph().get_variable(w)?.data().to_vec(), vec![1.0, 1.0]);
    Ok(())
}

#[test]
fn test_classification_with_cross_entropy() -> Result<()> {
    let xs = Tensor::from_vec(
        vec![-2.0, -1.0, -1.0, -2.0, -1.5, -1.5, 2.0, 1.0, 1.0, 2.0, 1.5, 1.5],
        (6, 2),
    )?;
    let ys = Tensor::from_vec(
        vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0],
        (6, 2),
    )?;
    let (model, _, _) = linear(2, 2);
    // 0.1 per step at a batch of six
    let mut model = model.compile(cross_entropy, Adam::new(0.6));

    let first = model.train_on_batch(&xs, &ys)?;
    assert!((first - 2f32.ln()).abs() < 1e-5);
    let mut last = first;
    for _ in 0..100 {
        last = model.train_on_batch(&xs, &ys)?;
    }
    assert!(last < 0.1, "loss {last}");

    let logits = model.predict(&xs)?;
    for (row, target) in logits.as_slice().chunks(2).zip(ys.as_slice().chunks(2)) {
        assert_eq!(row[1] > row[0], target[1] > target[0]);
    }
    Ok(())
}

#[test]
fn test_checkpoint_restores_predictions() -> Result<()> {
    let (x, y) = regression_data()?;
    let mut trained = regression_model(3.2);
    for _ in 0..20 {
        trained.train_on_batch(&x, &y)?;
    }
    let expected = trained.predict(&x)?;

    let path = std::env::temp_dir().join("wren_model_checkpoint.txt");
    trained.model().save_variables(&path)?;

    let (mut fresh, _, _) = linear(3, 1);
    fresh.load_variables(&path)?;
    std::fs::remove_file(&path)?;
    assert!(fresh.predict(&x)?.max_abs_diff(&expected)? < 1e-5);
    Ok(())
}

#[test]
fn test_cached_allocator_session() -> Result<()> {
    let pool = CachedAllocator::new();
    let (model, _, _) = linear(3, 1);
    let mut model = model
        .with_session_config(SessionConfig::default().with_allocator(Allocator::Cached(pool.clone())))
        .compile(mean_squared_error, Sgd::new(0.1));
    let (x, y) = regression_data()?;
    for _ in 0..5 {
        model.train_on_batch(&x, &y)?;
    }
    assert!(pool.stats().hits > 0);
    Ok(())
}
