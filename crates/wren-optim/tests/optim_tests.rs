// Integration tests for wren-optim

use rand::rngs::StdRng;
use rand::SeedableRng;

use wren_core::{Error, Result, Tensor};
use wren_graph::{Graph, NodeId, Session, Variable};
use wren_optim::{Adagrad, Adam, AdamConfig, Optimizer, RmsProp, Sgd};

struct Regression {
    graph: Graph,
    session: Session,
    loss: NodeId,
    weights: NodeId,
    bias: NodeId,
}

// y = x . [1, -2, 0.5] + 0.3, fitted by mean squared error
fn regression(samples: usize) -> Result<Regression> {
    let mut rng = StdRng::seed_from_u64(17);
    let x = Tensor::normal((samples, 3), 0.0, 1.0, &mut rng)?;
    let true_w = Tensor::from_vec(vec![1.0, -2.0, 0.5], (3, 1))?;
    let y = x.matmul(&true_w)?.add_scalar(0.3);

    let mut graph = Graph::new();
    let xs = graph.placeholder();
    let ys = graph.placeholder();
    let weights = graph.variable(Tensor::zeros((3, 1)));
    let bias = graph.variable(Tensor::zeros(1));
    let xw = graph.matmul(xs, weights);
    let pred = graph.add(xw, bias);
    let diff = graph.sub(pred, ys);
    let sq = graph.square(diff);
    let loss = graph.mean(sq);

    let mut session = Session::default();
    session.bind(&graph, xs, x)?;
    session.bind(&graph, ys, y)?;
    Ok(Regression {
        graph,
        session,
        loss,
        weights,
        bias,
    })
}

fn train(opt: &mut dyn Optimizer, steps: usize) -> Result<(f32, f32, Regression)> {
    let mut r = regression(64)?;
    let first = opt.step(&mut r.session, &mut r.graph, r.loss, 1)?;
    let mut last = first;
    for _ in 1..steps {
        last = opt.step(&mut r.session, &mut r.graph, r.loss, 1)?;
    }
    Ok((first, last, r))
}

#[test]
fn test_adam_fits_linear_regression() -> Result<()> {
    let mut opt = Adam::with_config(AdamConfig::default().with_learning_rate(0.05));
    let (first, last, r) = train(&mut opt, 500)?;
    assert!(first > 1.0, "initial loss {first}");
    assert!(last < 0.05, "loss after training {last}");
    let b = r.graph.get_variable(r.bias)?.data().as_slice()[0];
    assert!((b - 0.3).abs() < 0.1, "bias {b}");
    Ok(())
}

#[test]
fn test_sgd_fits_linear_regression() -> Result<()> {
    let mut opt = Sgd::new(0.1);
    let (_, last, r) = train(&mut opt, 300)?;
    assert!(last < 1e-3, "loss after training {last}");
    let w = r.graph.get_variable(r.weights)?.data().to_vec();
    assert!((w[1] + 2.0).abs() < 0.05, "weights {w:?}");
    Ok(())
}

#[test]
fn test_boxed_optimizer() -> Result<()> {
    let mut opt: Box<dyn Optimizer> = Box::new(RmsProp::new(0.01));
    opt.set_learning_rate(0.02);
    assert_eq!(opt.learning_rate(), 0.02);
    let (first, last, _) = train(&mut opt, 50)?;
    assert!(last < first);
    Ok(())
}

#[test]
fn test_sgd_exact_update() -> Result<()> {
    let mut g = Graph::new();
    let w = g.variable(Tensor::from_vec(vec![1.0, 2.0], 2)?);
    let x = g.constant(Tensor::from_vec(vec![3.0, 4.0], 2)?);
    let wx = g.mul(w, x);
    let loss = g.sum(wx);

    let mut s = Session::default();
    let mut opt = Sgd::new(0.5);
    let value = opt.step(&mut s, &mut g, loss, 2)?;
    assert_eq!(value, 11.0);
    // w -= 0.5 / 2 * x
    assert_eq!(g.get_variable(w)?.data().to_vec(), vec![0.25, 1.0]);
    // accumulators are cleared after the update
    assert_eq!(g.get_variable(w)?.grad().to_vec(), vec![0.0, 0.0]);
    Ok(())
}

// Distance w moves in one step of sum(3 * w) from zero.
fn first_step_size(opt: &mut dyn Optimizer, batch_size: usize) -> Result<f32> {
    let mut g = Graph::new();
    let w = g.variable(Tensor::zeros(1));
    let c = g.constant(Tensor::full(1, 3.0));
    let wc = g.mul(w, c);
    let loss = g.sum(wc);
    opt.step(&mut Session::default(), &mut g, loss, batch_size)?;
    Ok(g.get_variable(w)?.data().as_slice()[0].abs())
}

#[test]
fn test_step_size_scales_with_batch_size() -> Result<()> {
    let makers: [(&str, fn() -> Box<dyn Optimizer>); 4] = [
        ("sgd", || Box::new(Sgd::new(0.1))),
        ("adam", || Box::new(Adam::new(0.1))),
        ("adagrad", || Box::new(Adagrad::new(0.1))),
        ("rmsprop", || Box::new(RmsProp::new(0.1))),
    ];
    for (name, make) in makers {
        let single = first_step_size(make().as_mut(), 1)?;
        let batched = first_step_size(make().as_mut(), 32)?;
        assert!(single > 0.0, "{name} did not move");
        let ratio = single / batched;
        assert!((ratio - 32.0).abs() < 32.0 * 1e-3, "{name}: ratio {ratio}");
    }
    Ok(())
}

#[test]
fn test_frozen_variable_is_not_updated() -> Result<()> {
    let mut g = Graph::new();
    let w = g.variable(Tensor::full(1, 1.0));
    let frozen = g.add_variable(Variable::new(Tensor::full(1, 3.0)).frozen());
    let y = g.mul(w, frozen);
    let loss = g.sum(y);

    let mut s = Session::default();
    Sgd::new(0.1).step(&mut s, &mut g, loss, 1)?;
    assert_eq!(g.get_variable(frozen)?.data().to_vec(), vec![3.0]);
    assert!((g.get_variable(w)?.data().as_slice()[0] - 0.7).abs() < 1e-6);

    g.make_trainable(loss, false)?;
    Sgd::new(0.1).step(&mut s, &mut g, loss, 1)?;
    assert!((g.get_variable(w)?.data().as_slice()[0] - 0.7).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_stateful_gradient_survives_step() -> Result<()> {
    let mut g = Graph::new();
    let w = g.add_variable(Variable::new(Tensor::zeros(1)).stateful());
    let loss = g.sum(w);
    let mut s = Session::default();
    let mut opt = Sgd::new(1.0);
    opt.step(&mut s, &mut g, loss, 1)?;
    opt.step(&mut s, &mut g, loss, 1)?;
    // the second step sees an accumulated gradient of 2
    assert_eq!(g.get_variable(w)?.data().to_vec(), vec![-3.0]);
    assert_eq!(g.get_variable(w)?.grad().to_vec(), vec![2.0]);
    Ok(())
}

#[test]
fn test_loss_must_be_scalar() {
    let mut g = Graph::new();
    let w = g.variable(Tensor::ones(3));
    let loss = g.square(w);
    let mut s = Session::default();
    assert!(matches!(
        Sgd::new(0.1).step(&mut s, &mut g, loss, 1),
        Err(Error::NotAScalar { .. })
    ));
    assert!(Sgd::new(0.1).step(&mut s, &mut g, loss, 0).is_err());
}
