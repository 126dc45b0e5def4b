// Loss builders
//
// Each builder adds a scalar loss expression to a graph and returns its id.
// The signature `(graph, ground_truth, prediction) -> NodeId` is the one
// `Model::compile` expects, so a builder can be passed directly:
//
//   let model = model.compile(loss::mean_squared_error, Adam::default());
//
// 1. MSE: mean((prediction - ground_truth)^2)
// 2. MAE: mean(|prediction - ground_truth|)
// 3. Cross-entropy: the fused softmax + cross-entropy node. `prediction`
//    holds logits; the result is averaged over the batch.

use wren_graph::{Graph, NodeId};

/// Mean squared error over every element.
pub fn mean_squared_error(graph: &mut Graph, ground_truth: NodeId, prediction: NodeId) -> NodeId {
    let diff = graph.sub(prediction, ground_truth);
    let sq = graph.square(diff);
    graph.mean(sq)
}

/// Mean absolute error over every element.
pub fn mean_absolute_error(graph: &mut Graph, ground_truth: NodeId, prediction: NodeId) -> NodeId {
    let diff = graph.sub(prediction, ground_truth);
    let abs = graph.abs(diff);
    graph.mean(abs)
}

/// Softmax cross-entropy of logits against target distributions.
pub fn cross_entropy(graph: &mut Graph, ground_truth: NodeId, logits: NodeId) -> NodeId {
    graph.softmax_cross_entropy(ground_truth, logits, 0.0)
}

/// Cross-entropy with targets smoothed towards uniform:
/// `t * (1 - smoothing) + smoothing / classes`.
pub fn cross_entropy_with_smoothing(
    smoothing: f32,
) -> impl Fn(&mut Graph, NodeId, NodeId) -> NodeId {
    move |graph: &mut Graph, ground_truth: NodeId, logits: NodeId| {
        graph.softmax_cross_entropy(ground_truth, logits, smoothing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wren_core::Tensor;
    use wren_graph::Session;

    fn eval(build: impl FnOnce(&mut Graph, NodeId, NodeId) -> NodeId, gt: Tensor, pred: Tensor) -> f32 {
        let mut g = Graph::new();
        let gt = g.constant(gt);
        let pred = g.constant(pred);
        let loss = build(&mut g, gt, pred);
        Session::default().run(&g, loss).unwrap().as_scalar().unwrap()
    }

    #[test]
    fn test_mse() {
        let gt = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], (2, 2)).unwrap();
        let pred = Tensor::from_vec(vec![1.0, 3.0, 1.0, 4.0], (2, 2)).unwrap();
        assert!((eval(mean_squared_error, gt, pred) - 1.25).abs() < 1e-6);
    }

    #[test]
    fn test_mae() {
        let gt = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], (2, 2)).unwrap();
        let pred = Tensor::from_vec(vec![1.0, 3.0, 1.0, 4.0], (2, 2)).unwrap();
        assert!((eval(mean_absolute_error, gt, pred) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_cross_entropy_uniform_logits() {
        let gt = Tensor::from_vec(vec![0.0, 1.0, 0.0, 0.0], (1, 4)).unwrap();
        let logits = Tensor::zeros((1, 4));
        assert!((eval(cross_entropy, gt, logits) - 4f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_smoothing_changes_nothing_for_uniform_predictions() {
        // every class has probability 1/4, so any target distribution costs ln 4
        let gt = Tensor::from_vec(vec![0.0, 1.0, 0.0, 0.0], (1, 4)).unwrap();
        let logits = Tensor::zeros((1, 4));
        let loss = eval(cross_entropy_with_smoothing(0.2), gt, logits);
        assert!((loss - 4f32.ln()).abs() < 1e-5);
    }
}
