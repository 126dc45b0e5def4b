// Model: training loop orchestration
//
// A `Model` is a graph plus the input placeholder and output node that make
// it a function. Compiling attaches a loss and an optimizer:
//
//   let model = Model::new(graph, x, y_hat);
//   let mut model = model.compile(loss::mean_squared_error, Adam::default());
//   let history = model.fit(&xs, &ys, &FitConfig::default().with_epochs(20))?;
//   let pred = model.predict(&xs)?;
//
// fit() splits the samples into floor(samples / batch_size) full batches.
// Trailing samples that do not fill a batch are dropped. The first
// floor((1 - validation_split) * batches) batches train, the rest only
// report a validation loss. Each epoch:
//   1. Optionally shuffle the order of the training batches
//   2. One optimizer step per training batch
//   3. Mean loss over the validation batches, without updates
//   4. Log an EpochLog (printed to stderr when verbose)

use std::fmt;
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use wren_core::{bail, Error, Result, Tensor};
use wren_graph::{checkpoint, Graph, NodeId, Session, SessionConfig};
use wren_optim::Optimizer;

// Training logs

/// Losses recorded for one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochLog {
    /// Epoch number (0-indexed).
    pub epoch: usize,
    /// Mean training loss over the epoch's batches.
    pub loss: f32,
    /// Mean validation loss, when a validation split is configured.
    pub val_loss: Option<f32>,
}

impl fmt::Display for EpochLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch {}: loss = {:.6}", self.epoch, self.loss)?;
        if let Some(val) = self.val_loss {
            write!(f, ", val_loss = {val:.6}")?;
        }
        Ok(())
    }
}

/// Per-epoch logs of a `fit` call.
#[derive(Debug, Clone, Default)]
pub struct History {
    pub epochs: Vec<EpochLog>,
}

impl History {
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochLog> {
        self.epochs.last()
    }

    pub fn losses(&self) -> Vec<f32> {
        self.epochs.iter().map(|e| e.loss).collect()
    }

    pub fn val_losses(&self) -> Vec<f32> {
        self.epochs.iter().filter_map(|e| e.val_loss).collect()
    }
}

impl fmt::Display for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Training complete, {} epochs", self.epochs.len())?;
        for log in &self.epochs {
            writeln!(f, "  {log}")?;
        }
        Ok(())
    }
}

// Fit configuration

#[derive(Debug, Clone)]
pub struct FitConfig {
    pub batch_size: usize,
    pub epochs: usize,
    /// Fraction of batches held out for validation, in `[0, 1)`.
    pub validation_split: f32,
    /// Shuffle the training batch order every epoch.
    pub shuffle: bool,
    pub seed: u64,
    /// Print every epoch log to stderr.
    pub verbose: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            epochs: 1,
            validation_split: 0.0,
            shuffle: true,
            seed: 0,
            verbose: false,
        }
    }
}

impl FitConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_validation_split(mut self, split: f32) -> Self {
        self.validation_split = split;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::msg("fit: batch_size must be positive"));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(Error::msg(format!(
                "fit: validation_split must be in [0, 1), got {}",
                self.validation_split
            )));
        }
        Ok(())
    }
}

// Model

/// A graph with a designated input placeholder and output node.
#[derive(Debug)]
pub struct Model {
    graph: Graph,
    session: Session,
    input: NodeId,
    output: NodeId,
}

impl Model {
    pub fn new(graph: Graph, input: NodeId, output: NodeId) -> Self {
        Self {
            graph,
            session: Session::default(),
            input,
            output,
        }
    }

    /// Replace the session, dropping its bindings.
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session = Session::new(config);
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn input(&self) -> NodeId {
        self.input
    }

    pub fn output(&self) -> NodeId {
        self.output
    }

    /// Forward pass only.
    pub fn predict(&mut self, x: &Tensor) -> Result<Tensor> {
        self.session.rebind(&self.graph, self.input, x.clone())?;
        self.session.run(&self.graph, self.output)
    }

    /// Attach a loss and an optimizer.
    ///
    /// `loss(graph, ground_truth, output)` receives a fresh ground-truth
    /// placeholder and must return a scalar node.
    pub fn compile<F, O>(mut self, loss: F, optimizer: O) -> CompiledModel<O>
    where
        F: FnOnce(&mut Graph, NodeId, NodeId) -> NodeId,
        O: Optimizer,
    {
        let ground_truth = self.graph.named_placeholder("ground_truth");
        let loss = loss(&mut self.graph, ground_truth, self.output);
        CompiledModel {
            model: self,
            ground_truth,
            loss,
            optimizer,
        }
    }

    pub fn save_variables(&self, path: impl AsRef<Path>) -> Result<()> {
        checkpoint::save_variables(path, &self.graph)
    }

    pub fn load_variables(&mut self, path: impl AsRef<Path>) -> Result<()> {
        checkpoint::load_variables(path, &mut self.graph)
    }
}

/// A model with a loss and an optimizer attached.
#[derive(Debug)]
pub struct CompiledModel<O> {
    model: Model,
    ground_truth: NodeId,
    loss: NodeId,
    optimizer: O,
}

impl<O: Optimizer> CompiledModel<O> {
    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    pub fn into_model(self) -> Model {
        self.model
    }

    pub fn loss(&self) -> NodeId {
        self.loss
    }

    pub fn ground_truth(&self) -> NodeId {
        self.ground_truth
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn optimizer_mut(&mut self) -> &mut O {
        &mut self.optimizer
    }

    pub fn predict(&mut self, x: &Tensor) -> Result<Tensor> {
        self.model.predict(x)
    }

    fn bind_batch(&mut self, x: &Tensor, y: &Tensor) -> Result<()> {
        let m = &mut self.model;
        m.session.rebind(&m.graph, m.input, x.clone())?;
        m.session.rebind(&m.graph, self.ground_truth, y.clone())
    }

    /// One optimizer step on a single batch. Returns the loss before the
    /// update.
    pub fn train_on_batch(&mut self, x: &Tensor, y: &Tensor) -> Result<f32> {
        let batch_size = x.shape().dim(0)?;
        self.bind_batch(x, y)?;
        let m = &mut self.model;
        self.optimizer
            .step(&mut m.session, &mut m.graph, self.loss, batch_size)
    }

    /// Loss on a single batch, without updates.
    pub fn test_on_batch(&mut self, x: &Tensor, y: &Tensor) -> Result<f32> {
        self.bind_batch(x, y)?;
        let m = &mut self.model;
        let value = m.session.run(&m.graph, self.loss)?.as_scalar()?;
        m.session.release_values();
        Ok(value)
    }

    /// Mean loss over every full batch of `batch_size` samples.
    pub fn evaluate(&mut self, x: &Tensor, y: &Tensor, batch_size: usize) -> Result<f32> {
        if batch_size == 0 {
            return Err(Error::msg("evaluate: batch_size must be positive"));
        }
        let batches = full_batches(x, y, batch_size)?;
        self.mean_test_loss(x, y, batch_size, 0..batches)
    }

    fn mean_test_loss(
        &mut self,
        x: &Tensor,
        y: &Tensor,
        batch_size: usize,
        batches: std::ops::Range<usize>,
    ) -> Result<f32> {
        let count = batches.len();
        let mut total = 0.0;
        for b in batches {
            let (xb, yb) = batch(x, y, b, batch_size)?;
            total += self.test_on_batch(&xb, &yb)?;
        }
        Ok(total / count as f32)
    }

    /// Train for `config.epochs` epochs over mini-batches of `x` and `y`.
    pub fn fit(&mut self, x: &Tensor, y: &Tensor, config: &FitConfig) -> Result<History> {
        config.validate()?;
        let batches = full_batches(x, y, config.batch_size)?;
        let train_batches = ((1.0 - config.validation_split) * batches as f32).floor() as usize;
        if train_batches == 0 {
            bail!(
                "fit: {batches} batches leave none for training with validation_split {}",
                config.validation_split
            );
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut order: Vec<usize> = (0..train_batches).collect();
        let mut history = History::default();

        for epoch in 0..config.epochs {
            if config.shuffle {
                order.shuffle(&mut rng);
            }

            let mut total = 0.0;
            for &b in &order {
                let (xb, yb) = batch(x, y, b, config.batch_size)?;
                total += self.train_on_batch(&xb, &yb)?;
            }

            let val_loss = if train_batches < batches {
                Some(self.mean_test_loss(x, y, config.batch_size, train_batches..batches)?)
            } else {
                None
            };

            let log = EpochLog {
                epoch,
                loss: total / train_batches as f32,
                val_loss,
            };
            if config.verbose {
                eprintln!("{log}");
            }
            history.epochs.push(log);
        }
        Ok(history)
    }
}

// Number of full batches; fails when the sample counts disagree or no
// batch fits.
fn full_batches(x: &Tensor, y: &Tensor, batch_size: usize) -> Result<usize> {
    let samples = x.shape().dim(0)?;
    let targets = y.shape().dim(0)?;
    if samples != targets {
        bail!("{samples} input samples but {targets} targets");
    }
    let batches = samples / batch_size;
    if batches == 0 {
        bail!("{samples} samples do not fill one batch of {batch_size}");
    }
    Ok(batches)
}

fn batch(x: &Tensor, y: &Tensor, index: usize, batch_size: usize) -> Result<(Tensor, Tensor)> {
    let start = index * batch_size;
    Ok((
        x.slice_rows(start, batch_size)?,
        y.slice_rows(start, batch_size)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_log_display() {
        let log = EpochLog {
            epoch: 3,
            loss: 0.5,
            val_loss: Some(0.25),
        };
        assert_eq!(log.to_string(), "epoch 3: loss = 0.500000, val_loss = 0.250000");
        let log = EpochLog {
            val_loss: None,
            ..log
        };
        assert_eq!(log.to_string(), "epoch 3: loss = 0.500000");
    }

    #[test]
    fn test_fit_config_validation() {
        assert!(FitConfig::default().validate().is_ok());
        assert!(FitConfig::default().with_batch_size(0).validate().is_err());
        assert!(FitConfig::default()
            .with_validation_split(1.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_full_batches_drops_remainder() {
        let x = Tensor::zeros((10, 2));
        let y = Tensor::zeros((10, 1));
        assert_eq!(full_batches(&x, &y, 3).unwrap(), 3);
        assert!(full_batches(&x, &y, 11).is_err());
        assert!(full_batches(&x, &Tensor::zeros((9, 1)), 3).is_err());
    }
}
