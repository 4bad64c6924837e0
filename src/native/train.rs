//! Training, evaluation and inference loops of the native backend.

use std::collections::BTreeMap;

use rand::Rng;
use rand::seq::SliceRandom;

use super::graph::{Graph, Mode};
use super::optim::OptimizerState;
use crate::backend::{CompileSpec, FitSpec, Logs};
use crate::callbacks::{Callback, StopMonitor};
use crate::data::Matrix;
use crate::error::BackendError;
use crate::metrics::MetricAccumulator;

/// Running sums of losses and metrics over the samples seen in one pass.
struct Tally {
    samples: usize,
    losses: Vec<f64>,
    metrics: Vec<Vec<MetricAccumulator>>,
}

impl Tally {
    fn new(spec: &CompileSpec) -> Self {
        Self {
            samples: 0,
            losses: vec![0.0; spec.outputs.len()],
            metrics: spec
                .outputs
                .iter()
                .map(|o| o.metrics.iter().map(|&m| MetricAccumulator::new(m)).collect())
                .collect(),
        }
    }

    /// Accumulate one batch. When `d_outputs` is given, also write the
    /// gradient of the batch-mean loss into it.
    fn batch(
        &mut self,
        spec: &CompileSpec,
        preds: &[&Matrix],
        targets: &[Matrix],
        mut d_outputs: Option<&mut Vec<Matrix>>,
    ) {
        let rows = targets.first().map_or(0, Matrix::rows);
        let inv_rows = 1.0 / rows.max(1) as f32;
        for (k, out) in spec.outputs.iter().enumerate() {
            let pred = preds[k];
            let target = &targets[k];
            let mut d = Matrix::zeros(rows, pred.cols());
            for r in 0..rows {
                let loss = out.loss.backward(pred.row(r), target.row(r), d.row_mut(r));
                self.losses[k] += f64::from(loss);
                for acc in &mut self.metrics[k] {
                    acc.update(pred.row(r), target.row(r));
                }
            }
            if let Some(ds) = d_outputs.as_deref_mut() {
                d.as_mut_slice().iter_mut().for_each(|v| *v *= inv_rows);
                ds.push(d);
            }
        }
        self.samples += rows;
    }

    fn logs(&self, spec: &CompileSpec, prefix: &str) -> Logs {
        let n = self.samples.max(1) as f64;
        let mut logs = BTreeMap::new();
        let total: f64 = self.losses.iter().map(|l| l / n).sum();
        logs.insert(format!("{prefix}loss"), total);

        let multi = spec.outputs.len() > 1;
        for (k, out) in spec.outputs.iter().enumerate() {
            let head = if multi {
                format!("{prefix}{}_", out.name)
            } else {
                prefix.to_owned()
            };
            if multi {
                logs.insert(format!("{head}loss"), self.losses[k] / n);
            }
            for acc in &self.metrics[k] {
                logs.insert(format!("{head}{}", acc.kind().log_name()), acc.value());
            }
        }
        logs
    }
}

fn gather(ms: &[Matrix], idx: &[usize]) -> Vec<Matrix> {
    ms.iter().map(|m| m.gather(idx)).collect()
}

fn rows_of(ms: &[Matrix]) -> usize {
    ms.first().map_or(0, Matrix::rows)
}

/// Number of leading rows kept for training, `floor(n * (1 - split))`.
///
/// The split is taken at its shortest decimal form so `0.1_f32` behaves as
/// `0.1` rather than `0.100000001`.
fn split_point(n: usize, split: f32) -> usize {
    if split <= 0.0 {
        return n;
    }
    let split = split.to_string().parse::<f64>().unwrap_or(f64::from(split));
    (n as f64 * (1.0 - split)).floor() as usize
}

/// Train `graph` and return one log record per epoch run.
///
/// The trailing `validation_split` fraction of rows is held out, the rest is
/// shuffled each epoch when `shuffle` is set and consumed in mini-batches.
#[allow(clippy::too_many_arguments)]
pub(crate) fn fit<R: Rng + ?Sized>(
    graph: &mut Graph,
    spec: &CompileSpec,
    state: &mut OptimizerState,
    inputs: &[Matrix],
    targets: &[Matrix],
    fit: &FitSpec,
    callbacks: &[Callback],
    shuffle: bool,
    rng: &mut R,
) -> Result<Vec<Logs>, BackendError> {
    let n = rows_of(inputs);
    let split_at = split_point(n, fit.validation_split);
    if split_at == 0 {
        return Err(BackendError::new("no training samples left after the validation split"));
    }
    if fit.validation_split > 0.0 && split_at == n {
        return Err(BackendError::new(format!(
            "validation_split {} leaves no validation samples out of {n}",
            fit.validation_split
        )));
    }

    let val_idx: Vec<usize> = (split_at..n).collect();
    let (val_x, val_y) = (gather(inputs, &val_idx), gather(targets, &val_idx));

    let mut order: Vec<usize> = (0..split_at).collect();
    let mut grads = graph.gradients();
    let mut monitor = StopMonitor::new(callbacks);
    let mut history = Vec::with_capacity(fit.epochs);

    for epoch in 1..=fit.epochs {
        if shuffle {
            order.shuffle(rng);
        }
        let mut tally = Tally::new(spec);

        for (b, chunk) in order.chunks(fit.batch_size).enumerate() {
            let xb = gather(inputs, chunk);
            let yb = gather(targets, chunk);

            let trace = graph.forward(&xb, Mode::Train(&mut *rng));
            let preds: Vec<&Matrix> = (0..spec.outputs.len()).map(|k| trace.output(k)).collect();
            let mut d_outputs = Vec::with_capacity(spec.outputs.len());
            tally.batch(spec, &preds, &yb, Some(&mut d_outputs));

            graph.backward(&trace, &d_outputs, &mut grads);
            state.step(graph.params_mut(), &grads);
            log::trace!("epoch {epoch} batch {b}: {} samples", chunk.len());
        }

        let mut logs = tally.logs(spec, "");
        if !val_idx.is_empty() {
            logs.extend(evaluate(graph, spec, &val_x, &val_y, fit.batch_size, "val_"));
        }
        log::info!(
            "epoch {epoch}/{}: loss {:.6}{}",
            fit.epochs,
            logs.get("loss").copied().unwrap_or(f64::NAN),
            logs.get("val_loss")
                .map(|v| format!(", val_loss {v:.6}"))
                .unwrap_or_default()
        );

        let stop = monitor.on_epoch_end(epoch, &logs);
        history.push(logs);
        if stop {
            break;
        }
    }

    Ok(history)
}

/// Losses and metrics in inference mode, every log name prefixed with `prefix`.
pub(crate) fn evaluate(
    graph: &mut Graph,
    spec: &CompileSpec,
    inputs: &[Matrix],
    targets: &[Matrix],
    batch_size: usize,
    prefix: &str,
) -> Logs {
    let n = rows_of(inputs);
    let mut tally = Tally::new(spec);
    for start in (0..n).step_by(batch_size.max(1)) {
        let end = (start + batch_size).min(n);
        let xb: Vec<Matrix> = inputs.iter().map(|m| m.slice_rows(start, end)).collect();
        let yb: Vec<Matrix> = targets.iter().map(|m| m.slice_rows(start, end)).collect();
        let trace = graph.forward::<rand::rngs::StdRng>(&xb, Mode::Infer);
        let preds: Vec<&Matrix> = (0..spec.outputs.len()).map(|k| trace.output(k)).collect();
        tally.batch(spec, &preds, &yb, None);
    }
    tally.logs(spec, prefix)
}

/// Outputs for every row, in inference mode.
pub(crate) fn predict(graph: &mut Graph, inputs: &[Matrix], batch_size: usize) -> Vec<Matrix> {
    let n = rows_of(inputs);
    let mut outs: Vec<Vec<f32>> = graph
        .output_features()
        .iter()
        .map(|&f| Vec::with_capacity(n * f))
        .collect();

    for start in (0..n).step_by(batch_size.max(1)) {
        let end = (start + batch_size).min(n);
        let xb: Vec<Matrix> = inputs.iter().map(|m| m.slice_rows(start, end)).collect();
        let trace = graph.forward::<rand::rngs::StdRng>(&xb, Mode::Infer);
        for (buf, out) in outs.iter_mut().zip(trace.into_outputs()) {
            buf.extend(out.into_vec());
        }
    }

    outs.into_iter()
        .zip(graph.output_features())
        .map(|(data, cols)| Matrix::from_flat(data, cols).unwrap_or_else(|_| Matrix::zeros(0, cols)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Activation;
    use crate::backend::OutputCompile;
    use crate::layers::LayerParams;
    use crate::loss::LossKind;
    use crate::metrics::MetricKind;
    use crate::native::graph::{Arena, PendingLayer};
    use crate::optim::{OptimizerConfig, OptimizerKind};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn setup() -> (Graph, CompileSpec) {
        let mut rng = StdRng::seed_from_u64(7);
        let mut arena = Arena::default();
        let x = arena.input("x", 2).unwrap();
        let h = arena
            .apply(
                PendingLayer {
                    name: "h".into(),
                    params: LayerParams::Dense {
                        units: 8,
                        activation: Activation::Tanh,
                    },
                },
                &[x],
            )
            .unwrap();
        let y = arena
            .apply(
                PendingLayer {
                    name: "y".into(),
                    params: LayerParams::Dense {
                        units: 1,
                        activation: Activation::Linear,
                    },
                },
                &[h],
            )
            .unwrap();
        let graph = arena.extract(&[x], &[y], &mut rng).unwrap();
        let spec = CompileSpec {
            optimizer: OptimizerConfig::from_params(
                OptimizerKind::Adam,
                &crate::Params::new().with("learning_rate", 0.05),
            )
            .unwrap(),
            outputs: vec![OutputCompile {
                name: "y".into(),
                loss: LossKind::MeanSquaredError,
                metrics: vec![MetricKind::MeanAbsoluteError],
            }],
        };
        (graph, spec)
    }

    fn data() -> (Vec<Matrix>, Vec<Matrix>) {
        let xs: Vec<Vec<f32>> = (0..40)
            .map(|i| {
                let a = i as f32 / 40.0;
                vec![a, 1.0 - a]
            })
            .collect();
        let ys: Vec<Vec<f32>> = xs.iter().map(|x| vec![x[0] - 0.5 * x[1]]).collect();
        (
            vec![Matrix::from_rows(&xs).unwrap()],
            vec![Matrix::from_rows(&ys).unwrap()],
        )
    }

    #[test]
    fn fit_reduces_loss_and_logs_validation() {
        let (mut graph, spec) = setup();
        let mut state = OptimizerState::new(spec.optimizer);
        let (x, y) = data();
        let mut rng = StdRng::seed_from_u64(0);
        let logs = fit(
            &mut graph,
            &spec,
            &mut state,
            &x,
            &y,
            &FitSpec::new(8, 30, 0.25),
            &[],
            true,
            &mut rng,
        )
        .unwrap();

        assert_eq!(logs.len(), 30);
        for key in ["loss", "val_loss", "mean_absolute_error", "val_mean_absolute_error"] {
            assert!(logs[0].contains_key(key), "missing {key}");
        }
        assert!(logs[29]["loss"] < logs[0]["loss"]);
    }

    #[test]
    fn validation_split_must_leave_samples() {
        let (mut graph, spec) = setup();
        let mut state = OptimizerState::new(spec.optimizer);
        let x = vec![Matrix::from_rows(&[vec![0.0, 1.0], vec![1.0, 0.0]]).unwrap()];
        let y = vec![Matrix::from_rows(&[vec![0.0], vec![1.0]]).unwrap()];
        let mut rng = StdRng::seed_from_u64(0);
        let err = fit(
            &mut graph,
            &spec,
            &mut state,
            &x,
            &y,
            &FitSpec::new(1, 1, 0.1),
            &[],
            false,
            &mut rng,
        );
        assert!(err.is_err());
    }

    #[test]
    fn early_stopping_cuts_training_short() {
        let (mut graph, spec) = setup();
        let mut state = OptimizerState::new(spec.optimizer);
        let (x, y) = data();
        let mut rng = StdRng::seed_from_u64(0);
        let stop = Callback::EarlyStopping {
            monitor: "loss".into(),
            min_delta: 1e6,
            patience: 0,
        };
        let logs = fit(
            &mut graph,
            &spec,
            &mut state,
            &x,
            &y,
            &FitSpec::new(8, 10, 0.0),
            &[stop],
            true,
            &mut rng,
        )
        .unwrap();
        // The first epoch always improves on the initial best.
        assert_eq!(logs.len(), 2);
    }

    #[test]
    fn split_point_holds_out_the_tail_fraction() {
        assert_eq!(split_point(100, 0.1), 90);
        assert_eq!(split_point(100, 0.25), 75);
        assert_eq!(split_point(5, 0.2), 4);
        assert_eq!(split_point(7, 0.0), 7);
    }

    #[test]
    fn predict_returns_every_row() {
        let (mut graph, _) = setup();
        let (x, _) = data();
        let out = predict(&mut graph, &x, 7);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].rows(), 40);
        assert_eq!(out[0].cols(), 1);
        assert!(out[0].is_finite());
    }
}
