//! Metric registry.
//!
//! Metrics are evaluation helpers (they do not participate in backprop). They are
//! accumulated sample by sample with [`MetricAccumulator`] and reported under a
//! snake_case log name.

use serde::{Deserialize, Serialize};

use crate::loss::{self, LossKind};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// Supported evaluation metrics.
pub enum MetricKind {
    MeanSquaredError,
    MeanAbsoluteError,
    MeanAbsolutePercentageError,
    MeanSquaredLogarithmicError,
    RootMeanSquaredError,
    LogCoshError,
    /// Element-wise accuracy with a 0.5 threshold.
    BinaryAccuracy,
    /// Argmax agreement between prediction and one-hot target.
    CategoricalAccuracy,
    BinaryCrossentropy,
    CategoricalCrossentropy,
}

impl MetricKind {
    pub const ALL: [MetricKind; 10] = [
        MetricKind::MeanSquaredError,
        MetricKind::MeanAbsoluteError,
        MetricKind::MeanAbsolutePercentageError,
        MetricKind::MeanSquaredLogarithmicError,
        MetricKind::RootMeanSquaredError,
        MetricKind::LogCoshError,
        MetricKind::BinaryAccuracy,
        MetricKind::CategoricalAccuracy,
        MetricKind::BinaryCrossentropy,
        MetricKind::CategoricalCrossentropy,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MetricKind::MeanSquaredError => "MeanSquaredError",
            MetricKind::MeanAbsoluteError => "MeanAbsoluteError",
            MetricKind::MeanAbsolutePercentageError => "MeanAbsolutePercentageError",
            MetricKind::MeanSquaredLogarithmicError => "MeanSquaredLogarithmicError",
            MetricKind::RootMeanSquaredError => "RootMeanSquaredError",
            MetricKind::LogCoshError => "LogCoshError",
            MetricKind::BinaryAccuracy => "BinaryAccuracy",
            MetricKind::CategoricalAccuracy => "CategoricalAccuracy",
            MetricKind::BinaryCrossentropy => "BinaryCrossentropy",
            MetricKind::CategoricalCrossentropy => "CategoricalCrossentropy",
        }
    }

    /// Name used in training logs and history columns.
    pub fn log_name(self) -> &'static str {
        match self {
            MetricKind::MeanSquaredError => "mean_squared_error",
            MetricKind::MeanAbsoluteError => "mean_absolute_error",
            MetricKind::MeanAbsolutePercentageError => "mean_absolute_percentage_error",
            MetricKind::MeanSquaredLogarithmicError => "mean_squared_logarithmic_error",
            MetricKind::RootMeanSquaredError => "root_mean_squared_error",
            MetricKind::LogCoshError => "logcosh",
            MetricKind::BinaryAccuracy => "binary_accuracy",
            MetricKind::CategoricalAccuracy => "categorical_accuracy",
            MetricKind::BinaryCrossentropy => "binary_crossentropy",
            MetricKind::CategoricalCrossentropy => "categorical_crossentropy",
        }
    }

    /// Accepts both the registry name and the log name.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name) || k.log_name() == name)
            .ok_or_else(|| Error::Set(format!("unknown metric {name:?}")))
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        Self::ALL.into_iter().map(MetricKind::name)
    }

    /// Value of the metric on a single sample.
    ///
    /// For [`MetricKind::RootMeanSquaredError`] this is the per-sample squared error;
    /// the root is taken once over the whole dataset by [`MetricAccumulator::value`].
    #[inline]
    pub fn sample(self, pred: &[f32], target: &[f32]) -> f32 {
        match self {
            MetricKind::MeanSquaredError | MetricKind::RootMeanSquaredError => {
                LossKind::MeanSquaredError.forward(pred, target)
            }
            MetricKind::MeanAbsoluteError => LossKind::MeanAbsoluteError.forward(pred, target),
            MetricKind::MeanAbsolutePercentageError => {
                LossKind::MeanAbsolutePercentageError.forward(pred, target)
            }
            MetricKind::MeanSquaredLogarithmicError => {
                LossKind::MeanSquaredLogarithmicError.forward(pred, target)
            }
            MetricKind::LogCoshError => LossKind::LogCosh.forward(pred, target),
            MetricKind::BinaryCrossentropy => LossKind::BinaryCrossentropy.forward(pred, target),
            MetricKind::CategoricalCrossentropy => loss::categorical_crossentropy(pred, target),
            MetricKind::BinaryAccuracy => {
                if pred.is_empty() {
                    return 0.0;
                }
                let hits = pred
                    .iter()
                    .zip(target)
                    .filter(|&(&p, &t)| (p > 0.5) == (t > 0.5))
                    .count();
                hits as f32 / pred.len() as f32
            }
            MetricKind::CategoricalAccuracy => {
                if argmax(pred) == argmax(target) {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

#[inline]
fn argmax(xs: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &x) in xs.iter().enumerate() {
        match best {
            Some((_, b)) if b >= x => {}
            _ => best = Some((i, x)),
        }
    }
    best.map(|(i, _)| i)
}

/// Running mean of a metric over samples.
#[derive(Debug, Clone, Copy)]
pub struct MetricAccumulator {
    kind: MetricKind,
    total: f64,
    count: usize,
}

impl MetricAccumulator {
    pub fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            total: 0.0,
            count: 0,
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    #[inline]
    pub fn update(&mut self, pred: &[f32], target: &[f32]) {
        self.total += f64::from(self.kind.sample(pred, target));
        self.count += 1;
    }

    pub fn value(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.total / self.count as f64;
        match self.kind {
            MetricKind::RootMeanSquaredError => mean.sqrt(),
            _ => mean,
        }
    }
}
