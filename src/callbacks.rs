//! Callback registry and the epoch-end bookkeeping shared by backends.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::params::{self, DefaultValue, ParamKind, ParamSpec, Params};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CallbackKind {
    EarlyStopping,
    TerminateOnNaN,
}

const EARLY_STOPPING_SCHEMA: &[ParamSpec] = &[
    ParamSpec::optional("monitor", ParamKind::Choice(MONITORS), DefaultValue::Text("val_loss")),
    ParamSpec::required("min_delta", ParamKind::NON_NEGATIVE_FLOAT),
    ParamSpec::required("patience", ParamKind::NON_NEGATIVE_INT),
];

const MONITORS: &[&str] = &["val_loss", "loss"];

impl CallbackKind {
    pub const ALL: [CallbackKind; 2] = [CallbackKind::EarlyStopping, CallbackKind::TerminateOnNaN];

    pub fn name(self) -> &'static str {
        match self {
            CallbackKind::EarlyStopping => "EarlyStopping",
            CallbackKind::TerminateOnNaN => "TerminateOnNaN",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::Set(format!("unknown callback {name:?}")))
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        Self::ALL.into_iter().map(CallbackKind::name)
    }

    pub fn schema(self) -> &'static [ParamSpec] {
        match self {
            CallbackKind::EarlyStopping => EARLY_STOPPING_SCHEMA,
            CallbackKind::TerminateOnNaN => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
/// A configured training callback.
pub enum Callback {
    /// Stop once `monitor` has gone `patience` consecutive epochs without
    /// improving by more than `min_delta` (at least one such epoch).
    EarlyStopping {
        monitor: String,
        min_delta: f32,
        patience: usize,
    },
    /// Stop after an epoch whose loss is NaN or infinite.
    TerminateOnNaN,
}

impl Callback {
    pub fn from_params(kind: CallbackKind, params: &Params) -> Result<Self> {
        let p = params::validate(kind.name(), kind.schema(), params)?;
        Ok(match kind {
            CallbackKind::EarlyStopping => Callback::EarlyStopping {
                monitor: p.text("monitor")?.to_owned(),
                min_delta: p.float("min_delta")? as f32,
                patience: p.count("patience")?,
            },
            CallbackKind::TerminateOnNaN => Callback::TerminateOnNaN,
        })
    }

    pub fn kind(&self) -> CallbackKind {
        match self {
            Callback::EarlyStopping { .. } => CallbackKind::EarlyStopping,
            Callback::TerminateOnNaN => CallbackKind::TerminateOnNaN,
        }
    }

    pub fn to_params(&self) -> Params {
        match self {
            Callback::EarlyStopping {
                monitor,
                min_delta,
                patience,
            } => Params::new()
                .with("monitor", monitor.as_str())
                .with("min_delta", *min_delta)
                .with("patience", *patience),
            Callback::TerminateOnNaN => Params::new(),
        }
    }
}

/// At most one callback per kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackSet(BTreeMap<CallbackKind, Callback>);

impl CallbackSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the callback of the same kind.
    pub fn set(&mut self, callback: Callback) {
        self.0.insert(callback.kind(), callback);
    }

    pub fn get(&self, kind: CallbackKind) -> Option<&Callback> {
        self.0.get(&kind)
    }

    pub fn remove(&mut self, kind: CallbackKind) -> Option<Callback> {
        self.0.remove(&kind)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Callback> {
        self.0.values()
    }

    pub fn to_vec(&self) -> Vec<Callback> {
        self.0.values().cloned().collect()
    }
}

/// Epoch-end state machine evaluating a list of callbacks.
///
/// Backends call [`StopMonitor::on_epoch_end`] with each epoch's logs and stop
/// training once it returns `true`.
#[derive(Debug, Clone)]
pub struct StopMonitor {
    callbacks: Vec<Callback>,
    best: f64,
    wait: usize,
}

impl StopMonitor {
    pub fn new(callbacks: &[Callback]) -> Self {
        Self {
            callbacks: callbacks.to_vec(),
            best: f64::INFINITY,
            wait: 0,
        }
    }

    pub fn on_epoch_end(&mut self, epoch: usize, logs: &BTreeMap<String, f64>) -> bool {
        let mut stop = false;
        for cb in &self.callbacks {
            match cb {
                Callback::TerminateOnNaN => {
                    if logs.get("loss").is_some_and(|l| !l.is_finite()) {
                        log::warn!("epoch {epoch}: invalid loss, terminating training");
                        stop = true;
                    }
                }
                Callback::EarlyStopping {
                    monitor,
                    min_delta,
                    patience,
                } => {
                    let current = match logs.get(monitor.as_str()) {
                        Some(v) => *v,
                        None => {
                            log::warn!(
                                "early stopping monitors {monitor} which is not logged, using loss"
                            );
                            match logs.get("loss") {
                                Some(v) => *v,
                                None => continue,
                            }
                        }
                    };
                    if current < self.best - f64::from(*min_delta) {
                        self.best = current;
                        self.wait = 0;
                    } else {
                        self.wait += 1;
                        if self.wait >= *patience {
                            log::info!("epoch {epoch}: early stopping");
                            stop = true;
                        }
                    }
                }
            }
        }
        stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logs(loss: f64) -> BTreeMap<String, f64> {
        BTreeMap::from([("loss".to_owned(), loss)])
    }

    #[test]
    fn set_replaces_same_kind() {
        let mut set = CallbackSet::new();
        let es = |p: usize| {
            Callback::from_params(
                CallbackKind::EarlyStopping,
                &Params::new().with("min_delta", 0).with("patience", p),
            )
            .unwrap()
        };
        set.set(es(0));
        set.set(es(3));
        assert_eq!(set.len(), 1);
        assert_eq!(
            set.get(CallbackKind::EarlyStopping).map(Callback::to_params),
            Some(es(3).to_params())
        );
        assert!(set.remove(CallbackKind::EarlyStopping).is_some());
        assert!(set.get(CallbackKind::EarlyStopping).is_none());
    }

    #[test]
    fn early_stopping_requires_its_parameters() {
        assert!(Callback::from_params(CallbackKind::EarlyStopping, &Params::new()).is_err());
        assert!(
            Callback::from_params(
                CallbackKind::EarlyStopping,
                &Params::new().with("min_delta", -1.0).with("patience", 0)
            )
            .is_err()
        );
        assert!(
            Callback::from_params(CallbackKind::TerminateOnNaN, &Params::new().with("x", 1))
                .is_err()
        );
    }

    #[test]
    fn early_stopping_waits_for_patience() {
        let cb = Callback::EarlyStopping {
            monitor: "loss".into(),
            min_delta: 0.0,
            patience: 1,
        };
        let mut mon = StopMonitor::new(&[cb]);
        assert!(!mon.on_epoch_end(1, &logs(1.0)));
        assert!(!mon.on_epoch_end(2, &logs(0.5)));
        assert!(mon.on_epoch_end(3, &logs(0.6)));
    }

    #[test]
    fn zero_patience_stops_on_first_plateau() {
        let cb = Callback::EarlyStopping {
            monitor: "val_loss".into(),
            min_delta: 0.1,
            patience: 0,
        };
        let mut mon = StopMonitor::new(&[cb]);
        // Falls back to `loss` since no validation log exists.
        assert!(!mon.on_epoch_end(1, &logs(1.0)));
        assert!(mon.on_epoch_end(2, &logs(0.95)));
    }

    #[test]
    fn terminate_on_nan() {
        let mut mon = StopMonitor::new(&[Callback::TerminateOnNaN]);
        assert!(!mon.on_epoch_end(1, &logs(1.0)));
        assert!(mon.on_epoch_end(2, &logs(f64::NAN)));
    }
}
