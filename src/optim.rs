//! Optimizer registry.
//!
//! Optimizer *choice* and hyperparameters live here; the update math lives in the
//! backend (see `native::optim` for the reference implementation).

use serde::{Deserialize, Serialize};

use crate::params::{self, DefaultValue, ParamKind, ParamSpec, Params};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// Tag selecting an optimizer.
pub enum OptimizerKind {
    Sgd,
    RmsProp,
    Adam,
    AdaMod,
    RAdam,
    Lamb,
}

const LR_ALIASES: &[&str] = &["lr"];
const BETA1_ALIASES: &[&str] = &["beta1", "β1"];
const BETA2_ALIASES: &[&str] = &["beta2", "β2"];

const SGD_SCHEMA: &[ParamSpec] = &[
    ParamSpec::optional("learning_rate", ParamKind::POSITIVE_FLOAT, DefaultValue::Float(0.01))
        .aliased(LR_ALIASES),
    ParamSpec::optional("momentum", ParamKind::HALF_OPEN_UNIT, DefaultValue::Float(0.0)),
    ParamSpec::optional("nesterov", ParamKind::Bool, DefaultValue::Bool(false)),
];

const RMSPROP_SCHEMA: &[ParamSpec] = &[
    ParamSpec::optional("learning_rate", ParamKind::POSITIVE_FLOAT, DefaultValue::Float(0.001))
        .aliased(LR_ALIASES),
    ParamSpec::optional("rho", ParamKind::OPEN_UNIT, DefaultValue::Float(0.9)),
    ParamSpec::optional("momentum", ParamKind::HALF_OPEN_UNIT, DefaultValue::Float(0.0)),
    ParamSpec::optional("epsilon", ParamKind::POSITIVE_FLOAT, DefaultValue::Float(1e-7)),
    ParamSpec::optional("centered", ParamKind::Bool, DefaultValue::Bool(false)),
];

const ADAM_SCHEMA: &[ParamSpec] = &[
    ParamSpec::optional("learning_rate", ParamKind::POSITIVE_FLOAT, DefaultValue::Float(0.001))
        .aliased(LR_ALIASES),
    ParamSpec::optional("beta_1", ParamKind::HALF_OPEN_UNIT, DefaultValue::Float(0.9))
        .aliased(BETA1_ALIASES),
    ParamSpec::optional("beta_2", ParamKind::HALF_OPEN_UNIT, DefaultValue::Float(0.999))
        .aliased(BETA2_ALIASES),
    ParamSpec::optional("epsilon", ParamKind::POSITIVE_FLOAT, DefaultValue::Float(1e-7)),
    ParamSpec::optional("amsgrad", ParamKind::Bool, DefaultValue::Bool(false)),
];

const ADAMOD_SCHEMA: &[ParamSpec] = &[
    ParamSpec::optional("learning_rate", ParamKind::POSITIVE_FLOAT, DefaultValue::Float(0.001))
        .aliased(LR_ALIASES),
    ParamSpec::optional("beta_1", ParamKind::HALF_OPEN_UNIT, DefaultValue::Float(0.9))
        .aliased(BETA1_ALIASES),
    ParamSpec::optional("beta_2", ParamKind::HALF_OPEN_UNIT, DefaultValue::Float(0.999))
        .aliased(BETA2_ALIASES),
    ParamSpec::optional("beta_3", ParamKind::HALF_OPEN_UNIT, DefaultValue::Float(0.999)),
    ParamSpec::optional("epsilon", ParamKind::POSITIVE_FLOAT, DefaultValue::Float(1e-8)),
];

const RADAM_SCHEMA: &[ParamSpec] = &[
    ParamSpec::optional("learning_rate", ParamKind::POSITIVE_FLOAT, DefaultValue::Float(0.001))
        .aliased(LR_ALIASES),
    ParamSpec::optional("beta_1", ParamKind::HALF_OPEN_UNIT, DefaultValue::Float(0.9))
        .aliased(BETA1_ALIASES),
    ParamSpec::optional("beta_2", ParamKind::HALF_OPEN_UNIT, DefaultValue::Float(0.999))
        .aliased(BETA2_ALIASES),
    ParamSpec::optional("epsilon", ParamKind::POSITIVE_FLOAT, DefaultValue::Float(1e-7)),
];

const LAMB_SCHEMA: &[ParamSpec] = &[
    ParamSpec::optional("learning_rate", ParamKind::POSITIVE_FLOAT, DefaultValue::Float(0.001))
        .aliased(LR_ALIASES),
    ParamSpec::optional("beta_1", ParamKind::HALF_OPEN_UNIT, DefaultValue::Float(0.9))
        .aliased(BETA1_ALIASES),
    ParamSpec::optional("beta_2", ParamKind::HALF_OPEN_UNIT, DefaultValue::Float(0.999))
        .aliased(BETA2_ALIASES),
    ParamSpec::optional("epsilon", ParamKind::POSITIVE_FLOAT, DefaultValue::Float(1e-6)),
    ParamSpec::optional("weight_decay", ParamKind::NON_NEGATIVE_FLOAT, DefaultValue::Float(0.0)),
];

impl OptimizerKind {
    pub const ALL: [OptimizerKind; 6] = [
        OptimizerKind::Sgd,
        OptimizerKind::RmsProp,
        OptimizerKind::Adam,
        OptimizerKind::AdaMod,
        OptimizerKind::RAdam,
        OptimizerKind::Lamb,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OptimizerKind::Sgd => "SGD",
            OptimizerKind::RmsProp => "RMSprop",
            OptimizerKind::Adam => "Adam",
            OptimizerKind::AdaMod => "AdaMod",
            OptimizerKind::RAdam => "RAdam",
            OptimizerKind::Lamb => "LAMB",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::Set(format!("unknown optimizer {name:?}")))
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        Self::ALL.into_iter().map(OptimizerKind::name)
    }

    pub fn schema(self) -> &'static [ParamSpec] {
        match self {
            OptimizerKind::Sgd => SGD_SCHEMA,
            OptimizerKind::RmsProp => RMSPROP_SCHEMA,
            OptimizerKind::Adam => ADAM_SCHEMA,
            OptimizerKind::AdaMod => ADAMOD_SCHEMA,
            OptimizerKind::RAdam => RADAM_SCHEMA,
            OptimizerKind::Lamb => LAMB_SCHEMA,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
/// Optimizer choice with validated hyperparameters.
pub enum OptimizerConfig {
    Sgd {
        learning_rate: f32,
        momentum: f32,
        nesterov: bool,
    },
    RmsProp {
        learning_rate: f32,
        rho: f32,
        momentum: f32,
        epsilon: f32,
        centered: bool,
    },
    Adam {
        learning_rate: f32,
        beta_1: f32,
        beta_2: f32,
        epsilon: f32,
        amsgrad: bool,
    },
    AdaMod {
        learning_rate: f32,
        beta_1: f32,
        beta_2: f32,
        beta_3: f32,
        epsilon: f32,
    },
    RAdam {
        learning_rate: f32,
        beta_1: f32,
        beta_2: f32,
        epsilon: f32,
    },
    Lamb {
        learning_rate: f32,
        beta_1: f32,
        beta_2: f32,
        epsilon: f32,
        weight_decay: f32,
    },
}

impl OptimizerConfig {
    /// Validate `params` against the schema of `kind` and build the typed config.
    pub fn from_params(kind: OptimizerKind, params: &Params) -> Result<Self> {
        let p = params::validate(kind.name(), kind.schema(), params)?;
        let f = |name: &str| p.float(name).map(|v| v as f32);
        Ok(match kind {
            OptimizerKind::Sgd => OptimizerConfig::Sgd {
                learning_rate: f("learning_rate")?,
                momentum: f("momentum")?,
                nesterov: p.flag("nesterov")?,
            },
            OptimizerKind::RmsProp => OptimizerConfig::RmsProp {
                learning_rate: f("learning_rate")?,
                rho: f("rho")?,
                momentum: f("momentum")?,
                epsilon: f("epsilon")?,
                centered: p.flag("centered")?,
            },
            OptimizerKind::Adam => OptimizerConfig::Adam {
                learning_rate: f("learning_rate")?,
                beta_1: f("beta_1")?,
                beta_2: f("beta_2")?,
                epsilon: f("epsilon")?,
                amsgrad: p.flag("amsgrad")?,
            },
            OptimizerKind::AdaMod => OptimizerConfig::AdaMod {
                learning_rate: f("learning_rate")?,
                beta_1: f("beta_1")?,
                beta_2: f("beta_2")?,
                beta_3: f("beta_3")?,
                epsilon: f("epsilon")?,
            },
            OptimizerKind::RAdam => OptimizerConfig::RAdam {
                learning_rate: f("learning_rate")?,
                beta_1: f("beta_1")?,
                beta_2: f("beta_2")?,
                epsilon: f("epsilon")?,
            },
            OptimizerKind::Lamb => OptimizerConfig::Lamb {
                learning_rate: f("learning_rate")?,
                beta_1: f("beta_1")?,
                beta_2: f("beta_2")?,
                epsilon: f("epsilon")?,
                weight_decay: f("weight_decay")?,
            },
        })
    }

    /// Defaults of `kind`.
    pub fn default_for(kind: OptimizerKind) -> Result<Self> {
        Self::from_params(kind, &Params::new())
    }

    pub fn kind(&self) -> OptimizerKind {
        match self {
            OptimizerConfig::Sgd { .. } => OptimizerKind::Sgd,
            OptimizerConfig::RmsProp { .. } => OptimizerKind::RmsProp,
            OptimizerConfig::Adam { .. } => OptimizerKind::Adam,
            OptimizerConfig::AdaMod { .. } => OptimizerKind::AdaMod,
            OptimizerConfig::RAdam { .. } => OptimizerKind::RAdam,
            OptimizerConfig::Lamb { .. } => OptimizerKind::Lamb,
        }
    }

    pub fn learning_rate(&self) -> f32 {
        match *self {
            OptimizerConfig::Sgd { learning_rate, .. }
            | OptimizerConfig::RmsProp { learning_rate, .. }
            | OptimizerConfig::Adam { learning_rate, .. }
            | OptimizerConfig::AdaMod { learning_rate, .. }
            | OptimizerConfig::RAdam { learning_rate, .. }
            | OptimizerConfig::Lamb { learning_rate, .. } => learning_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adam_accepts_greek_aliases() {
        let cfg = OptimizerConfig::from_params(
            OptimizerKind::Adam,
            &Params::new()
                .with("lr", 0.001)
                .with("β1", 0.9)
                .with("β2", 0.999),
        )
        .unwrap();
        match cfg {
            OptimizerConfig::Adam {
                learning_rate,
                beta_1,
                beta_2,
                amsgrad,
                ..
            } => {
                assert!((learning_rate - 0.001).abs() < 1e-9);
                assert!((beta_1 - 0.9).abs() < 1e-7);
                assert!((beta_2 - 0.999).abs() < 1e-7);
                assert!(!amsgrad);
            }
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn optimizer_validation_rejects_bad_hyperparams() {
        let bad = |kind, params: Params| OptimizerConfig::from_params(kind, &params).is_err();
        assert!(bad(OptimizerKind::Sgd, Params::new().with("momentum", 1.0)));
        assert!(bad(OptimizerKind::Sgd, Params::new().with("momentum", -0.1)));
        assert!(bad(OptimizerKind::Adam, Params::new().with("beta_1", 1.0)));
        assert!(bad(OptimizerKind::Adam, Params::new().with("epsilon", 0.0)));
        assert!(bad(OptimizerKind::RmsProp, Params::new().with("learning_rate", -1.0)));
        assert!(bad(OptimizerKind::Lamb, Params::new().with("nesterov", true)));
    }

    #[test]
    fn every_kind_has_usable_defaults() {
        for kind in OptimizerKind::ALL {
            let cfg = OptimizerConfig::default_for(kind).unwrap();
            assert_eq!(cfg.kind(), kind);
            assert!(cfg.learning_rate() > 0.0);
        }
        assert_eq!(OptimizerKind::from_name("rmsprop").unwrap(), OptimizerKind::RmsProp);
        assert!(OptimizerKind::from_name("AdaHessian").is_err());
    }
}
