//! Layer registry.
//!
//! The set of layer kinds is closed. Each kind declares a parameter schema and a
//! connection arity; [`LayerParams::from_params`] turns a validated dictionary into
//! the typed record a backend consumes.

use serde::{Deserialize, Serialize};

use crate::params::{self, DefaultValue, ParamKind, ParamSpec, Params};
use crate::{Activation, Error, Result};

/// Tag selecting one of the supported layer kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LayerKind {
    Input,
    Dense,
    Concatenate,
    BatchNormalization,
    Dropout,
}

/// Number of upstream layers a kind connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// No connection (Input).
    None,
    /// Exactly one upstream layer.
    One,
    /// At least `n` upstream layers.
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Arity::None => n == 0,
            Arity::One => n == 1,
            Arity::AtLeast(min) => n >= min,
        }
    }
}

const INPUT_SCHEMA: &[ParamSpec] = &[ParamSpec::required("shape", ParamKind::Shape { rank: 1 })];

const DENSE_SCHEMA: &[ParamSpec] = &[
    ParamSpec::required("units", ParamKind::POSITIVE_INT),
    ParamSpec::optional(
        "activation",
        ParamKind::Choice(Activation::NAMES),
        DefaultValue::Text("linear"),
    ),
];

const BATCH_NORM_SCHEMA: &[ParamSpec] = &[
    ParamSpec::optional(
        "momentum",
        ParamKind::UNIT_EXCLUDING_ZERO,
        DefaultValue::Float(0.99),
    ),
    ParamSpec::optional("epsilon", ParamKind::OPEN_UNIT, DefaultValue::Float(0.001)),
];

const DROPOUT_SCHEMA: &[ParamSpec] = &[ParamSpec::required("rate", ParamKind::OPEN_UNIT)];

impl LayerKind {
    pub const ALL: [LayerKind; 5] = [
        LayerKind::Input,
        LayerKind::Dense,
        LayerKind::Concatenate,
        LayerKind::BatchNormalization,
        LayerKind::Dropout,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LayerKind::Input => "Input",
            LayerKind::Dense => "Dense",
            LayerKind::Concatenate => "Concatenate",
            LayerKind::BatchNormalization => "BatchNormalization",
            LayerKind::Dropout => "Dropout",
        }
    }

    /// Registry lookup. Unknown names fail with [`Error::Set`].
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::Set(format!("unknown layer kind {name:?}")))
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        Self::ALL.into_iter().map(LayerKind::name)
    }

    pub fn schema(self) -> &'static [ParamSpec] {
        match self {
            LayerKind::Input => INPUT_SCHEMA,
            LayerKind::Dense => DENSE_SCHEMA,
            LayerKind::Concatenate => &[],
            LayerKind::BatchNormalization => BATCH_NORM_SCHEMA,
            LayerKind::Dropout => DROPOUT_SCHEMA,
        }
    }

    pub fn arity(self) -> Arity {
        match self {
            LayerKind::Input => Arity::None,
            LayerKind::Concatenate => Arity::AtLeast(2),
            LayerKind::Dense | LayerKind::BatchNormalization | LayerKind::Dropout => Arity::One,
        }
    }
}

/// Typed, validated layer parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum LayerParams {
    Input { shape: [usize; 1] },
    Dense { units: usize, activation: Activation },
    Concatenate,
    BatchNormalization { momentum: f32, epsilon: f32 },
    Dropout { rate: f32 },
}

impl LayerParams {
    /// Validate `params` against the schema of `kind` and build the typed record.
    pub fn from_params(kind: LayerKind, params: &Params) -> Result<Self> {
        let p = params::validate(kind.name(), kind.schema(), params)?;
        Ok(match kind {
            LayerKind::Input => LayerParams::Input {
                shape: [p.shape("shape")?[0]],
            },
            LayerKind::Dense => LayerParams::Dense {
                units: p.count("units")?,
                activation: Activation::from_name(p.text("activation")?)?,
            },
            LayerKind::Concatenate => LayerParams::Concatenate,
            LayerKind::BatchNormalization => LayerParams::BatchNormalization {
                momentum: p.float("momentum")? as f32,
                epsilon: p.float("epsilon")? as f32,
            },
            LayerKind::Dropout => LayerParams::Dropout {
                rate: p.float("rate")? as f32,
            },
        })
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            LayerParams::Input { .. } => LayerKind::Input,
            LayerParams::Dense { .. } => LayerKind::Dense,
            LayerParams::Concatenate => LayerKind::Concatenate,
            LayerParams::BatchNormalization { .. } => LayerKind::BatchNormalization,
            LayerParams::Dropout { .. } => LayerKind::Dropout,
        }
    }

    /// Declared feature count of an Input layer.
    pub fn input_features(&self) -> Option<usize> {
        match self {
            LayerParams::Input { shape } => Some(shape[0]),
            _ => None,
        }
    }

    /// Dictionary form, suitable for display or for feeding back into `from_params`.
    pub fn to_params(&self) -> Params {
        match self {
            LayerParams::Input { shape } => Params::new().with("shape", shape.to_vec()),
            LayerParams::Dense { units, activation } => Params::new()
                .with("units", *units)
                .with("activation", activation.name()),
            LayerParams::Concatenate => Params::new(),
            LayerParams::BatchNormalization { momentum, epsilon } => Params::new()
                .with("momentum", *momentum)
                .with("epsilon", *epsilon),
            LayerParams::Dropout { rate } => Params::new().with("rate", *rate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lookup_is_case_insensitive() {
        assert_eq!(LayerKind::from_name("dense").unwrap(), LayerKind::Dense);
        assert_eq!(
            LayerKind::from_name("BatchNormalization").unwrap(),
            LayerKind::BatchNormalization
        );
        assert!(matches!(LayerKind::from_name("Conv2D"), Err(Error::Set(_))));
    }

    #[test]
    fn dense_defaults_to_linear() {
        let p = LayerParams::from_params(LayerKind::Dense, &Params::new().with("units", 8)).unwrap();
        assert_eq!(
            p,
            LayerParams::Dense {
                units: 8,
                activation: Activation::Linear
            }
        );
    }

    #[test]
    fn input_accepts_shape_or_integer() {
        let a = LayerParams::from_params(LayerKind::Input, &Params::new().with("shape", vec![4]))
            .unwrap();
        let b = LayerParams::from_params(LayerKind::Input, &Params::new().with("shape", 4)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.input_features(), Some(4));
        assert!(
            LayerParams::from_params(LayerKind::Input, &Params::new().with("shape", vec![2, 2]))
                .is_err()
        );
    }

    #[test]
    fn ranges_are_enforced() {
        let bn = |m: f64, e: f64| {
            LayerParams::from_params(
                LayerKind::BatchNormalization,
                &Params::new().with("momentum", m).with("epsilon", e),
            )
        };
        assert!(bn(1.0, 0.001).is_ok());
        assert!(bn(0.0, 0.001).is_err());
        assert!(bn(0.5, 1.0).is_err());

        let drop = |r: f64| LayerParams::from_params(LayerKind::Dropout, &Params::new().with("rate", r));
        assert!(drop(0.3).is_ok());
        assert!(drop(0.0).is_err());
        assert!(drop(1.0).is_err());
    }

    #[test]
    fn params_roundtrip_through_dictionary() {
        let p = LayerParams::Dense {
            units: 3,
            activation: Activation::Tanh,
        };
        assert_eq!(LayerParams::from_params(p.kind(), &p.to_params()).unwrap(), p);
    }

    #[test]
    fn arity_table() {
        assert!(LayerKind::Input.arity().accepts(0));
        assert!(!LayerKind::Dense.arity().accepts(0));
        assert!(LayerKind::Dense.arity().accepts(1));
        assert!(!LayerKind::Concatenate.arity().accepts(1));
        assert!(LayerKind::Concatenate.arity().accepts(3));
    }
}
