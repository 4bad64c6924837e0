//! Parameter dictionaries and the schemas registries validate them against.
//!
//! The widget layer hands over loosely typed `name -> value` maps. Each
//! registered kind declares a fixed list of [`ParamSpec`]s; [`validate`]
//! checks a map against that list and fills in defaults so the typed
//! constructors downstream can read every value without further checks.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Shape(Vec<usize>),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => write!(f, "{v:?}"),
            ParamValue::Shape(v) => {
                let dims: Vec<String> = v.iter().map(usize::to_string).collect();
                write!(f, "({},)", dims.join(", "))
            }
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(i64::from(v))
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Float(f64::from(v))
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

impl From<Vec<usize>> for ParamValue {
    fn from(v: Vec<usize>) -> Self {
        ParamValue::Shape(v)
    }
}

/// Ordered `name -> value` map.
///
/// ```rust
/// use nn_workbench::Params;
///
/// let p = Params::new().with("units", 32).with("activation", "relu");
/// assert_eq!(p.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with<K: Into<String>, V: Into<ParamValue>>(mut self, name: K, value: V) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert<K: Into<String>, V: Into<ParamValue>>(&mut self, name: K, value: V) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Float value, accepting integers.
    pub(crate) fn float(&self, name: &str) -> Result<f64> {
        match self.get(name) {
            Some(ParamValue::Float(v)) => Ok(*v),
            Some(ParamValue::Int(v)) => Ok(*v as f64),
            other => Err(missing(name, other)),
        }
    }

    pub(crate) fn int(&self, name: &str) -> Result<i64> {
        match self.get(name) {
            Some(ParamValue::Int(v)) => Ok(*v),
            other => Err(missing(name, other)),
        }
    }

    pub(crate) fn count(&self, name: &str) -> Result<usize> {
        let v = self.int(name)?;
        usize::try_from(v).map_err(|_| Error::Set(format!("{name} must be >= 0, got {v}")))
    }

    pub(crate) fn flag(&self, name: &str) -> Result<bool> {
        match self.get(name) {
            Some(ParamValue::Bool(v)) => Ok(*v),
            other => Err(missing(name, other)),
        }
    }

    pub(crate) fn text(&self, name: &str) -> Result<&str> {
        match self.get(name) {
            Some(ParamValue::Text(v)) => Ok(v),
            other => Err(missing(name, other)),
        }
    }

    pub(crate) fn shape(&self, name: &str) -> Result<&[usize]> {
        match self.get(name) {
            Some(ParamValue::Shape(v)) => Ok(v),
            other => Err(missing(name, other)),
        }
    }
}

fn missing(name: &str, got: Option<&ParamValue>) -> Error {
    match got {
        Some(v) => Error::Set(format!("parameter {name} has unexpected value {v}")),
        None => Error::Set(format!("parameter {name} is missing")),
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Value kind accepted for a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    /// Integer in `[min, max]`.
    Int { min: i64, max: i64 },
    /// Float between `min` and `max`, each end inclusive or not.
    Float {
        min: f64,
        max: f64,
        min_inclusive: bool,
        max_inclusive: bool,
    },
    Bool,
    /// One of a fixed set of names.
    Choice(&'static [&'static str]),
    /// Non-empty list of positive integers of the given length.
    Shape { rank: usize },
}

impl ParamKind {
    pub const POSITIVE_INT: ParamKind = ParamKind::Int {
        min: 1,
        max: i64::MAX,
    };

    pub const NON_NEGATIVE_INT: ParamKind = ParamKind::Int {
        min: 0,
        max: i64::MAX,
    };

    /// `(0, +inf)`
    pub const POSITIVE_FLOAT: ParamKind = ParamKind::Float {
        min: 0.0,
        max: f64::INFINITY,
        min_inclusive: false,
        max_inclusive: false,
    };

    /// `[0, +inf)`
    pub const NON_NEGATIVE_FLOAT: ParamKind = ParamKind::Float {
        min: 0.0,
        max: f64::INFINITY,
        min_inclusive: true,
        max_inclusive: false,
    };

    /// `(0, 1)`
    pub const OPEN_UNIT: ParamKind = ParamKind::Float {
        min: 0.0,
        max: 1.0,
        min_inclusive: false,
        max_inclusive: false,
    };

    /// `[0, 1)`
    pub const HALF_OPEN_UNIT: ParamKind = ParamKind::Float {
        min: 0.0,
        max: 1.0,
        min_inclusive: true,
        max_inclusive: false,
    };

    /// `(0, 1]`
    pub const UNIT_EXCLUDING_ZERO: ParamKind = ParamKind::Float {
        min: 0.0,
        max: 1.0,
        min_inclusive: false,
        max_inclusive: true,
    };

    fn check(self, name: &str, value: &ParamValue) -> Result<ParamValue> {
        let bad = || Error::Set(format!("parameter {name}: {value} is not {}", self.describe()));
        match (self, value) {
            (ParamKind::Int { min, max }, ParamValue::Int(v)) => {
                if (min..=max).contains(v) {
                    Ok(value.clone())
                } else {
                    Err(bad())
                }
            }
            (
                ParamKind::Float {
                    min,
                    max,
                    min_inclusive,
                    max_inclusive,
                },
                ParamValue::Float(_) | ParamValue::Int(_),
            ) => {
                let v = match value {
                    ParamValue::Float(v) => *v,
                    ParamValue::Int(v) => *v as f64,
                    _ => return Err(bad()),
                };
                let above = if min_inclusive { v >= min } else { v > min };
                let below = if max_inclusive { v <= max } else { v < max };
                if v.is_finite() && above && below {
                    Ok(ParamValue::Float(v))
                } else {
                    Err(bad())
                }
            }
            (ParamKind::Bool, ParamValue::Bool(_)) => Ok(value.clone()),
            (ParamKind::Choice(names), ParamValue::Text(v)) => names
                .iter()
                .find(|n| n.eq_ignore_ascii_case(v))
                .map(|n| ParamValue::Text((*n).to_owned()))
                .ok_or_else(bad),
            (ParamKind::Shape { rank }, ParamValue::Shape(dims)) => {
                if dims.len() == rank && dims.iter().all(|&d| d > 0) {
                    Ok(value.clone())
                } else {
                    Err(bad())
                }
            }
            // A one-dimensional shape may be given as a bare integer.
            (ParamKind::Shape { rank: 1 }, ParamValue::Int(v)) if *v > 0 => {
                Ok(ParamValue::Shape(vec![*v as usize]))
            }
            _ => Err(bad()),
        }
    }

    fn describe(self) -> String {
        match self {
            ParamKind::Int { min, max } if max == i64::MAX => format!("an integer >= {min}"),
            ParamKind::Int { min, max } => format!("an integer in [{min}, {max}]"),
            ParamKind::Float {
                min,
                max,
                min_inclusive,
                max_inclusive,
            } => format!(
                "a number in {}{min}, {max}{}",
                if min_inclusive { "[" } else { "(" },
                if max_inclusive { "]" } else { ")" }
            ),
            ParamKind::Bool => "a boolean".to_owned(),
            ParamKind::Choice(names) => format!("one of {}", names.join(", ")),
            ParamKind::Shape { rank } => format!("a shape of {rank} positive integers"),
        }
    }
}

/// Declaration of one accepted parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    /// Names that are accepted and rewritten to `name`.
    pub aliases: &'static [&'static str],
    /// `None` marks the parameter as required.
    pub default: Option<DefaultValue>,
}

/// Compile-time default for a [`ParamSpec`].
#[derive(Debug, Clone, Copy)]
pub enum DefaultValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(&'static str),
}

impl From<DefaultValue> for ParamValue {
    fn from(d: DefaultValue) -> Self {
        match d {
            DefaultValue::Int(v) => ParamValue::Int(v),
            DefaultValue::Float(v) => ParamValue::Float(v),
            DefaultValue::Bool(v) => ParamValue::Bool(v),
            DefaultValue::Text(v) => ParamValue::Text(v.to_owned()),
        }
    }
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            aliases: &[],
            default: None,
        }
    }

    pub const fn optional(name: &'static str, kind: ParamKind, default: DefaultValue) -> Self {
        Self {
            name,
            kind,
            aliases: &[],
            default: Some(default),
        }
    }

    pub const fn aliased(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// Check `params` against `schema`, returning a normalized copy with
/// defaults filled in and aliases resolved.
pub fn validate(owner: &str, schema: &[ParamSpec], params: &Params) -> Result<Params> {
    let mut out = Params::new();

    for (name, value) in params.iter() {
        let spec = schema
            .iter()
            .find(|s| s.name == name || s.aliases.contains(&name))
            .ok_or_else(|| Error::Set(format!("{owner} does not accept parameter {name}")))?;
        if out.get(spec.name).is_some() {
            return Err(Error::Set(format!(
                "{owner}: parameter {} given more than once",
                spec.name
            )));
        }
        out.insert(spec.name, spec.kind.check(spec.name, value)?);
    }

    for spec in schema {
        if out.get(spec.name).is_some() {
            continue;
        }
        match spec.default {
            Some(d) => out.insert(spec.name, spec.kind.check(spec.name, &d.into())?),
            None => {
                return Err(Error::Set(format!(
                    "{owner} requires parameter {}",
                    spec.name
                )));
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &[ParamSpec] = &[
        ParamSpec::required("units", ParamKind::POSITIVE_INT),
        ParamSpec::optional("rate", ParamKind::OPEN_UNIT, DefaultValue::Float(0.5)).aliased(&["p"]),
        ParamSpec::optional("mode", ParamKind::Choice(&["fast", "slow"]), DefaultValue::Text("fast")),
    ];

    #[test]
    fn fills_defaults_and_resolves_aliases() {
        let p = validate("Test", SCHEMA, &Params::new().with("units", 3).with("p", 0.25)).unwrap();
        assert_eq!(p.count("units").unwrap(), 3);
        assert_eq!(p.float("rate").unwrap(), 0.25);
        assert_eq!(p.text("mode").unwrap(), "fast");
    }

    #[test]
    fn rejects_unknown_missing_and_out_of_range() {
        assert!(validate("Test", SCHEMA, &Params::new()).is_err());
        assert!(validate("Test", SCHEMA, &Params::new().with("units", 0)).is_err());
        assert!(validate("Test", SCHEMA, &Params::new().with("units", 1).with("rate", 1.0)).is_err());
        assert!(validate("Test", SCHEMA, &Params::new().with("units", 1).with("bogus", 1)).is_err());
        assert!(validate("Test", SCHEMA, &Params::new().with("units", 1.5)).is_err());
    }

    #[test]
    fn choices_are_case_insensitive() {
        let p = validate("Test", SCHEMA, &Params::new().with("units", 1).with("mode", "SLOW")).unwrap();
        assert_eq!(p.text("mode").unwrap(), "slow");
    }

    #[test]
    fn params_roundtrip_through_json() {
        let p: Params = serde_json::from_str(r#"{"shape":[4],"units":3,"rate":0.1,"on":true}"#).unwrap();
        assert_eq!(p.get("shape"), Some(&ParamValue::Shape(vec![4])));
        assert_eq!(p.get("units"), Some(&ParamValue::Int(3)));
        assert_eq!(p.get("rate"), Some(&ParamValue::Float(0.1)));
        assert_eq!(p.get("on"), Some(&ParamValue::Bool(true)));
    }
}
