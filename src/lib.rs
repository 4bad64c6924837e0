//! Session core of a neural-network workbench for tabular data.
//!
//! `nn-workbench` holds the state behind a point-and-click model builder. A
//! widget layer drives two sessions and threads data between them:
//!
//! - [`DataSession`]: CSV ingest, column accounting, descriptive statistics
//!   and column plots.
//! - [`ModelSession`]: a layer graph built one layer at a time (or uploaded),
//!   column bindings for every input and output layer, optimizer / loss /
//!   metric / callback settings, and the fit / evaluate / predict workflows
//!   with an append-only training history.
//!
//! Numeric work is delegated to a [`ModelBackend`]. [`NativeBackend`] is the
//! CPU implementation shipped with the crate.
//!
//! # Errors
//!
//! Every public operation returns [`Result`]. Failures come from the closed
//! [`Error`] taxonomy and leave the session as it was.
//!
//! # Data layout
//!
//! - Scalars handed to the backend are `f32`; tables keep `f64` / `i64` / text.
//! - [`Matrix`] stores samples row-major, `(rows, features)`.
//! - Dense weights are row-major with shape `(out_dim, in_dim)`.
//!
//! # Quick start
//!
//! ```rust
//! use nn_workbench::{DataSession, ModelSession, Params, Side};
//!
//! # fn main() -> nn_workbench::Result<()> {
//! let mut data = DataSession::new();
//! data.upload(b"a,b,y\n0,1,1\n1,0,1\n0,0,0\n1,1,0\n")?;
//!
//! let mut model = ModelSession::new();
//! model.set_layer("Input", "in", &Params::new().with("shape", vec![2_usize]), &[])?;
//! model.set_layer(
//!     "Dense",
//!     "out",
//!     &Params::new().with("units", 1).with("activation", "sigmoid"),
//!     &["in"],
//! )?;
//! model.set_outputs(&["out"])?;
//! model.create()?;
//!
//! model.set_features("in", &["a", "b"], Side::Input)?;
//! model.set_features("out", &["y"], Side::Output)?;
//! model.set_optimizer("Adam", &Params::new().with("learning_rate", 0.01))?;
//! model.set_loss("out", "BinaryCrossentropy")?;
//! model.set_metrics("out", &["BinaryAccuracy"])?;
//! model.compile()?;
//!
//! model.fit(data.dataframe(), 2, 3, 0.0)?;
//! assert_eq!(model.history().len(), 3);
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod backend;
pub mod callbacks;
pub mod data;
pub mod data_session;
pub mod error;
pub mod history;
pub mod ingest;
pub mod layers;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod native;
pub mod optim;
pub mod params;
pub mod table;
pub mod views;

pub use activation::Activation;
pub use backend::{CompileSpec, Feeds, FitSpec, Logs, ModelBackend};
pub use callbacks::{Callback, CallbackKind};
pub use data::Matrix;
pub use data_session::DataSession;
pub use error::{BackendError, Error, IngestError, Result};
pub use history::{EpochRecord, History};
pub use layers::{LayerKind, LayerParams};
pub use loss::LossKind;
pub use metrics::MetricKind;
pub use model::{ModelSession, Phase, Port, Side};
pub use native::{NativeBackend, NativeConfig};
pub use optim::{OptimizerConfig, OptimizerKind};
pub use params::{ParamValue, Params};
pub use table::{Column, Dtype, Table};
pub use views::ChartSpec;
