//! End-to-end workflows over both sessions with the native backend.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use nn_workbench::{
    Callback, CallbackKind, DataSession, Error, ModelSession, Params, Phase, Side, Table,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn header() -> Vec<String> {
    (0..10).map(|i| format!("h{i}")).collect()
}

/// 10 columns `h0..h9` of uniform floats in `[-1e5, 1e5]`.
fn random_csv(rows: usize, seed: u64) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut lines = vec![header().join(",")];
    for _ in 0..rows {
        let cells: Vec<String> = (0..10)
            .map(|_| format!("{:.3}", rng.random_range(-1e5_f64..1e5)))
            .collect();
        lines.push(cells.join(","));
    }
    lines
}

fn to_bytes(lines: &[String]) -> Vec<u8> {
    let mut s = lines.join("\n");
    s.push('\n');
    s.into_bytes()
}

fn cols(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("h{i}")).collect()
}

fn shape(n: usize) -> Params {
    Params::new().with("shape", vec![n])
}

fn dense(units: usize, activation: &str) -> Params {
    Params::new().with("units", units).with("activation", activation)
}

/// S1 up to compile.
fn compiled_model() -> ModelSession {
    let mut model = ModelSession::new();
    model.set_layer("Input", "in", &shape(4), &[]).unwrap();
    model.set_layer("Dense", "d", &dense(32, "relu"), &["in"]).unwrap();
    model.set_layer("Dense", "out", &dense(6, "relu"), &["d"]).unwrap();
    model.set_outputs(&["out"]).unwrap();
    model.create().unwrap();

    model.set_features("in", &cols(0..4), Side::Input).unwrap();
    model.set_features("out", &cols(4..10), Side::Output).unwrap();
    model
        .set_optimizer(
            "Adam",
            &Params::new().with("lr", 0.001).with("β1", 0.9).with("β2", 0.999),
        )
        .unwrap();
    model.set_loss("out", "MeanAbsoluteError").unwrap();
    model.set_metrics("out", &["MeanAbsoluteError"]).unwrap();
    model.compile().unwrap();
    model
}

fn all_finite(table: &Table) -> bool {
    table
        .columns()
        .iter()
        .all(|c| c.numbers().is_some_and(|v| v.iter().all(|x| x.is_some_and(f64::is_finite))))
}

#[test]
fn build_compile_fit_evaluate() {
    init_logger();
    let mut data = DataSession::new();
    data.upload(&to_bytes(&random_csv(100, 1))).unwrap();
    assert_eq!(data.dataframe().rows(), 100);

    let mut model = compiled_model();
    model.fit(data.dataframe(), 4, 5, 0.1).unwrap();
    assert!(model.is_trained());

    let history = model.history_table().unwrap();
    assert_eq!(history.rows(), 5);
    for name in [
        "epoch",
        "loss",
        "val_loss",
        "mean_absolute_error",
        "val_mean_absolute_error",
    ] {
        assert!(history.column(name).is_some(), "missing {name}");
    }

    let logs = model.evaluate(data.dataframe(), 4).unwrap();
    assert!(logs["loss"].is_finite());
    assert!(logs.contains_key("mean_absolute_error"));
}

#[test]
fn layer_name_collision() {
    let mut model = ModelSession::new();
    model.set_layer("Input", "in", &shape(4), &[]).unwrap();
    let err = model.set_layer("Input", "in", &shape(2), &[]).unwrap_err();
    assert!(matches!(err, Error::Set(_)));
    assert_eq!(model.layers().len(), 1);
}

#[test]
fn delete_and_rebuild_tail() {
    let mut model = ModelSession::new();
    model.set_layer("Input", "in", &shape(3), &[]).unwrap();
    model.set_layer("Dense", "a", &dense(4, "tanh"), &["in"]).unwrap();
    model.set_layer("Dense", "b", &dense(2, "linear"), &["a"]).unwrap();

    model.delete_last_layer().unwrap();
    model.delete_last_layer().unwrap();
    let names: Vec<&str> = model.layers().iter().map(|l| l.name()).collect();
    assert_eq!(names, vec!["in"]);

    assert!(matches!(model.set_outputs(&["in"]), Err(Error::Set(_))));
    assert!(matches!(model.set_outputs(&[]), Err(Error::Set(_))));

    model.set_layer("Dense", "a", &dense(2, "linear"), &["in"]).unwrap();
    model.set_outputs(&["a"]).unwrap();
    model.create().unwrap();
    assert_eq!(model.feature_count("a"), Some(2));
}

#[test]
fn upload_and_predict() {
    init_logger();
    let mut data = DataSession::new();
    data.upload(&to_bytes(&random_csv(100, 2))).unwrap();

    let mut trained = compiled_model();
    trained.fit(data.dataframe(), 4, 1, 0.0).unwrap();
    let bytes = trained.as_bytes().unwrap();

    let mut fresh = ModelSession::new();
    fresh.upload(&bytes).unwrap();
    assert_eq!(fresh.phase(), Phase::Compiled);
    assert_eq!(fresh.feature_count("in"), Some(4));
    assert_eq!(fresh.feature_count("out"), Some(6));

    fresh.set_features("in", &cols(0..4), Side::Input).unwrap();
    let preds = fresh.predict(data.dataframe(), 4).unwrap();
    assert_eq!(preds.len(), 1);
    assert_eq!(preds[0].rows(), 100);
    assert_eq!(preds[0].width(), 6);
    assert!(all_finite(&preds[0]));
}

#[test]
fn non_numeric_input_is_rejected() {
    let mut lines = random_csv(20, 3);
    let mut cells: Vec<String> = lines[5].split(',').map(str::to_owned).collect();
    cells[2] = "aaaa".to_owned();
    lines[5] = cells.join(",");

    let mut data = DataSession::new();
    data.upload(&to_bytes(&lines)).unwrap();
    assert!(data.has_nonnumeric_dtypes());

    let mut model = compiled_model();
    let err = model.fit(data.dataframe(), 4, 1, 0.0).unwrap_err();
    assert!(matches!(err, Error::Model(_)));
    assert!(err.to_string().contains("non-numeric"), "{err}");
    assert_eq!(model.phase(), Phase::Compiled);
    assert!(model.history().is_empty());
}

#[test]
fn callback_lifecycle() {
    let mut model = compiled_model();
    let params = Params::new().with("min_delta", 0).with("patience", 0);

    model.set_callback("EarlyStopping", &params).unwrap();
    assert!(model.get_callback("EarlyStopping").is_some());

    model.delete_callback("EarlyStopping").unwrap();
    assert!(model.get_callback("EarlyStopping").is_none());

    model.set_callback("EarlyStopping", &params).unwrap();
    model
        .set_callback("EarlyStopping", &params.clone().with("patience", 2))
        .unwrap();
    assert_eq!(model.callbacks().len(), 1);
    assert!(matches!(
        model.get_callback("EarlyStopping"),
        Some(Callback::EarlyStopping { patience: 2, .. })
    ));
    assert_eq!(
        model.callbacks().iter().map(Callback::kind).collect::<Vec<_>>(),
        vec![CallbackKind::EarlyStopping]
    );
}
