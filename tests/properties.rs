//! Session invariants checked against the public API.

use nn_workbench::views::Mark;
use nn_workbench::{DataSession, Error, IngestError, ModelSession, Params, Phase, Side, ingest};

const CSV: &[u8] = b"x1,x2,label,y\n0.0,1.0,a,1\n1.0,0.0,b,1\n0.0,0.0,a,0\n1.0,1.0,b,0\n0.5,0.5,a,1\n";

fn shape(n: usize) -> Params {
    Params::new().with("shape", vec![n])
}

fn dense(units: usize, activation: &str) -> Params {
    Params::new().with("units", units).with("activation", activation)
}

fn data() -> DataSession {
    let mut s = DataSession::new();
    s.upload(CSV).unwrap();
    s
}

/// x1, x2 -> y, created but not compiled.
fn created() -> ModelSession {
    let mut m = ModelSession::new();
    m.set_layer("Input", "in", &shape(2), &[]).unwrap();
    m.set_layer("Dense", "hidden", &dense(4, "tanh"), &["in"]).unwrap();
    m.set_layer("Dense", "out", &dense(1, "sigmoid"), &["hidden"]).unwrap();
    m.set_outputs(&["out"]).unwrap();
    m.create().unwrap();
    m
}

fn compiled() -> ModelSession {
    let mut m = created();
    m.set_features("in", &["x1", "x2"], Side::Input).unwrap();
    m.set_features("out", &["y"], Side::Output).unwrap();
    m.set_optimizer("SGD", &Params::new().with("learning_rate", 0.1)).unwrap();
    m.set_loss("out", "BinaryCrossentropy").unwrap();
    m.set_metrics("out", &["BinaryAccuracy"]).unwrap();
    m.compile().unwrap();
    m
}

#[test]
fn upload_matches_independent_parse() {
    let semicolons: &[u8] = b"p;q;r\n1;2.5;x\n3;4.5;y\n5;;z\n";
    let decimal_commas: &[u8] = b"x;y\n1,5;2,5\n3,5;4,5\n5,5;6,5\n";
    for bytes in [CSV, semicolons, decimal_commas] {
        let mut s = DataSession::new();
        s.upload(bytes).unwrap();
        assert_eq!(s.dataframe(), &ingest::read_csv(bytes).unwrap());
    }
}

#[test]
fn invalid_csv_leaves_session_empty() {
    let cases: [(&[u8], bool); 6] = [
        (b"", true),
        (b"a\tb\n1\t2\n3\t4\n", true),
        (b"a,b\n1,2\n   3 4\n   5 6\n", true),
        (b"1,2\n3,4\n5,6\n", false),
        (b"a,b\nk,1,2\nk,3,4\n", false),
        (b"a,b\n1,2\n", false),
    ];
    for (bytes, is_parse) in cases {
        let mut s = DataSession::new();
        let err = s.upload(bytes).unwrap_err();
        match err {
            Error::Upload(IngestError::ParseCsv(_)) => assert!(is_parse, "{bytes:?}"),
            Error::Upload(IngestError::ValidateData(_)) => assert!(!is_parse, "{bytes:?}"),
            other => panic!("unexpected {other:?} for {bytes:?}"),
        }
        assert!(s.empty());
    }
}

#[test]
fn unused_columns_preserve_order() {
    let mut s = data();
    s.set_unused_columns(&["y", "x1", "label", "x2"], &["label", "x1"]);
    assert_eq!(s.get_unused_columns(), vec!["y", "x2"]);

    s.set_unused_columns(&["x1", "x2"], &["x1", "x2"]);
    assert!(s.get_unused_columns().is_empty());
}

#[test]
fn layer_names_are_unique() {
    let mut m = ModelSession::new();
    m.set_layer("Input", "a", &shape(2), &[]).unwrap();
    m.set_layer("Dense", "b", &dense(2, "relu"), &["a"]).unwrap();
    let err = m.set_layer("Dense", "b", &dense(3, "relu"), &["a"]).unwrap_err();
    assert!(matches!(err, Error::Set(_)));
    assert_eq!(m.layers().len(), 2);
}

#[test]
fn connection_arity_is_enforced() {
    let mut m = ModelSession::new();
    m.set_layer("Input", "a", &shape(2), &[]).unwrap();
    assert!(matches!(
        m.set_layer("Input", "b", &shape(2), &["a"]),
        Err(Error::Set(_))
    ));
    assert!(matches!(
        m.set_layer("Dense", "d", &dense(2, "relu"), &[]),
        Err(Error::Layer(_))
    ));
    assert!(matches!(
        m.set_layer("Concatenate", "c", &Params::new(), &["a"]),
        Err(Error::Layer(_))
    ));
    assert!(matches!(
        m.set_layer("Dense", "d", &dense(2, "relu"), &["nowhere"]),
        Err(Error::Layer(_))
    ));
    assert_eq!(m.layers().len(), 1);

    m.set_layer("Input", "b", &shape(3), &[]).unwrap();
    m.set_layer("Concatenate", "c", &Params::new(), &["a", "b"]).unwrap();
    m.set_outputs(&["c"]).unwrap();
    m.create().unwrap();
    assert_eq!(m.feature_count("c"), Some(5));
}

#[test]
fn history_epochs_keep_counting() {
    let table = data();
    let mut m = compiled();
    assert_eq!(m.fit(table.dataframe(), 2, 3, 0.0).unwrap().len(), 3);
    assert_eq!(m.fit(table.dataframe(), 2, 2, 0.0).unwrap().len(), 2);
    assert_eq!(m.history().epochs(), vec![1, 2, 3, 4, 5]);
    assert_eq!(m.history_table().unwrap().rows(), 5);
}

#[test]
fn feature_count_guard() {
    let mut m = created();
    assert!(matches!(
        m.set_features("in", &["x1", "x2", "y"], Side::Input),
        Err(Error::Set(_))
    ));
    assert!(!m.configured("in"));

    m.set_features("in", &["x1"], Side::Input).unwrap();
    assert!(!m.configured("in"));
    assert!(!m.input_configured());

    m.set_features("in", &["x1", "x2"], Side::Input).unwrap();
    assert!(m.configured("in"));
    assert!(m.input_configured());
    assert!(!m.output_configured());
}

#[test]
fn lifecycle_gating() {
    let table = data();
    let mut m = created();
    m.set_features("in", &["x1", "x2"], Side::Input).unwrap();
    m.set_features("out", &["y"], Side::Output).unwrap();
    m.set_optimizer("Adam", &Params::new()).unwrap();

    assert!(matches!(m.compile(), Err(Error::Model(_))));
    assert!(matches!(m.fit(table.dataframe(), 2, 1, 0.0), Err(Error::Model(_))));
    assert!(matches!(m.predict(table.dataframe(), 2), Err(Error::Model(_))));
    assert_eq!(m.phase(), Phase::Built);

    m.set_loss("out", "MeanSquaredError").unwrap();
    m.compile().unwrap();

    let mut fresh = created();
    fresh.set_features("in", &["x1", "x2"], Side::Input).unwrap();
    fresh.set_optimizer("SGD", &Params::new()).unwrap();
    fresh.set_loss("out", "MeanSquaredError").unwrap();
    fresh.compile().unwrap();
    assert!(!fresh.output_configured());
    let preds = fresh.predict(table.dataframe(), 2).unwrap();
    assert_eq!(preds[0].rows(), 5);
    assert!(matches!(fresh.fit(table.dataframe(), 2, 1, 0.0), Err(Error::Model(_))));
}

#[test]
fn reuploaded_model_evaluates_the_same() {
    let table = data();
    let mut m = compiled();
    m.fit(table.dataframe(), 2, 2, 0.0).unwrap();
    let before = m.evaluate(table.dataframe(), 2).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    m.save(&path).unwrap();

    let mut copy = ModelSession::new();
    copy.load(&path).unwrap();
    assert_eq!(copy.phase(), Phase::Compiled);
    assert_eq!(copy.feature_count("in"), Some(2));
    copy.set_features("in", &["x1", "x2"], Side::Input).unwrap();
    copy.set_features("out", &["y"], Side::Output).unwrap();
    let after = copy.evaluate(table.dataframe(), 2).unwrap();

    assert_eq!(before.keys().collect::<Vec<_>>(), after.keys().collect::<Vec<_>>());
    for (name, v) in &before {
        assert!((v - after[name]).abs() <= 1e-6 * v.abs().max(1.0), "{name}");
    }
}

#[test]
fn plot_preconditions() {
    let s = data();
    let hist = s.plot_columns(Some("x1"), Some("x1"), false).unwrap();
    assert_eq!(hist.mark, Mark::Bar);

    let line = s.plot_columns(Some("x1"), Some("x2"), true).unwrap();
    assert_eq!(line.mark, Mark::Line);

    assert!(matches!(
        s.plot_columns(Some("label"), Some("x1"), false),
        Err(Error::Plot(_))
    ));

    let mut m = compiled();
    assert!(matches!(m.plot_history(&["loss"], false), Err(Error::Plot(_))));
    m.fit(s.dataframe(), 2, 2, 0.0).unwrap();
    assert!(matches!(m.plot_history(&[], false), Err(Error::Plot(_))));
    assert!(matches!(m.plot_history(&["nope"], false), Err(Error::Plot(_))));
    let chart = m.plot_history(&["loss", "binary_accuracy"], true).unwrap();
    assert_eq!(chart.data.len(), 4);
}
