use nn_workbench::{DataSession, ModelSession, Params, Side};

const XOR: &[u8] = b"a,b,y\n0,0,0\n0,1,1\n1,0,1\n1,1,0\n";

fn main() -> nn_workbench::Result<()> {
    env_logger::init();

    let mut data = DataSession::new();
    data.upload(XOR)?;
    println!("{}", data.get_stats()?.column_names().join(" | "));

    let mut model = ModelSession::new();
    model.set_name("xor")?;
    model.set_layer("Input", "in", &Params::new().with("shape", 2), &[])?;
    model.set_layer(
        "Dense",
        "hidden",
        &Params::new().with("units", 8).with("activation", "tanh"),
        &["in"],
    )?;
    model.set_layer(
        "Dense",
        "out",
        &Params::new().with("units", 1).with("activation", "sigmoid"),
        &["hidden"],
    )?;
    model.set_outputs(&["out"])?;
    model.create()?;

    model.set_features("in", &["a", "b"], Side::Input)?;
    model.set_features("out", &["y"], Side::Output)?;
    model.set_optimizer("Adam", &Params::new().with("lr", 0.05))?;
    model.set_loss("out", "BinaryCrossentropy")?;
    model.set_metrics("out", &["BinaryAccuracy"])?;
    model.compile()?;
    println!("{}", model.summary()?);

    model.fit(data.dataframe(), 4, 300, 0.0)?;
    if let Some(last) = model.history().records().last() {
        println!("epoch {}: {:?}", last.epoch, last.logs);
    }

    let path = "target/tmp_xor_session.json";
    model.save(path)?;

    let mut loaded = ModelSession::new();
    loaded.load(path)?;
    loaded.set_features("in", &["a", "b"], Side::Input)?;
    let preds = loaded.predict(data.dataframe(), 4)?;
    println!("reloaded {:?}, predictions for {} rows", loaded.name(), preds[0].rows());
    Ok(())
}
