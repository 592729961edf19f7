//! Export pipeline: build the demo network, run one forward pass, write the
//! serialized graph, then patch the clamp node to the plugin operator and
//! write the patched graph alongside it.
//!
//! ```
//! cargo run --release --bin export_model
//! cargo run --release --bin infer
//! ```

use std::error::Error;
use std::fs;

use cliprt::export::{DemoModel, INPUT_SHAPE, MODEL_PATH, PATCHED_MODEL_PATH};
use cliprt::graph::Graph;
use cliprt::rewrite::replace_clip_with_plugin;
use cliprt::tensor::Tensor;

fn main() -> Result<(), Box<dyn Error>> {
    fs::create_dir_all("models")?;

    // Build the network and run it once on a constant input. The weights
    // are freshly sampled, so this value changes from run to run.
    let model = DemoModel::new();
    let input = Tensor::full(&INPUT_SHAPE, 1.5);
    let output = model.forward(&input)?;
    println!("raw network output mean: {}", output.mean());

    model.to_graph().save(MODEL_PATH)?;
    println!("wrote {}", MODEL_PATH);

    // Patch a fresh copy loaded from disk; the exported file is left
    // untouched.
    let mut patched = Graph::load(MODEL_PATH)?;
    let replaced = replace_clip_with_plugin(&mut patched);
    println!("replaced {} Clip node(s) with the plugin operator", replaced);

    patched.save(PATCHED_MODEL_PATH)?;
    println!("wrote {}", PATCHED_MODEL_PATH);

    Ok(())
}
