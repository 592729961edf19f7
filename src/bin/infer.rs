//! Inference pipeline: register the plugin kernel, build an engine from the
//! patched graph written by `export_model`, run one inference on a constant
//! input and print the mean of the output.

use std::error::Error;

use cliprt::engine::{EngineBuilder, GIB};
use cliprt::export::PATCHED_MODEL_PATH;
use cliprt::plugin;
use cliprt::registry::OpRegistry;

fn main() -> Result<(), Box<dyn Error>> {
    // The patched graph dispatches its clamp step to the plugin operator,
    // so the kernel must be registered before the graph is parsed.
    let mut registry = OpRegistry::with_builtin_ops();
    plugin::register(&mut registry);

    let engine = EngineBuilder::new()
        .workspace_limit(8 * GIB)
        .build_from_file(PATCHED_MODEL_PATH, &registry)?;
    println!(
        "engine built, workspace required: {} bytes",
        engine.workspace_size()
    );

    let mut ctx = engine.create_context();
    ctx.input_mut(0).fill(1.5);
    ctx.execute()?;

    let output = ctx.output(0).ok_or("engine produced no output")?;
    println!("engine output mean: {}", output.mean());

    Ok(())
}
