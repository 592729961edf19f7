//! cliprt is a small demonstration of routing one step of a computation
//! graph through a custom plugin kernel.
//!
//! The crate contains two pipelines, exposed as the `export_model` and
//! `infer` binaries:
//!
//! - The **export pipeline** builds a fixed three-operator network (clamp
//!   activation, constant offset, pointwise convolution), runs one forward
//!   pass on a constant input, serializes the graph to an ONNX-subset file,
//!   and then patches the clamp node: its operator type becomes the plugin
//!   identifier and its attributes are replaced with fixed clamp bounds.
//!   See [`export`] and [`rewrite`].
//!
//! - The **inference pipeline** registers the plugin kernel in an operator
//!   registry, parses the patched graph into an executable [`engine`] with
//!   a workspace-memory ceiling, fills a pre-allocated host input buffer
//!   and runs one synchronous inference. See [`plugin`], [`registry`] and
//!   [`engine`].
//!
//! The supporting layers are a hand-rolled [`protobuf`] wire codec, the
//! [`onnx`] message subset, an editable name-connected [`graph`]
//! representation with dead-node cleanup, and the [`ops`] the network
//! needs.

pub mod engine;
pub mod export;
pub mod graph;
pub mod onnx;
pub mod ops;
pub mod plugin;
pub mod protobuf;
pub mod registry;
pub mod rewrite;
pub mod tensor;

pub use engine::{Engine, EngineBuilder, EngineError, ExecutionContext, RunError};
pub use graph::{Graph, GraphError};
pub use registry::OpRegistry;
pub use tensor::Tensor;
