//! Construction and serialization of the fixed demo network.
//!
//! The network is the smallest thing that exercises the plugin path: a
//! clamp activation, a constant offset and a pointwise convolution. The
//! convolution weights are freshly sampled every time [`DemoModel::new`]
//! runs, and deliberately unseeded, so the printed output mean differs
//! between runs.

use crate::graph::{AttrValue, Graph, Node, ValueInfo};
use crate::ops::{add, clip, conv, OpError};
use crate::tensor::Tensor;

/// Where the export pipeline writes the serialized network.
pub const MODEL_PATH: &str = "models/test_model.onnx";

/// Where the export pipeline writes the patched network.
pub const PATCHED_MODEL_PATH: &str = "models/test_model_mod.onnx";

/// Shape of the network's input (NCHW).
pub const INPUT_SHAPE: [usize; 4] = [16, 32, 300, 300];

const IN_CHANNELS: usize = 32;
const OUT_CHANNELS: usize = 16;
const OFFSET: f32 = 10.0;
const CLIP_MIN: f32 = 0.0;
const CLIP_MAX: f32 = 6.0;

/// The fixed demo network: `Clip(0, 6)` -> `Add 10.0` -> 1x1 `Conv`.
pub struct DemoModel {
    conv_weight: Tensor,
    conv_bias: Tensor,
}

impl DemoModel {
    /// Create the network with randomly initialized convolution weights.
    pub fn new() -> DemoModel {
        let mut rng = fastrand::Rng::new();

        // Uniform in [-bound, bound] with bound = 1 / sqrt(fan_in).
        let bound = 1.0 / (IN_CHANNELS as f32).sqrt();
        let centered = |t: Tensor| t.map(|x| (x * 2.0 - 1.0) * bound);

        DemoModel {
            conv_weight: centered(Tensor::rand(&[OUT_CHANNELS, IN_CHANNELS, 1, 1], &mut rng)),
            conv_bias: centered(Tensor::rand(&[OUT_CHANNELS], &mut rng)),
        }
    }

    /// Create the network with the given convolution parameters.
    ///
    /// Panics if the shapes do not match the fixed architecture.
    pub fn with_weights(conv_weight: Tensor, conv_bias: Tensor) -> DemoModel {
        assert_eq!(conv_weight.shape(), &[OUT_CHANNELS, IN_CHANNELS, 1, 1]);
        assert_eq!(conv_bias.shape(), &[OUT_CHANNELS]);
        DemoModel {
            conv_weight,
            conv_bias,
        }
    }

    /// Reference forward pass, computed directly with the operator
    /// functions.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor, OpError> {
        let activated = clip(input, CLIP_MIN, CLIP_MAX);
        let shifted = add(&activated, &Tensor::from_scalar(OFFSET))?;
        conv(
            &shifted,
            &self.conv_weight,
            Some(&self.conv_bias),
            [1, 1],
            [0; 4],
            [1, 1],
        )
    }

    /// Build the serializable graph for this network.
    pub fn to_graph(&self) -> Graph {
        let node = |name: &str, op_type: &str, inputs: &[&str], outputs: &[&str], attrs| Node {
            name: name.to_string(),
            op_type: op_type.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            attrs,
        };

        Graph {
            name: Some("demo".to_string()),
            nodes: vec![
                node(
                    "Clip_0",
                    "Clip",
                    &["input"],
                    &["clip_out"],
                    vec![
                        ("min".to_string(), AttrValue::Float(CLIP_MIN)),
                        ("max".to_string(), AttrValue::Float(CLIP_MAX)),
                    ],
                ),
                node(
                    "Add_1",
                    "Add",
                    &["clip_out", "offset"],
                    &["add_out"],
                    Vec::new(),
                ),
                node(
                    "Conv_2",
                    "Conv",
                    &["add_out", "conv.weight", "conv.bias"],
                    &["output"],
                    vec![
                        ("kernel_shape".to_string(), AttrValue::Ints(vec![1, 1])),
                        ("strides".to_string(), AttrValue::Ints(vec![1, 1])),
                        ("pads".to_string(), AttrValue::Ints(vec![0, 0, 0, 0])),
                        ("dilations".to_string(), AttrValue::Ints(vec![1, 1])),
                    ],
                ),
            ],
            inputs: vec![ValueInfo {
                name: "input".to_string(),
                shape: Some(INPUT_SHAPE.to_vec()),
            }],
            outputs: vec![ValueInfo {
                name: "output".to_string(),
                shape: Some(vec![
                    INPUT_SHAPE[0],
                    OUT_CHANNELS,
                    INPUT_SHAPE[2],
                    INPUT_SHAPE[3],
                ]),
            }],
            initializers: vec![
                ("offset".to_string(), Tensor::from_scalar(OFFSET)),
                ("conv.weight".to_string(), self.conv_weight.clone()),
                ("conv.bias".to_string(), self.conv_bias.clone()),
            ],
        }
    }
}

impl Default for DemoModel {
    fn default() -> DemoModel {
        DemoModel::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{DemoModel, INPUT_SHAPE, OUT_CHANNELS};
    use crate::graph::Graph;
    use crate::tensor::Tensor;

    fn fixed_model() -> DemoModel {
        DemoModel::with_weights(
            Tensor::full(&[OUT_CHANNELS, 32, 1, 1], 0.01),
            Tensor::zeros(&[OUT_CHANNELS]),
        )
    }

    #[test]
    fn test_graph_structure() {
        let graph = fixed_model().to_graph();

        let ops: Vec<&str> = graph.nodes.iter().map(|n| n.op_type.as_str()).collect();
        assert_eq!(ops, &["Clip", "Add", "Conv"]);

        assert_eq!(graph.inputs[0].name, "input");
        assert_eq!(graph.inputs[0].shape.as_deref(), Some(&INPUT_SHAPE[..]));
        assert_eq!(graph.outputs[0].name, "output");

        for name in ["offset", "conv.weight", "conv.bias"] {
            assert!(graph.initializer(name).is_some(), "missing {}", name);
        }
    }

    #[test]
    fn test_graph_survives_serialization() {
        let graph = fixed_model().to_graph();
        let restored = Graph::from_model(graph.to_model()).unwrap();

        assert_eq!(restored.nodes.len(), graph.nodes.len());
        assert_eq!(
            restored.nodes[0].attr_f32("min"),
            graph.nodes[0].attr_f32("min")
        );
        assert_eq!(
            restored.initializer("conv.weight"),
            graph.initializer("conv.weight")
        );
    }

    #[test]
    fn test_forward_with_fixed_weights() {
        // With all-0.01 weights and zero bias, each output element is
        // 0.01 * sum over 32 channels of (clip(x) + 10). The architecture
        // only fixes the channel count, so a small spatial size keeps the
        // test fast.
        let model = fixed_model();
        let input = Tensor::full(&[1, 32, 4, 4], 1.5);
        let output = model.forward(&input).unwrap();

        assert_eq!(output.shape(), &[1, OUT_CHANNELS, 4, 4]);
        let expected = 0.01 * 32.0 * (1.5 + 10.0);
        assert!((output.mean() - expected).abs() < 1e-4);
    }

    #[test]
    fn test_unseeded_models_differ() {
        // Not a determinism test: two fresh models should (overwhelmingly
        // likely) have different weights.
        let a = DemoModel::new().to_graph();
        let b = DemoModel::new().to_graph();
        assert_ne!(
            a.initializer("conv.weight"),
            b.initializer("conv.weight")
        );
    }
}
