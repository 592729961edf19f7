//! Editable interchange graph.
//!
//! This is the graph-surgery layer of the crate: a mutable representation of
//! a serialized model in which nodes are connected by tensor name, suitable
//! for patching operator types and attributes before the graph is handed to
//! the [engine](crate::engine). Conversion to and from the serialized form
//! goes through the [`crate::onnx`] message types.

use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::onnx;
use crate::protobuf;
use crate::tensor::{elem_count, Tensor};

/// Value of a node attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    Float(f32),
    Int(i64),
    String(String),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
}

/// A computation step in a [`Graph`].
///
/// Nodes reference the tensors they consume and produce by name. The
/// operator type is an open string so that graphs may reference operators
/// the loading registry does not know about, such as plugin kernels.
#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    pub op_type: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attrs: Vec<(String, AttrValue)>,
}

impl Node {
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs
            .iter()
            .find(|(attr_name, _)| attr_name == name)
            .map(|(_, value)| value)
    }

    pub fn attr_f32(&self, name: &str) -> Option<f32> {
        match self.attr(name)? {
            AttrValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn attr_i64(&self, name: &str) -> Option<i64> {
        match self.attr(name)? {
            AttrValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn attr_ints(&self, name: &str) -> Option<&[i64]> {
        match self.attr(name)? {
            AttrValue::Ints(values) => Some(values),
            _ => None,
        }
    }
}

/// Name and optional static shape of a graph input or output.
#[derive(Clone, Debug)]
pub struct ValueInfo {
    pub name: String,

    /// Static shape of the value, if every dimension is fixed. Symbolic
    /// dimensions in the serialized model map to `None`.
    pub shape: Option<Vec<usize>>,
}

/// Errors from converting, loading or saving a graph.
#[derive(Debug)]
pub enum GraphError {
    /// An I/O error occurred reading or writing the model file.
    Io(std::io::Error),

    /// An error occurred decoding the serialized model.
    Decode(protobuf::Error),

    /// A required field was absent from the serialized model.
    MissingField(&'static str),

    /// An initializer uses an element type this crate does not support.
    UnsupportedDataType { tensor: String, data_type: i32 },

    /// An initializer's data did not match its declared shape.
    InvalidTensorData { tensor: String, reason: &'static str },
}

impl Display for GraphError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::Io(err) => write!(f, "read error: {}", err),
            GraphError::Decode(err) => write!(f, "decode error: {}", err),
            GraphError::MissingField(field) => write!(f, "missing field \"{}\"", field),
            GraphError::UnsupportedDataType { tensor, data_type } => {
                write!(
                    f,
                    "initializer \"{}\" has unsupported data type {}",
                    tensor, data_type
                )
            }
            GraphError::InvalidTensorData { tensor, reason } => {
                write!(f, "initializer \"{}\" has invalid data: {}", tensor, reason)
            }
        }
    }
}

impl Error for GraphError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GraphError::Io(err) => Some(err),
            GraphError::Decode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GraphError {
    fn from(err: std::io::Error) -> GraphError {
        GraphError::Io(err)
    }
}

impl From<protobuf::Error> for GraphError {
    fn from(err: protobuf::Error) -> GraphError {
        GraphError::Decode(err)
    }
}

/// An editable computation graph.
///
/// The node list preserves the serialized model's order. Graph inputs and
/// outputs are declared by name; initializers associate names with constant
/// tensors (weights).
pub struct Graph {
    pub name: Option<String>,
    pub nodes: Vec<Node>,
    pub inputs: Vec<ValueInfo>,
    pub outputs: Vec<ValueInfo>,
    pub initializers: Vec<(String, Tensor)>,
}

impl Graph {
    /// Read a graph from a serialized model file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Graph, GraphError> {
        let bytes = fs::read(path)?;
        let model = onnx::ModelProto::from_bytes(&bytes)?;
        Graph::from_model(model)
    }

    /// Serialize this graph and write it to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), GraphError> {
        fs::write(path, self.to_model().to_bytes())?;
        Ok(())
    }

    /// Build an editable graph from a decoded model.
    pub fn from_model(model: onnx::ModelProto) -> Result<Graph, GraphError> {
        let graph = model.graph.ok_or(GraphError::MissingField("model.graph"))?;

        let mut nodes = Vec::with_capacity(graph.node.len());
        for node in graph.node {
            let op_type = node.op_type.ok_or(GraphError::MissingField("node.op_type"))?;
            nodes.push(Node {
                name: node.name.unwrap_or_default(),
                op_type,
                inputs: node.input,
                outputs: node.output,
                attrs: node.attribute.iter().filter_map(attr_from_proto).collect(),
            });
        }

        let mut initializers = Vec::with_capacity(graph.initializer.len());
        for tensor in &graph.initializer {
            initializers.push(tensor_from_proto(tensor)?);
        }

        Ok(Graph {
            name: graph.name,
            nodes,
            inputs: graph.input.iter().map(value_info_from_proto).collect(),
            outputs: graph.output.iter().map(value_info_from_proto).collect(),
            initializers,
        })
    }

    /// Convert this graph back to its serialized message form.
    pub fn to_model(&self) -> onnx::ModelProto {
        let graph = onnx::GraphProto {
            node: self.nodes.iter().map(node_to_proto).collect(),
            name: self.name.clone(),
            initializer: self
                .initializers
                .iter()
                .map(|(name, tensor)| tensor_to_proto(name, tensor))
                .collect(),
            input: self.inputs.iter().map(value_info_to_proto).collect(),
            output: self.outputs.iter().map(value_info_to_proto).collect(),
            value_info: Vec::new(),
        };

        onnx::ModelProto {
            ir_version: Some(7),
            producer_name: Some("cliprt".to_string()),
            graph: Some(graph),
            opset_import: vec![onnx::OperatorSetIdProto {
                domain: None,
                version: Some(11),
            }],
        }
    }

    /// Look up an initializer tensor by name.
    pub fn initializer(&self, name: &str) -> Option<&Tensor> {
        self.initializers
            .iter()
            .find(|(init_name, _)| init_name == name)
            .map(|(_, tensor)| tensor)
    }

    /// Remove nodes that cannot reach any graph output, then drop
    /// initializers no remaining node references.
    ///
    /// Node order and the graph's declared inputs and outputs are preserved.
    pub fn cleanup(&mut self) {
        let live_nodes: FxHashSet<usize> = {
            let mut producers = FxHashMap::default();
            for (idx, node) in self.nodes.iter().enumerate() {
                for output in &node.outputs {
                    producers.insert(output.as_str(), idx);
                }
            }

            let mut live = FxHashSet::default();
            let mut stack: Vec<&str> = self.outputs.iter().map(|info| info.name.as_str()).collect();
            while let Some(name) = stack.pop() {
                if let Some(&idx) = producers.get(name) {
                    if live.insert(idx) {
                        stack.extend(self.nodes[idx].inputs.iter().map(|name| name.as_str()));
                    }
                }
            }
            live
        };

        let mut idx = 0;
        self.nodes.retain(|_| {
            let keep = live_nodes.contains(&idx);
            idx += 1;
            keep
        });

        let used: FxHashSet<&str> = self
            .nodes
            .iter()
            .flat_map(|node| node.inputs.iter())
            .map(|name| name.as_str())
            .collect();
        self.initializers
            .retain(|(name, _)| used.contains(name.as_str()));
    }
}

fn attr_from_proto(attr: &onnx::AttributeProto) -> Option<(String, AttrValue)> {
    let name = attr.name.clone()?;
    let value = match attr.r#type {
        Some(onnx::AttributeType::FLOAT) => AttrValue::Float(attr.f?),
        Some(onnx::AttributeType::INT) => AttrValue::Int(attr.i?),
        Some(onnx::AttributeType::STRING) => AttrValue::String(attr.s.clone()?),
        Some(onnx::AttributeType::FLOATS) => AttrValue::Floats(attr.floats.clone()),
        Some(onnx::AttributeType::INTS) => AttrValue::Ints(attr.ints.clone()),
        // Models produced by other tools may omit the type tag. Infer the
        // type from whichever value field is populated.
        _ => {
            if let Some(f) = attr.f {
                AttrValue::Float(f)
            } else if let Some(i) = attr.i {
                AttrValue::Int(i)
            } else if let Some(s) = &attr.s {
                AttrValue::String(s.clone())
            } else if !attr.floats.is_empty() {
                AttrValue::Floats(attr.floats.clone())
            } else if !attr.ints.is_empty() {
                AttrValue::Ints(attr.ints.clone())
            } else {
                return None;
            }
        }
    };
    Some((name, value))
}

fn attr_to_proto(name: &str, value: &AttrValue) -> onnx::AttributeProto {
    let mut attr = onnx::AttributeProto {
        name: Some(name.to_string()),
        ..Default::default()
    };
    match value {
        AttrValue::Float(f) => {
            attr.f = Some(*f);
            attr.r#type = Some(onnx::AttributeType::FLOAT);
        }
        AttrValue::Int(i) => {
            attr.i = Some(*i);
            attr.r#type = Some(onnx::AttributeType::INT);
        }
        AttrValue::String(s) => {
            attr.s = Some(s.clone());
            attr.r#type = Some(onnx::AttributeType::STRING);
        }
        AttrValue::Floats(floats) => {
            attr.floats = floats.clone();
            attr.r#type = Some(onnx::AttributeType::FLOATS);
        }
        AttrValue::Ints(ints) => {
            attr.ints = ints.clone();
            attr.r#type = Some(onnx::AttributeType::INTS);
        }
    }
    attr
}

fn node_to_proto(node: &Node) -> onnx::NodeProto {
    onnx::NodeProto {
        input: node.inputs.clone(),
        output: node.outputs.clone(),
        name: if node.name.is_empty() {
            None
        } else {
            Some(node.name.clone())
        },
        op_type: Some(node.op_type.clone()),
        attribute: node
            .attrs
            .iter()
            .map(|(name, value)| attr_to_proto(name, value))
            .collect(),
    }
}

fn tensor_from_proto(proto: &onnx::TensorProto) -> Result<(String, Tensor), GraphError> {
    let name = proto
        .name
        .clone()
        .ok_or(GraphError::MissingField("initializer.name"))?;

    match proto.data_type {
        Some(onnx::DataType::FLOAT) => {}
        other => {
            return Err(GraphError::UnsupportedDataType {
                tensor: name,
                data_type: other.map(|dtype| dtype.0).unwrap_or_default(),
            });
        }
    }

    let shape: Vec<usize> = proto.dims.iter().map(|dim| *dim as usize).collect();

    let data: Vec<f32> = if let Some(raw) = &proto.raw_data {
        if raw.len() % 4 != 0 {
            return Err(GraphError::InvalidTensorData {
                tensor: name,
                reason: "raw data length is not a multiple of the element size",
            });
        }
        raw.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
            .collect()
    } else {
        proto.float_data.clone()
    };

    if data.len() != elem_count(&shape) {
        return Err(GraphError::InvalidTensorData {
            tensor: name,
            reason: "element count does not match declared dims",
        });
    }

    Ok((name, Tensor::from_data(&shape, data)))
}

fn tensor_to_proto(name: &str, tensor: &Tensor) -> onnx::TensorProto {
    let mut raw = Vec::with_capacity(tensor.len() * 4);
    for value in tensor.data() {
        raw.extend_from_slice(&value.to_le_bytes());
    }
    onnx::TensorProto {
        dims: tensor.shape().iter().map(|dim| *dim as i64).collect(),
        data_type: Some(onnx::DataType::FLOAT),
        float_data: Vec::new(),
        name: Some(name.to_string()),
        raw_data: Some(raw),
    }
}

fn value_info_from_proto(proto: &onnx::ValueInfoProto) -> ValueInfo {
    let shape = proto
        .r#type
        .as_ref()
        .and_then(|ty| ty.tensor_type.as_ref())
        .and_then(|tensor_type| tensor_type.shape.as_ref())
        .and_then(|shape| {
            shape
                .dim
                .iter()
                .map(|dim| dim.dim_value.map(|value| value as usize))
                .collect::<Option<Vec<usize>>>()
        });
    ValueInfo {
        name: proto.name.clone().unwrap_or_default(),
        shape,
    }
}

fn value_info_to_proto(info: &ValueInfo) -> onnx::ValueInfoProto {
    let shape = info.shape.as_ref().map(|dims| onnx::TensorShapeProto {
        dim: dims
            .iter()
            .map(|dim| onnx::Dimension {
                dim_value: Some(*dim as i64),
                dim_param: None,
            })
            .collect(),
    });
    onnx::ValueInfoProto {
        name: Some(info.name.clone()),
        r#type: Some(onnx::TypeProto {
            tensor_type: Some(onnx::TypeProtoTensor {
                elem_type: Some(onnx::DataType::FLOAT),
                shape,
            }),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{AttrValue, Graph, Node, ValueInfo};
    use crate::tensor::Tensor;

    fn value(name: &str) -> ValueInfo {
        ValueInfo {
            name: name.to_string(),
            shape: Some(vec![1, 2]),
        }
    }

    fn node(name: &str, op_type: &str, inputs: &[&str], outputs: &[&str]) -> Node {
        Node {
            name: name.to_string(),
            op_type: op_type.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            attrs: Vec::new(),
        }
    }

    fn sample_graph() -> Graph {
        let mut clip = node("Clip_0", "Clip", &["input"], &["clip_out"]);
        clip.attrs = vec![
            ("min".to_string(), AttrValue::Float(0.0)),
            ("max".to_string(), AttrValue::Float(6.0)),
        ];
        Graph {
            name: Some("test".to_string()),
            nodes: vec![
                clip,
                node("Add_1", "Add", &["clip_out", "offset"], &["output"]),
            ],
            inputs: vec![value("input")],
            outputs: vec![value("output")],
            initializers: vec![("offset".to_string(), Tensor::from_scalar(10.0))],
        }
    }

    #[test]
    fn test_model_roundtrip_preserves_structure() {
        let graph = sample_graph();
        let restored = Graph::from_model(graph.to_model()).unwrap();

        assert_eq!(restored.nodes.len(), graph.nodes.len());
        for (restored_node, original) in restored.nodes.iter().zip(&graph.nodes) {
            assert_eq!(restored_node.name, original.name);
            assert_eq!(restored_node.op_type, original.op_type);
            assert_eq!(restored_node.inputs, original.inputs);
            assert_eq!(restored_node.outputs, original.outputs);
            assert_eq!(restored_node.attrs, original.attrs);
        }

        assert_eq!(restored.inputs[0].name, "input");
        assert_eq!(restored.inputs[0].shape.as_deref(), Some(&[1, 2][..]));
        assert_eq!(restored.outputs[0].name, "output");
        assert_eq!(
            restored.initializer("offset"),
            Some(&Tensor::from_scalar(10.0))
        );
    }

    #[test]
    fn test_cleanup_removes_dead_nodes() {
        let mut graph = sample_graph();
        graph
            .nodes
            .push(node("Relu_dead", "Relu", &["input"], &["dead_out"]));
        graph
            .initializers
            .push(("dead_weight".to_string(), Tensor::from_scalar(1.0)));
        graph.nodes.push(node(
            "Mul_dead",
            "Mul",
            &["dead_out", "dead_weight"],
            &["dead_out2"],
        ));

        graph.cleanup();

        let names: Vec<&str> = graph.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, &["Clip_0", "Add_1"]);
        assert!(graph.initializer("offset").is_some());
        assert!(graph.initializer("dead_weight").is_none());
    }

    #[test]
    fn test_cleanup_keeps_live_graph_unchanged() {
        let mut graph = sample_graph();
        graph.cleanup();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.initializers.len(), 1);
    }

    #[test]
    fn test_attr_accessors() {
        let graph = sample_graph();
        let clip = &graph.nodes[0];
        assert_eq!(clip.attr_f32("min"), Some(0.0));
        assert_eq!(clip.attr_f32("max"), Some(6.0));
        assert_eq!(clip.attr_f32("absent"), None);
        assert_eq!(clip.attr_i64("min"), None);
    }
}
