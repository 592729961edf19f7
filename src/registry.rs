//! Registry used to deserialize operators when parsing a graph.

use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};

use rustc_hash::FxHashMap;

use crate::graph::Node;
use crate::ops::{Add, Clip, Conv, Operator};

/// Error type for errors that occur when deserializing an operator.
#[derive(Debug, PartialEq)]
pub enum ReadOpError {
    /// The operator is not registered.
    OperatorUnavailable {
        /// Name of the operator type.
        name: String,
    },

    /// An attribute has an unsupported or invalid value.
    AttrError {
        /// Name of the attribute.
        attr: String,
        /// Description of the attribute error.
        error: String,
    },
}

impl ReadOpError {
    pub(crate) fn attr_error(attr: impl AsRef<str>, error: impl AsRef<str>) -> ReadOpError {
        ReadOpError::AttrError {
            attr: attr.as_ref().to_string(),
            error: error.as_ref().to_string(),
        }
    }
}

impl Display for ReadOpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ReadOpError::OperatorUnavailable { name } => {
                write!(f, "operator \"{}\" is not registered", name)
            }
            ReadOpError::AttrError { attr, error } => {
                write!(f, "error in attribute \"{}\": {}", attr, error)
            }
        }
    }
}

impl Error for ReadOpError {}

/// Function that deserializes an operator from a graph node.
pub type ReadOpFn = fn(&Node) -> Result<Box<dyn Operator>, ReadOpError>;

/// Registry mapping operator-type strings to operator readers.
///
/// New registries have no operators registered. To create a registry with
/// the built-in operators pre-registered, use
/// [`OpRegistry::with_builtin_ops`]. Custom kernels (plugins) are added with
/// [`OpRegistry::register_op`] before the graph is parsed; the engine
/// dispatches each node to whichever reader is registered under its
/// operator-type string.
#[derive(Default)]
pub struct OpRegistry {
    ops: FxHashMap<String, ReadOpFn>,
}

impl OpRegistry {
    /// Create a new empty registry.
    pub fn new() -> OpRegistry {
        OpRegistry {
            ops: FxHashMap::default(),
        }
    }

    /// Create a new registry with all built-in operators registered.
    pub fn with_builtin_ops() -> OpRegistry {
        let mut reg = OpRegistry::new();
        reg.register_op("Clip", read_clip);
        reg.register_op("Add", read_add);
        reg.register_op("Conv", read_conv);
        reg
    }

    /// Register a reader for an operator type.
    ///
    /// Re-registering an operator type replaces the previous reader.
    pub fn register_op(&mut self, op_type: &str, read: ReadOpFn) {
        self.ops.insert(op_type.to_string(), read);
    }

    /// Deserialize the operator for a graph node.
    pub fn read_op(&self, node: &Node) -> Result<Box<dyn Operator>, ReadOpError> {
        let read = self
            .ops
            .get(node.op_type.as_str())
            .ok_or_else(|| ReadOpError::OperatorUnavailable {
                name: node.op_type.clone(),
            })?;
        read(node)
    }
}

fn read_clip(node: &Node) -> Result<Box<dyn Operator>, ReadOpError> {
    let mut clip = Clip::default();
    if let Some(min) = node.attr_f32("min") {
        clip.min = min;
    }
    if let Some(max) = node.attr_f32("max") {
        clip.max = max;
    }
    Ok(Box::new(clip))
}

fn read_add(_node: &Node) -> Result<Box<dyn Operator>, ReadOpError> {
    Ok(Box::new(Add {}))
}

/// Read a `[usize; N]` attribute, falling back to a default if absent.
fn ints_attr<const N: usize>(
    node: &Node,
    name: &str,
    default: [usize; N],
) -> Result<[usize; N], ReadOpError> {
    let Some(values) = node.attr_ints(name) else {
        return Ok(default);
    };
    if values.len() != N {
        return Err(ReadOpError::attr_error(
            name,
            format!("expected {} values but found {}", N, values.len()),
        ));
    }
    let mut out = [0; N];
    for (slot, value) in out.iter_mut().zip(values) {
        if *value < 0 {
            return Err(ReadOpError::attr_error(name, "value must not be negative"));
        }
        *slot = *value as usize;
    }
    Ok(out)
}

fn read_conv(node: &Node) -> Result<Box<dyn Operator>, ReadOpError> {
    if let Some(group) = node.attr_i64("group") {
        if group != 1 {
            return Err(ReadOpError::attr_error("group", "only group 1 is supported"));
        }
    }
    Ok(Box::new(Conv {
        strides: ints_attr(node, "strides", [1, 1])?,
        pads: ints_attr(node, "pads", [0; 4])?,
        dilations: ints_attr(node, "dilations", [1, 1])?,
    }))
}

#[cfg(test)]
mod tests {
    use super::{OpRegistry, ReadOpError};
    use crate::graph::{AttrValue, Node};
    use crate::ops::Operator;

    fn node(op_type: &str, attrs: Vec<(String, AttrValue)>) -> Node {
        Node {
            name: format!("{}_0", op_type),
            op_type: op_type.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attrs,
        }
    }

    #[test]
    fn test_read_builtin_ops() {
        let reg = OpRegistry::with_builtin_ops();
        for op_type in ["Clip", "Add", "Conv"] {
            let op = reg.read_op(&node(op_type, Vec::new())).unwrap();
            assert_eq!(op.name(), op_type);
        }
    }

    #[test]
    fn test_unknown_op() {
        let reg = OpRegistry::with_builtin_ops();
        let err = reg.read_op(&node("CustomKernel", Vec::new())).unwrap_err();
        assert_eq!(
            err,
            ReadOpError::OperatorUnavailable {
                name: "CustomKernel".to_string()
            }
        );
    }

    #[test]
    fn test_read_conv_attrs() {
        let reg = OpRegistry::with_builtin_ops();
        let conv = node(
            "Conv",
            vec![
                ("strides".to_string(), AttrValue::Ints(vec![2, 2])),
                ("pads".to_string(), AttrValue::Ints(vec![1, 1, 1, 1])),
            ],
        );
        // Reader accepts the attributes; execution is covered by op tests.
        assert!(reg.read_op(&conv).is_ok());

        let bad = node(
            "Conv",
            vec![("strides".to_string(), AttrValue::Ints(vec![2]))],
        );
        assert!(matches!(
            reg.read_op(&bad),
            Err(ReadOpError::AttrError { .. })
        ));
    }

    #[test]
    fn test_grouped_conv_rejected() {
        let reg = OpRegistry::with_builtin_ops();
        let conv = node("Conv", vec![("group".to_string(), AttrValue::Int(2))]);
        assert!(matches!(
            reg.read_op(&conv),
            Err(ReadOpError::AttrError { .. })
        ));
    }
}
