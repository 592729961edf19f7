//! Custom clip kernel, dispatched via the plugin operator type.
//!
//! This is the in-process counterpart of a separately built kernel library:
//! the engine knows nothing about it until [`register`] installs it in an
//! [`OpRegistry`] under [`PLUGIN_OP`](crate::rewrite::PLUGIN_OP). Graphs
//! patched by [`crate::rewrite`] fail to parse unless the registration has
//! happened first, exactly as the original graph would fail without its
//! plugin loaded.

use crate::graph::Node;
use crate::ops::{Operator, UnaryFloatOp};
use crate::registry::{OpRegistry, ReadOpError};
use crate::rewrite::PLUGIN_OP;

/// Clamp kernel configured from `minimum`/`maximum` node attributes.
///
/// Numerically identical to the built-in `Clip`; the point of the demo is
/// that the engine routes the node through this kernel instead.
#[derive(Clone, Debug)]
pub struct ClipPlugin {
    pub minimum: f32,
    pub maximum: f32,
}

impl UnaryFloatOp for ClipPlugin {
    fn name(&self) -> &str {
        PLUGIN_OP
    }

    fn map_element(&self, val: f32) -> f32 {
        val.clamp(self.minimum, self.maximum)
    }
}

/// Install the plugin kernel into `registry`.
pub fn register(registry: &mut OpRegistry) {
    registry.register_op(PLUGIN_OP, read_clip_plugin);
}

fn read_clip_plugin(node: &Node) -> Result<Box<dyn Operator>, ReadOpError> {
    let minimum = node
        .attr_f32("minimum")
        .ok_or_else(|| ReadOpError::attr_error("minimum", "required attribute missing"))?;
    let maximum = node
        .attr_f32("maximum")
        .ok_or_else(|| ReadOpError::attr_error("maximum", "required attribute missing"))?;
    Ok(Box::new(ClipPlugin { minimum, maximum }))
}

#[cfg(test)]
mod tests {
    use super::{register, ClipPlugin};
    use crate::graph::{AttrValue, Node};
    use crate::ops::{clip, InputList, Operator, UnaryFloatOp};
    use crate::registry::{OpRegistry, ReadOpError};
    use crate::rewrite::PLUGIN_OP;
    use crate::tensor::Tensor;

    fn plugin_node(attrs: Vec<(String, AttrValue)>) -> Node {
        Node {
            name: "Clip_0".to_string(),
            op_type: PLUGIN_OP.to_string(),
            inputs: vec!["x".to_string()],
            outputs: vec!["y".to_string()],
            attrs,
        }
    }

    #[test]
    fn test_plugin_matches_builtin_clip() {
        let input = Tensor::from_data(&[6], vec![-2.0, -0.5, 0.0, 3.0, 6.0, 11.5]);
        let plugin = ClipPlugin {
            minimum: 0.0,
            maximum: 6.0,
        };
        assert_eq!(plugin.map(&input), clip(&input, 0.0, 6.0));
    }

    #[test]
    fn test_register_and_read() {
        let mut registry = OpRegistry::with_builtin_ops();
        register(&mut registry);

        let node = plugin_node(vec![
            ("minimum".to_string(), AttrValue::Float(0.0)),
            ("maximum".to_string(), AttrValue::Float(6.0)),
        ]);
        let op = registry.read_op(&node).unwrap();
        assert_eq!(op.name(), PLUGIN_OP);

        let input = Tensor::from_data(&[3], vec![-1.0, 3.0, 9.0]);
        let outputs = op.run(InputList::new(&[&input])).unwrap();
        assert_eq!(outputs[0].data(), &[0.0, 3.0, 6.0]);
    }

    #[test]
    fn test_missing_bounds_are_rejected() {
        let mut registry = OpRegistry::new();
        register(&mut registry);

        let node = plugin_node(vec![("minimum".to_string(), AttrValue::Float(0.0))]);
        assert!(matches!(
            registry.read_op(&node),
            Err(ReadOpError::AttrError { .. })
        ));
    }

    #[test]
    fn test_unregistered_plugin_is_unavailable() {
        let registry = OpRegistry::with_builtin_ops();
        let node = plugin_node(Vec::new());
        assert!(matches!(
            registry.read_op(&node),
            Err(ReadOpError::OperatorUnavailable { .. })
        ));
    }
}
