//! Graph patching: swap the clamp operator for the plugin kernel.
//!
//! The inference engine dispatches nodes to kernels by operator-type string.
//! Patching a node's type to the plugin identifier is therefore all it takes
//! to route that step of the graph through the custom kernel, provided the
//! plugin has been registered before the graph is parsed.

use crate::graph::{AttrValue, Graph};

/// Operator type under which the custom clip kernel registers itself.
pub const PLUGIN_OP: &str = "ClipPlugin";

/// Clamp bounds baked into the rewritten nodes.
pub const PLUGIN_CLIP_MIN: f32 = 0.0;
pub const PLUGIN_CLIP_MAX: f32 = 6.0;

/// Replace every `Clip` node with a [`PLUGIN_OP`] node.
///
/// The graph is cleaned up first, so nodes that cannot reach a graph output
/// are dropped before matching. Matching is by operator type rather than by
/// node name, so unrelated nodes that merely mention "Clip" in their name
/// are never touched. Each matched node keeps its inputs and outputs; its
/// operator type becomes [`PLUGIN_OP`] and its attribute set is replaced
/// wholesale with the fixed `minimum`/`maximum` bounds.
///
/// A graph with no `Clip` nodes is returned unchanged (apart from cleanup);
/// this is not an error. Returns the number of nodes rewritten.
pub fn replace_clip_with_plugin(graph: &mut Graph) -> usize {
    graph.cleanup();

    let mut replaced = 0;
    for node in &mut graph.nodes {
        if node.op_type != "Clip" {
            continue;
        }
        node.op_type = PLUGIN_OP.to_string();
        node.attrs = vec![
            ("minimum".to_string(), AttrValue::Float(PLUGIN_CLIP_MIN)),
            ("maximum".to_string(), AttrValue::Float(PLUGIN_CLIP_MAX)),
        ];
        replaced += 1;
    }
    replaced
}

#[cfg(test)]
mod tests {
    use super::{replace_clip_with_plugin, PLUGIN_OP};
    use crate::graph::{AttrValue, Graph, Node, ValueInfo};
    use crate::tensor::Tensor;

    fn value(name: &str) -> ValueInfo {
        ValueInfo {
            name: name.to_string(),
            shape: Some(vec![1, 4]),
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

    /// Clip -> Add graph, the relevant prefix of the demo network.
    fn clip_graph() -> Graph {
        let mut clip = node("Clip_0", "Clip", &["input"], &["clip_out"]);
        clip.attrs = vec![
            ("min".to_string(), AttrValue::Float(0.0)),
            ("max".to_string(), AttrValue::Float(6.0)),
        ];
        Graph {
            name: None,
            nodes: vec![
                clip,
                node("Add_1", "Add", &["clip_out", "offset"], &["output"]),
            ],
            inputs: vec![value("input")],
            outputs: vec![value("output")],
            initializers: vec![("offset".to_string(), Tensor::from_scalar(10.0))],
        }
    }

    fn structure(graph: &Graph) -> Vec<(String, String, Vec<String>, Vec<String>)> {
        graph
            .nodes
            .iter()
            .map(|n| {
                (
                    n.name.clone(),
                    n.op_type.clone(),
                    n.inputs.clone(),
                    n.outputs.clone(),
                )
            })
            .collect()
    }

    #[test]
    fn test_single_match_is_rewritten() {
        let mut graph = clip_graph();
        let node_count = graph.nodes.len();

        let replaced = replace_clip_with_plugin(&mut graph);

        assert_eq!(replaced, 1);
        assert_eq!(graph.nodes.len(), node_count);

        let plugin = &graph.nodes[0];
        assert_eq!(plugin.op_type, PLUGIN_OP);
        assert_eq!(plugin.inputs, vec!["input"]);
        assert_eq!(plugin.outputs, vec!["clip_out"]);
        assert_eq!(
            plugin.attrs,
            vec![
                ("minimum".to_string(), AttrValue::Float(0.0)),
                ("maximum".to_string(), AttrValue::Float(6.0)),
            ]
        );

        // The downstream consumer is untouched.
        assert_eq!(graph.nodes[1].op_type, "Add");
        assert_eq!(graph.nodes[1].inputs, vec!["clip_out", "offset"]);
    }

    #[test]
    fn test_zero_matches_is_a_noop() {
        let mut graph = clip_graph();
        graph.nodes[0].op_type = "Relu".to_string();
        graph.nodes[0].attrs.clear();

        let mut expected = clip_graph();
        expected.nodes[0].op_type = "Relu".to_string();
        expected.nodes[0].attrs.clear();
        expected.cleanup();

        let replaced = replace_clip_with_plugin(&mut graph);

        assert_eq!(replaced, 0);
        assert_eq!(structure(&graph), structure(&expected));
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let mut once = clip_graph();
        replace_clip_with_plugin(&mut once);

        let mut twice = clip_graph();
        replace_clip_with_plugin(&mut twice);
        let replaced = replace_clip_with_plugin(&mut twice);

        assert_eq!(replaced, 0);
        assert_eq!(structure(&once), structure(&twice));
        assert_eq!(once.nodes[0].attrs, twice.nodes[0].attrs);
    }

    #[test]
    fn test_dead_nodes_are_dropped_before_matching() {
        let mut graph = clip_graph();
        // A Clip node that cannot reach any graph output.
        graph
            .nodes
            .push(node("Clip_dead", "Clip", &["input"], &["dead_out"]));

        let replaced = replace_clip_with_plugin(&mut graph);

        assert_eq!(replaced, 1);
        assert!(graph.nodes.iter().all(|n| n.name != "Clip_dead"));
        assert_eq!(graph.nodes.len(), 2);
    }

    #[test]
    fn test_name_mentioning_clip_is_not_matched() {
        let mut graph = clip_graph();
        graph.nodes[1].name = "post_Clip_add".to_string();

        replace_clip_with_plugin(&mut graph);

        // Only the Clip-typed node is rewritten, regardless of names.
        assert_eq!(graph.nodes[1].op_type, "Add");
        assert_eq!(graph.nodes[0].op_type, PLUGIN_OP);
    }
}
