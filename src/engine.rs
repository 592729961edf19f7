//! Inference engine.
//!
//! The engine consumes a [`Graph`], resolves each node to an operator via an
//! [`OpRegistry`], plans a topological execution order, and checks the plan's
//! peak intermediate-buffer requirement against a configurable workspace
//! ceiling. A built [`Engine`] hands out [`ExecutionContext`]s holding
//! pre-allocated host buffers; `execute` runs the plan synchronously,
//! releasing intermediate values as their remaining-use counts reach zero.

use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::iter::zip;
use std::path::Path;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::graph::{Graph, GraphError};
use crate::ops::{InputList, OpError, Operator};
use crate::registry::{OpRegistry, ReadOpError};
use crate::tensor::{elem_count, Tensor};

/// One gibibyte, for workspace-limit arithmetic.
pub const GIB: u64 = 1024 * 1024 * 1024;

const BYTES_PER_ELEMENT: u64 = 4;

/// A single operator error reported while parsing a graph.
#[derive(Debug)]
pub struct ParseDiagnostic {
    /// Name of the graph node the error relates to.
    pub node: String,
    pub error: ReadOpError,
}

impl Display for ParseDiagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "in node \"{}\": {}", self.node, self.error)
    }
}

/// Errors that occur when building an engine from a graph.
#[derive(Debug)]
pub enum EngineError {
    /// Loading or decoding the serialized graph failed.
    Graph(GraphError),

    /// One or more nodes could not be resolved to operators. Every
    /// parser-reported error is collected, not just the first.
    Parse(Vec<ParseDiagnostic>),

    /// No execution order could be planned for the graph.
    Planning(String),

    /// Shape inference failed for a node.
    Node { node: String, error: OpError },

    /// The plan's peak intermediate-buffer requirement exceeds the
    /// configured workspace limit.
    WorkspaceExceeded { required: u64, limit: u64 },

    /// The graph structure is not usable by this engine.
    InvalidGraph(&'static str),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Graph(err) => write!(f, "graph error: {}", err),
            EngineError::Parse(diagnostics) => {
                write!(f, "failed to parse graph:")?;
                for diagnostic in diagnostics {
                    write!(f, "\n  {}", diagnostic)?;
                }
                Ok(())
            }
            EngineError::Planning(msg) => write!(f, "planning error: {}", msg),
            EngineError::Node { node, error } => {
                write!(f, "in node \"{}\": {}", node, error)
            }
            EngineError::WorkspaceExceeded { required, limit } => {
                write!(
                    f,
                    "plan requires {} bytes of workspace but the limit is {}",
                    required, limit
                )
            }
            EngineError::InvalidGraph(msg) => write!(f, "invalid graph: {}", msg),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EngineError::Graph(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GraphError> for EngineError {
    fn from(err: GraphError) -> EngineError {
        EngineError::Graph(err)
    }
}

/// Errors that occur when executing a built engine.
#[derive(Debug)]
pub enum RunError {
    /// Execution of an operator failed.
    OperatorError { node: String, error: OpError },
}

impl Display for RunError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RunError::OperatorError { node, error } => {
                write!(f, "operator \"{}\" failed: {}", node, error)
            }
        }
    }
}

impl Error for RunError {}

/// One scheduled node of the execution plan.
struct Step {
    name: String,
    op: Box<dyn Operator>,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

/// Configures and builds an [`Engine`] from a graph.
pub struct EngineBuilder {
    workspace_limit: u64,
    verbose: bool,
}

impl EngineBuilder {
    pub fn new() -> EngineBuilder {
        EngineBuilder {
            workspace_limit: GIB,
            verbose: false,
        }
    }

    /// Set the maximum number of bytes the plan may need for live
    /// intermediate buffers at any point during execution.
    pub fn workspace_limit(mut self, bytes: u64) -> EngineBuilder {
        self.workspace_limit = bytes;
        self
    }

    /// Log one line per executed node during [`ExecutionContext::execute`].
    pub fn verbose(mut self, verbose: bool) -> EngineBuilder {
        self.verbose = verbose;
        self
    }

    /// Read a serialized graph from `path` and build an engine from it.
    pub fn build_from_file<P: AsRef<Path>>(
        self,
        path: P,
        registry: &OpRegistry,
    ) -> Result<Engine, EngineError> {
        let graph = Graph::load(path)?;
        self.build(graph, registry)
    }

    /// Build an engine that executes `graph`.
    pub fn build(self, graph: Graph, registry: &OpRegistry) -> Result<Engine, EngineError> {
        if graph.inputs.is_empty() {
            return Err(EngineError::InvalidGraph("graph has no inputs"));
        }
        if graph.outputs.is_empty() {
            return Err(EngineError::InvalidGraph("graph has no outputs"));
        }

        let mut input_shapes = Vec::with_capacity(graph.inputs.len());
        for info in &graph.inputs {
            let shape = info
                .shape
                .clone()
                .ok_or(EngineError::InvalidGraph("graph input has no static shape"))?;
            input_shapes.push((info.name.clone(), shape));
        }

        // Resolve every node to an operator, collecting all failures so a
        // single report covers the whole graph.
        let mut operators = Vec::with_capacity(graph.nodes.len());
        let mut diagnostics = Vec::new();
        for node in &graph.nodes {
            if node.outputs.len() != 1 {
                return Err(EngineError::InvalidGraph(
                    "multi-output nodes are not supported",
                ));
            }
            match registry.read_op(node) {
                Ok(op) => operators.push(Some(op)),
                Err(error) => {
                    operators.push(None);
                    diagnostics.push(ParseDiagnostic {
                        node: node.name.clone(),
                        error,
                    });
                }
            }
        }
        if !diagnostics.is_empty() {
            return Err(EngineError::Parse(diagnostics));
        }

        // Plan a topological execution order.
        let mut available: FxHashSet<&str> = input_shapes
            .iter()
            .map(|(name, _)| name.as_str())
            .chain(graph.initializers.iter().map(|(name, _)| name.as_str()))
            .collect();
        let mut scheduled = vec![false; graph.nodes.len()];
        let mut order = Vec::with_capacity(graph.nodes.len());
        loop {
            let mut progressed = false;
            for (idx, node) in graph.nodes.iter().enumerate() {
                if scheduled[idx] {
                    continue;
                }
                let ready = node
                    .inputs
                    .iter()
                    .all(|name| name.is_empty() || available.contains(name.as_str()));
                if ready {
                    scheduled[idx] = true;
                    progressed = true;
                    order.push(idx);
                    available.extend(node.outputs.iter().map(|name| name.as_str()));
                }
            }
            if order.len() == graph.nodes.len() {
                break;
            }
            if !progressed {
                let stuck = graph
                    .nodes
                    .iter()
                    .enumerate()
                    .find(|(idx, _)| !scheduled[*idx])
                    .map(|(_, node)| node.name.clone())
                    .unwrap_or_default();
                return Err(EngineError::Planning(format!(
                    "no execution order for node \"{}\" (missing input or cycle)",
                    stuck
                )));
            }
        }

        // Infer the shape of every value in plan order.
        let mut shapes: FxHashMap<&str, Vec<usize>> = FxHashMap::default();
        for (name, shape) in &input_shapes {
            shapes.insert(name.as_str(), shape.clone());
        }
        for (name, tensor) in &graph.initializers {
            shapes.insert(name.as_str(), tensor.shape().to_vec());
        }
        for &idx in &order {
            let node = &graph.nodes[idx];
            let op = operators[idx].as_ref().unwrap_or_else(|| {
                // Parse errors were reported above.
                unreachable!("operator for scheduled node was parsed")
            });

            let in_shapes: Vec<&[usize]> = node
                .inputs
                .iter()
                .filter(|name| !name.is_empty())
                .map(|name| {
                    shapes
                        .get(name.as_str())
                        .map(|shape| shape.as_slice())
                        .ok_or(EngineError::Planning(format!(
                            "shape of value \"{}\" is unknown",
                            name
                        )))
                })
                .collect::<Result<_, _>>()?;

            let out_shape = op
                .infer_shape(&in_shapes)
                .map_err(|error| EngineError::Node {
                    node: node.name.clone(),
                    error,
                })?;
            shapes.insert(node.outputs[0].as_str(), out_shape);
        }

        // Every declared graph output must be produced, with a matching
        // shape when the model declares one.
        for info in &graph.outputs {
            let Some(inferred) = shapes.get(info.name.as_str()) else {
                return Err(EngineError::Planning(format!(
                    "graph output \"{}\" is never produced",
                    info.name
                )));
            };
            if let Some(declared) = &info.shape {
                if declared != inferred {
                    return Err(EngineError::InvalidGraph(
                        "declared output shape does not match inferred shape",
                    ));
                }
            }
        }

        // Workspace accounting: intermediates are node-produced values that
        // are not graph outputs (outputs are bindings, not scratch). Track
        // the peak number of live intermediate bytes along the plan.
        let output_names: FxHashSet<&str> =
            graph.outputs.iter().map(|info| info.name.as_str()).collect();
        let produced: FxHashSet<&str> = graph
            .nodes
            .iter()
            .flat_map(|node| node.outputs.iter())
            .map(|name| name.as_str())
            .collect();
        let mut consumers: FxHashMap<String, usize> = FxHashMap::default();
        for node in &graph.nodes {
            for name in &node.inputs {
                if produced.contains(name.as_str()) && !output_names.contains(name.as_str()) {
                    *consumers.entry(name.clone()).or_insert(0) += 1;
                }
            }
        }

        let value_bytes = |name: &str| -> u64 {
            shapes
                .get(name)
                .map(|shape| elem_count(shape) as u64 * BYTES_PER_ELEMENT)
                .unwrap_or(0)
        };
        let mut remaining: FxHashMap<&str, usize> = consumers
            .iter()
            .map(|(name, count)| (name.as_str(), *count))
            .collect();
        let mut live = 0u64;
        let mut peak = 0u64;
        for &idx in &order {
            let node = &graph.nodes[idx];
            let out_name = node.outputs[0].as_str();
            if !output_names.contains(out_name) {
                live += value_bytes(out_name);
                peak = peak.max(live);
            }
            for name in &node.inputs {
                if let Some(count) = remaining.get_mut(name.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        live = live.saturating_sub(value_bytes(name));
                    }
                }
            }
        }
        if peak > self.workspace_limit {
            return Err(EngineError::WorkspaceExceeded {
                required: peak,
                limit: self.workspace_limit,
            });
        }

        let steps = order
            .iter()
            .map(|&idx| {
                let node = &graph.nodes[idx];
                Step {
                    name: node.name.clone(),
                    op: operators[idx].take().unwrap_or_else(|| {
                        unreachable!("operator for scheduled node was parsed")
                    }),
                    inputs: node.inputs.iter().filter(|n| !n.is_empty()).cloned().collect(),
                    outputs: node.outputs.clone(),
                }
            })
            .collect();

        Ok(Engine {
            steps,
            constants: graph.initializers.into_iter().collect(),
            inputs: input_shapes,
            outputs: graph.outputs.iter().map(|info| info.name.clone()).collect(),
            consumers,
            workspace_size: peak,
            verbose: self.verbose,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> EngineBuilder {
        EngineBuilder::new()
    }
}

/// An executable plan for a graph.
///
/// Engines are immutable once built; per-run state lives in
/// [`ExecutionContext`]s created from the engine.
pub struct Engine {
    steps: Vec<Step>,
    constants: FxHashMap<String, Tensor>,
    inputs: Vec<(String, Vec<usize>)>,
    outputs: Vec<String>,

    /// Remaining-use counts for intermediate values, used to release
    /// buffers as execution proceeds.
    consumers: FxHashMap<String, usize>,

    workspace_size: u64,
    verbose: bool,
}

impl Engine {
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn input_shape(&self, index: usize) -> Option<&[usize]> {
        self.inputs.get(index).map(|(_, shape)| shape.as_slice())
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Peak bytes of live intermediate buffers the plan needs.
    pub fn workspace_size(&self) -> u64 {
        self.workspace_size
    }

    fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|(input, _)| input == name)
    }

    /// Create an execution context with zero-filled input buffers sized for
    /// this engine's inputs.
    pub fn create_context(&self) -> ExecutionContext<'_> {
        ExecutionContext {
            engine: self,
            inputs: self
                .inputs
                .iter()
                .map(|(_, shape)| Tensor::zeros(shape))
                .collect(),
            outputs: vec![None; self.outputs.len()],
        }
    }
}

/// Per-run state for an [`Engine`]: pre-allocated host input buffers and the
/// outputs of the most recent [`execute`](ExecutionContext::execute) call.
pub struct ExecutionContext<'a> {
    engine: &'a Engine,
    inputs: Vec<Tensor>,
    outputs: Vec<Option<Tensor>>,
}

impl ExecutionContext<'_> {
    /// Mutable view of an input buffer, for the caller to fill before
    /// executing.
    ///
    /// Panics if `index` is out of range for the engine's inputs.
    pub fn input_mut(&mut self, index: usize) -> &mut [f32] {
        self.inputs[index].data_mut()
    }

    /// Output of the most recent `execute` call, or `None` before the first
    /// call or if `index` is out of range.
    pub fn output(&self, index: usize) -> Option<&Tensor> {
        self.outputs.get(index).and_then(|output| output.as_ref())
    }

    /// Run the plan once, synchronously.
    pub fn execute(&mut self) -> Result<(), RunError> {
        let engine = self.engine;
        let mut values: FxHashMap<&str, Tensor> = FxHashMap::default();
        let mut remaining: FxHashMap<&str, usize> = engine
            .consumers
            .iter()
            .map(|(name, count)| (name.as_str(), *count))
            .collect();

        for (step_num, step) in engine.steps.iter().enumerate() {
            if engine.verbose {
                eprintln!(
                    "({}/{}) {} ({})",
                    step_num + 1,
                    engine.steps.len(),
                    step.name,
                    step.op.name()
                );
            }

            let result = {
                let mut inputs: Vec<&Tensor> = Vec::with_capacity(step.inputs.len());
                for name in &step.inputs {
                    let tensor = values
                        .get(name.as_str())
                        .or_else(|| engine.constants.get(name.as_str()))
                        .or_else(|| {
                            engine.input_index(name).map(|index| &self.inputs[index])
                        });
                    match tensor {
                        Some(tensor) => inputs.push(tensor),
                        None => {
                            return Err(RunError::OperatorError {
                                node: step.name.clone(),
                                error: OpError::MissingInputs,
                            });
                        }
                    }
                }
                step.op.run(InputList::new(&inputs))
            }
            .map_err(|error| RunError::OperatorError {
                node: step.name.clone(),
                error,
            })?;

            for (name, tensor) in zip(&step.outputs, result) {
                values.insert(name.as_str(), tensor);
            }

            // Release inputs with no further consumers.
            for name in &step.inputs {
                if let Some(count) = remaining.get_mut(name.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        values.remove(name.as_str());
                    }
                }
            }
        }

        for (index, name) in engine.outputs.iter().enumerate() {
            self.outputs[index] = values.remove(name.as_str());
        }
        Ok(())
    }
}
