//! Operator implementations for the demo network.
//!
//! Operators are named after the ONNX operator that they implement. See
//! <https://onnx.ai/onnx/operators/>.

use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display, Formatter};

use smallvec::SmallVec;

use crate::tensor::Tensor;

mod binary_elementwise;
mod conv;
mod unary_elementwise;

pub use binary_elementwise::{add, Add};
pub use conv::{conv, Conv};
pub use unary_elementwise::{clip, clip_in_place, Clip, UnaryFloatOp};

/// Errors from executing an operator or inferring its output shape.
#[derive(Debug, PartialEq)]
pub enum OpError {
    /// A required input was not provided.
    MissingInputs,

    /// An input or attribute had an unsupported value.
    InvalidValue(&'static str),

    /// The shapes of the inputs cannot be combined.
    IncompatibleInputShapes(&'static str),
}

impl Display for OpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OpError::MissingInputs => write!(f, "required inputs are missing"),
            OpError::InvalidValue(msg) => write!(f, "invalid value: {}", msg),
            OpError::IncompatibleInputShapes(msg) => {
                write!(f, "incompatible input shapes: {}", msg)
            }
        }
    }
}

impl Error for OpError {}

/// List of inputs for an operator evaluation.
///
/// Inputs are resolved positionally. Trailing optional inputs (eg. a
/// convolution bias) may simply be absent from the list.
#[derive(Copy, Clone)]
pub struct InputList<'a> {
    inputs: &'a [&'a Tensor],
}

impl<'a> InputList<'a> {
    pub fn new(inputs: &'a [&'a Tensor]) -> InputList<'a> {
        InputList { inputs }
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Get an optional input.
    pub fn get(&self, index: usize) -> Option<&'a Tensor> {
        self.inputs.get(index).copied()
    }

    /// Get a required input.
    pub fn require(&self, index: usize) -> Result<&'a Tensor, OpError> {
        self.get(index).ok_or(OpError::MissingInputs)
    }
}

/// Outputs from an operator.
///
/// This avoids allocations in the common case where an operator produces
/// exactly one output.
pub type OutputList = SmallVec<[Tensor; 1]>;

/// An Operator performs a computation step when executing a data flow graph.
///
/// Operators take zero or more dynamic input values, plus a set of static
/// attributes captured when the operator was read from the graph, and
/// produce one or more output values.
pub trait Operator: Debug {
    /// Return a display name for the operator.
    fn name(&self) -> &str;

    /// Execute the operator.
    fn run(&self, inputs: InputList) -> Result<OutputList, OpError>;

    /// Return the shape of this operator's output given its input shapes.
    ///
    /// The engine uses this when planning to size intermediate buffers
    /// before any data flows through the graph.
    fn infer_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>, OpError>;
}

/// Trait which converts operator outputs into the result type of
/// [`Operator::run`].
pub trait IntoOpResult {
    fn into_op_result(self) -> Result<OutputList, OpError>;
}

impl IntoOpResult for Tensor {
    fn into_op_result(self) -> Result<OutputList, OpError> {
        Ok(SmallVec::from_buf([self]))
    }
}
