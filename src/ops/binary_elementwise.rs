use std::iter::zip;

use crate::ops::{InputList, IntoOpResult, OpError, Operator, OutputList};
use crate::tensor::{elem_count, Tensor};

/// Add two tensors elementwise.
///
/// Broadcasting is supported only between a tensor and a one-element tensor
/// (a scalar), which is the form the demo network uses for its constant
/// offset.
pub fn add(a: &Tensor, b: &Tensor) -> Result<Tensor, OpError> {
    if a.shape() == b.shape() {
        let data = zip(a.data(), b.data()).map(|(x, y)| x + y).collect();
        Ok(Tensor::from_data(a.shape(), data))
    } else if b.len() == 1 {
        let y = b.data()[0];
        Ok(a.map(|x| x + y))
    } else if a.len() == 1 {
        let x = a.data()[0];
        Ok(b.map(|y| x + y))
    } else {
        Err(OpError::IncompatibleInputShapes(
            "shapes cannot be broadcast together",
        ))
    }
}

#[derive(Clone, Debug, Default)]
pub struct Add {}

impl Operator for Add {
    fn name(&self) -> &str {
        "Add"
    }

    fn run(&self, inputs: InputList) -> Result<OutputList, OpError> {
        let a = inputs.require(0)?;
        let b = inputs.require(1)?;
        add(a, b)?.into_op_result()
    }

    fn infer_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>, OpError> {
        let [a, b] = inputs else {
            return Err(OpError::MissingInputs);
        };
        if a == b || elem_count(b) == 1 {
            Ok(a.to_vec())
        } else if elem_count(a) == 1 {
            Ok(b.to_vec())
        } else {
            Err(OpError::IncompatibleInputShapes(
                "shapes cannot be broadcast together",
            ))
        }
    }
}
