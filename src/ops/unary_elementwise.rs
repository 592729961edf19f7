use std::fmt::Debug;

use crate::ops::{InputList, IntoOpResult, OpError, Operator, OutputList};
use crate::tensor::Tensor;

/// Trait for operators which take a single float tensor and apply a function
/// to each element.
pub trait UnaryFloatOp {
    fn name(&self) -> &str;

    /// Apply the operator to a single element.
    fn map_element(&self, val: f32) -> f32;

    /// Apply the operator to all elements in `input`.
    fn map(&self, input: &Tensor) -> Tensor {
        input.map(|val| self.map_element(val))
    }

    /// Apply the operator to all elements in `input` in place.
    fn apply(&self, input: &mut Tensor) {
        input.apply(|val| self.map_element(val))
    }
}

impl<Op: UnaryFloatOp + Debug> Operator for Op {
    fn name(&self) -> &str {
        self.name()
    }

    fn run(&self, inputs: InputList) -> Result<OutputList, OpError> {
        let input = inputs.require(0)?;
        self.map(input).into_op_result()
    }

    fn infer_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>, OpError> {
        inputs
            .first()
            .map(|shape| shape.to_vec())
            .ok_or(OpError::MissingInputs)
    }
}

pub fn clip(input: &Tensor, min: f32, max: f32) -> Tensor {
    Clip { min, max }.map(input)
}

pub fn clip_in_place(input: &mut Tensor, min: f32, max: f32) {
    Clip { min, max }.apply(input)
}

/// Clamp elements to the range `[min, max]`.
///
/// The bounds are attributes of the operator, captured when the node is read
/// from the graph.
#[derive(Clone, Debug)]
pub struct Clip {
    pub min: f32,
    pub max: f32,
}

impl Default for Clip {
    fn default() -> Clip {
        Clip {
            min: f32::MIN,
            max: f32::MAX,
        }
    }
}

impl UnaryFloatOp for Clip {
    fn name(&self) -> &str {
        "Clip"
    }

    fn map_element(&self, val: f32) -> f32 {
        val.clamp(self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::{clip, clip_in_place, Clip, UnaryFloatOp};
    use crate::ops::{InputList, Operator};
    use crate::tensor::Tensor;

    #[test]
    fn test_clip() {
        let input = Tensor::from_data(&[5], vec![-3.0, 0.0, 2.5, 6.0, 9.0]);
        let result = clip(&input, 0.0, 6.0);
        assert_eq!(result.data(), &[0.0, 0.0, 2.5, 6.0, 6.0]);

        let mut input = input;
        clip_in_place(&mut input, 0.0, 6.0);
        assert_eq!(input.data(), &[0.0, 0.0, 2.5, 6.0, 6.0]);
    }

    #[test]
    fn test_clip_default_passes_values_through() {
        let input = Tensor::from_data(&[3], vec![-1e30, 0.0, 1e30]);
        let result = Clip::default().map(&input);
        assert_eq!(result.data(), input.data());
    }

    #[test]
    fn test_clip_as_operator() {
        let input = Tensor::from_data(&[2, 2], vec![-1.0, 3.0, 7.0, 5.0]);
        let op = Clip { min: 0.0, max: 6.0 };

        let shape = op.infer_shape(&[input.shape()]).unwrap();
        assert_eq!(shape, vec![2, 2]);

        let outputs = op.run(InputList::new(&[&input])).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].data(), &[0.0, 3.0, 6.0, 5.0]);
    }
}
