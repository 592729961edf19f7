//! Owned host tensors.
//!
//! The demo network is float-only, so this module provides a single owned
//! `f32` tensor with contiguous row-major storage and the handful of
//! constructors and element-wise helpers the operators need.

use std::fmt;

/// An n-dimensional array of `f32` values with contiguous row-major storage.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// Return the number of elements implied by a shape.
///
/// An empty shape describes a scalar, which has one element.
pub fn elem_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

impl Tensor {
    /// Create a tensor from a shape and elements in row-major order.
    ///
    /// Panics if the number of elements does not match the shape.
    pub fn from_data(shape: &[usize], data: Vec<f32>) -> Tensor {
        assert_eq!(
            elem_count(shape),
            data.len(),
            "data length {} does not match shape {:?}",
            data.len(),
            shape
        );
        Tensor {
            shape: shape.to_vec(),
            data,
        }
    }

    /// Create a scalar tensor.
    pub fn from_scalar(value: f32) -> Tensor {
        Tensor {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    pub fn zeros(shape: &[usize]) -> Tensor {
        Tensor::full(shape, 0.0)
    }

    /// Create a tensor with every element set to `value`.
    pub fn full(shape: &[usize], value: f32) -> Tensor {
        Tensor {
            shape: shape.to_vec(),
            data: vec![value; elem_count(shape)],
        }
    }

    /// Create a tensor with elements drawn uniformly from `[0, 1)`.
    ///
    /// The generator is deliberately not seeded by this crate; successive
    /// runs produce different tensors.
    pub fn rand(shape: &[usize], rng: &mut fastrand::Rng) -> Tensor {
        let data = (0..elem_count(shape)).map(|_| rng.f32()).collect();
        Tensor {
            shape: shape.to_vec(),
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Return a copy of this tensor with `f` applied to every element.
    pub fn map<F: Fn(f32) -> f32>(&self, f: F) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().copied().map(f).collect(),
        }
    }

    /// Apply `f` to every element in place.
    pub fn apply<F: Fn(f32) -> f32>(&mut self, f: F) {
        for x in &mut self.data {
            *x = f(*x);
        }
    }

    /// Return the mean of all elements, or zero for an empty tensor.
    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("len", &self.data.len())
            .finish()
    }
}
