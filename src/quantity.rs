//! Measurement quantities and their shapes
//!
//! A quantity entering a propagation is a scalar, a vector, or a 2-D field.
//! All three are stored as flattened row-major values next to a `Shape` tag,
//! so the sampling and reduction code never branches on rank.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::McError;

/// Logical shape of a quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shape {
    /// Single value
    Scalar,
    /// Vector of `n` elements
    Vector(usize),
    /// Row-major matrix with `rows * cols` elements
    Matrix(usize, usize),
}

impl Shape {
    /// Build a shape from runtime dimensions
    ///
    /// An empty slice is a scalar. Ranks above 2 are not supported and fail
    /// with `UnsupportedShape`.
    pub fn from_dims(dims: &[usize]) -> Result<Self, McError> {
        match *dims {
            [] => Ok(Shape::Scalar),
            [n] => Ok(Shape::Vector(n)),
            [rows, cols] => Ok(Shape::Matrix(rows, cols)),
            _ => Err(McError::UnsupportedShape { rank: dims.len() }),
        }
    }

    /// Flattened element count
    pub fn size(&self) -> usize {
        match *self {
            Shape::Scalar => 1,
            Shape::Vector(n) => n,
            Shape::Matrix(rows, cols) => rows * cols,
        }
    }

    /// Rank of the shape (0, 1, or 2)
    pub fn rank(&self) -> usize {
        match *self {
            Shape::Scalar => 0,
            Shape::Vector(_) => 1,
            Shape::Matrix(_, _) => 2,
        }
    }
}

/// A measurement quantity, immutable for the duration of a propagation call
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    shape: Shape,
    values: DVector<f64>,
}

impl Quantity {
    /// Scalar quantity
    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Shape::Scalar,
            values: DVector::from_element(1, value),
        }
    }

    /// Vector quantity
    pub fn vector(values: Vec<f64>) -> Self {
        let shape = Shape::Vector(values.len());
        Self {
            shape,
            values: DVector::from_vec(values),
        }
    }

    /// Matrix quantity from row-major values
    pub fn matrix(rows: usize, cols: usize, values: Vec<f64>) -> Result<Self, McError> {
        Self::with_shape(Shape::Matrix(rows, cols), DVector::from_vec(values))
    }

    /// Quantity from runtime dimensions and flattened row-major values
    ///
    /// This is the entry point for data whose rank is only known at runtime,
    /// e.g. arrays read from a file.
    pub fn from_dims(dims: &[usize], values: Vec<f64>) -> Result<Self, McError> {
        let shape = Shape::from_dims(dims)?;
        Self::with_shape(shape, DVector::from_vec(values))
    }

    /// Quantity from a shape and matching flattened values
    pub fn with_shape(shape: Shape, values: DVector<f64>) -> Result<Self, McError> {
        if values.len() != shape.size() {
            return Err(McError::InvalidArgument(format!(
                "expected {} values for shape {:?}, got {}",
                shape.size(),
                shape,
                values.len()
            )));
        }
        Ok(Self { shape, values })
    }

    /// Logical shape
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Flattened element count
    pub fn size(&self) -> usize {
        self.shape.size()
    }

    /// Flattened row-major values
    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_sizes() {
        assert_eq!(Shape::Scalar.size(), 1);
        assert_eq!(Shape::Vector(7).size(), 7);
        assert_eq!(Shape::Matrix(3, 4).size(), 12);
        assert_eq!(Shape::Scalar.rank(), 0);
        assert_eq!(Shape::Vector(7).rank(), 1);
        assert_eq!(Shape::Matrix(3, 4).rank(), 2);
    }

    #[test]
    fn test_shape_from_dims() {
        assert_eq!(Shape::from_dims(&[]).unwrap(), Shape::Scalar);
        assert_eq!(Shape::from_dims(&[5]).unwrap(), Shape::Vector(5));
        assert_eq!(Shape::from_dims(&[2, 3]).unwrap(), Shape::Matrix(2, 3));
    }

    #[test]
    fn test_rank_above_two_rejected() {
        let err = Shape::from_dims(&[2, 2, 2]).unwrap_err();
        assert!(matches!(err, McError::UnsupportedShape { rank: 3 }));
    }

    #[test]
    fn test_matrix_value_count_checked() {
        let err = Quantity::matrix(2, 2, vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, McError::InvalidArgument(_)));
    }

    #[test]
    fn test_from_dims_roundtrip() {
        let q = Quantity::from_dims(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(q.shape(), Shape::Matrix(2, 2));
        assert_eq!(q.size(), 4);
        assert_eq!(q.values()[2], 3.0);
    }
}
