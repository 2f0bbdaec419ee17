// tensor.rs — Concrete tensor values
//
// Tensors appear at two points of a lowering run: as input bindings fed to
// the dry-run executor, and as the executor's per-node results used to
// resolve shapes that static metadata leaves unknown. The engine only ever
// reads dtype, shape, and byte length; element access exists for the
// reference executor.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::shape::Shape;

// ── Element types ────────────────────────────────────────────────────────────

/// Element types the target device understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    #[serde(rename = "f32")]
    Float32,
    #[serde(rename = "i32")]
    Int32,
    #[serde(rename = "u8")]
    Uint8,
    #[serde(rename = "qu8")]
    Quint8,
}

impl DataType {
    /// Byte width of one element.
    pub fn size_of(self) -> usize {
        match self {
            DataType::Float32 | DataType::Int32 => 4,
            DataType::Uint8 | DataType::Quint8 => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Float32 => "f32",
            DataType::Int32 => "i32",
            DataType::Uint8 => "u8",
            DataType::Quint8 => "qu8",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ── Tensor ───────────────────────────────────────────────────────────────────

/// Data length does not match the tensor's shape and element type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthMismatch {
    pub expected: usize,
    pub actual: usize,
}

impl fmt::Display for LengthMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tensor data length mismatch: expected {} bytes, got {}",
            self.expected, self.actual
        )
    }
}

impl std::error::Error for LengthMismatch {}

/// A concrete tensor value: element type, shape, and an owned byte buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dtype: DataType,
    shape: Shape,
    data: Vec<u8>,
}

impl Tensor {
    /// Zero-filled tensor of the given type and shape.
    pub fn zeros(dtype: DataType, shape: Shape) -> Tensor {
        let byte_len = shape.num_elements() as usize * dtype.size_of();
        Tensor {
            dtype,
            shape,
            data: vec![0; byte_len],
        }
    }

    /// Tensor from raw bytes; the length must match shape and element width.
    pub fn from_bytes(dtype: DataType, shape: Shape, data: Vec<u8>) -> Result<Tensor, LengthMismatch> {
        let expected = shape.num_elements() as usize * dtype.size_of();
        if data.len() != expected {
            return Err(LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Tensor { dtype, shape, data })
    }

    pub fn from_f32(shape: Shape, values: &[f32]) -> Result<Tensor, LengthMismatch> {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Tensor::from_bytes(DataType::Float32, shape, data)
    }

    pub fn from_i32(shape: Shape, values: &[i32]) -> Result<Tensor, LengthMismatch> {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Tensor::from_bytes(DataType::Int32, shape, data)
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Decode as f32 elements, if this is an f32 tensor.
    pub fn as_f32(&self) -> Option<Vec<f32>> {
        if self.dtype != DataType::Float32 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    /// Decode as i32 elements, if this is an i32 tensor.
    pub fn as_i32(&self) -> Option<Vec<i32>> {
        if self.dtype != DataType::Int32 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    /// Same data viewed under a different shape. Element count must match.
    pub fn reshaped(&self, shape: Shape) -> Result<Tensor, LengthMismatch> {
        Tensor::from_bytes(self.dtype, shape, self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeros_allocates_byte_len() {
        let t = Tensor::zeros(DataType::Float32, Shape::new(vec![2, 3]));
        assert_eq!(t.byte_len(), 24);
        assert_eq!(t.shape().dims(), &[2, 3]);
    }

    #[test]
    fn f32_roundtrip() {
        let t = Tensor::from_f32(Shape::new(vec![4]), &[1.0, -2.5, 0.0, 7.25]).unwrap();
        assert_eq!(t.as_f32().unwrap(), vec![1.0, -2.5, 0.0, 7.25]);
    }

    #[test]
    fn length_mismatch_rejected() {
        let err = Tensor::from_f32(Shape::new(vec![3]), &[1.0]).unwrap_err();
        assert_eq!(err.expected, 12);
        assert_eq!(err.actual, 4);
    }

    #[test]
    fn reshape_preserves_data() {
        let t = Tensor::from_i32(Shape::new(vec![2, 2]), &[1, 2, 3, 4]).unwrap();
        let r = t.reshaped(Shape::new(vec![4])).unwrap();
        assert_eq!(r.as_i32().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(r.shape().rank(), 1);
    }
}
