// shape.rs — Tensor shape model and fixed-rank descriptor encoding
//
// The target device has a fixed-rank tensor model: every shape is carried
// across the transfer boundary as a 4-slot descriptor. Shapes of rank up to
// MAX_SUPPORTED_RANK are folded into that descriptor deterministically;
// higher ranks are rejected.
//
// Preconditions: none.
// Postconditions: `build_shape_array` yields identical descriptors for equal
//                 logical shapes regardless of where the shape came from.
// Failure modes: rank > MAX_SUPPORTED_RANK → `RankExceeded`.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum tensor rank the target device can represent.
pub const MAX_SUPPORTED_RANK: usize = 5;

/// Number of slots in the fixed-length shape descriptor.
pub const SHAPE_ARRAY_SIZE: usize = MAX_SUPPORTED_RANK - 1;

/// Fixed-length shape descriptor transferred to the device.
pub type ShapeArray = [i64; SHAPE_ARRAY_SIZE];

// ── Shape ────────────────────────────────────────────────────────────────────

/// An arbitrary-rank tensor shape. Rank 0 denotes a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape(Vec<i64>);

impl Shape {
    pub fn new(dims: Vec<i64>) -> Self {
        Shape(dims)
    }

    pub fn scalar() -> Self {
        Shape(Vec::new())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[i64] {
        &self.0
    }

    /// Total element count. A scalar has one element.
    pub fn num_elements(&self) -> i64 {
        self.0.iter().product()
    }
}

impl From<&[i64]> for Shape {
    fn from(dims: &[i64]) -> Self {
        Shape(dims.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

// ── Rank error ───────────────────────────────────────────────────────────────

/// Shape rank exceeds what the descriptor encoding can represent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankExceeded {
    pub rank: usize,
}

impl fmt::Display for RankExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "shape rank {} exceeds maximum supported rank {}",
            self.rank, MAX_SUPPORTED_RANK
        )
    }
}

impl std::error::Error for RankExceeded {}

// ── Descriptor encoding ──────────────────────────────────────────────────────

/// Encode a shape into the fixed 4-slot descriptor.
///
/// The trailing `SHAPE_ARRAY_SIZE` dimensions are right-aligned; any
/// dimensions beyond them are folded into the leading slot by multiplication;
/// missing leading slots are filled with 1. A scalar encodes as `[1,1,1,1]`.
pub fn build_shape_array(shape: &Shape) -> Result<ShapeArray, RankExceeded> {
    let rank = shape.rank();
    if rank > MAX_SUPPORTED_RANK {
        return Err(RankExceeded { rank });
    }

    let mut array: ShapeArray = [1; SHAPE_ARRAY_SIZE];
    let dims = shape.dims();
    let aligned = rank.min(SHAPE_ARRAY_SIZE);
    let tail = &dims[rank - aligned..];
    array[SHAPE_ARRAY_SIZE - aligned..].copy_from_slice(tail);
    for &folded in &dims[..rank - aligned] {
        array[0] *= folded;
    }
    Ok(array)
}

/// Render a descriptor as `AxBxCxD` for diagnostics.
pub fn shape_array_string(array: &ShapeArray) -> String {
    format!("{}x{}x{}x{}", array[0], array[1], array[2], array[3])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_encodes_to_ones() {
        let arr = build_shape_array(&Shape::scalar()).unwrap();
        assert_eq!(arr, [1, 1, 1, 1]);
    }

    #[test]
    fn low_rank_right_aligned() {
        assert_eq!(
            build_shape_array(&Shape::new(vec![7])).unwrap(),
            [1, 1, 1, 7]
        );
        assert_eq!(
            build_shape_array(&Shape::new(vec![2, 3])).unwrap(),
            [1, 1, 2, 3]
        );
        assert_eq!(
            build_shape_array(&Shape::new(vec![2, 3, 4])).unwrap(),
            [1, 2, 3, 4]
        );
    }

    #[test]
    fn rank_four_is_identity() {
        assert_eq!(
            build_shape_array(&Shape::new(vec![1, 4, 4, 2])).unwrap(),
            [1, 4, 4, 2]
        );
    }

    #[test]
    fn rank_five_folds_leading_dimension() {
        assert_eq!(
            build_shape_array(&Shape::new(vec![2, 3, 4, 5, 6])).unwrap(),
            [6, 4, 5, 6]
        );
    }

    #[test]
    fn rank_six_rejected() {
        let err = build_shape_array(&Shape::new(vec![1, 2, 3, 4, 5, 6])).unwrap_err();
        assert_eq!(err.rank, 6);
    }

    #[test]
    fn encoding_preserves_element_count() {
        let shape = Shape::new(vec![2, 3, 4, 5, 6]);
        let arr = build_shape_array(&shape).unwrap();
        assert_eq!(arr.iter().product::<i64>(), shape.num_elements());
    }

    #[test]
    fn descriptor_string_format() {
        assert_eq!(shape_array_string(&[1, 4, 4, 2]), "1x4x4x2");
    }
}
