//! Shape management for tensors: dimensions, cumulative strides, and the
//! broadcasting/matmul shape algebra the expression graph relies on.

use std::fmt;
use thiserror::Error;

/// Maximum supported rank. Mirrors the fixed-capacity dimension list of the
/// reference engine; kept as a sanity bound rather than a hard array size
/// since `Vec<usize>` already gives us dynamic rank for free.
pub const MAX_RANK: usize = 10;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShapeError {
    #[error("shape has no dimensions")]
    Empty,
    #[error("shape rank {0} exceeds maximum of {MAX_RANK}")]
    TooManyDims(usize),
    #[error("shape dimension at index {0} is zero")]
    ZeroDim(usize),
    #[error("shapes {0} and {1} are not broadcastable")]
    NotBroadcastable(Shape, Shape),
    #[error("shapes {0} and {1} are not size-compatible")]
    NotCompatible(Shape, Shape),
    #[error("shapes {0} and {1} are not matmul-compatible")]
    NotMatmulCompatible(Shape, Shape),
    #[error("malformed serialized shape")]
    Malformed,
}

/// Shape of a tensor: ordered list of dimension sizes, C-order (row-major).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
    cumulative: Vec<usize>,
}

impl Shape {
    /// Create a shape from dimension sizes. Fails if empty, too many
    /// dimensions, or any dimension is zero.
    pub fn new(dims: Vec<usize>) -> Result<Self, ShapeError> {
        if dims.is_empty() {
            return Err(ShapeError::Empty);
        }
        if dims.len() > MAX_RANK {
            return Err(ShapeError::TooManyDims(dims.len()));
        }
        if let Some(i) = dims.iter().position(|&d| d == 0) {
            return Err(ShapeError::ZeroDim(i));
        }
        let cumulative = cumulative_strides(&dims);
        Ok(Shape { dims, cumulative })
    }

    /// Create a rank-1 scalar-ish shape `[1]`. Never fails.
    pub fn scalar() -> Self {
        Shape::new(vec![1]).expect("scalar shape is always valid")
    }

    /// Number of dimensions (rank).
    pub fn dimension(&self) -> usize {
        self.dims.len()
    }

    /// Dimension sizes as slice.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Cumulative strides: `cumulative[i]` = product of dims with index > i.
    pub fn cumulative(&self) -> &[usize] {
        &self.cumulative
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    /// First dimension.
    pub fn first(&self) -> usize {
        self.dims[0]
    }

    /// Last dimension.
    pub fn last(&self) -> usize {
        *self.dims.last().expect("shape is never empty")
    }

    /// Check if this shape is size-compatible with another (same element
    /// count; used for in-place reshape).
    pub fn are_compatible(&self, other: &Shape) -> bool {
        self.size() == other.size()
    }

    /// Check if shape is a scalar (single element).
    pub fn is_scalar(&self) -> bool {
        self.size() == 1
    }

    /// Two shapes are broadcastable iff either is scalar, or for every
    /// trailing position up to the shorter rank the dimensions match.
    pub fn are_broadcastable(a: &Shape, b: &Shape) -> bool {
        if a.is_scalar() || b.is_scalar() {
            return true;
        }
        let n = a.dimension().min(b.dimension());
        for i in 0..n {
            let da = a.dims[a.dimension() - 1 - i];
            let db = b.dims[b.dimension() - 1 - i];
            if da != db {
                return false;
            }
        }
        true
    }

    /// The broadcast result shape: whichever operand has higher dimension;
    /// ties resolve to the left (`a`). Scalars broadcast with anything.
    pub fn broadcasted(a: &Shape, b: &Shape) -> Result<Shape, ShapeError> {
        if !Self::are_broadcastable(a, b) {
            return Err(ShapeError::NotBroadcastable(a.clone(), b.clone()));
        }
        if b.dimension() > a.dimension() {
            Ok(b.clone())
        } else {
            Ok(a.clone())
        }
    }

    /// Matmul result shape under compile-time-style transpose flags: the
    /// inner (contracted) axis of each operand is the first dim if
    /// transposed, else the last; outer dims of `a` are followed by outer
    /// dims of `b`.
    pub fn matmul_shape(
        a: &Shape,
        b: &Shape,
        transpose_a: bool,
        transpose_b: bool,
    ) -> Result<Shape, ShapeError> {
        let (a_inner, a_outer) = matmul_split(a, transpose_a);
        let (b_inner, b_outer) = matmul_split(b, !transpose_b);
        if a_inner != b_inner {
            return Err(ShapeError::NotMatmulCompatible(a.clone(), b.clone()));
        }
        let mut dims = a_outer;
        dims.extend(b_outer);
        if dims.is_empty() {
            dims.push(1);
        }
        Shape::new(dims)
    }

    /// Serialize as: dimension count (usize, native endian) then each
    /// dimension (usize, native endian).
    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.dims.len().to_ne_bytes());
        for &d in &self.dims {
            out.extend_from_slice(&d.to_ne_bytes());
        }
    }

    /// Inverse of [`Shape::serialize`]. Returns the shape and the number of
    /// bytes consumed.
    pub fn deserialize(bytes: &[u8]) -> Result<(Self, usize), ShapeError> {
        const W: usize = std::mem::size_of::<usize>();
        if bytes.len() < W {
            return Err(ShapeError::Malformed);
        }
        let rank = usize::from_ne_bytes(bytes[0..W].try_into().unwrap());
        let mut offset = W;
        let mut dims = Vec::with_capacity(rank);
        for _ in 0..rank {
            if bytes.len() < offset + W {
                return Err(ShapeError::Malformed);
            }
            dims.push(usize::from_ne_bytes(bytes[offset..offset + W].try_into().unwrap()));
            offset += W;
        }
        let shape = Shape::new(dims).map_err(|_| ShapeError::Malformed)?;
        Ok((shape, offset))
    }
}

/// Treats a matmul operand as a matrix: returns `(inner_axis_len, outer_dims)`.
/// `contract_first` selects whether the first or last axis is contracted
/// (i.e. whichever end the transpose flag points at); a rank-1 operand acts
/// as a column vector `[N, 1]`, so its only axis is both inner and outer as
/// appropriate.
fn matmul_split(s: &Shape, contract_first: bool) -> (usize, Vec<usize>) {
    if s.dimension() == 1 {
        // Treat as [N, 1]: contracting "first" means contracting N (no
        // outer dims survive); contracting "last" contracts the implicit 1,
        // leaving N as the sole outer dim.
        return if contract_first {
            (s.dims[0], vec![])
        } else {
            (1, vec![s.dims[0]])
        };
    }
    if contract_first {
        (s.dims[0], s.dims[1..].to_vec())
    } else {
        let last = s.dims.len() - 1;
        (s.dims[last], s.dims[..last].to_vec())
    }
}

fn cumulative_strides(dims: &[usize]) -> Vec<usize> {
    let mut cumulative = vec![1; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        cumulative[i] = cumulative[i + 1] * dims[i + 1];
    }
    cumulative
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape{:?}", self.dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims)
    }
}

impl TryFrom<Vec<usize>> for Shape {
    type Error = ShapeError;
    fn try_from(dims: Vec<usize>) -> Result<Self, ShapeError> {
        Shape::new(dims)
    }
}

impl TryFrom<&[usize]> for Shape {
    type Error = ShapeError;
    fn try_from(dims: &[usize]) -> Result<Self, ShapeError> {
        Shape::new(dims.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_size_and_rank() {
        let s = Shape::new(vec![2, 3, 4]).unwrap();
        assert_eq!(s.size(), 24);
        assert_eq!(s.dimension(), 3);
        assert_eq!(s.cumulative(), &[12, 4, 1]);
    }

    #[test]
    fn rejects_empty_and_zero_dims() {
        assert!(matches!(Shape::new(vec![]), Err(ShapeError::Empty)));
        assert!(matches!(Shape::new(vec![2, 0, 3]), Err(ShapeError::ZeroDim(1))));
    }

    #[test]
    fn broadcast_scalar_with_anything() {
        let scalar = Shape::new(vec![1]).unwrap();
        let v = Shape::new(vec![4]).unwrap();
        assert!(Shape::are_broadcastable(&scalar, &v));
        assert_eq!(Shape::broadcasted(&scalar, &v).unwrap().dims(), &[4]);
        assert_eq!(Shape::broadcasted(&v, &scalar).unwrap().dims(), &[4]);
    }

    #[test]
    fn broadcast_tie_prefers_left() {
        let a = Shape::new(vec![2, 4]).unwrap();
        let b = Shape::new(vec![2, 4]).unwrap();
        assert_eq!(Shape::broadcasted(&a, &b).unwrap().dims(), a.dims());
    }

    #[test]
    fn matmul_shape_no_transpose() {
        let a = Shape::new(vec![2, 3]).unwrap();
        let b = Shape::new(vec![3, 5]).unwrap();
        let r = Shape::matmul_shape(&a, &b, false, false).unwrap();
        assert_eq!(r.dims(), &[2, 5]);
    }

    #[test]
    fn matmul_shape_transpose_left() {
        let a = Shape::new(vec![3, 2]).unwrap();
        let b = Shape::new(vec![3, 5]).unwrap();
        let r = Shape::matmul_shape(&a, &b, true, false).unwrap();
        assert_eq!(r.dims(), &[2, 5]);
    }

    #[test]
    fn shape_roundtrips_through_serialize() {
        let s = Shape::new(vec![2, 3, 4]).unwrap();
        let mut buf = Vec::new();
        s.serialize(&mut buf);
        let (back, consumed) = Shape::deserialize(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(back.dims(), s.dims());
    }
}
