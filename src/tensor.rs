//! The N-dimensional tensor: a shared, lane-padded dense buffer plus a
//! [`Shape`]. Mutation is observable through every handle that shares the
//! buffer (copy-on-clone, never copy-on-write) — see [`Tensor::clone`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::lanes::Lane;
use crate::shape::{Shape, ShapeError};

/// The floating-point type used throughout the engine above the tensor
/// layer. `Tensor<T>` itself stays generic over any [`Lane`] type so the
/// packed-lane width and fast-math kernels are exercised for both `f32`
/// and `f64` (see `lanes.rs` tests), but the expression graph, autograd,
/// and neural-network layers are built against this single concrete type,
/// matching the reference engine's own choice of `float` for its training
/// workload.
pub type Float = f32;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error("index {index} out of range for tensor of size {size}")]
    OutOfRange { index: usize, size: usize },
    #[error("multi-index {indices:?} out of range for shape {shape}")]
    MultiIndexOutOfRange { indices: Vec<usize>, shape: Shape },
    #[error("buffer length {got} does not match shape size {expected}")]
    BufferLengthMismatch { expected: usize, got: usize },
    #[error("malformed serialized tensor")]
    Malformed,
}

/// Dense tensor buffer, shared by reference count. The physical length is
/// the shape's element count padded to the next multiple of `T::LANE_WIDTH`
/// (one whole extra lane-width when not already a multiple); the tail
/// beyond `shape.size()` is a replica of the head so any lane-aligned read
/// in `[0, padded_len)` is valid without a scalar epilogue.
#[derive(Clone)]
pub struct Tensor<T: Lane = Float> {
    shape: Shape,
    data: Rc<RefCell<Vec<T>>>,
}

impl<T: Lane> Tensor<T> {
    /// Physical (lane-padded) buffer length for a logical size.
    pub fn padded_len(size: usize) -> usize {
        let lane = T::LANE_WIDTH;
        if size % lane == 0 {
            size
        } else {
            size + lane
        }
    }

    /// Allocate a zero-filled tensor of the given shape.
    pub fn zeros(shape: Shape) -> Self {
        let padded = Self::padded_len(shape.size());
        Tensor {
            shape,
            data: Rc::new(RefCell::new(vec![T::ZERO; padded])),
        }
    }

    /// Construct a tensor from a shape and exactly `shape.size()` logical
    /// values; the buffer is allocated lane-padded and wrapped.
    pub fn from_vec(shape: Shape, values: Vec<T>) -> Result<Self, TensorError> {
        if values.len() != shape.size() {
            return Err(TensorError::BufferLengthMismatch {
                expected: shape.size(),
                got: values.len(),
            });
        }
        let padded = Self::padded_len(shape.size());
        let mut data = values;
        data.resize(padded, T::ZERO);
        let t = Tensor {
            shape,
            data: Rc::new(RefCell::new(data)),
        };
        t.wrap_for_broadcasting();
        Ok(t)
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Logical element count (excludes lane padding).
    pub fn size(&self) -> usize {
        self.shape.size()
    }

    /// Deep copy: a genuinely independent buffer. Plain [`Clone::clone`]
    /// shares the `Rc` instead — that distinction is the whole point of
    /// copy-on-clone semantics.
    pub fn deep_clone(&self) -> Self {
        Tensor {
            shape: self.shape.clone(),
            data: Rc::new(RefCell::new(self.data.borrow().clone())),
        }
    }

    pub fn set_zero(&self) {
        for v in self.data.borrow_mut().iter_mut() {
            *v = T::ZERO;
        }
    }

    pub fn set_constant(&self, value: T) {
        let size = self.size();
        {
            let mut buf = self.data.borrow_mut();
            for v in buf[..size].iter_mut() {
                *v = value;
            }
        }
        self.wrap_for_broadcasting();
    }

    /// Bounds-checked flat read.
    pub fn index_flat(&self, i: usize) -> Result<T, TensorError> {
        let buf = self.data.borrow();
        if i >= buf.len() {
            return Err(TensorError::OutOfRange { index: i, size: buf.len() });
        }
        Ok(buf[i])
    }

    /// Flat read, broadcast-aware: addresses `data[i % size]`. Valid for
    /// any `i` since the buffer is always at least `size` long.
    pub fn get_broadcast(&self, i: usize) -> T {
        let size = self.size();
        self.data.borrow()[i % size]
    }

    /// Unchecked flat read (used on the interpreter's hot path where the
    /// caller has already established the index is in range).
    pub fn get_unchecked(&self, i: usize) -> T {
        self.data.borrow()[i]
    }

    /// Unchecked flat write.
    pub fn set_unchecked(&self, i: usize, value: T) {
        self.data.borrow_mut()[i] = value;
    }

    pub fn set_flat(&self, i: usize, value: T) -> Result<(), TensorError> {
        let mut buf = self.data.borrow_mut();
        if i >= self.shape.size() {
            return Err(TensorError::OutOfRange { index: i, size: self.shape.size() });
        }
        buf[i] = value;
        Ok(())
    }

    /// Multi-axis bounds-checked read via the shape's cumulative strides.
    pub fn index(&self, indices: &[usize]) -> Result<T, TensorError> {
        let flat = self.flat_index(indices)?;
        self.index_flat(flat)
    }

    pub fn set_index(&self, indices: &[usize], value: T) -> Result<(), TensorError> {
        let flat = self.flat_index(indices)?;
        self.data.borrow_mut()[flat] = value;
        Ok(())
    }

    fn flat_index(&self, indices: &[usize]) -> Result<usize, TensorError> {
        if indices.len() != self.shape.dimension() {
            return Err(TensorError::MultiIndexOutOfRange {
                indices: indices.to_vec(),
                shape: self.shape.clone(),
            });
        }
        let dims = self.shape.dims();
        let cumulative = self.shape.cumulative();
        let mut flat = 0;
        for i in 0..indices.len() {
            if indices[i] >= dims[i] {
                return Err(TensorError::MultiIndexOutOfRange {
                    indices: indices.to_vec(),
                    shape: self.shape.clone(),
                });
            }
            flat += indices[i] * cumulative[i];
        }
        Ok(flat)
    }

    /// Reshape in place; fails unless the new shape has the same element
    /// count. Contents (and the underlying buffer) are untouched.
    pub fn set_shape(&mut self, new_shape: Shape) -> Result<(), TensorError> {
        if !self.shape.are_compatible(&new_shape) {
            return Err(TensorError::Shape(ShapeError::NotCompatible(
                self.shape.clone(),
                new_shape,
            )));
        }
        let needed = Self::padded_len(new_shape.size());
        {
            let mut buf = self.data.borrow_mut();
            if buf.len() < needed {
                buf.resize(needed, T::ZERO);
            }
        }
        self.shape = new_shape;
        Ok(())
    }

    /// Copy the head of the buffer onto its lane-padded tail so that any
    /// lane-aligned read up to the padded length agrees with "address mod
    /// size". Must be called after any mutation that changes the head.
    pub fn wrap_for_broadcasting(&self) {
        let size = self.shape.size();
        let padded = Self::padded_len(size);
        if padded == size {
            return;
        }
        let pad_len = padded - size;
        let mut buf = self.data.borrow_mut();
        for i in 0..pad_len {
            buf[size + i] = buf[i];
        }
    }

    /// Debug-only invariant check: the tail must currently equal the head.
    pub fn assert_ready_for_broadcasting(&self) {
        debug_assert!({
            let size = self.shape.size();
            let buf = self.data.borrow();
            let padded = buf.len();
            (size..padded).all(|i| buf[i] == buf[i - size])
        });
    }

    /// Serialize as: shape, then logical element count (usize), then raw
    /// (unpadded) element bytes, all in host endianness.
    pub fn serialize(&self, out: &mut Vec<u8>)
    where
        T: bytes::Pod,
    {
        self.shape.serialize(out);
        let size = self.shape.size();
        out.extend_from_slice(&size.to_ne_bytes());
        let buf = self.data.borrow();
        for v in buf[..size].iter() {
            out.extend_from_slice(v.to_ne_bytes().as_ref());
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<(Self, usize), TensorError>
    where
        T: self::bytes::Pod,
    {
        let (shape, mut offset) = Shape::deserialize(bytes).map_err(|_| TensorError::Malformed)?;
        const W: usize = std::mem::size_of::<usize>();
        if bytes.len() < offset + W {
            return Err(TensorError::Malformed);
        }
        let size = usize::from_ne_bytes(bytes[offset..offset + W].try_into().unwrap());
        offset += W;
        if size != shape.size() {
            return Err(TensorError::Malformed);
        }
        let elem_size = std::mem::size_of::<T>();
        let mut values = Vec::with_capacity(size);
        for _ in 0..size {
            if bytes.len() < offset + elem_size {
                return Err(TensorError::Malformed);
            }
            values.push(T::from_ne_bytes_slice(&bytes[offset..offset + elem_size]));
            offset += elem_size;
        }
        let tensor = Tensor::from_vec(shape, values)?;
        Ok((tensor, offset))
    }
}

/// Minimal trivially-copyable-bytes contract for `f32`/`f64`, kept local
/// rather than pulling in a crate for two impls; mirrors the source's
/// `TriviallySerializable` concept gate.
pub mod bytes {
    pub trait Pod: Copy {
        type Bytes: AsRef<[u8]>;
        fn to_ne_bytes(self) -> Self::Bytes;
        fn from_ne_bytes_slice(bytes: &[u8]) -> Self;
    }

    impl Pod for f32 {
        type Bytes = [u8; 4];
        fn to_ne_bytes(self) -> Self::Bytes {
            f32::to_ne_bytes(self)
        }
        fn from_ne_bytes_slice(bytes: &[u8]) -> Self {
            f32::from_ne_bytes(bytes.try_into().expect("4-byte slice"))
        }
    }

    impl Pod for f64 {
        type Bytes = [u8; 8];
        fn to_ne_bytes(self) -> Self::Bytes {
            f64::to_ne_bytes(self)
        }
        fn from_ne_bytes_slice(bytes: &[u8]) -> Self {
            f64::from_ne_bytes(bytes.try_into().expect("8-byte slice"))
        }
    }
}

impl<T: Lane + fmt::Debug> fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buf = self.data.borrow();
        write!(f, "Tensor(shape={:?}, data={:?})", self.shape, &buf[..self.shape.size()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_handle_mutation_is_observed() {
        let t = Tensor::<Float>::from_vec(Shape::new(vec![4]).unwrap(), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let h = t.clone();
        h.set_flat(0, 99.0).unwrap();
        assert_eq!(t.index_flat(0).unwrap(), 99.0);
    }

    #[test]
    fn deep_clone_is_independent() {
        let t = Tensor::<Float>::from_vec(Shape::new(vec![4]).unwrap(), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let c = t.deep_clone();
        c.set_flat(0, 99.0).unwrap();
        assert_eq!(t.index_flat(0).unwrap(), 1.0);
        assert_eq!(c.index_flat(0).unwrap(), 99.0);
    }

    #[test]
    fn wrap_for_broadcasting_replicates_head() {
        // size 5 for f32 (lane width 8) pads to 13; tail [5..13) == head[0..8).
        let t = Tensor::<Float>::from_vec(
            Shape::new(vec![5]).unwrap(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
        )
        .unwrap();
        for i in 5..13 {
            assert_eq!(t.get_unchecked(i), t.get_unchecked(i - 5));
        }
    }

    #[test]
    fn serialize_roundtrip() {
        let t = Tensor::<Float>::from_vec(Shape::new(vec![2, 2]).unwrap(), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut buf = Vec::new();
        t.serialize(&mut buf);
        let (back, consumed) = Tensor::<Float>::deserialize(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(back.shape().dims(), t.shape().dims());
        for i in 0..4 {
            assert_eq!(back.index_flat(i).unwrap(), t.index_flat(i).unwrap());
        }
    }
}
