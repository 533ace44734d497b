use std::{
    fmt::{self, Display},
    iter,
};

use faer::prelude::*;
use log::debug;

use crate::{Error, Result};

/// Dimensions of a row-major buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorShape {
    dimensions: Box<[usize]>,
    /// Row-major stride of each dimension.
    offsets: Box<[usize]>,
    element_count: usize,
}

impl TensorShape {
    pub fn new(dimensions: impl Into<Box<[usize]>>) -> Self {
        let dimensions = dimensions.into();
        let (offsets, element_count) = Self::row_major_offsets(&dimensions);
        Self {
            dimensions,
            offsets,
            element_count,
        }
    }

    /// Strides saturate at `usize::MAX`, so an element count that overflows reads as
    /// `usize::MAX` and [`Tensor::zeros`] fails with [`Error::AllocationFailure`].
    fn row_major_offsets(dimensions: &[usize]) -> (Box<[usize]>, usize) {
        let mut offsets = vec![0usize; dimensions.len()].into_boxed_slice();
        let mut stride = 1usize;
        for (offset, &dimension) in iter::zip(offsets.iter_mut(), dimensions).rev() {
            *offset = stride;
            stride = stride.saturating_mul(dimension);
        }
        (offsets, stride)
    }

    pub fn dimensions(&self) -> &[usize] {
        &self.dimensions
    }

    /// Returns `None` if `axis` is out of range.
    pub fn dimension(&self, axis: usize) -> Option<usize> {
        self.dimensions.get(axis).copied()
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn element_count(&self) -> usize {
        self.element_count
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// Linear position of a multi-index.
    /// Returns `None` if the index has the wrong rank or is out of range on any axis.
    pub fn linear_index(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.rank() {
            return None;
        }
        let mut linear = 0usize;
        for ((&i, &dimension), &offset) in index.iter().zip(&self.dimensions).zip(&self.offsets) {
            if i >= dimension {
                return None;
            }
            linear = linear.checked_add(i.checked_mul(offset)?)?;
        }
        Some(linear)
    }

    /// Checks that this is a `[rows, cols]` shape, returning `(rows, cols)`.
    pub fn as_matrix(&self) -> Result<(usize, usize)> {
        match self.dimensions[..] {
            [rows, cols] => Ok((rows, cols)),
            _ => Err(Error::RankMismatch {
                expected: 2,
                got: self.rank(),
            }),
        }
    }
}

impl From<&[usize]> for TensorShape {
    fn from(dimensions: &[usize]) -> Self {
        Self::new(dimensions)
    }
}

impl From<Vec<usize>> for TensorShape {
    fn from(dimensions: Vec<usize>) -> Self {
        Self::new(dimensions)
    }
}

impl<const N: usize> From<[usize; N]> for TensorShape {
    fn from(dimensions: [usize; N]) -> Self {
        Self::new(dimensions.as_slice())
    }
}

impl Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        let mut iter = self.dimensions.iter();
        if let Some(first) = iter.next() {
            write!(f, "{first}")?;
        }
        for dimension in iter {
            write!(f, ", {dimension}")?;
        }
        write!(f, "]")
    }
}

/// A dense row-major `f32` buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: TensorShape,
    data: Box<[f32]>,
}

impl Tensor {
    /// Allocates a zeroed buffer.
    pub fn zeros(shape: impl Into<TensorShape>) -> Result<Self> {
        let shape = shape.into();
        let elements = shape.element_count();
        let data: Box<[f32]> = bytemuck::allocation::try_zeroed_slice_box(elements)
            .map_err(|()| Error::AllocationFailure { elements })?;
        debug!("allocated tensor of shape {shape}");
        Ok(Self { shape, data })
    }

    pub fn from_vec(shape: impl Into<TensorShape>, data: Vec<f32>) -> Result<Self> {
        let shape = shape.into();
        if shape.element_count() != data.len() {
            return Err(Error::ShapeMismatch {
                expected: shape.element_count(),
                got: data.len(),
            });
        }
        Ok(Self {
            shape,
            data: data.into_boxed_slice(),
        })
    }

    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    pub fn dimensions(&self) -> &[usize] {
        self.shape.dimensions()
    }

    pub fn element_count(&self) -> usize {
        self.shape.element_count()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Overwrites the whole buffer. Nothing is written if the lengths differ.
    pub fn copy_from_slice(&mut self, data: &[f32]) -> Result<()> {
        if self.element_count() != data.len() {
            return Err(Error::ShapeMismatch {
                expected: self.element_count(),
                got: data.len(),
            });
        }
        self.data.copy_from_slice(data);
        Ok(())
    }

    /// Calls `f` once per element, in storage order.
    pub fn fill_with(&mut self, mut f: impl FnMut() -> f32) {
        for x in &mut self.data {
            *x = f();
        }
    }

    pub fn map_inplace(&mut self, mut f: impl FnMut(f32) -> f32) {
        for x in &mut self.data {
            *x = f(*x);
        }
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// Returns `None` if the index is out of range.
    pub fn at(&self, index: &[usize]) -> Option<f32> {
        let i = self.shape.linear_index(index)?;
        self.data.get(i).copied()
    }

    /// Returns `None` if the index is out of range.
    pub fn at_mut(&mut self, index: &[usize]) -> Option<&mut f32> {
        let i = self.shape.linear_index(index)?;
        self.data.get_mut(i)
    }

    /// View of a rank-2 tensor as a matrix.
    pub fn as_mat_ref(&self) -> Result<MatRef<'_, f32>> {
        let (nrows, ncols) = self.shape.as_matrix()?;
        Ok(MatRef::from_row_major_slice(&self.data, nrows, ncols))
    }

    /// Mutable view of a rank-2 tensor as a matrix.
    pub fn as_mat_mut(&mut self) -> Result<MatMut<'_, f32>> {
        let (nrows, ncols) = self.shape.as_matrix()?;
        Ok(MatMut::from_row_major_slice_mut(&mut self.data, nrows, ncols))
    }

    /// Iterates over the rows of the last axis.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        let width = self.row_width();
        self.data.chunks(width)
    }

    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        let width = self.row_width();
        self.data.chunks_mut(width)
    }

    fn row_width(&self) -> usize {
        // `chunks` rejects a zero width.
        self.dimensions().last().copied().unwrap_or(1).max(1)
    }
}
