//! Tensor layouts and the padded-layout linearizer.
//!
//! A layout describes a tensor over six fixed axes: batch, feature and up to
//! four spatial axes (x, y, z, w). Each axis may carry padding before and
//! after the logical extent; the physical buffer holds the padded extents,
//! nested in the order the layout's [`Format`] gives.
//!
//! Logical iteration over a layout ([`Layout::coords`]) is always batch,
//! feature, w, z, y, x with x fastest, independent of the format. Anything
//! that compares flattened tensors relies on this order.

use crate::error::{Result, RuntimeError};
use tessera_core::DataType;

/// Number of spatial axes.
pub const SPATIAL_AXES: usize = 4;

/// One of the six layout axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Batch,
    Feature,
    X,
    Y,
    Z,
    W,
}

/// Per-axis values: extents, paddings, or a coordinate.
///
/// `spatial` is ordered x, y, z, w.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dims {
    pub batch: usize,
    pub feature: usize,
    pub spatial: [usize; SPATIAL_AXES],
}

/// A logical element coordinate.
pub type Coord = Dims;

impl Dims {
    pub fn new(batch: usize, feature: usize, spatial: [usize; SPATIAL_AXES]) -> Self {
        Self {
            batch,
            feature,
            spatial,
        }
    }

    /// All axes zero.
    pub fn zero() -> Self {
        Self::default()
    }

    /// All axes one.
    pub fn ones() -> Self {
        Self::new(1, 1, [1; SPATIAL_AXES])
    }

    pub fn get(&self, axis: Axis) -> usize {
        match axis {
            Axis::Batch => self.batch,
            Axis::Feature => self.feature,
            Axis::X => self.spatial[0],
            Axis::Y => self.spatial[1],
            Axis::Z => self.spatial[2],
            Axis::W => self.spatial[3],
        }
    }

    pub fn set(&mut self, axis: Axis, value: usize) {
        match axis {
            Axis::Batch => self.batch = value,
            Axis::Feature => self.feature = value,
            Axis::X => self.spatial[0] = value,
            Axis::Y => self.spatial[1] = value,
            Axis::Z => self.spatial[2] = value,
            Axis::W => self.spatial[3] = value,
        }
    }

    /// Product of all axes.
    pub fn product(&self) -> usize {
        self.batch * self.feature * self.spatial.iter().product::<usize>()
    }

    fn is_zero(&self) -> bool {
        *self == Self::zero()
    }
}

/// Padding before (`lower`) and after (`upper`) each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Padding {
    pub lower: Dims,
    pub upper: Dims,
}

impl Padding {
    pub fn new(lower: Dims, upper: Dims) -> Self {
        Self { lower, upper }
    }

    /// Same padding on both sides.
    pub fn symmetric(pad: Dims) -> Self {
        Self::new(pad, pad)
    }

    /// Whether any axis is padded.
    pub fn is_padded(&self) -> bool {
        !self.lower.is_zero() || !self.upper.is_zero()
    }
}

/// Physical nesting of the axes in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    /// Planar: batch, feature, w, z, y, x (x innermost).
    #[default]
    Bfwzyx,

    /// Feature last: batch, w, z, y, x, feature (feature innermost).
    Bwzyxf,
}

impl Format {
    /// Axes from outermost to innermost.
    pub fn physical_order(&self) -> [Axis; 6] {
        match self {
            Format::Bfwzyx => [Axis::Batch, Axis::Feature, Axis::W, Axis::Z, Axis::Y, Axis::X],
            Format::Bwzyxf => [Axis::Batch, Axis::W, Axis::Z, Axis::Y, Axis::X, Axis::Feature],
        }
    }
}

/// Element type, extents, padding and format of a memory-backed tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub dtype: DataType,
    pub dims: Dims,
    pub padding: Padding,
    pub format: Format,
    /// Number of axes the layout was described with.
    rank: usize,
}

impl Layout {
    /// Unpadded planar layout.
    pub fn new(dtype: DataType, dims: Dims) -> Self {
        Self {
            dtype,
            dims,
            padding: Padding::default(),
            format: Format::default(),
            rank: 2 + SPATIAL_AXES,
        }
    }

    /// Map a row-major shape of rank ≤ 6 onto the layout axes.
    ///
    /// `shape[0]` is batch, `shape[1]` feature, and the remaining dimensions
    /// land on the innermost spatial axes in order: rank 3 uses x, rank 4
    /// uses y and x, and so on. Axes the shape does not name have extent 1,
    /// so planar iteration visits elements in row-major order.
    pub fn from_shape(dtype: DataType, shape: &[usize]) -> Result<Self> {
        if shape.len() > 2 + SPATIAL_AXES {
            return Err(RuntimeError::InvalidLayout(format!(
                "rank {} shape {:?} exceeds the {} layout axes",
                shape.len(),
                shape,
                2 + SPATIAL_AXES
            )));
        }

        let mut dims = Dims::ones();
        let mut rest = shape;
        if let Some((&batch, tail)) = rest.split_first() {
            dims.batch = batch;
            rest = tail;
        }
        if let Some((&feature, tail)) = rest.split_first() {
            dims.feature = feature;
            rest = tail;
        }
        // Outermost remaining dim goes to the highest spatial index used
        for (i, &extent) in rest.iter().rev().enumerate() {
            dims.spatial[i] = extent;
        }

        Ok(Self {
            rank: shape.len(),
            ..Self::new(dtype, dims)
        })
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Logical shape, outermost first.
    ///
    /// A layout built by [`Layout::from_shape`] reports that shape back;
    /// one built from [`Dims`] reports all six axes.
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = vec![self.dims.batch, self.dims.feature];
        let spatial = self.rank.saturating_sub(2);
        shape.extend(self.dims.spatial[..spatial].iter().rev());
        shape.truncate(self.rank);
        shape
    }

    /// Whether the layout declares any padding.
    pub fn is_padded(&self) -> bool {
        self.padding.is_padded()
    }

    /// Number of logical elements.
    pub fn count(&self) -> usize {
        self.dims.product()
    }

    /// Extents including padding.
    pub fn padded_dims(&self) -> Dims {
        let mut padded = Dims::zero();
        for axis in self.format.physical_order() {
            padded.set(
                axis,
                self.padding.lower.get(axis) + self.dims.get(axis) + self.padding.upper.get(axis),
            );
        }
        padded
    }

    /// Number of elements in the physical (padded) buffer.
    pub fn padded_len(&self) -> usize {
        self.padded_dims().product()
    }

    /// Size in bytes of the physical buffer.
    pub fn bytes(&self) -> usize {
        self.padded_len() * self.dtype.size()
    }

    /// Offset, in elements, of `coord` within the physical buffer.
    pub fn linear_offset(&self, coord: &Coord) -> usize {
        let padded = self.padded_dims();
        self.format
            .physical_order()
            .iter()
            .fold(0, |offset, &axis| {
                offset * padded.get(axis) + self.padding.lower.get(axis) + coord.get(axis)
            })
    }

    /// Iterate every logical coordinate: batch, feature, w, z, y, x, with x
    /// fastest.
    pub fn coords(&self) -> impl Iterator<Item = Coord> + '_ {
        let dims = self.dims;
        (0..self.count()).map(move |mut index| {
            let mut coord = Coord::zero();
            for (i, &extent) in dims.spatial.iter().enumerate() {
                coord.spatial[i] = index % extent;
                index /= extent;
            }
            coord.feature = index % dims.feature;
            coord.batch = index / dims.feature;
            coord
        })
    }
}
