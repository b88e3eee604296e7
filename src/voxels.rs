// Voxel grids and binary masks. Arrays are indexed (z, y, x), so the outer
// axis iterates over slices.

use ndarray::{Array3, Zip};

use super::error::{Error, Result};

/// Physical size of a voxel, in micrometers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Spacing {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Spacing {
    pub fn new(x: f64, y: f64, z: f64) -> Result<Spacing> {
        for (axis, value) in [("x", x), ("y", y), ("z", z)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Config(format!(
                    "{} voxel size must be strictly positive, got {}",
                    axis, value
                )));
            }
        }
        Ok(Spacing { x, y, z })
    }

    pub fn voxel_volume(&self) -> f64 {
        self.x * self.y * self.z
    }
}

impl Default for Spacing {
    fn default() -> Self {
        Spacing {
            x: 1.0,
            y: 1.0,
            z: 1.0,
        }
    }
}

/// Immutable 3D intensity image. Filters produce new grids.
#[derive(Clone, Debug)]
pub struct VoxelGrid {
    data: Array3<f32>,
    spacing: Spacing,
}

impl VoxelGrid {
    pub fn new(data: Array3<f32>, spacing: Spacing) -> VoxelGrid {
        VoxelGrid { data, spacing }
    }

    // new grid with the same geometry
    pub fn with_data(&self, data: Array3<f32>) -> VoxelGrid {
        assert_eq!(data.dim(), self.data.dim());
        VoxelGrid {
            data,
            spacing: self.spacing,
        }
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn spacing(&self) -> Spacing {
        self.spacing
    }

    /// (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Smallest and largest finite sample, if there is one.
    pub fn intensity_range(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |range, &v| match range {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BinaryMask {
    data: Array3<bool>,
    spacing: Spacing,
}

impl BinaryMask {
    pub fn new(data: Array3<bool>, spacing: Spacing) -> BinaryMask {
        BinaryMask { data, spacing }
    }

    pub fn empty(dim: (usize, usize, usize), spacing: Spacing) -> BinaryMask {
        BinaryMask {
            data: Array3::from_elem(dim, false),
            spacing,
        }
    }

    pub fn data(&self) -> &Array3<bool> {
        &self.data
    }

    pub fn into_data(self) -> Array3<bool> {
        self.data
    }

    pub fn spacing(&self) -> Spacing {
        self.spacing
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    pub fn volume(&self) -> f64 {
        self.count() as f64 * self.spacing.voxel_volume()
    }

    /// Render as an intensity grid with `foreground` for set voxels and 0 elsewhere.
    pub fn to_grid(&self, foreground: f32) -> VoxelGrid {
        let mut data = Array3::zeros(self.data.dim());
        Zip::from(&mut data)
            .and(&self.data)
            .for_each(|v, &m| *v = if m { foreground } else { 0.0 });
        VoxelGrid::new(data, self.spacing)
    }
}
