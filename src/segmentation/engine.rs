// Image filtering primitives the segmenter is built on.

use log::debug;
use ndarray::Zip;

use super::median::{median_slices, DiskKernel};
use super::threshold::{threshold_value, ThresholdMethod};
use crate::voxels::{BinaryMask, VoxelGrid};

/// Stateless filtering backend. Implementations must produce identical
/// results for identical inputs.
pub trait FilterEngine: Sync {
    /// 2D median with a disk of `radius` pixels, applied to every slice.
    fn median_slices(&self, grid: &VoxelGrid, radius: f64) -> VoxelGrid;

    /// Binary counterpart of `median_slices`.
    fn median_mask_slices(&self, mask: &BinaryMask, radius: f64) -> BinaryMask;

    /// Global automatic threshold over the whole stack.
    fn threshold(&self, grid: &VoxelGrid, method: ThresholdMethod) -> BinaryMask;
}

/// Multithreaded CPU implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuEngine;

impl FilterEngine for CpuEngine {
    fn median_slices(&self, grid: &VoxelGrid, radius: f64) -> VoxelGrid {
        let kernel = DiskKernel::new(radius);
        grid.with_data(median_slices(grid.data(), &kernel))
    }

    fn median_mask_slices(&self, mask: &BinaryMask, radius: f64) -> BinaryMask {
        let kernel = DiskKernel::new(radius);
        BinaryMask::new(median_slices(mask.data(), &kernel), mask.spacing())
    }

    fn threshold(&self, grid: &VoxelGrid, method: ThresholdMethod) -> BinaryMask {
        let cutoff = threshold_value(grid, method);
        debug!("{} threshold: {}", method, cutoff);

        let mut mask = BinaryMask::empty(grid.dim(), grid.spacing()).into_data();
        Zip::from(&mut mask)
            .and(grid.data())
            .par_for_each(|m, &v| *m = v >= cutoff);
        BinaryMask::new(mask, grid.spacing())
    }
}
