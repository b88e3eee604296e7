// Per-channel segmentation: background subtraction, denoising median,
// global threshold and a binary cleanup median.

mod background;
mod engine;
mod median;
mod threshold;

pub use engine::{CpuEngine, FilterEngine};
pub use threshold::ThresholdMethod;

use log::trace;
use std::time::Instant;

use super::voxels::{BinaryMask, VoxelGrid};

/// Filter radii, in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentationParams {
    pub background_radius: f64,
    pub denoise_radius: f64,
    pub cleanup_radius: f64,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        SegmentationParams {
            background_radius: 100.0,
            denoise_radius: 10.0,
            cleanup_radius: 3.0,
        }
    }
}

pub struct Segmenter<E: FilterEngine> {
    engine: E,
    params: SegmentationParams,
}

impl<E: FilterEngine> Segmenter<E> {
    pub fn new(engine: E, params: SegmentationParams) -> Self {
        Segmenter { engine, params }
    }

    /// Foreground mask of `grid`. The input is left untouched and the
    /// result has the grid's dimensions and spacing.
    pub fn segment(&self, grid: &VoxelGrid, method: ThresholdMethod) -> BinaryMask {
        let t0 = Instant::now();
        let subtracted = background::subtract_background(grid, self.params.background_radius);
        trace!("subtract background: {:?}", t0.elapsed());

        let t0 = Instant::now();
        let denoised = self.engine.median_slices(&subtracted, self.params.denoise_radius);
        trace!("denoise: {:?}", t0.elapsed());

        let t0 = Instant::now();
        let mask = self.engine.threshold(&denoised, method);
        trace!("threshold ({}): {:?}", method, t0.elapsed());

        let t0 = Instant::now();
        let mask = self.engine.median_mask_slices(&mask, self.params.cleanup_radius);
        trace!("cleanup: {:?}", t0.elapsed());

        mask
    }
}
