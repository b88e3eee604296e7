// Restriction of a segmented channel to a ROI, and accumulation of the
// extracted objects for the overlay.

use ndarray::{Array3, Zip};

use super::roi::RoiMask;
use super::voxels::{BinaryMask, Spacing};

/// All foreground voxels of a channel inside one ROI, taken as a single
/// aggregate object.
#[derive(Clone, Debug)]
pub struct Object3D {
    mask: BinaryMask,
    voxel_count: usize,
}

impl Object3D {
    pub fn mask(&self) -> &BinaryMask {
        &self.mask
    }

    pub fn voxel_count(&self) -> usize {
        self.voxel_count
    }

    /// Volume in cubic micrometers.
    pub fn volume(&self) -> f64 {
        self.voxel_count as f64 * self.mask.spacing().voxel_volume()
    }
}

/// Clear everything outside `roi` on a copy of `mask`.
pub fn extract(mask: &BinaryMask, roi: &RoiMask) -> Object3D {
    let (depth, height, width) = mask.dim();
    assert_eq!(roi.plane().dim(), (height, width));
    assert_eq!(roi.depth(), depth);

    let region = roi.to_volume_mask(mask.spacing());
    let mut data = mask.data().clone();
    Zip::from(&mut data)
        .and(region.data())
        .par_for_each(|v, &inside| *v &= inside);

    let mask = BinaryMask::new(data, mask.spacing());
    let voxel_count = mask.count();
    Object3D { mask, voxel_count }
}

/// Union of the objects extracted from one channel, over every ROI of an
/// image.
pub struct ObjectCanvas {
    data: Array3<bool>,
    spacing: Spacing,
}

impl ObjectCanvas {
    pub fn new(dim: (usize, usize, usize), spacing: Spacing) -> ObjectCanvas {
        ObjectCanvas {
            data: Array3::from_elem(dim, false),
            spacing,
        }
    }

    pub fn draw(&mut self, object: &Object3D) {
        Zip::from(&mut self.data)
            .and(object.mask.data())
            .par_for_each(|v, &m| *v |= m);
    }

    pub fn into_mask(self) -> BinaryMask {
        BinaryMask::new(self.data, self.spacing)
    }
}
