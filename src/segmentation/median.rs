// Slice-by-slice median filtering with a disk shaped window.

use ndarray::{Array3, Axis, Zip};
use std::cmp::Ordering;

/// Offsets (dy, dx) of every pixel within `radius` of the origin.
#[derive(Clone, Debug)]
pub struct DiskKernel {
    offsets: Vec<(isize, isize)>,
}

impl DiskKernel {
    pub fn new(radius: f64) -> DiskKernel {
        let radius = radius.max(0.0);
        let r = radius.floor() as isize;
        let r2 = radius * radius;
        let mut offsets = Vec::new();
        for dy in -r..=r {
            for dx in -r..=r {
                if ((dy * dy + dx * dx) as f64) <= r2 {
                    offsets.push((dy, dx));
                }
            }
        }
        DiskKernel { offsets }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }
}

/// Median of the disk neighborhood of every voxel, restricted to its own
/// slice. Out-of-frame neighbors take the value of the nearest edge pixel,
/// so every window holds the full kernel.
pub fn median_slices<T>(data: &Array3<T>, kernel: &DiskKernel) -> Array3<T>
where
    T: Copy + Default + PartialOrd + Send + Sync,
{
    let (depth, height, width) = data.dim();
    let mut out = Array3::<T>::default((depth, height, width));
    if kernel.len() <= 1 {
        out.assign(data);
        return out;
    }

    for (mut out_slice, slice) in out.axis_iter_mut(Axis(0)).zip(data.axis_iter(Axis(0))) {
        Zip::indexed(out_slice.rows_mut()).par_for_each(|y, mut row| {
            let mut window = Vec::with_capacity(kernel.len());
            for (x, v) in row.iter_mut().enumerate() {
                window.clear();
                for &(dy, dx) in &kernel.offsets {
                    let yy = (y as isize + dy).clamp(0, height as isize - 1) as usize;
                    let xx = (x as isize + dx).clamp(0, width as isize - 1) as usize;
                    window.push(slice[[yy, xx]]);
                }
                *v = median(&mut window);
            }
        });
    }

    out
}

fn median<T: Copy + PartialOrd>(window: &mut [T]) -> T {
    let mid = window.len() / 2;
    let (_, m, _) =
        window.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    *m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_kernel_sizes() {
        assert_eq!(DiskKernel::new(0.0).len(), 1);
        assert_eq!(DiskKernel::new(1.0).len(), 5);
        assert_eq!(DiskKernel::new(2.0).len(), 13);
        assert_eq!(DiskKernel::new(3.0).len(), 29);
        assert_eq!(DiskKernel::new(10.0).len(), 317);
    }

    #[test]
    fn test_median_removes_specks() {
        let mut data = Array3::from_elem((2, 9, 9), 1.0f32);
        data[[0, 4, 4]] = 100.0;
        data[[1, 2, 6]] = -50.0;
        let filtered = median_slices(&data, &DiskKernel::new(1.0));
        assert!(filtered.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_binary_median_is_slice_local() {
        // a 1-slice thick plate would vanish under a 3D median
        let mut data = Array3::from_elem((3, 12, 12), false);
        for i in 2..10 {
            for j in 2..10 {
                data[[1, i, j]] = true;
            }
        }
        let filtered = median_slices(&data, &DiskKernel::new(1.0));
        assert!(filtered[[1, 5, 5]]);
        assert!(!filtered[[0, 5, 5]]);
        assert!(!filtered[[2, 5, 5]]);
        assert!(filtered.iter().filter(|&&v| v).count() <= 64);
    }

    #[test]
    fn test_borders_repeat_edge_pixels() {
        let mut data = Array3::zeros((1, 6, 6));
        for ((_, i, j), v) in data.indexed_iter_mut() {
            *v = (i + j) as f32;
        }
        let filtered = median_slices(&data, &DiskKernel::new(1.0));
        // window at the origin is {0, 0, 0, 1, 1}
        assert_eq!(filtered[[0, 0, 0]], 0.0);
        assert_eq!(filtered[[0, 5, 5]], 10.0);
        assert_eq!(filtered[[0, 3, 2]], 5.0);
    }

    #[test]
    fn test_binary_median_keeps_corner_notch() {
        let mut data = Array3::from_elem((1, 8, 8), true);
        data[[0, 0, 0]] = false;
        let filtered = median_slices(&data, &DiskKernel::new(1.0));
        // replicated edges give the notch three votes out of five
        assert!(!filtered[[0, 0, 0]]);
        assert!(filtered[[0, 0, 1]]);
        assert_eq!(filtered.iter().filter(|&&v| !v).count(), 1);
    }

    #[test]
    fn test_median_is_deterministic() {
        let mut data = Array3::zeros((2, 16, 16));
        for ((k, i, j), v) in data.indexed_iter_mut() {
            *v = ((k * 31 + i * 17 + j * 7) % 13) as f32;
        }
        let kernel = DiskKernel::new(3.0);
        assert_eq!(median_slices(&data, &kernel), median_slices(&data, &kernel));
    }
}
