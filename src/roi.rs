// Regions of interest. A ROI is a 2D shape in pixel coordinates that
// applies to every slice of a stack.

pub mod imagej;

use geo::geometry::{Point, Polygon, Rect};
use geo::{Area, BoundingRect, Contains};
use log::{info, warn};
use ndarray::{Array2, Array3};
use std::path::Path;

use super::error::{Error, Result};
use super::voxels::{BinaryMask, Spacing};

/// Name given to the ROI synthesized when an image comes without one.
pub const ENTIRE_IMAGE: &str = "entire image";

#[derive(Clone, Debug, PartialEq)]
pub enum RoiShape {
    Rectangle(Rect<f64>),
    Oval(Rect<f64>),
    Polygon(Polygon<f64>),
}

impl RoiShape {
    pub fn area(&self) -> f64 {
        match self {
            RoiShape::Rectangle(rect) => rect.width() * rect.height(),
            RoiShape::Oval(rect) => std::f64::consts::PI * rect.width() * rect.height() / 4.0,
            RoiShape::Polygon(polygon) => polygon.unsigned_area(),
        }
    }

    fn bounds(&self) -> Option<Rect<f64>> {
        match self {
            RoiShape::Rectangle(rect) | RoiShape::Oval(rect) => Some(*rect),
            RoiShape::Polygon(polygon) => polygon.bounding_rect(),
        }
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        match self {
            RoiShape::Rectangle(rect) => {
                let (min, max) = (rect.min(), rect.max());
                x >= min.x && x < max.x && y >= min.y && y < max.y
            }
            RoiShape::Oval(rect) => {
                let center = rect.center();
                let dx = (x - center.x) / (rect.width() / 2.0);
                let dy = (y - center.y) / (rect.height() / 2.0);
                dx * dx + dy * dy <= 1.0
            }
            RoiShape::Polygon(polygon) => polygon.contains(&Point::new(x, y)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Roi {
    name: String,
    shape: RoiShape,
}

impl Roi {
    pub fn new(name: impl Into<String>, shape: RoiShape) -> Result<Roi> {
        let name = name.into();
        let area = shape.area();
        if !(area.is_finite() && area > 0.0) {
            return Err(Error::invalid_roi(&name, "region has no area"));
        }
        Ok(Roi { name, shape })
    }

    /// The full `width` x `height` frame.
    pub fn entire_image(width: usize, height: usize) -> Roi {
        Roi {
            name: ENTIRE_IMAGE.to_string(),
            shape: RoiShape::Rectangle(Rect::new((0.0, 0.0), (width as f64, height as f64))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &RoiShape {
        &self.shape
    }
}

/// A ROI rasterized on an image plane and extruded through `depth` slices.
/// A pixel belongs to the ROI when its center lies inside the shape.
#[derive(Clone, Debug)]
pub struct RoiMask {
    plane: Array2<bool>,
    depth: usize,
    pixel_area: usize,
}

impl RoiMask {
    pub fn rasterize(roi: &Roi, width: usize, height: usize, depth: usize) -> RoiMask {
        let mut plane = Array2::from_elem((height, width), false);

        if let Some(bounds) = roi.shape.bounds() {
            let clip = |lo: f64, hi: f64, n: usize| {
                let lo = lo.floor().max(0.0).min(n as f64) as usize;
                let hi = hi.ceil().max(0.0).min(n as f64) as usize;
                lo..hi
            };
            let xs = clip(bounds.min().x, bounds.max().x, width);
            for y in clip(bounds.min().y, bounds.max().y, height) {
                for x in xs.clone() {
                    plane[[y, x]] = roi.shape.contains(x as f64 + 0.5, y as f64 + 0.5);
                }
            }
        }

        let pixel_area = plane.iter().filter(|&&v| v).count();
        RoiMask {
            plane,
            depth,
            pixel_area,
        }
    }

    pub fn plane(&self) -> &Array2<bool> {
        &self.plane
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of pixels covered in a single slice.
    pub fn pixel_area(&self) -> usize {
        self.pixel_area
    }

    /// The plane repeated over every slice.
    pub fn to_volume_mask(&self, spacing: Spacing) -> BinaryMask {
        let (height, width) = self.plane.dim();
        let data = Array3::from_shape_fn((self.depth, height, width), |(_, y, x)| {
            self.plane[[y, x]]
        });
        BinaryMask::new(data, spacing)
    }

    /// Physical volume of the extruded region, whatever the image content.
    pub fn measure_volume(&self, spacing: Spacing) -> f64 {
        self.pixel_area as f64 * spacing.x * spacing.y * self.depth as f64 * spacing.z
    }
}

/// ROIs for the image `root` in `dir`: `<root>.zip` first, then
/// `<root>.roi`, falling back to the entire frame.
pub fn load_rois(dir: &Path, root: &str, width: usize, height: usize) -> Result<Vec<Roi>> {
    let archive = dir.join(format!("{}.zip", root));
    if archive.is_file() {
        let rois = imagej::read_roi_archive(&archive)?;
        info!("Read {} ROIs from {}", rois.len(), archive.display());
        if rois.is_empty() {
            warn!("No usable ROI in {}", archive.display());
        }
        return Ok(rois);
    }

    let single = dir.join(format!("{}.roi", root));
    if single.is_file() {
        return Ok(imagej::read_roi_file(&single)?.into_iter().collect());
    }

    warn!("No ROI file found for image {}, entire image is analyzed.", root);
    Ok(vec![Roi::entire_image(width, height)])
}
