// Object counts estimated from aggregate volumes, and the per-ROI record.

use super::extract::Object3D;

pub const DEFAULT_MEAN_OBJECT_VOLUME: f64 = 125.0;

/// Number of objects of `mean_volume` that fill `volume`, rounded to the
/// nearest integer. Degenerate inputs give 0.
pub fn estimate_count(volume: f64, mean_volume: f64) -> u64 {
    if !(mean_volume.is_finite() && mean_volume > 0.0) || !(volume > 0.0) {
        return 0;
    }
    (volume / mean_volume).round() as u64
}

/// Measurements for one ROI of one image.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultRecord {
    pub image_name: String,
    pub roi_name: String,
    pub roi_volume: f64,
    pub nuclear_volume: f64,
    pub nuclear_count: u64,
    pub marker_volume: f64,
    pub marker_count: u64,
}

impl ResultRecord {
    pub fn new(
        image_name: &str,
        roi_name: &str,
        roi_volume: f64,
        nuclear: &Object3D,
        marker: &Object3D,
        mean_volume: f64,
    ) -> ResultRecord {
        let nuclear_volume = nuclear.volume();
        let marker_volume = marker.volume();
        ResultRecord {
            image_name: image_name.to_string(),
            roi_name: roi_name.to_string(),
            roi_volume,
            nuclear_volume,
            nuclear_count: estimate_count(nuclear_volume, mean_volume),
            marker_volume,
            marker_count: estimate_count(marker_volume, mean_volume),
        }
    }

    /// Row in `RESULT_COLUMNS` order.
    pub fn fields(&self) -> [String; 7] {
        [
            self.image_name.clone(),
            self.roi_name.clone(),
            format_volume(self.roi_volume),
            format_volume(self.nuclear_volume),
            self.nuclear_count.to_string(),
            format_volume(self.marker_volume),
            self.marker_count.to_string(),
        ]
    }
}

// Volumes always carry a fractional part, as in `900.0`.
fn format_volume(volume: f64) -> String {
    if volume.is_finite() && volume.fract() == 0.0 {
        format!("{:.1}", volume)
    } else {
        volume.to_string()
    }
}
