// Run configuration: command line choices checked against the first image.

use chrono::NaiveDateTime;
use log::{info, warn};

use super::error::{Error, Result};
use super::image_input::ImageMetadata;
use super::segmentation::{SegmentationParams, ThresholdMethod};
use super::voxels::Spacing;

/// Choices as given by the user.
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub nuclear_channel: String,
    pub marker_channel: String,
    pub nuclear_threshold: ThresholdMethod,
    pub marker_threshold: ThresholdMethod,
    pub mean_object_volume: f64,
    pub xy_spacing: Option<f64>,
    pub z_spacing: Option<f64>,
    pub segmentation: SegmentationParams,
}

/// Immutable settings shared by every image of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunConfig {
    pub nuclear_channel: usize,
    pub marker_channel: usize,
    pub nuclear_threshold: ThresholdMethod,
    pub marker_threshold: ThresholdMethod,
    pub mean_object_volume: f64,
    pub spacing: Spacing,
    pub segmentation: SegmentationParams,
}

/// Index of the channel named `selector`, or with index `selector`.
pub fn resolve_channel(selector: &str, names: &[String]) -> Result<usize> {
    if let Some(i) = names.iter().position(|name| name == selector) {
        return Ok(i);
    }
    match selector.parse::<usize>() {
        Ok(i) if i < names.len() => Ok(i),
        _ => Err(Error::Config(format!(
            "unknown channel '{}', available channels: {}",
            selector,
            names.join(", ")
        ))),
    }
}

fn check_radius(name: &str, radius: f64) -> Result<()> {
    if radius.is_finite() && radius >= 0.0 {
        Ok(())
    } else {
        Err(Error::Config(format!("{} must be a non-negative number, got {}", name, radius)))
    }
}

// With a zero radius the paraboloid fits into every pixel and the whole slice
// is taken as background.
fn check_background_radius(radius: f64) -> Result<()> {
    if radius.is_finite() && radius > 0.0 {
        Ok(())
    } else {
        Err(Error::Config(format!("background radius must be positive, got {}", radius)))
    }
}

impl RunConfig {
    pub fn resolve(options: &RunOptions, metadata: &ImageMetadata) -> Result<RunConfig> {
        let names = metadata.channel_names();
        let nuclear_channel = resolve_channel(&options.nuclear_channel, &names)?;
        let marker_channel = resolve_channel(&options.marker_channel, &names)?;
        if nuclear_channel == marker_channel {
            warn!("Nuclear and marker channels are both channel {}", names[nuclear_channel]);
        }

        let params = &options.segmentation;
        check_background_radius(params.background_radius)?;
        check_radius("denoising radius", params.denoise_radius)?;
        check_radius("cleanup radius", params.cleanup_radius)?;

        let xy = options.xy_spacing.unwrap_or(metadata.spacing.x);
        let z = options.z_spacing.unwrap_or(metadata.spacing.z);
        let spacing = Spacing::new(xy, xy, z)?;
        info!("XY calibration = {}, Z calibration = {}", spacing.x, spacing.z);

        if !(options.mean_object_volume.is_finite() && options.mean_object_volume > 0.0) {
            warn!(
                "Mean object volume {} is not positive, estimated counts will be 0",
                options.mean_object_volume
            );
        }

        Ok(RunConfig {
            nuclear_channel,
            marker_channel,
            nuclear_threshold: options.nuclear_threshold,
            marker_threshold: options.marker_threshold,
            mean_object_volume: options.mean_object_volume,
            spacing,
            segmentation: options.segmentation,
        })
    }

    pub fn results_dir_name(&self, started: NaiveDateTime) -> String {
        format!(
            "Results_{}_{}_{}",
            self.nuclear_threshold,
            self.marker_threshold,
            started.format("%Y-%m-%d_%H-%M-%S")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_input::{ChannelInfo, ImageFormat};
    use chrono::NaiveDate;

    fn metadata(format: ImageFormat, names: &[&str]) -> ImageMetadata {
        ImageMetadata {
            format,
            width: 8,
            height: 8,
            depth: 2,
            channels: names
                .iter()
                .map(|name| ChannelInfo {
                    name: Some(name.to_string()),
                    ..ChannelInfo::default()
                })
                .collect(),
            spacing: Spacing::new(0.3, 0.3, 1.2).unwrap(),
        }
    }

    fn options() -> RunOptions {
        RunOptions {
            nuclear_channel: "0".to_string(),
            marker_channel: "1".to_string(),
            nuclear_threshold: ThresholdMethod::Huang,
            marker_threshold: ThresholdMethod::Otsu,
            mean_object_volume: 125.0,
            xy_spacing: None,
            z_spacing: None,
            segmentation: SegmentationParams::default(),
        }
    }

    #[test]
    fn test_resolve_channel_by_name_then_index() {
        let names: Vec<String> = ["DAPI", "2", "Ki67"].iter().map(|s| s.to_string()).collect();
        assert_eq!(resolve_channel("Ki67", &names).unwrap(), 2);
        // a name wins over an index
        assert_eq!(resolve_channel("2", &names).unwrap(), 1);
        assert_eq!(resolve_channel("0", &names).unwrap(), 0);
        assert!(resolve_channel("3", &names).is_err());
        assert!(resolve_channel("GFP", &names).is_err());
    }

    #[test]
    fn test_defaults_and_overrides() {
        let meta = metadata(ImageFormat::Tiff, &["a", "b"]);
        let config = RunConfig::resolve(&options(), &meta).unwrap();
        assert_eq!((config.nuclear_channel, config.marker_channel), (0, 1));
        assert_eq!(config.spacing, meta.spacing);

        let mut opts = options();
        opts.xy_spacing = Some(0.1);
        opts.z_spacing = Some(0.5);
        opts.nuclear_channel = "DAPI".to_string();
        let meta = metadata(ImageFormat::Nd2, &["KI67", "DAPI"]);
        let config = RunConfig::resolve(&opts, &meta).unwrap();
        assert_eq!(config.nuclear_channel, 1);
        assert_eq!(config.spacing, Spacing::new(0.1, 0.1, 0.5).unwrap());
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let meta = metadata(ImageFormat::Tiff, &["a", "b"]);

        let mut opts = options();
        opts.marker_channel = "2".to_string();
        assert!(matches!(RunConfig::resolve(&opts, &meta), Err(Error::Config(_))));

        let mut opts = options();
        opts.z_spacing = Some(0.0);
        assert!(RunConfig::resolve(&opts, &meta).is_err());

        let mut opts = options();
        opts.segmentation.denoise_radius = -1.0;
        assert!(RunConfig::resolve(&opts, &meta).is_err());
        let mut opts = options();
        opts.segmentation.background_radius = 0.0;
        assert!(matches!(RunConfig::resolve(&opts, &meta), Err(Error::Config(_))));

        // zero radius medians are the identity and stay allowed
        let mut opts = options();
        opts.segmentation.denoise_radius = 0.0;
        opts.segmentation.cleanup_radius = 0.0;
        assert!(RunConfig::resolve(&opts, &meta).is_ok());
    }

    #[test]
    fn test_results_dir_name() {
        let meta = metadata(ImageFormat::Tiff, &["a", "b"]);
        let config = RunConfig::resolve(&options(), &meta).unwrap();
        let started = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(14, 7, 9)
            .unwrap();
        assert_eq!(
            config.results_dir_name(started),
            "Results_Huang_Otsu_2024-03-05_14-07-09"
        );
    }
}
