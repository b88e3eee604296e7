// Per-image analysis: segment both channels, then measure every ROI.

use indicatif::ProgressBar;
use log::{debug, info, trace};
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::config::RunConfig;
use super::error::{Error, Result};
use super::extract::{extract, ObjectCanvas};
use super::image_input::{root_name, ImageSource};
use super::output::{Overlay, OverlaySink, ResultSink};
use super::quantify::ResultRecord;
use super::roi::{load_rois, RoiMask};
use super::segmentation::{FilterEngine, Segmenter};
use super::voxels::VoxelGrid;

pub struct PipelineDriver<S: ImageSource, E: FilterEngine> {
    config: RunConfig,
    source: S,
    segmenter: Segmenter<E>,
}

impl<S: ImageSource, E: FilterEngine> PipelineDriver<S, E> {
    pub fn new(config: RunConfig, source: S, engine: E) -> Self {
        let segmenter = Segmenter::new(engine, config.segmentation);
        PipelineDriver {
            config,
            source,
            segmenter,
        }
    }

    /// Analyze one image, writing a record per ROI as soon as it is
    /// measured and the overlay last. Returns the number of records.
    pub fn process_image(
        &self,
        path: &Path,
        results: &mut dyn ResultSink,
        overlays: &dyn OverlaySink,
    ) -> Result<usize> {
        let root = root_name(path);
        info!("--- ANALYZING IMAGE {} ---", root);

        let t0 = Instant::now();
        let image = self.source.open(path)?;
        trace!("open: {:?}", t0.elapsed());

        let nchannels = image.channels.len();
        for channel in [self.config.nuclear_channel, self.config.marker_channel] {
            if channel >= nchannels {
                return Err(Error::Config(format!(
                    "{} has {} channels, channel {} requested",
                    root, nchannels, channel
                )));
            }
        }

        let spacing = self.config.spacing;
        let nuclear = VoxelGrid::new(image.channels[self.config.nuclear_channel].clone(), spacing);
        let marker = VoxelGrid::new(image.channels[self.config.marker_channel].clone(), spacing);
        drop(image);

        let t0 = Instant::now();
        let (nuclear_mask, marker_mask) = rayon::join(
            || self.segmenter.segment(&nuclear, self.config.nuclear_threshold),
            || self.segmenter.segment(&marker, self.config.marker_threshold),
        );
        debug!(
            "{}: segmented {} nuclear and {} marker voxels in {:?}",
            root,
            nuclear_mask.count(),
            marker_mask.count(),
            t0.elapsed()
        );

        let (depth, height, width) = nuclear.dim();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let rois = load_rois(dir, &root, width, height)?;

        let mut nuclear_canvas = ObjectCanvas::new(nuclear.dim(), spacing);
        let mut marker_canvas = ObjectCanvas::new(marker.dim(), spacing);
        for roi in &rois {
            info!("- Saving results for ROI {} -", roi.name());
            let roi_mask = RoiMask::rasterize(roi, width, height, depth);
            let nuclear_object = extract(&nuclear_mask, &roi_mask);
            let marker_object = extract(&marker_mask, &roi_mask);

            let record = ResultRecord::new(
                &root,
                roi.name(),
                roi_mask.measure_volume(spacing),
                &nuclear_object,
                &marker_object,
                self.config.mean_object_volume,
            );
            results.write_record(&record)?;

            nuclear_canvas.draw(&nuclear_object);
            marker_canvas.draw(&marker_object);
        }

        let nuclear_objects = nuclear_canvas.into_mask();
        let marker_objects = marker_canvas.into_mask();
        let overlay = Overlay {
            nuclear: &nuclear,
            marker: &marker,
            nuclear_objects: &nuclear_objects,
            marker_objects: &marker_objects,
        };
        overlays.save_overlay(&root, &overlay)?;

        Ok(rois.len())
    }

    /// Analyze `images` in order. The first failing image stops the run.
    pub fn run(
        &self,
        images: &[PathBuf],
        results: &mut dyn ResultSink,
        overlays: &dyn OverlaySink,
    ) -> Result<()> {
        let progress = ProgressBar::new(images.len() as u64);
        let mut nrecords = 0;
        for path in images {
            nrecords += self.process_image(path, results, overlays)?;
            progress.inc(1);
        }
        progress.finish_and_clear();

        info!("{} records for {} images", nrecords, images.len());
        info!("--- All done! ---");
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_input::{ChannelInfo, ImageFormat, ImageMetadata, StackImage};
    use crate::roi::imagej::testing::{encode_roi, write_roi_archive};
    use crate::roi::imagej::RECT;
    use crate::roi::ENTIRE_IMAGE;
    use crate::segmentation::{CpuEngine, SegmentationParams, ThresholdMethod};
    use crate::voxels::Spacing;
    use ndarray::{s, Array3};
    use std::cell::RefCell;

    // Serves the same in-memory stack for every path.
    struct MemorySource {
        spacing: Spacing,
        channels: Vec<Array3<f32>>,
    }

    impl MemorySource {
        fn metadata(&self) -> ImageMetadata {
            let (depth, height, width) = self.channels[0].dim();
            ImageMetadata {
                format: ImageFormat::Tiff,
                width,
                height,
                depth,
                channels: vec![ChannelInfo::default(); self.channels.len()],
                spacing: self.spacing,
            }
        }
    }

    impl ImageSource for MemorySource {
        fn probe(&self, _path: &Path) -> Result<ImageMetadata> {
            Ok(self.metadata())
        }

        fn open(&self, _path: &Path) -> Result<StackImage> {
            Ok(StackImage {
                metadata: self.metadata(),
                channels: self.channels.clone(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        records: Vec<ResultRecord>,
    }

    impl ResultSink for RecordingSink {
        fn write_record(&mut self, record: &ResultRecord) -> Result<()> {
            self.records.push(record.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingOverlays {
        saved: RefCell<Vec<(String, usize, usize)>>,
    }

    impl OverlaySink for RecordingOverlays {
        fn save_overlay(&self, root_name: &str, overlay: &Overlay) -> Result<()> {
            self.saved.borrow_mut().push((
                root_name.to_string(),
                overlay.nuclear_objects.count(),
                overlay.marker_objects.count(),
            ));
            Ok(())
        }
    }

    fn config(source: &MemorySource, params: SegmentationParams) -> RunConfig {
        RunConfig {
            nuclear_channel: 0,
            marker_channel: 1,
            nuclear_threshold: ThresholdMethod::Huang,
            marker_threshold: ThresholdMethod::Otsu,
            mean_object_volume: 125.0,
            spacing: source.spacing,
            segmentation: params,
        }
    }

    fn params() -> SegmentationParams {
        SegmentationParams {
            background_radius: 100.0,
            denoise_radius: 2.0,
            cleanup_radius: 1.0,
        }
    }

    // Nuclear channel: a 5x20x20 cube and a 5x30x30 cube. Marker channel:
    // only the larger cube.
    fn two_cubes() -> MemorySource {
        let mut nuclear = Array3::from_elem((9, 90, 90), 10.0);
        nuclear.slice_mut(s![2..7, 10..30, 10..30]).fill(200.0);
        nuclear.slice_mut(s![2..7, 50..80, 45..75]).fill(200.0);
        let mut marker = Array3::from_elem((9, 90, 90), 10.0);
        marker.slice_mut(s![2..7, 50..80, 45..75]).fill(150.0);
        MemorySource {
            spacing: Spacing::default(),
            channels: vec![nuclear, marker],
        }
    }

    fn close(value: f64, expected: f64) -> bool {
        (value - expected).abs() <= 0.1 * expected
    }

    #[test]
    fn test_image_without_rois_gives_one_entire_image_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = two_cubes();
        source.spacing = Spacing::new(0.5, 0.5, 2.0).unwrap();
        let driver = PipelineDriver::new(config(&source, params()), source, CpuEngine);

        let mut results = RecordingSink::default();
        let overlays = RecordingOverlays::default();
        let n = driver
            .process_image(&dir.path().join("sample.tif"), &mut results, &overlays)
            .unwrap();

        assert_eq!(n, 1);
        assert_eq!(results.records.len(), 1);
        let record = &results.records[0];
        assert_eq!(record.image_name, "sample");
        assert_eq!(record.roi_name, ENTIRE_IMAGE);
        assert_eq!(record.roi_volume, 90.0 * 90.0 * 9.0 * 0.5);
        assert!(close(record.nuclear_volume, (2000.0 + 4500.0) * 0.5));
        assert!(close(record.marker_volume, 4500.0 * 0.5));
        assert_eq!(record.marker_count, 18);

        let saved = overlays.saved.borrow();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, "sample");
    }

    #[test]
    fn test_rois_from_archive_are_measured_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            ("large.roi", encode_roi(RECT, (40, 40, 90, 90), &[], Some("large"))),
            ("small.roi", encode_roi(RECT, (0, 0, 40, 40), &[], Some("small"))),
        ];
        write_roi_archive(&dir.path().join("sample.zip"), &entries);

        let source = two_cubes();
        let driver = PipelineDriver::new(config(&source, params()), source, CpuEngine);
        let mut results = RecordingSink::default();
        let overlays = RecordingOverlays::default();
        driver
            .run(&[dir.path().join("sample.tif")], &mut results, &overlays)
            .unwrap();

        let names: Vec<&str> = results.records.iter().map(|r| r.roi_name.as_str()).collect();
        assert_eq!(names, vec!["large", "small"]);

        let large = &results.records[0];
        assert_eq!(large.roi_volume, 50.0 * 50.0 * 9.0);
        assert!(close(large.nuclear_volume, 4500.0), "{:?}", large);
        assert_eq!(large.nuclear_count, 36);
        assert!(close(large.marker_volume, 4500.0), "{:?}", large);

        // nothing of the large cube leaks into the small ROI
        let small = &results.records[1];
        assert_eq!(small.roi_volume, 40.0 * 40.0 * 9.0);
        assert!(close(small.nuclear_volume, 2000.0), "{:?}", small);
        assert_eq!(small.nuclear_count, 16);
        assert_eq!(small.marker_volume, 0.0);
        assert_eq!(small.marker_count, 0);

        // the overlay objects are the union over both ROIs
        let saved = overlays.saved.borrow();
        assert_eq!(saved.len(), 1);
        let nuclear_total = (large.nuclear_volume + small.nuclear_volume) as usize;
        assert_eq!(saved[0].1, nuclear_total);
    }

    #[test]
    fn test_uniform_image_gives_zero_counts() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemorySource {
            spacing: Spacing::default(),
            channels: vec![Array3::from_elem((3, 30, 30), 40.0); 2],
        };
        let driver = PipelineDriver::new(config(&source, params()), source, CpuEngine);
        let mut results = RecordingSink::default();
        let overlays = RecordingOverlays::default();
        driver
            .process_image(&dir.path().join("flat.tif"), &mut results, &overlays)
            .unwrap();

        let record = &results.records[0];
        assert_eq!(record.nuclear_volume, 0.0);
        assert_eq!((record.nuclear_count, record.marker_count), (0, 0));
    }

    #[test]
    fn test_missing_channel_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemorySource {
            spacing: Spacing::default(),
            channels: vec![Array3::from_elem((2, 8, 8), 1.0)],
        };
        let driver = PipelineDriver::new(config(&source, params()), source, CpuEngine);
        let mut results = RecordingSink::default();
        let overlays = RecordingOverlays::default();
        let result = driver.process_image(&dir.path().join("one.tif"), &mut results, &overlays);
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(results.records.is_empty());
    }
}
