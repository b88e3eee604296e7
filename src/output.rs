use log::{debug, info};
use ndarray::{Array3, Axis};
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use super::error::{Error, Result};
use super::quantify::ResultRecord;
use super::schemas::{OBJECT_INTENSITY, OVERLAY_CHANNELS, RESULTS_FILENAME, RESULT_COLUMNS};
use super::voxels::{BinaryMask, Spacing, VoxelGrid};

use tiff::encoder::{colortype, Rational, TiffEncoder};
use tiff::tags::{ResolutionUnit, Tag};
use tiff::TiffResult;

/// Destination of result rows. Rows must be durable once written.
pub trait ResultSink {
    fn write_record(&mut self, record: &ResultRecord) -> Result<()>;
}

/// Tab separated table, header first, flushed after every row.
pub struct TsvResultSink<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> TsvResultSink<W> {
    pub fn new(output: W) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(output);
        writer.write_record(RESULT_COLUMNS)?;
        writer.flush().map_err(csv::Error::from)?;
        Ok(TsvResultSink { writer })
    }
}

impl TsvResultSink<File> {
    pub fn create(dir: &Path) -> Result<Self> {
        let path = dir.join(RESULTS_FILENAME);
        let file = File::create(&path).map_err(|err| Error::io(&path, err))?;
        info!("Writing results to {}", path.display());
        TsvResultSink::new(file)
    }
}

impl<W: Write> ResultSink for TsvResultSink<W> {
    fn write_record(&mut self, record: &ResultRecord) -> Result<()> {
        self.writer.write_record(record.fields())?;
        self.writer.flush().map_err(csv::Error::from)?;
        return Ok(());
    }
}

/// Channels of the composite image saved for each analyzed stack.
pub struct Overlay<'a> {
    pub nuclear: &'a VoxelGrid,
    pub marker: &'a VoxelGrid,
    pub nuclear_objects: &'a BinaryMask,
    pub marker_objects: &'a BinaryMask,
}

pub trait OverlaySink {
    fn save_overlay(&self, root_name: &str, overlay: &Overlay) -> Result<()>;
}

/// Writes `<root>.tif` ImageJ hyperstacks into a directory.
pub struct TiffOverlaySink {
    dir: PathBuf,
}

impl TiffOverlaySink {
    pub fn new(dir: &Path) -> Self {
        TiffOverlaySink {
            dir: dir.to_path_buf(),
        }
    }
}

impl OverlaySink for TiffOverlaySink {
    fn save_overlay(&self, root_name: &str, overlay: &Overlay) -> Result<()> {
        let path = self.dir.join(format!("{}.tif", root_name));
        let nuclear_objects = overlay.nuclear_objects.to_grid(OBJECT_INTENSITY);
        let marker_objects = overlay.marker_objects.to_grid(OBJECT_INTENSITY);

        // same order as OVERLAY_CHANNELS
        let channels = [
            marker_objects.data(),
            nuclear_objects.data(),
            overlay.marker.data(),
            overlay.nuclear.data(),
        ];
        debug!("{}: overlay channels {:?}", root_name, OVERLAY_CHANNELS);

        let file = File::create(&path).map_err(|err| Error::io(&path, err))?;
        let mut writer = BufWriter::new(file);
        write_hyperstack(&mut writer, &channels, overlay.nuclear.spacing())
            .map_err(|err| Error::tiff(&path, err))?;
        writer.flush().map_err(|err| Error::io(&path, err))?;
        info!("Saved {}", path.display());
        Ok(())
    }
}

/// ImageJ description for a `channels` x `slices` hyperstack.
pub fn hyperstack_description(channels: usize, slices: usize, spacing: Spacing) -> String {
    format!(
        "ImageJ=1.11a\nimages={}\nchannels={}\nslices={}\nhyperstack=true\nmode=composite\nunit=micron\nspacing={}\nloop=false\n",
        channels * slices,
        channels,
        slices,
        spacing.z
    )
}

/// Write equally shaped (z, y, x) stacks as a 32-bit float ImageJ
/// hyperstack, one page per (slice, channel) with channels varying fastest.
pub fn write_hyperstack<W: Write + Seek>(
    writer: W,
    channels: &[&Array3<f32>],
    spacing: Spacing,
) -> TiffResult<()> {
    let (depth, height, width) = channels.first().map(|c| c.dim()).unwrap_or((0, 0, 0));
    assert!(channels.iter().all(|c| c.dim() == (depth, height, width)));

    let description = hyperstack_description(channels.len(), depth, spacing);
    // XResolution is in pixels per micron
    let micro_spacing = (spacing.x * 1e6).round().max(1.0) as u32;

    let mut encoder = TiffEncoder::new(writer)?;
    let mut page = Vec::with_capacity(height * width);
    for z in 0..depth {
        for (c, channel) in channels.iter().enumerate() {
            page.clear();
            page.extend(channel.index_axis(Axis(0), z).iter().cloned());

            let mut image =
                encoder.new_image::<colortype::Gray32Float>(width as u32, height as u32)?;
            if z == 0 && c == 0 {
                image
                    .encoder()
                    .write_tag(Tag::ImageDescription, description.as_str())?;
            }
            image.resolution(
                ResolutionUnit::None,
                Rational {
                    n: 1_000_000,
                    d: micro_spacing,
                },
            );
            image.write_data(&page)?;
        }
    }
    Ok(())
}
