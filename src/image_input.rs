// Discovery of input stacks and decoding of ImageJ hyperstack TIFFs.

use log::{debug, info, warn};
use ndarray::{Array3, Axis};
use num_traits::AsPrimitive;
use regex::Regex;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;

use super::error::{Error, Result};
use super::voxels::Spacing;

// Formats recognized when scanning an image directory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    Nd,
    Nd2,
    Lif,
    Czi,
    Ics,
    Ics2,
    Lsm,
    Tiff,
}

/// Which metadata field names a channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChannelNaming {
    NameOrIndex,
    FluorOrIndex,
    EmissionWavelength,
    Index,
}

impl ImageFormat {
    pub fn from_extension(extension: &str) -> Option<ImageFormat> {
        match extension.to_ascii_lowercase().as_str() {
            "nd" => Some(ImageFormat::Nd),
            "nd2" => Some(ImageFormat::Nd2),
            "lif" => Some(ImageFormat::Lif),
            "czi" => Some(ImageFormat::Czi),
            "ics" => Some(ImageFormat::Ics),
            "ics2" => Some(ImageFormat::Ics2),
            "lsm" => Some(ImageFormat::Lsm),
            "tif" | "tiff" => Some(ImageFormat::Tiff),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<ImageFormat> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(ImageFormat::from_extension)
    }

    pub fn channel_naming(&self) -> ChannelNaming {
        match self {
            ImageFormat::Nd | ImageFormat::Nd2 | ImageFormat::Lif => ChannelNaming::NameOrIndex,
            ImageFormat::Czi => ChannelNaming::FluorOrIndex,
            ImageFormat::Ics | ImageFormat::Ics2 => ChannelNaming::EmissionWavelength,
            ImageFormat::Lsm | ImageFormat::Tiff => ChannelNaming::Index,
        }
    }
}

/// Per-channel metadata fields that may name a channel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelInfo {
    pub name: Option<String>,
    pub fluor: Option<String>,
    pub emission_wavelength: Option<f64>,
}

fn non_empty(field: &Option<String>) -> Option<String> {
    field.as_ref().filter(|s| !s.is_empty()).cloned()
}

pub fn channel_names(naming: ChannelNaming, channels: &[ChannelInfo]) -> Vec<String> {
    channels
        .iter()
        .enumerate()
        .map(|(i, info)| {
            let name = match naming {
                ChannelNaming::NameOrIndex => non_empty(&info.name),
                ChannelNaming::FluorOrIndex => non_empty(&info.fluor),
                ChannelNaming::EmissionWavelength => {
                    info.emission_wavelength.map(|w| w.to_string())
                }
                ChannelNaming::Index => None,
            };
            name.unwrap_or_else(|| i.to_string())
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImageMetadata {
    pub format: ImageFormat,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub channels: Vec<ChannelInfo>,
    pub spacing: Spacing,
}

impl ImageMetadata {
    pub fn channel_names(&self) -> Vec<String> {
        channel_names(self.format.channel_naming(), &self.channels)
    }
}

/// A decoded multi-channel stack; every channel is indexed (z, y, x).
pub struct StackImage {
    pub metadata: ImageMetadata,
    pub channels: Vec<Array3<f32>>,
}

pub trait ImageSource: Sync {
    /// Read dimensions, calibration and channel metadata only.
    fn probe(&self, path: &Path) -> Result<ImageMetadata>;

    fn open(&self, path: &Path) -> Result<StackImage>;
}

/// Image name used in results and output file names.
pub fn root_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Images of `dir`, sorted by name. The extension of the first recognized
/// file decides which files are taken; hidden files are ignored.
pub fn find_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|err| Error::io(dir, err))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            !path
                .file_name()
                .map(|name| name.to_string_lossy().starts_with('.'))
                .unwrap_or(true)
        })
        .collect();
    files.sort();

    let extension = files
        .iter()
        .filter_map(|path| path.extension().and_then(|ext| ext.to_str()))
        .find(|ext| ImageFormat::from_extension(ext).is_some())
        .map(|ext| ext.to_string())
        .ok_or_else(|| Error::NoImages(dir.to_path_buf()))?;

    let images: Vec<PathBuf> = files
        .into_iter()
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some(extension.as_str()))
        .collect();
    info!("Found {} .{} images in {}", images.len(), extension, dir.display());
    Ok(images)
}

/// ImageJ hyperstack TIFF reader. Other recognized formats are reported
/// as unsupported.
#[derive(Clone, Copy, Debug, Default)]
pub struct TiffImageSource;

// Fields of an ImageJ ImageDescription tag.
#[derive(Clone, Debug, Default, PartialEq)]
struct ImageJDescription {
    channels: Option<usize>,
    slices: Option<usize>,
    frames: Option<usize>,
    spacing: Option<f64>,
    unit: Option<String>,
}

fn parse_imagej_description(description: &str) -> Option<ImageJDescription> {
    if !description.starts_with("ImageJ=") {
        return None;
    }
    let field = Regex::new(r"(?m)^(\w+)=(.*)$").ok()?;
    let fields: HashMap<&str, &str> = field
        .captures_iter(description)
        .filter_map(|caps| Some((caps.get(1)?.as_str(), caps.get(2)?.as_str().trim())))
        .collect();

    Some(ImageJDescription {
        channels: fields.get("channels").and_then(|v| v.parse().ok()),
        slices: fields.get("slices").and_then(|v| v.parse().ok()),
        frames: fields.get("frames").and_then(|v| v.parse().ok()),
        spacing: fields.get("spacing").and_then(|v| v.parse().ok()),
        unit: fields.get("unit").map(|v| v.to_string()),
    })
}

fn is_micron(unit: &str) -> bool {
    matches!(unit, "micron" | "microns" | "um" | "µm" | "\\u00B5m")
}

fn samples_to_f32<T: AsPrimitive<f32>>(samples: &[T]) -> Vec<f32> {
    samples.iter().map(|v| v.as_()).collect()
}

fn page_to_f32(page: DecodingResult) -> Vec<f32> {
    match page {
        DecodingResult::U8(v) => samples_to_f32(&v),
        DecodingResult::U16(v) => samples_to_f32(&v),
        DecodingResult::U32(v) => samples_to_f32(&v),
        DecodingResult::U64(v) => samples_to_f32(&v),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => samples_to_f32(&v),
        DecodingResult::I8(v) => samples_to_f32(&v),
        DecodingResult::I16(v) => samples_to_f32(&v),
        DecodingResult::I32(v) => samples_to_f32(&v),
        DecodingResult::I64(v) => samples_to_f32(&v),
    }
}

struct TiffLayout {
    metadata: ImageMetadata,
    pages: usize,
}

impl TiffImageSource {
    fn decoder(path: &Path) -> Result<Decoder<BufReader<File>>> {
        let file = File::open(path).map_err(|err| Error::io(path, err))?;
        let decoder = Decoder::new(BufReader::new(file))
            .map_err(|err| Error::tiff(path, err))?
            .with_limits(Limits::unlimited());
        Ok(decoder)
    }

    fn check_format(path: &Path) -> Result<ImageFormat> {
        match ImageFormat::from_path(path) {
            Some(ImageFormat::Tiff) => Ok(ImageFormat::Tiff),
            _ => Err(Error::UnsupportedFormat {
                path: path.to_path_buf(),
                extension: path
                    .extension()
                    .map(|ext| ext.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            }),
        }
    }

    // Reads the first directory, then walks the remaining ones to count pages.
    fn layout(
        path: &Path,
        format: ImageFormat,
        decoder: &mut Decoder<BufReader<File>>,
    ) -> Result<TiffLayout> {
        let tiff_err = |err| Error::tiff(path, err);

        let (width, height) = decoder.dimensions().map_err(tiff_err)?;
        let description = match decoder.get_tag_ascii_string(Tag::ImageDescription) {
            Ok(description) => parse_imagej_description(&description),
            Err(_) => None,
        };
        let x_resolution = decoder.find_tag(Tag::XResolution).map_err(tiff_err)?;

        let mut pages = 1;
        while decoder.more_images() {
            decoder.next_image().map_err(tiff_err)?;
            pages += 1;
        }

        let description = description.unwrap_or_default();
        let nchannels = description.channels.unwrap_or(1).max(1);
        if pages % nchannels != 0 {
            return Err(Error::malformed(
                path,
                format!("{} pages for {} channels", pages, nchannels),
            ));
        }
        let frames = description.frames.unwrap_or(1).max(1);
        if frames > 1 {
            warn!("{}: {} time frames, only the first is analyzed", path.display(), frames);
        }
        let depth = description.slices.unwrap_or(pages / nchannels / frames);
        if depth == 0 || depth * nchannels > pages {
            return Err(Error::malformed(
                path,
                format!("{} slices of {} channels in {} pages", depth, nchannels, pages),
            ));
        }

        let micron = description.unit.as_deref().map(is_micron).unwrap_or(false);
        let xy = match x_resolution {
            Some(tiff::decoder::ifd::Value::Rational(n, d)) if micron && n > 0 && d > 0 => {
                d as f64 / n as f64
            }
            _ => {
                debug!("{}: no micron XY calibration, using 1", path.display());
                1.0
            }
        };
        let z = description.spacing.filter(|_| micron).unwrap_or(1.0);

        let metadata = ImageMetadata {
            format,
            width: width as usize,
            height: height as usize,
            depth,
            channels: vec![ChannelInfo::default(); nchannels],
            spacing: Spacing::new(xy, xy, z)?,
        };
        Ok(TiffLayout { metadata, pages })
    }
}

impl ImageSource for TiffImageSource {
    fn probe(&self, path: &Path) -> Result<ImageMetadata> {
        let format = Self::check_format(path)?;
        let mut decoder = Self::decoder(path)?;
        Ok(Self::layout(path, format, &mut decoder)?.metadata)
    }

    fn open(&self, path: &Path) -> Result<StackImage> {
        let format = Self::check_format(path)?;
        let TiffLayout { metadata, pages } =
            Self::layout(path, format, &mut Self::decoder(path)?)?;
        debug!("{}: {} pages, {:?}", path.display(), pages, metadata);

        let tiff_err = |err| Error::tiff(path, err);
        let (width, height, depth) = (metadata.width, metadata.height, metadata.depth);
        let nchannels = metadata.channels.len();
        let mut channels = vec![Array3::<f32>::zeros((depth, height, width)); nchannels];

        let mut decoder = Self::decoder(path)?;
        for page in 0..depth * nchannels {
            if page > 0 {
                decoder.next_image().map_err(tiff_err)?;
            }
            if decoder.dimensions().map_err(tiff_err)? != (width as u32, height as u32) {
                return Err(Error::malformed(path, format!("page {} has other dimensions", page)));
            }
            let samples = page_to_f32(decoder.read_image().map_err(tiff_err)?);
            if samples.len() != width * height {
                return Err(Error::malformed(
                    path,
                    format!("page {} is not a single-sample image", page),
                ));
            }

            let (z, c) = (page / nchannels, page % nchannels);
            let mut slice = channels[c].index_axis_mut(Axis(0), z);
            for (v, s) in slice.iter_mut().zip(samples) {
                *v = s;
            }
        }

        Ok(StackImage { metadata, channels })
    }
}
