// Decoder for ImageJ `.roi` files and RoiSet `.zip` archives.
//
// Layout (big-endian): a 64 byte header starting with "Iout", followed by
// the polygon coordinates, optionally followed by a second header holding
// the ROI name.

use byteorder::{BigEndian, ByteOrder};
use geo::geometry::{LineString, Polygon, Rect};
use log::{trace, warn};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::{Roi, RoiShape};
use crate::error::{Error, Result};

pub const POLYGON: u8 = 0;
pub const RECT: u8 = 1;
pub const OVAL: u8 = 2;
pub const LINE: u8 = 3;
pub const FREELINE: u8 = 4;
pub const POLYLINE: u8 = 5;
pub const NO_ROI: u8 = 6;
pub const FREEHAND: u8 = 7;
pub const TRACED: u8 = 8;
pub const ANGLE: u8 = 9;
pub const POINT: u8 = 10;

const MAGIC: &[u8; 4] = b"Iout";

// header offsets
const VERSION: usize = 4;
const TYPE: usize = 6;
const TOP: usize = 8;
const LEFT: usize = 10;
const BOTTOM: usize = 12;
const RIGHT: usize = 14;
const N_COORDINATES: usize = 16;
const XD: usize = 18;
const YD: usize = 22;
const WIDTHD: usize = 26;
const HEIGHTD: usize = 30;
const SHAPE_ROI_SIZE: usize = 36;
const OPTIONS: usize = 50;
const HEADER2_OFFSET: usize = 60;
const COORDINATES: usize = 64;

// header2 offsets
const NAME_OFFSET: usize = 16;
const NAME_LENGTH: usize = 20;

const SUB_PIXEL_RESOLUTION: i16 = 128;

fn type_name(kind: u8) -> &'static str {
    match kind {
        POLYGON => "polygon",
        RECT => "rectangle",
        OVAL => "oval",
        LINE => "line",
        FREELINE => "freeline",
        POLYLINE => "polyline",
        NO_ROI => "no roi",
        FREEHAND => "freehand",
        TRACED => "traced",
        ANGLE => "angle",
        POINT => "point",
        _ => "unknown",
    }
}

// Bounds checked big-endian reads.
struct RoiBytes<'a> {
    bytes: &'a [u8],
    name: &'a str,
}

impl<'a> RoiBytes<'a> {
    fn field(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        self.bytes
            .get(offset..offset + len)
            .ok_or_else(|| Error::invalid_roi(self.name, format!("truncated at byte {}", offset)))
    }

    fn u8(&self, offset: usize) -> Result<u8> {
        Ok(self.field(offset, 1)?[0])
    }

    fn i16(&self, offset: usize) -> Result<i16> {
        Ok(BigEndian::read_i16(self.field(offset, 2)?))
    }

    fn u16(&self, offset: usize) -> Result<u16> {
        Ok(BigEndian::read_u16(self.field(offset, 2)?))
    }

    fn i32(&self, offset: usize) -> Result<i32> {
        Ok(BigEndian::read_i32(self.field(offset, 4)?))
    }

    fn f32(&self, offset: usize) -> Result<f32> {
        Ok(BigEndian::read_f32(self.field(offset, 4)?))
    }

    // name stored in header2, if any
    fn stored_name(&self) -> Result<Option<String>> {
        let header2 = self.i32(HEADER2_OFFSET)?;
        if header2 <= 0 || header2 as usize + NAME_LENGTH + 4 > self.bytes.len() {
            return Ok(None);
        }
        let header2 = header2 as usize;
        let offset = self.i32(header2 + NAME_OFFSET)?;
        let length = self.i32(header2 + NAME_LENGTH)?;
        if offset <= 0 || length <= 0 {
            return Ok(None);
        }

        let units: Vec<u16> = self
            .field(offset as usize, 2 * length as usize)?
            .chunks_exact(2)
            .map(BigEndian::read_u16)
            .collect();
        Ok(Some(String::from_utf16_lossy(&units)))
    }
}

/// Decode one ROI. `fallback_name` names it when the file stores no name.
/// Returns None, with a warning, for ROIs that do not enclose an area.
pub fn decode_roi(bytes: &[u8], fallback_name: &str) -> Result<Option<Roi>> {
    let reader = RoiBytes {
        bytes,
        name: fallback_name,
    };
    if reader.field(0, 4)? != MAGIC {
        return Err(Error::invalid_roi(fallback_name, "not an ImageJ ROI"));
    }

    let name = reader
        .stored_name()?
        .unwrap_or_else(|| fallback_name.to_string());

    let version = reader.i16(VERSION)?;
    let kind = reader.u8(TYPE)?;
    let top = reader.i16(TOP)? as f64;
    let left = reader.i16(LEFT)? as f64;
    let bottom = reader.i16(BOTTOM)? as f64;
    let right = reader.i16(RIGHT)? as f64;
    let n = reader.u16(N_COORDINATES)? as usize;
    let options = reader.i16(OPTIONS)?;
    let sub_pixel = version >= 222 && (options & SUB_PIXEL_RESOLUTION) != 0;

    if reader.i32(SHAPE_ROI_SIZE)? > 0 {
        warn!("Skipping composite ROI {}", name);
        return Ok(None);
    }

    let shape = match kind {
        RECT | OVAL => {
            let rect = if sub_pixel && version >= 223 {
                let x = reader.f32(XD)? as f64;
                let y = reader.f32(YD)? as f64;
                let width = reader.f32(WIDTHD)? as f64;
                let height = reader.f32(HEIGHTD)? as f64;
                Rect::new((x, y), (x + width, y + height))
            } else {
                Rect::new((left, top), (right, bottom))
            };
            if kind == RECT {
                RoiShape::Rectangle(rect)
            } else {
                RoiShape::Oval(rect)
            }
        }
        POLYGON | FREEHAND | TRACED => {
            let mut vertices = Vec::with_capacity(n);
            if sub_pixel {
                let xs = COORDINATES + 4 * n;
                let ys = xs + 4 * n;
                for i in 0..n {
                    let x = reader.f32(xs + 4 * i)? as f64;
                    let y = reader.f32(ys + 4 * i)? as f64;
                    vertices.push((x, y));
                }
            } else {
                let ys = COORDINATES + 2 * n;
                for i in 0..n {
                    let x = left + reader.i16(COORDINATES + 2 * i)? as f64;
                    let y = top + reader.i16(ys + 2 * i)? as f64;
                    vertices.push((x, y));
                }
            }
            RoiShape::Polygon(Polygon::new(LineString::from(vertices), vec![]))
        }
        _ => {
            warn!("Skipping {} ROI {}: not an area", type_name(kind), name);
            return Ok(None);
        }
    };

    match Roi::new(name, shape) {
        Ok(roi) => {
            trace!("decoded {} ROI {}", type_name(kind), roi.name());
            Ok(Some(roi))
        }
        Err(err) => {
            warn!("Skipping ROI: {}", err);
            Ok(None)
        }
    }
}

fn strip_roi_extension(name: &str) -> &str {
    let name = name.rsplit('/').next().unwrap_or(name);
    name.strip_suffix(".roi").unwrap_or(name)
}

pub fn read_roi_file(path: &Path) -> Result<Option<Roi>> {
    let bytes = std::fs::read(path).map_err(|err| Error::io(path, err))?;
    let fallback = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    decode_roi(&bytes, strip_roi_extension(&fallback))
}

/// ROIs of a RoiSet archive, in archive order.
pub fn read_roi_archive(path: &Path) -> Result<Vec<Roi>> {
    let archive_error = |source| Error::RoiArchive {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(|err| Error::io(path, err))?;
    let mut archive = zip::ZipArchive::new(file).map_err(archive_error)?;

    let mut rois = Vec::new();
    let mut bytes = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(archive_error)?;
        if entry.is_dir() || !entry.name().ends_with(".roi") {
            continue;
        }
        let fallback = strip_roi_extension(entry.name()).to_string();

        bytes.clear();
        entry
            .read_to_end(&mut bytes)
            .map_err(|err| Error::io(path, err))?;
        if let Some(roi) = decode_roi(&bytes, &fallback)? {
            rois.push(roi);
        }
    }

    Ok(rois)
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_decode_rectangle_with_name() {
        let bytes = encode_roi(RECT, (3, 4, 13, 9), &[], Some("Région 1"));
        let roi = decode_roi(&bytes, "fallback").unwrap().unwrap();
        assert_eq!(roi.name(), "Région 1");
        assert_eq!(
            roi.shape(),
            &RoiShape::Rectangle(Rect::new((3.0, 4.0), (13.0, 9.0)))
        );
    }

    #[test]
    fn test_decode_polygon_uses_fallback_name() {
        let coords = [(10, 10), (30, 10), (30, 25), (10, 25)];
        let bytes = encode_roi(POLYGON, (10, 10, 30, 25), &coords, None);
        let roi = decode_roi(&bytes, "cortex").unwrap().unwrap();
        assert_eq!(roi.name(), "cortex");
        assert_eq!(roi.shape().area(), 300.0);
    }

    #[test]
    fn test_decode_sub_pixel_rectangle() {
        let mut bytes = encode_roi(RECT, (1, 1, 5, 5), &[], None);
        BigEndian::write_i16(&mut bytes[OPTIONS..OPTIONS + 2], SUB_PIXEL_RESOLUTION);
        for (offset, v) in [(XD, 1.5f32), (YD, 2.0), (WIDTHD, 4.0), (HEIGHTD, 2.5)] {
            BigEndian::write_f32(&mut bytes[offset..offset + 4], v);
        }
        let roi = decode_roi(&bytes, "r").unwrap().unwrap();
        assert_eq!(
            roi.shape(),
            &RoiShape::Rectangle(Rect::new((1.5, 2.0), (5.5, 4.5)))
        );
    }

    #[test]
    fn test_non_area_rois_are_skipped() {
        for kind in [LINE, POLYLINE, POINT, ANGLE, NO_ROI] {
            let bytes = encode_roi(kind, (0, 0, 10, 10), &[(0, 0), (10, 10)], None);
            assert!(decode_roi(&bytes, "x").unwrap().is_none());
        }
        // degenerate rectangle
        let bytes = encode_roi(RECT, (4, 4, 4, 10), &[], None);
        assert!(decode_roi(&bytes, "x").unwrap().is_none());
    }

    #[test]
    fn test_bad_magic_and_truncation_are_errors() {
        assert!(decode_roi(b"PK\x03\x04 not a roi at all", "x").is_err());
        let bytes = encode_roi(POLYGON, (0, 0, 9, 9), &[(0, 0), (9, 0), (9, 9)], None);
        assert!(decode_roi(&bytes[..70], "x").is_err());
    }

    #[test]
    fn test_archive_order_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set.zip");
        let entries = vec![
            ("0003-0001.roi", encode_roi(RECT, (0, 0, 2, 2), &[], None)),
            ("0001-0001.roi", encode_roi(OVAL, (0, 0, 8, 4), &[], Some("oval"))),
            ("notes.txt", b"ignored".to_vec()),
            ("0002-0001.roi", encode_roi(POINT, (1, 1, 1, 1), &[(1, 1)], None)),
        ];
        write_roi_archive(&path, &entries);

        let rois = read_roi_archive(&path).unwrap();
        let names: Vec<&str> = rois.iter().map(|roi| roi.name()).collect();
        assert_eq!(names, vec!["0003-0001", "oval"]);
    }
}
