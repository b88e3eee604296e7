// Errors that abort a run. Recoverable conditions (missing ROI archive,
// degenerate intensities) never surface here; they are logged and produce
// trivial results instead.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no image with a recognized extension found in '{}'", .0.display())]
    NoImages(PathBuf),

    #[error("unsupported image format '{extension}' for '{}'", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to decode '{}': {source}", path.display())]
    Tiff {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },

    #[error("malformed image '{}': {reason}", path.display())]
    MalformedImage { path: PathBuf, reason: String },

    #[error("unable to read ROI archive '{}': {source}", path.display())]
    RoiArchive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("invalid ROI '{name}': {reason}")]
    InvalidRoi { name: String, reason: String },

    #[error("unable to write results: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn io(path: &Path, source: std::io::Error) -> Error {
        Error::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn tiff(path: &Path, source: tiff::TiffError) -> Error {
        Error::Tiff {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn malformed(path: &Path, reason: impl Into<String>) -> Error {
        Error::MalformedImage {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn invalid_roi(name: &str, reason: impl Into<String>) -> Error {
        Error::InvalidRoi {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
