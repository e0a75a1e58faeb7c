//! Image decoder boundary.
//!
//! The scheduler treats decoding as an injected capability: [`ScanDecoder`]
//! opens a set of source files (one per magnification level for pyramid
//! formats) and hands back a [`ScanHandle`] that can materialize pixels at a
//! requested magnification. [`DecodeError::MagnificationUnavailable`] is the
//! one failure the incremental pyramid loader treats as "try again with more
//! files"; everything else is a real decode failure.

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;

/// Errors raised by decoder implementations.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// I/O error while reading source files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Decode error from the image backend
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// The requested magnification is not representable with the files
    /// loaded so far
    #[error("magnification {requested}x is not available")]
    MagnificationUnavailable {
        /// The magnification that was asked for
        requested: f32,
    },

    /// No source files were provided
    #[error("no source files were provided")]
    NoSources,

    /// Backend-specific failure
    #[error("decoder backend error: {0}")]
    Backend(String),
}

impl DecodeError {
    /// Whether this failure means "add more pyramid files and retry".
    pub fn is_magnification_unavailable(&self) -> bool {
        matches!(self, DecodeError::MagnificationUnavailable { .. })
    }
}

/// An opened scan, able to materialize pixels at available magnifications.
pub trait ScanHandle: Send {
    /// Magnifications representable with the files loaded into this handle.
    fn magnifications(&self) -> Vec<f32>;

    /// Decode the scan at a magnification as 8-bit RGB.
    fn read_image(&mut self, magnification: f32) -> Result<RgbImage, DecodeError>;
}

impl std::fmt::Debug for dyn ScanHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanHandle")
            .field("magnifications", &self.magnifications())
            .finish()
    }
}

/// Capability to open scans from their source files.
pub trait ScanDecoder: Send + Sync {
    /// Open a scan from an ordered list of source files.
    fn open(&self, paths: &[PathBuf]) -> Result<Box<dyn ScanHandle>, DecodeError>;
}

/// Decode a single-file thumbnail as 8-bit RGB.
pub fn decode_thumbnail(path: &Path) -> Result<RgbImage, DecodeError> {
    let img = image::open(path)?;
    Ok(img.to_rgb8())
}

/// Decoder for flat (non-pyramid) image files.
///
/// Opens the first source file with the `image` crate and exposes it at a
/// single fixed magnification. Useful for plain-image archives and tests;
/// real WSI archives inject a pyramid-aware decoder instead.
pub struct FlatImageDecoder {
    magnification: f32,
}

impl FlatImageDecoder {
    /// Create a flat decoder exposing images at the given magnification.
    pub fn new(magnification: f32) -> Self {
        Self { magnification }
    }
}

impl ScanDecoder for FlatImageDecoder {
    fn open(&self, paths: &[PathBuf]) -> Result<Box<dyn ScanHandle>, DecodeError> {
        let path = paths.first().ok_or(DecodeError::NoSources)?;
        let image = image::open(path)?.to_rgb8();
        Ok(Box::new(FlatHandle {
            image,
            magnification: self.magnification,
        }))
    }
}

struct FlatHandle {
    image: RgbImage,
    magnification: f32,
}

impl ScanHandle for FlatHandle {
    fn magnifications(&self) -> Vec<f32> {
        vec![self.magnification]
    }

    fn read_image(&mut self, magnification: f32) -> Result<RgbImage, DecodeError> {
        if (magnification - self.magnification).abs() < f32::EPSILON {
            Ok(self.image.clone())
        } else {
            Err(DecodeError::MagnificationUnavailable {
                requested: magnification,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn write_test_image(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let img = RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn decode_thumbnail_reads_rgb_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_image(dir.path(), "thumb.png");
        let img = decode_thumbnail(&path).unwrap();
        assert_eq!(img.dimensions(), (4, 3));
        assert_eq!(img.get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn decode_thumbnail_fails_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = decode_thumbnail(&dir.path().join("missing.png")).unwrap_err();
        assert!(!err.is_magnification_unavailable());
    }

    #[test]
    fn flat_decoder_serves_its_single_magnification() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_image(dir.path(), "scan.png");
        let decoder = FlatImageDecoder::new(5.0);
        let mut handle = decoder.open(&[path]).unwrap();

        assert_eq!(handle.magnifications(), vec![5.0]);
        assert!(handle.read_image(5.0).is_ok());
        let err = handle.read_image(20.0).unwrap_err();
        assert!(err.is_magnification_unavailable());
    }

    #[test]
    fn flat_decoder_rejects_empty_path_list() {
        let decoder = FlatImageDecoder::new(5.0);
        let err = decoder.open(&[]).unwrap_err();
        assert!(matches!(err, DecodeError::NoSources));
    }
}
