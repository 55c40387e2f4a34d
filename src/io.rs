use std::fs;
use std::path::Path;

use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use tracing::debug;

use crate::errors::{Result, SegError};
use crate::mask::{ClassPalette, ColoredMask};

/// Opens any image the enabled `image` features can decode.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<RgbImage> {
    let path = path.as_ref();
    let image = image::open(path).map_err(|e| SegError::ImageProcessing {
        path: path.display().to_string(),
        operation: "image decoding".to_string(),
        source: Box::new(e),
    })?;
    Ok(image.into_rgb8())
}

/// Reads an undecorated RGBA or RGB pixel buffer.
pub fn read_raw_image<P: AsRef<Path>>(path: P, width: u32, height: u32) -> Result<RgbImage> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| SegError::FileSystem {
        path: path.to_path_buf(),
        operation: "raw image read".to_string(),
        source: e,
    })?;
    decode_raw(bytes, width, height)
}

/// Interprets `bytes` as row-major RGBA (alpha dropped) or RGB, chosen by length.
pub fn decode_raw(bytes: Vec<u8>, width: u32, height: u32) -> Result<RgbImage> {
    let pixels = width as usize * height as usize;
    let len = bytes.len();
    let invalid = || SegError::Validation {
        field: "raw image".to_string(),
        reason: format!("{} bytes is neither RGBA nor RGB for {}x{}", len, width, height),
    };

    if len == pixels * 4 {
        let rgba = RgbaImage::from_raw(width, height, bytes).ok_or_else(invalid)?;
        Ok(DynamicImage::ImageRgba8(rgba).into_rgb8())
    } else if len == pixels * 3 {
        RgbImage::from_raw(width, height, bytes).ok_or_else(invalid)
    } else {
        Err(invalid())
    }
}

/// Writes one little-endian packed color per pixel, row-major.
pub fn write_mask_bin<P: AsRef<Path>>(
    path: P,
    mask: &ColoredMask,
    palette: &ClassPalette,
) -> Result<()> {
    let path = path.as_ref();
    let bytes = mask
        .to_colors(palette)
        .into_iter()
        .flat_map(u32::to_le_bytes)
        .collect::<Vec<u8>>();
    fs::write(path, &bytes).map_err(|e| SegError::FileSystem {
        path: path.to_path_buf(),
        operation: "mask write".to_string(),
        source: e,
    })?;
    debug!("Wrote {} byte mask to {}", bytes.len(), path.display());
    Ok(())
}

/// Reads back a mask written by [`write_mask_bin`].
pub fn read_mask_bin<P: AsRef<Path>>(path: P, width: u32, height: u32) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| SegError::FileSystem {
        path: path.to_path_buf(),
        operation: "mask read".to_string(),
        source: e,
    })?;
    let expected = width as usize * height as usize * 4;
    if bytes.len() != expected {
        return Err(SegError::Validation {
            field: "mask".to_string(),
            reason: format!(
                "{} holds {} bytes, expected {} for {}x{}",
                path.display(),
                bytes.len(),
                expected,
                width,
                height
            ),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Saves `image` in the format implied by the path's extension, or `fallback` without one.
///
/// Formats without an alpha channel receive the RGB part only.
pub fn save_mask_image<P: AsRef<Path>>(path: P, image: &RgbaImage, fallback: &str) -> Result<()> {
    let path = path.as_ref();
    let format = match path.extension() {
        Some(_) => ImageFormat::from_path(path).map_err(|e| SegError::ImageProcessing {
            path: path.display().to_string(),
            operation: "output format detection".to_string(),
            source: Box::new(e),
        })?,
        None => ImageFormat::from_extension(fallback).ok_or_else(|| SegError::Validation {
            field: "format".to_string(),
            reason: format!("unsupported output format `{}`", fallback),
        })?,
    };

    let image = DynamicImage::ImageRgba8(image.clone());
    let image = match format {
        ImageFormat::Jpeg | ImageFormat::Bmp => DynamicImage::ImageRgb8(image.into_rgb8()),
        _ => image,
    };
    image
        .save_with_format(path, format)
        .map_err(|e| SegError::ImageProcessing {
            path: path.display().to_string(),
            operation: "mask save".to_string(),
            source: Box::new(e),
        })
}
