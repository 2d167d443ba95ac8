//! Image compression and resizing.
//!
//! Both operations overwrite the image they read. Compression re-encodes
//! JPEGs at the configured quality; PNGs pass through untouched. Resizing
//! runs after compression and encodes once more at the same quality.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use crate::config::ResizeSpec;
use crate::error::BuildError;
use crate::glob::GlobSet;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}

fn load_image(path: &Path) -> Result<DynamicImage, BuildError> {
    image::open(path).map_err(|e| BuildError::ImageError {
        path: path.display().to_string(),
        message: format!("Failed to decode: {}", e),
    })
}

/// Encode `img` to `path`, choosing the codec from the extension.
fn save_image(img: &DynamicImage, path: &Path, quality: u8) -> Result<(), BuildError> {
    let encode_err = |e: image::ImageError| BuildError::ImageError {
        path: path.display().to_string(),
        message: format!("Failed to encode: {}", e),
    };

    if is_jpeg(path) {
        let file = File::create(path).map_err(|e| BuildError::write(path, e))?;
        let encoder = JpegEncoder::new_with_quality(BufWriter::new(file), quality);
        DynamicImage::ImageRgb8(img.to_rgb8())
            .write_with_encoder(encoder)
            .map_err(encode_err)
    } else {
        let format = ImageFormat::from_path(path).map_err(encode_err)?;
        img.save_with_format(path, format).map_err(encode_err)
    }
}

/// Target size for a resize request.
///
/// A missing dimension follows the original aspect ratio (never below 1px).
pub fn target_dimensions(
    original: Dimensions,
    width: Option<u32>,
    height: Option<u32>,
) -> Dimensions {
    let scale = |value: u32, num: u32, den: u32| -> u32 {
        let scaled = (value as f64 * num as f64 / den.max(1) as f64).round() as u32;
        scaled.max(1)
    };

    match (width, height) {
        (Some(width), Some(height)) => Dimensions { width, height },
        (Some(width), None) => Dimensions {
            width,
            height: scale(original.height, width, original.width),
        },
        (None, Some(height)) => Dimensions {
            width: scale(original.width, height, original.height),
            height,
        },
        (None, None) => original,
    }
}

/// Recompress every JPEG under `output_dir` matching `globs`, in place.
///
/// Returns the number of images rewritten.
pub fn compress(output_dir: &Path, globs: &GlobSet, quality: u8) -> Result<usize, BuildError> {
    let mut count = 0;

    for path in globs.files_under(output_dir)? {
        if !is_jpeg(&path) {
            tracing::debug!("Leaving {} as is", path.display());
            continue;
        }

        let img = load_image(&path)?;
        save_image(&img, &path, quality)?;
        count += 1;
    }

    Ok(count)
}

/// Resize one image in the output tree, overwriting it.
pub fn resize(output_dir: &Path, spec: &ResizeSpec, quality: u8) -> Result<Dimensions, BuildError> {
    let path = output_dir.join(&spec.file);
    if !path.is_file() {
        return Err(BuildError::missing(&path));
    }

    let img = load_image(&path)?;
    let original = Dimensions {
        width: img.width(),
        height: img.height(),
    };
    let target = target_dimensions(original, spec.width, spec.height);

    let resized = img.resize_exact(target.width, target.height, FilterType::Lanczos3);
    save_image(&resized, &path, quality)?;

    tracing::debug!(
        "Resized {} from {}x{} to {}x{}",
        path.display(),
        original.width,
        original.height,
        target.width,
        target.height
    );

    Ok(target)
}
