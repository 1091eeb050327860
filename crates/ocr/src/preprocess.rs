use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::config::PreprocessConfig;
use crate::contour;
use crate::enhance;
use crate::error::AnalyzerError;

/// Largest contour must enclose at least this share of the image to be trusted
/// as the receipt outline.
const MIN_CONTOUR_FRACTION: f64 = 0.10;

const SCRATCH_FILE: &str = "receipt.jpg";

/// Decodes an uploaded payload. `name` is only used in the error message.
pub fn decode(name: &str, bytes: &[u8]) -> Result<DynamicImage, AnalyzerError> {
    image::load_from_memory(bytes).map_err(|e| AnalyzerError::Input(format!("Failed to decode {name}: {e}")))
}

/// Crops to the detected receipt outline plus `margin` pixels, clamped to the
/// image. Returns the image untouched when no convincing outline is found.
pub fn crop(image: &DynamicImage, margin: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return image.clone();
    }

    let mask = contour::edge_mask(&image.to_luma8());
    let min_area = width as f64 * height as f64 * MIN_CONTOUR_FRACTION;

    match contour::largest_outline(&mask) {
        Some(found) if found.area >= min_area => {
            let b = found.bounds.expand(margin, width, height);
            tracing::debug!(
                x = b.min_x,
                y = b.min_y,
                width = b.width(),
                height = b.height(),
                "cropping to receipt outline"
            );
            image.crop_imm(b.min_x, b.min_y, b.width(), b.height())
        }
        _ => {
            tracing::debug!(width, height, "no receipt outline found, keeping full image");
            image.clone()
        }
    }
}

/// Stacks images top to bottom on a white canvas, each centred horizontally.
/// A single image comes back unchanged.
pub fn merge_vertical(images: &[DynamicImage], spacing: u32) -> Result<DynamicImage, AnalyzerError> {
    match images {
        [] => Err(AnalyzerError::Input("No images to merge".to_string())),
        [single] => Ok(single.clone()),
        _ => {
            let width = images.iter().map(|i| i.width()).max().unwrap_or(0);
            let height = images.iter().map(|i| i.height()).sum::<u32>()
                + spacing * (images.len() as u32 - 1);

            let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
            let mut y = 0u32;
            for img in images {
                let x = (width - img.width()) / 2;
                image::imageops::replace(&mut canvas, &img.to_rgb8(), x as i64, y as i64);
                y += img.height() + spacing;
            }
            tracing::debug!(count = images.len(), width, height, "merged receipt fragments");
            Ok(DynamicImage::ImageRgb8(canvas))
        }
    }
}

/// Writes the prepared image as JPEG inside `dir`.
pub fn write_scratch(image: &DynamicImage, dir: &Path) -> Result<PathBuf, AnalyzerError> {
    let path = dir.join(SCRATCH_FILE);
    DynamicImage::ImageRgb8(image.to_rgb8())
        .save_with_format(&path, ImageFormat::Jpeg)
        .map_err(|e| match e {
            image::ImageError::IoError(io) => AnalyzerError::Io(io),
            other => AnalyzerError::Io(std::io::Error::other(other)),
        })?;
    Ok(path)
}

/// Crop, merge and optional enhancement for one upload.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn prepare(&self, images: &[DynamicImage]) -> Result<DynamicImage, AnalyzerError> {
        let cropped: Vec<DynamicImage> = images.iter().map(|i| crop(i, self.config.crop_margin)).collect();
        let merged = merge_vertical(&cropped, self.config.merge_spacing)?;
        if self.config.enhance {
            Ok(enhance::enhance(&merged))
        } else {
            Ok(merged)
        }
    }

    /// `prepare` followed by `write_scratch`.
    pub fn prepare_to(&self, images: &[DynamicImage], dir: &Path) -> Result<PathBuf, AnalyzerError> {
        let prepared = self.prepare(images)?;
        write_scratch(&prepared, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma};

    /// Light rectangle on a dark table, like a photographed receipt.
    fn receipt_photo(width: u32, height: u32, rect: (u32, u32, u32, u32)) -> DynamicImage {
        let (rx, ry, rw, rh) = rect;
        let img: GrayImage = ImageBuffer::from_fn(width, height, |x, y| {
            if x >= rx && x < rx + rw && y >= ry && y < ry + rh {
                Luma([230u8])
            } else {
                Luma([30u8])
            }
        });
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn crop_tightens_around_receipt() {
        let photo = receipt_photo(200, 150, (40, 30, 120, 90));
        let cropped = crop(&photo, 10);
        assert!(cropped.width() >= 120 && cropped.width() < 200, "width {}", cropped.width());
        assert!(cropped.height() >= 90 && cropped.height() < 150, "height {}", cropped.height());
    }

    #[test]
    fn crop_never_exceeds_image_bounds() {
        let photo = receipt_photo(120, 100, (2, 2, 116, 96));
        let cropped = crop(&photo, 50);
        assert!(cropped.width() <= 120 && cropped.height() <= 100);
    }

    #[test]
    fn crop_keeps_image_without_outline() {
        let uniform = DynamicImage::ImageLuma8(GrayImage::from_pixel(80, 60, Luma([200])));
        let out = crop(&uniform, 10);
        assert_eq!((out.width(), out.height()), (80, 60));
    }

    #[test]
    fn crop_ignores_small_objects() {
        let photo = receipt_photo(200, 200, (90, 90, 10, 10));
        let out = crop(&photo, 5);
        assert_eq!((out.width(), out.height()), (200, 200));
    }

    #[test]
    fn merge_single_is_identity() {
        let photo = receipt_photo(30, 20, (5, 5, 10, 10));
        let merged = merge_vertical(std::slice::from_ref(&photo), 20).unwrap();
        assert_eq!(merged, photo);
    }

    #[test]
    fn merge_stacks_and_centres() {
        let a = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 10, Rgb([0, 0, 0])));
        let b = DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 30, Rgb([0, 0, 0])));
        let c = DynamicImage::ImageRgb8(RgbImage::from_pixel(30, 5, Rgb([0, 0, 0])));
        let merged = merge_vertical(&[a, b, c], 4).unwrap();
        assert_eq!(merged.width(), 40);
        assert_eq!(merged.height(), 10 + 30 + 5 + 2 * 4);

        let rgb = merged.to_rgb8();
        // spacing row is white
        assert_eq!(rgb.get_pixel(0, 11), &Rgb([255, 255, 255]));
        // second image centred: columns 10..30
        assert_eq!(rgb.get_pixel(9, 20), &Rgb([255, 255, 255]));
        assert_eq!(rgb.get_pixel(10, 20), &Rgb([0, 0, 0]));
        assert_eq!(rgb.get_pixel(29, 20), &Rgb([0, 0, 0]));
        assert_eq!(rgb.get_pixel(30, 20), &Rgb([255, 255, 255]));
    }

    #[test]
    fn merge_empty_is_input_error() {
        assert!(matches!(merge_vertical(&[], 20), Err(AnalyzerError::Input(_))));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode("x.png", b"not an image"), Err(AnalyzerError::Input(_))));
    }

    #[test]
    fn scratch_file_is_readable_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let photo = receipt_photo(64, 48, (8, 8, 40, 30));
        let path = write_scratch(&photo, dir.path()).unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("jpg"));
        let back = image::open(&path).unwrap();
        assert_eq!((back.width(), back.height()), (64, 48));
    }

    #[test]
    fn scratch_write_into_missing_dir_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let photo = receipt_photo(8, 8, (0, 0, 4, 4));
        assert!(matches!(write_scratch(&photo, &missing), Err(AnalyzerError::Io(_))));
    }

    #[test]
    fn preprocessor_merges_fragments() {
        let fragments = vec![
            receipt_photo(100, 80, (20, 10, 60, 60)),
            receipt_photo(100, 80, (20, 10, 60, 60)),
        ];
        let out = Preprocessor::new(PreprocessConfig { enhance: true, ..Default::default() })
            .prepare(&fragments)
            .unwrap();
        assert!(out.height() > out.width());
        assert!(matches!(out, DynamicImage::ImageRgb8(_)));
    }
}
