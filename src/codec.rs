//! Image decoding and encoding at the edges of the pipeline.

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};

use crate::error::{Error, Result};
use crate::pixel::{Pixel, PixelBuffer};

/// A decoded source image.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    /// Whether the source carries an alpha channel.
    pub has_alpha: bool,
    /// Normalized ARGB samples.
    pub buffer: PixelBuffer,
}

/// Converts between files and [`PixelBuffer`]s.
///
/// Implementations are shared across worker threads.
pub trait ImageCodec: Send + Sync {
    /// Decode the image at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded.
    fn decode(&self, path: &Path) -> Result<DecodedImage>;

    /// Encode `buffer` as PNG at `path`, returning the number of bytes
    /// written.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    fn encode(&self, buffer: &PixelBuffer, has_alpha: bool, path: &Path) -> Result<u64>;
}

/// [`ImageCodec`] backed by the `image` crate, always writing PNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngCodec;

impl ImageCodec for PngCodec {
    fn decode(&self, path: &Path) -> Result<DecodedImage> {
        let img = image::open(path).map_err(|source| Error::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        from_dynamic(&img)
    }

    fn encode(&self, buffer: &PixelBuffer, has_alpha: bool, path: &Path) -> Result<u64> {
        let img = to_dynamic(buffer, has_alpha);
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|source| Error::Encode {
                path: path.to_path_buf(),
                source,
            })?;
        std::fs::write(path, &bytes).map_err(|e| Error::Encode {
            path: path.to_path_buf(),
            source: image::ImageError::IoError(e),
        })?;
        Ok(bytes.len() as u64)
    }
}

/// Convert a decoded image into normalized samples.
///
/// Higher bit depths keep their precision; 8-bit sources land exactly on
/// the `k / 255` grid.
///
/// # Errors
///
/// Returns [`Error::BufferSize`] if the decoder's dimensions disagree with
/// its sample count.
pub fn from_dynamic(img: &DynamicImage) -> Result<DecodedImage> {
    let has_alpha = img.color().has_alpha();
    let rgba = img.to_rgba32f();
    let (width, height) = rgba.dimensions();
    let pixels = rgba
        .pixels()
        .map(|p| Pixel::new(p[3], p[0], p[1], p[2]))
        .collect();
    Ok(DecodedImage {
        has_alpha,
        buffer: PixelBuffer::new(width, height, pixels)?,
    })
}

/// Convert samples back to an 8-bit image, RGBA when `has_alpha`, RGB
/// otherwise. Color images are never reduced to grayscale.
#[must_use]
pub fn to_dynamic(buffer: &PixelBuffer, has_alpha: bool) -> DynamicImage {
    let (w, h) = (buffer.width(), buffer.height());
    if has_alpha {
        let mut img = RgbaImage::new(w, h);
        for (dst, src) in img.pixels_mut().zip(buffer.pixels()) {
            let [a, r, g, b] = src.to_argb8();
            *dst = image::Rgba([r, g, b, a]);
        }
        DynamicImage::ImageRgba8(img)
    } else {
        let mut img = RgbImage::new(w, h);
        for (dst, src) in img.pixels_mut().zip(buffer.pixels()) {
            let [_, r, g, b] = src.to_argb8();
            *dst = image::Rgb([r, g, b]);
        }
        DynamicImage::ImageRgb8(img)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba};

    #[test]
    fn decoded_samples_are_argb_normalized() {
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, Rgba([255, 0, 51, 128]));
        let decoded = from_dynamic(&DynamicImage::ImageRgba8(img)).unwrap();
        assert!(decoded.has_alpha);
        let px = decoded.buffer.get(0, 0);
        assert_eq!(px.to_argb8(), [128, 255, 0, 51]);
        assert_eq!(decoded.buffer.get(1, 0), Pixel::new(0.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn rgb_source_reports_no_alpha() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(3, 3));
        let decoded = from_dynamic(&img).unwrap();
        assert!(!decoded.has_alpha);
        assert!(decoded.buffer.pixels().iter().all(|p| p.alpha == 1.0));
    }

    #[test]
    fn encode_then_decode_preserves_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let mut buf = PixelBuffer::filled(2, 2, Pixel::from_argb8([0, 0, 0, 0]));
        buf.set(1, 1, Pixel::from_argb8([200, 10, 20, 30]));

        let written = PngCodec.encode(&buf, true, &path).unwrap();
        assert_eq!(written, std::fs::metadata(&path).unwrap().len());

        let decoded = PngCodec.decode(&path).unwrap();
        assert!(decoded.has_alpha);
        let round_trip: Vec<_> = decoded.buffer.pixels().iter().map(|p| p.to_argb8()).collect();
        let original: Vec<_> = buf.pixels().iter().map(|p| p.to_argb8()).collect();
        assert_eq!(round_trip, original);
    }

    #[test]
    fn opaque_encode_stays_rgb() {
        let buf = PixelBuffer::filled(1, 1, Pixel::from_argb8([255, 90, 90, 90]));
        let img = to_dynamic(&buf, false);
        assert_eq!(img.color(), image::ColorType::Rgb8);
        assert_eq!(img.get_pixel(0, 0), Rgba([90, 90, 90, 255]));
    }

    #[test]
    fn unwritable_destination_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.png");
        let buf = PixelBuffer::filled(1, 1, Pixel::from_argb8([255, 1, 2, 3]));
        let err = PngCodec.encode(&buf, false, &path).unwrap_err();
        assert!(matches!(&err, Error::Encode { path: p, .. } if *p == path));
        assert!(err.to_string().contains("out.png"));
    }

    #[test]
    fn decode_missing_file_is_decode_error() {
        let err = PngCodec.decode(Path::new("/nonexistent/nope.png")).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }
}
