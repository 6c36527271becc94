//! In-memory pixel representation shared by the analysis stages.
//!
//! Samples are stored normalized to `[0, 1]` in alpha, red, green, blue
//! order. Codecs working with 8-bit data convert through [`Pixel::from_argb8`]
//! and [`Pixel::to_argb8`].

use crate::error::{Error, Result};

/// Fully transparent alpha value.
pub const TRANSPARENT: f32 = 0.0;

/// Fully opaque alpha value.
pub const OPAQUE: f32 = 1.0;

const U8_MAX: f32 = 255.0;

/// One pixel with normalized alpha, red, green and blue samples.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pixel {
    /// Alpha sample.
    pub alpha: f32,
    /// Red sample.
    pub red: f32,
    /// Green sample.
    pub green: f32,
    /// Blue sample.
    pub blue: f32,
}

impl Pixel {
    /// Create a pixel from normalized samples.
    #[must_use]
    pub const fn new(alpha: f32, red: f32, green: f32, blue: f32) -> Self {
        Self {
            alpha,
            red,
            green,
            blue,
        }
    }

    /// Create a pixel from 8-bit samples in ARGB order.
    #[must_use]
    pub fn from_argb8(argb: [u8; 4]) -> Self {
        Self::new(
            f32::from(argb[0]) / U8_MAX,
            f32::from(argb[1]) / U8_MAX,
            f32::from(argb[2]) / U8_MAX,
            f32::from(argb[3]) / U8_MAX,
        )
    }

    /// Convert to 8-bit samples in ARGB order, rounding to nearest.
    #[must_use]
    pub fn to_argb8(self) -> [u8; 4] {
        [
            to_u8(self.alpha),
            to_u8(self.red),
            to_u8(self.green),
            to_u8(self.blue),
        ]
    }

    /// Color channels without alpha.
    #[must_use]
    pub fn color(self) -> Rgb {
        Rgb::new(self.red, self.green, self.blue)
    }

    /// Replace the color channels, keeping alpha.
    #[must_use]
    pub fn with_color(self, color: Rgb) -> Self {
        Self::new(self.alpha, color.red, color.green, color.blue)
    }

    /// Alpha is exactly the fully transparent value.
    #[must_use]
    pub fn is_transparent(self) -> bool {
        self.alpha == TRANSPARENT
    }

    /// Alpha lies strictly between fully transparent and fully opaque.
    #[must_use]
    pub fn is_translucent(self) -> bool {
        self.alpha > TRANSPARENT && self.alpha < OPAQUE
    }

    /// All four samples lie in `[0, 1]`.
    #[must_use]
    pub fn in_range(self) -> bool {
        [self.alpha, self.red, self.green, self.blue]
            .iter()
            .all(|v| (0.0..=1.0).contains(v))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_u8(v: f32) -> u8 {
    (v * U8_MAX).round().clamp(0.0, U8_MAX) as u8
}

/// A color without alpha.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rgb {
    /// Red sample.
    pub red: f32,
    /// Green sample.
    pub green: f32,
    /// Blue sample.
    pub blue: f32,
}

impl Rgb {
    /// Pure black.
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0);
    /// Pure white.
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0);

    /// Create a color from normalized samples.
    #[must_use]
    pub const fn new(red: f32, green: f32, blue: f32) -> Self {
        Self { red, green, blue }
    }

    /// The three channels as an array, red first.
    #[must_use]
    pub fn channels(self) -> [f32; 3] {
        [self.red, self.green, self.blue]
    }

    /// Build from an array of channels, red first.
    #[must_use]
    pub fn from_channels(c: [f32; 3]) -> Self {
        Self::new(c[0], c[1], c[2])
    }

    /// Key for exact-equality lookup. Negative zero maps to positive zero
    /// so that keys agree with `==`.
    pub(crate) fn key(self) -> [u32; 3] {
        self.channels().map(|v| (v + 0.0).to_bits())
    }

    /// Color as 8-bit samples, red first.
    #[must_use]
    pub fn to_rgb8(self) -> [u8; 3] {
        self.channels().map(to_u8)
    }
}

impl std::ops::Sub for Rgb {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.red - rhs.red, self.green - rhs.green, self.blue - rhs.blue)
    }
}

/// Numeric domain used by the analysis math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplePrecision {
    /// Work directly on normalized floats.
    #[default]
    Float,
    /// Round intermediate background contributions and corrected samples
    /// to the 8-bit grid, matching integer-sample tools.
    Integer8,
}

impl SamplePrecision {
    /// Snap a normalized value to this precision's grid.
    #[must_use]
    pub fn quantize(self, v: f32) -> f32 {
        match self {
            Self::Float => v,
            Self::Integer8 => (v * U8_MAX).round() / U8_MAX,
        }
    }
}

/// A decoded image: `width * height` pixels in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    pixels: Vec<Pixel>,
}

impl PixelBuffer {
    /// Wrap a pixel vector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferSize`] if `pixels.len() != width * height`.
    pub fn new(width: u32, height: u32, pixels: Vec<Pixel>) -> Result<Self> {
        let expected = u64::from(width) * u64::from(height);
        if pixels.len() as u64 != expected {
            return Err(Error::BufferSize {
                width,
                height,
                len: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// A buffer filled with one pixel value.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn filled(width: u32, height: u32, pixel: Pixel) -> Self {
        let len = (u64::from(width) * u64::from(height)) as usize;
        Self {
            width,
            height,
            pixels: vec![pixel; len],
        }
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixels in row-major order.
    #[must_use]
    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    /// Mutable pixels in row-major order.
    pub fn pixels_mut(&mut self) -> &mut [Pixel] {
        &mut self.pixels
    }

    /// Pixel at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are outside the buffer.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Pixel {
        self.pixels[self.index(x, y)]
    }

    /// Overwrite the pixel at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are outside the buffer.
    pub fn set(&mut self, x: u32, y: u32, pixel: Pixel) {
        let idx = self.index(x, y);
        self.pixels[idx] = pixel;
    }

    fn index(&self, x: u32, y: u32) -> usize {
        assert!(x < self.width && y < self.height, "({x},{y}) out of bounds");
        y as usize * self.width as usize + x as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argb8_conversion_hits_endpoints() {
        let p = Pixel::from_argb8([255, 0, 128, 255]);
        assert_eq!(p.alpha, 1.0);
        assert_eq!(p.red, 0.0);
        assert_eq!(p.blue, 1.0);
        assert_eq!(p.to_argb8(), [255, 0, 128, 255]);
    }

    #[test]
    fn translucency_excludes_both_extremes() {
        assert!(Pixel::new(0.0, 0.0, 0.0, 0.0).is_transparent());
        assert!(!Pixel::new(0.0, 0.0, 0.0, 0.0).is_translucent());
        assert!(!Pixel::new(1.0, 0.0, 0.0, 0.0).is_translucent());
        assert!(Pixel::new(0.5, 0.0, 0.0, 0.0).is_translucent());
    }

    #[test]
    fn negative_zero_shares_key_with_zero() {
        assert_eq!(Rgb::new(-0.0, 0.0, 0.0).key(), Rgb::BLACK.key());
        assert_ne!(Rgb::WHITE.key(), Rgb::BLACK.key());
    }

    #[test]
    fn integer8_quantizes_to_grid() {
        let q = SamplePrecision::Integer8.quantize(0.5);
        assert!((q - 128.0 / 255.0).abs() < 1e-6);
        assert_eq!(SamplePrecision::Float.quantize(0.5), 0.5);
    }

    #[test]
    fn buffer_rejects_mismatched_length() {
        let err = PixelBuffer::new(2, 2, vec![Pixel::default(); 3]).unwrap_err();
        assert!(matches!(err, Error::BufferSize { len: 3, .. }));
    }

    #[test]
    fn buffer_indexing_is_row_major() {
        let mut buf = PixelBuffer::filled(3, 2, Pixel::default());
        let red = Pixel::new(1.0, 1.0, 0.0, 0.0);
        buf.set(2, 1, red);
        assert_eq!(buf.pixels()[5], red);
        assert_eq!(buf.get(2, 1), red);
    }
}
