//! Reverse premultiplication against a solid background.
//!
//! Compositing a straight-alpha foreground over a background gives:
//! `Comp = Fg * A + (1 - A) * Bg`
//!
//! so the foreground is recovered with `Fg = (Comp - (1 - A) * Bg) / A`.
//! Black and white backgrounds get their own simplified forms.

use crate::background::BackgroundKind;
use crate::classify::background_contribution;
use crate::error::{Error, Result};
use crate::pixel::{Pixel, PixelBuffer, Rgb, SamplePrecision};

/// Float slack allowed past `[0, 1]` before a corrected sample is rejected.
const RANGE_SLACK: f32 = 1e-5;

/// Restore straight alpha on every translucent pixel of `buffer`.
///
/// Fully transparent and fully opaque pixels are left as they are. Samples
/// that stray slightly past the premultiplied bounds are clamped back to the
/// nearest bound before dividing, which absorbs rounding noise from lossy
/// sources.
///
/// Returns the number of pixels corrected.
///
/// # Errors
///
/// Returns [`Error::PixelOutOfRange`] for the first pixel whose corrected
/// samples leave `[0, 1]`.
pub fn unpremultiply(
    buffer: &mut PixelBuffer,
    background: Rgb,
    kind: BackgroundKind,
    precision: SamplePrecision,
) -> Result<u64> {
    let mut corrected = 0u64;
    for (index, px) in buffer.pixels_mut().iter_mut().enumerate() {
        if !px.is_translucent() {
            continue;
        }
        let restored = match kind {
            BackgroundKind::Black => over_black(*px, precision),
            BackgroundKind::White => over_white(*px, precision),
            BackgroundKind::Other | BackgroundKind::None => over_color(*px, background, precision),
        };
        *px = checked(index, restored)?;
        corrected += 1;
    }
    log::trace!("unpremultiplied {corrected} pixels");
    Ok(corrected)
}

/// `Fg = Comp / A`
fn over_black(px: Pixel, precision: SamplePrecision) -> Pixel {
    let a = px.alpha;
    let color = px.color().channels().map(|c| {
        let c = c.clamp(0.0, a);
        if c == 0.0 {
            c
        } else {
            precision.quantize(c / a)
        }
    });
    px.with_color(Rgb::from_channels(color))
}

/// `Fg = (Comp - (1 - A)) / A`
fn over_white(px: Pixel, precision: SamplePrecision) -> Pixel {
    let a = px.alpha;
    let inv = 1.0 - a;
    let color = px.color().channels().map(|c| {
        let c = c.clamp(inv, 1.0);
        if c == 1.0 {
            c
        } else {
            precision.quantize((c - inv) / a)
        }
    });
    px.with_color(Rgb::from_channels(color))
}

/// `Fg = (Comp - (1 - A) * Bg) / A`
fn over_color(px: Pixel, background: Rgb, precision: SamplePrecision) -> Pixel {
    let a = px.alpha;
    let contribution = background_contribution(a, background, precision).channels();
    let comp = px.color().channels();
    let color = std::array::from_fn(|i| {
        let c = comp[i].clamp(contribution[i], contribution[i] + a);
        precision.quantize((c - contribution[i]) / a)
    });
    px.with_color(Rgb::from_channels(color))
}

fn checked(index: usize, px: Pixel) -> Result<Pixel> {
    let snap = |v: f32| {
        if (-RANGE_SLACK..=1.0 + RANGE_SLACK).contains(&v) {
            Some(v.clamp(0.0, 1.0))
        } else {
            None
        }
    };
    match (snap(px.red), snap(px.green), snap(px.blue)) {
        (Some(red), Some(green), Some(blue)) if (0.0..=1.0).contains(&px.alpha) => {
            Ok(Pixel::new(px.alpha, red, green, blue))
        }
        _ => Err(Error::PixelOutOfRange { index, pixel: px }),
    }
}
