//! Alpha association classification.
//!
//! A premultiplied pixel over background `Bg` satisfies
//! `Comp = Fg * A + (1 - A) * Bg` with `Fg` in `[0, 1]`, so the residual
//! `Comp - (1 - A) * Bg` must land in `[0, A]` on every channel. Straight
//! alpha images violate that bound on a large share of translucent pixels.

use crate::pixel::{PixelBuffer, Rgb, SamplePrecision};

/// How alpha relates to the color channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaType {
    /// The image has no alpha channel.
    #[default]
    None,
    /// Straight alpha: colors are independent of alpha.
    Unassociated,
    /// Premultiplied alpha against the detected background.
    Associated,
    /// Not enough evidence to decide.
    Unknown,
}

/// Numeric policy for the residual test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisConfig {
    /// Sample domain for intermediate values.
    pub precision: SamplePrecision,
    /// Width of the marginal band around `[0, A]`.
    pub tolerance: f32,
}

impl AnalysisConfig {
    /// Default tolerance: one step of the 8-bit scale.
    pub const DEFAULT_TOLERANCE: f32 = 1.0 / 255.0;

    /// Analysis on the 8-bit grid with a one-step marginal band.
    #[must_use]
    pub fn integer8() -> Self {
        Self {
            precision: SamplePrecision::Integer8,
            tolerance: Self::DEFAULT_TOLERANCE,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            precision: SamplePrecision::Float,
            tolerance: Self::DEFAULT_TOLERANCE,
        }
    }
}

/// Where one translucent pixel's residual falls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidualFit {
    /// Every channel within `[0, A]`.
    Match,
    /// Every channel within `[-e, A + e]`, at least one outside `[0, A]`.
    Marginal,
    /// Some channel outside the marginal band.
    Other,
}

/// Counts of translucent pixels by residual fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlphaTally {
    /// Pixels strictly consistent with premultiplication.
    pub matched: u64,
    /// Pixels consistent within the tolerance band.
    pub marginal: u64,
    /// Pixels inconsistent with premultiplication.
    pub other: u64,
}

impl AlphaTally {
    /// Number of translucent pixels examined.
    #[must_use]
    pub fn translucent(&self) -> u64 {
        self.matched + self.marginal + self.other
    }

    /// Alpha type implied by these counts.
    ///
    /// Marginal pixels alone never make an image associated; at least one
    /// strict match with no contradicting pixel is required.
    #[must_use]
    pub fn alpha_type(&self) -> AlphaType {
        if self.translucent() == 0 {
            AlphaType::Unknown
        } else if self.matched > 0 && self.other == 0 {
            AlphaType::Associated
        } else {
            AlphaType::Unassociated
        }
    }
}

/// The background's contribution `(1 - A) * Bg` per channel.
#[must_use]
pub fn background_contribution(alpha: f32, background: Rgb, precision: SamplePrecision) -> Rgb {
    let inv = 1.0 - alpha;
    Rgb::from_channels(background.channels().map(|bg| precision.quantize(inv * bg)))
}

/// Test one residual against `[0, alpha]` and the tolerance band.
#[must_use]
pub fn residual_fit(residual: Rgb, alpha: f32, tolerance: f32) -> ResidualFit {
    let channels = residual.channels();
    if channels.iter().all(|&r| (0.0..=alpha).contains(&r)) {
        ResidualFit::Match
    } else if channels
        .iter()
        .all(|&r| (-tolerance..=alpha + tolerance).contains(&r))
    {
        ResidualFit::Marginal
    } else {
        ResidualFit::Other
    }
}

/// Count how translucent pixels fit premultiplication over `background`.
///
/// Never mutates the buffer.
#[must_use]
pub fn tally(buffer: &PixelBuffer, background: Rgb, config: &AnalysisConfig) -> AlphaTally {
    let mut counts = AlphaTally::default();
    for px in buffer.pixels().iter().filter(|p| p.is_translucent()) {
        let contribution = background_contribution(px.alpha, background, config.precision);
        match residual_fit(px.color() - contribution, px.alpha, config.tolerance) {
            ResidualFit::Match => counts.matched += 1,
            ResidualFit::Marginal => counts.marginal += 1,
            ResidualFit::Other => counts.other += 1,
        }
    }
    log::trace!(
        "alpha tally: {} match, {} marginal, {} other",
        counts.matched,
        counts.marginal,
        counts.other
    );
    counts
}

/// Classify the buffer's alpha against an optional background.
///
/// With no background there is nothing to test against and the answer is
/// [`AlphaType::Unknown`].
#[must_use]
pub fn classify(
    buffer: &PixelBuffer,
    background: Option<Rgb>,
    config: &AnalysisConfig,
) -> (AlphaType, AlphaTally) {
    match background {
        Some(bg) => {
            let counts = tally(buffer, bg, config);
            (counts.alpha_type(), counts)
        }
        None => (AlphaType::Unknown, AlphaTally::default()),
    }
}
