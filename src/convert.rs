//! The conversion step: background detection, alpha classification and,
//! when the alpha turns out to be premultiplied, restoration.

use crate::background::{detect_background, BackgroundKind};
use crate::classify::{classify, AlphaType, AnalysisConfig};
use crate::error::Error;
use crate::pixel::{PixelBuffer, Rgb};
use crate::unpremultiply::unpremultiply;

/// Options controlling conversion behavior.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct ConversionOptions {
    /// Report every converted image.
    pub verbose: bool,
    /// Suppress the final summary.
    pub quiet: bool,
    /// Analyze and convert, but never write or delete anything.
    pub dry_run: bool,
    /// Proceed without background warnings.
    pub force: bool,
    /// Remove the source image after a successful save.
    pub delete_original: bool,
    /// Minimum share of transparent pixels that must agree on the
    /// background color, in `(0, 1]`.
    pub background_ratio_threshold: f64,
    /// Numeric policy for the analysis.
    pub analysis: AnalysisConfig,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            quiet: false,
            dry_run: false,
            force: false,
            delete_original: false,
            background_ratio_threshold: 0.8,
            analysis: AnalysisConfig::default(),
        }
    }
}

/// Severity of a job's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Outcome {
    /// Converted without remarks.
    #[default]
    Ok,
    /// Converted, with a remark worth reading.
    Warning,
    /// Not converted.
    Error,
}

/// Result of converting one image.
#[derive(Debug, Clone, Default)]
pub struct ConversionResult {
    /// Overall severity.
    pub outcome: Outcome,
    /// The single message attached to this result, if any.
    pub message: Option<String>,
    /// Detected alpha type.
    pub alpha_type: AlphaType,
    /// Kind of the detected background.
    pub background_kind: BackgroundKind,
    /// Share of transparent pixels matching the background, or 0 when none.
    pub background_ratio: f64,
    /// Detected background color, black when none.
    pub background_color: Rgb,
}

impl ConversionResult {
    /// Record a warning unless a message is already attached.
    pub fn warn(&mut self, message: impl Into<String>) {
        if self.outcome == Outcome::Ok {
            self.outcome = Outcome::Warning;
            self.message = Some(message.into());
        }
    }

    /// Record a fatal error, replacing any earlier warning.
    pub fn fail(&mut self, err: &Error) {
        self.outcome = Outcome::Error;
        self.message = Some(err.to_string());
    }

    /// Whether this result marks the job as failed.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.outcome == Outcome::Error
    }
}

/// Analyze `buffer` and restore straight alpha in place when it is
/// premultiplied.
///
/// Buffers without an alpha channel are left untouched and reported as
/// [`AlphaType::None`]. An inconsistent background stops the analysis before
/// classification, and a background other than black or white is only
/// corrected with [`ConversionOptions::force`]. Otherwise the buffer is
/// modified exactly when classification says [`AlphaType::Associated`].
#[must_use]
pub fn convert(
    buffer: &mut PixelBuffer,
    has_alpha: bool,
    options: &ConversionOptions,
) -> ConversionResult {
    let mut result = ConversionResult::default();
    if !has_alpha {
        return result;
    }

    let scan = detect_background(buffer);
    result.background_kind = scan.kind();
    if let Some(color) = scan.color() {
        result.background_color = color;
    }
    if let Some(ratio) = scan.ratio() {
        result.background_ratio = ratio;
        if !options.force && scan.is_inconsistent(options.background_ratio_threshold) {
            result.warn(format!(
                "inconsistent background color (ratio at {ratio:.3}; should be {} or greater)",
                options.background_ratio_threshold
            ));
            return result;
        }
    }

    let (alpha_type, _) = classify(buffer, scan.color(), &options.analysis);
    result.alpha_type = alpha_type;

    match alpha_type {
        AlphaType::Unknown => {
            result.warn("cannot determine alpha type (no translucent pixels)");
        }
        AlphaType::Associated => {
            if result.background_kind == BackgroundKind::Other && !options.force {
                let [r, g, b] = result.background_color.to_rgb8();
                result.warn(format!(
                    "invalid background - must be black or white (R:{r} G:{g} B:{b})"
                ));
                return result;
            }
            if let Err(e) = unpremultiply(
                buffer,
                result.background_color,
                result.background_kind,
                options.analysis.precision,
            ) {
                result.fail(&e);
            }
        }
        AlphaType::Unassociated | AlphaType::None => {}
    }

    result
}
