//! Background color detection.
//!
//! Fully transparent pixels still carry a color. When an image was
//! premultiplied over a solid background, those pixels overwhelmingly share
//! that background color, so the dominant transparent color is the best
//! guess for it.

use std::collections::HashMap;

use crate::pixel::{PixelBuffer, Rgb};

/// Index of the seeded pure black candidate.
const BLACK_INDEX: usize = 0;
/// Index of the seeded pure white candidate.
const WHITE_INDEX: usize = 1;

/// A distinct color observed among fully transparent pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundCandidate {
    /// Candidate color.
    pub color: Rgb,
    /// Number of fully transparent pixels with exactly this color.
    pub count: u64,
}

/// Classification of the selected background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackgroundKind {
    /// No fully transparent pixels, so no background was selected.
    #[default]
    None,
    /// Pure black.
    Black,
    /// Pure white.
    White,
    /// Any other solid color.
    Other,
}

/// Outcome of a background scan.
#[derive(Debug, Clone)]
pub struct BackgroundScan {
    candidates: Vec<BackgroundCandidate>,
    transparent: u64,
    selected: Option<usize>,
}

impl BackgroundScan {
    /// Every candidate in insertion order. The first two entries are always
    /// pure black and pure white.
    #[must_use]
    pub fn candidates(&self) -> &[BackgroundCandidate] {
        &self.candidates
    }

    /// Total number of fully transparent pixels.
    #[must_use]
    pub fn transparent_count(&self) -> u64 {
        self.transparent
    }

    /// The winning candidate, if any transparent pixel exists.
    #[must_use]
    pub fn selected(&self) -> Option<&BackgroundCandidate> {
        self.selected.map(|i| &self.candidates[i])
    }

    /// Color of the winning candidate.
    #[must_use]
    pub fn color(&self) -> Option<Rgb> {
        self.selected().map(|c| c.color)
    }

    /// Kind of the winning candidate.
    #[must_use]
    pub fn kind(&self) -> BackgroundKind {
        match self.selected {
            None => BackgroundKind::None,
            Some(BLACK_INDEX) => BackgroundKind::Black,
            Some(WHITE_INDEX) => BackgroundKind::White,
            Some(_) => BackgroundKind::Other,
        }
    }

    /// Share of transparent pixels that agree with the winner.
    ///
    /// `None` when there are no transparent pixels.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(&self) -> Option<f64> {
        self.selected()
            .map(|c| c.count as f64 / self.transparent as f64)
    }

    /// Whether the winner falls below `threshold`, ignoring `force`.
    #[must_use]
    pub fn is_inconsistent(&self, threshold: f64) -> bool {
        self.ratio().is_some_and(|r| r < threshold)
    }
}

/// Scan `buffer` for the dominant color among fully transparent pixels.
///
/// Ties go to whichever candidate was inserted first, so black beats white
/// and both beat any color first seen in the image.
#[must_use]
pub fn detect_background(buffer: &PixelBuffer) -> BackgroundScan {
    let mut candidates = vec![
        BackgroundCandidate {
            color: Rgb::BLACK,
            count: 0,
        },
        BackgroundCandidate {
            color: Rgb::WHITE,
            count: 0,
        },
    ];
    let mut index: HashMap<[u32; 3], usize> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (c.color.key(), i))
        .collect();
    let mut transparent = 0u64;

    for px in buffer.pixels().iter().filter(|p| p.is_transparent()) {
        transparent += 1;
        let color = px.color();
        match index.get(&color.key()) {
            Some(&i) => candidates[i].count += 1,
            None => {
                index.insert(color.key(), candidates.len());
                candidates.push(BackgroundCandidate { color, count: 1 });
            }
        }
    }

    let mut selected: Option<usize> = None;
    for (i, c) in candidates.iter().enumerate() {
        let best = selected.map_or(0, |s| candidates[s].count);
        if c.count > best {
            selected = Some(i);
        }
    }

    log::trace!(
        "background scan: {transparent} transparent pixels, {} candidates",
        candidates.len()
    );

    BackgroundScan {
        candidates,
        transparent,
        selected,
    }
}
