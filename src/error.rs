//! Error types for the straight-alpha crate.

use std::path::PathBuf;

use crate::pixel::Pixel;

/// Errors that can occur while converting an image.
///
/// Every variant is fatal to the job that produced it and to nothing else.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The source image could not be read or decoded.
    #[error("error loading image ({source}): {}", path.display())]
    Decode {
        /// Source path.
        path: PathBuf,
        /// Underlying decoder error.
        source: image::ImageError,
    },

    /// The converted image could not be encoded or written.
    #[error("error saving image ({source}): {}", path.display())]
    Encode {
        /// Destination path.
        path: PathBuf,
        /// Underlying encoder error.
        source: image::ImageError,
    },

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A pixel buffer's sample count does not match its dimensions.
    #[error("pixel buffer holds {len} pixels, expected {width}x{height}")]
    BufferSize {
        /// Declared width in pixels.
        width: u32,
        /// Declared height in pixels.
        height: u32,
        /// Number of pixels actually supplied.
        len: usize,
    },

    /// Unpremultiplying produced a sample outside `[0, 1]`.
    #[error(
        "corrected pixel {index} out of range (A:{} R:{} G:{} B:{})",
        pixel.alpha, pixel.red, pixel.green, pixel.blue
    )]
    PixelOutOfRange {
        /// Row-major index of the offending pixel.
        index: usize,
        /// The pixel as it was after correction.
        pixel: Pixel,
    },

    /// Joining a path component would exceed the platform path limit.
    #[error("path too long (limit {limit} bytes): {}", path.display())]
    PathTooLong {
        /// The path that was being extended.
        path: PathBuf,
        /// Maximum path length in bytes.
        limit: usize,
    },

    /// A source path could not be inspected or listed.
    #[error("unable to access source ({source}): {}", path.display())]
    Access {
        /// The path that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A file given explicitly is not a recognized source image.
    #[error("not a recognized source image: {}", .0.display())]
    NotAnImage(PathBuf),

    /// A path given explicitly is neither a file nor a directory.
    #[error("unsupported entry type: {}", .0.display())]
    UnsupportedEntry(PathBuf),

    /// The destination exists but cannot be written to.
    #[error("unable to write to {}", .0.display())]
    Destination(PathBuf),

    /// The original was converted but could not be removed afterwards.
    #[error("unable to delete original image ({source}): {}", path.display())]
    DeleteOriginal {
        /// Source path that should have been removed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A pipeline worker stopped before handing back its job.
    #[error("worker failed: {0}")]
    Worker(String),

    /// The conversion worker pool could not be started.
    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
