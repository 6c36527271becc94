//! Detect premultiplied alpha and restore straight alpha while converting
//! images to PNG.
//!
//! Some tools store translucent pixels already composited over a solid
//! background color (associated, or premultiplied, alpha). This crate finds
//! that background from the color of fully transparent pixels, checks
//! whether every translucent pixel is consistent with premultiplication over
//! it, and if so inverts the compositing equation to recover the original
//! colors.
//!
//! # Quick Start
//!
//! ```no_run
//! use straight_alpha::{convert, ConversionOptions, ImageCodec, PngCodec};
//!
//! let mut image = PngCodec.decode("logo.tif".as_ref()).expect("failed to decode");
//! let result = convert(&mut image.buffer, image.has_alpha, &ConversionOptions::default());
//! println!("alpha: {:?}, background: {:?}", result.alpha_type, result.background_kind);
//! PngCodec
//!     .encode(&image.buffer, image.has_alpha, "logo.png".as_ref())
//!     .expect("failed to encode");
//! ```
//!
//! # Batch conversion
//!
//! [`JobPipeline`] runs many conversions concurrently while bounding how
//! many decoded images are held in memory at once.
//!
//! ```no_run
//! use straight_alpha::{
//!     ConversionOptions, FileWalker, JobPipeline, PipelineConfig, PngCodec,
//! };
//!
//! # async fn run() -> straight_alpha::Result<()> {
//! let walk = FileWalker::new(false).walk("scans".as_ref(), Some("converted".as_ref()));
//! let mut pipeline = JobPipeline::new(
//!     PngCodec,
//!     ConversionOptions::default(),
//!     &PipelineConfig::default(),
//!     |report| println!("{}", report.source.display()),
//!     |summary| println!("{} converted", summary.converted),
//! )?;
//! for job in walk.jobs {
//!     pipeline.submit(job).await?;
//! }
//! let summary = pipeline.finish().await;
//! std::process::exit(summary.exit_code());
//! # }
//! ```

#![deny(missing_docs)]

pub mod background;
pub mod classify;
pub mod codec;
mod convert;
pub mod error;
pub mod pipeline;
pub mod pixel;
pub mod unpremultiply;
pub mod walk;

pub use background::{detect_background, BackgroundCandidate, BackgroundKind, BackgroundScan};
pub use classify::{classify, AlphaType, AnalysisConfig};
pub use codec::{DecodedImage, ImageCodec, PngCodec};
pub use convert::{convert, ConversionOptions, ConversionResult, Outcome};
pub use error::{Error, Result};
pub use pipeline::{
    AdmissionGate, JobPipeline, JobReport, JobSpec, JobState, PipelineConfig, Summary,
};
pub use pixel::{Pixel, PixelBuffer, Rgb, SamplePrecision};
pub use unpremultiply::unpremultiply;
pub use walk::{FileWalker, Walk};
