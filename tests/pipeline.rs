use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use straight_alpha::{
    AlphaType, BackgroundKind, ConversionOptions, DecodedImage, Error, FileWalker, ImageCodec,
    JobPipeline, JobReport, JobSpec, JobState, Outcome, Pixel, PipelineConfig, PixelBuffer,
    PngCodec, Summary,
};

/// Serves decoded images from memory and records what it was asked to write.
struct MemoryCodec {
    images: HashMap<PathBuf, DecodedImage>,
    delay: Duration,
    encoded: Arc<Mutex<Vec<PathBuf>>>,
}

impl MemoryCodec {
    fn new(delay: Duration) -> Self {
        Self {
            images: HashMap::new(),
            delay,
            encoded: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn insert(&mut self, name: &str, image: DecodedImage) -> JobSpec {
        let source = PathBuf::from(format!("{name}.tif"));
        self.images.insert(source.clone(), image);
        JobSpec {
            destination: source.with_extension("png"),
            source,
        }
    }
}

impl ImageCodec for MemoryCodec {
    fn decode(&self, path: &Path) -> straight_alpha::Result<DecodedImage> {
        std::thread::sleep(self.delay);
        self.images
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotAnImage(path.to_path_buf()))
    }

    fn encode(&self, buffer: &PixelBuffer, _has_alpha: bool, path: &Path) -> straight_alpha::Result<u64> {
        self.encoded.lock().unwrap().push(path.to_path_buf());
        Ok(buffer.pixels().len() as u64 * 4)
    }
}

/// Premultiplied over white: one transparent white pixel and one pixel at
/// half coverage.
fn over_white() -> DecodedImage {
    let mut buffer = PixelBuffer::filled(2, 1, Pixel::new(0.0, 1.0, 1.0, 1.0));
    buffer.set(1, 0, Pixel::new(0.5, 1.0, 0.5, 0.5));
    DecodedImage {
        has_alpha: true,
        buffer,
    }
}

/// Opaque except for a transparent magenta corner.
fn odd_background() -> DecodedImage {
    let mut buffer = PixelBuffer::filled(2, 2, Pixel::new(1.0, 0.2, 0.3, 0.4));
    buffer.set(0, 0, Pixel::new(0.0, 1.0, 0.0, 1.0));
    DecodedImage {
        has_alpha: true,
        buffer,
    }
}

type Collected = (Arc<Mutex<Vec<JobReport>>>, Arc<AtomicUsize>, Arc<Mutex<Option<Summary>>>);

fn start<C: ImageCodec + 'static>(
    codec: C,
    options: ConversionOptions,
    config: &PipelineConfig,
) -> (JobPipeline<C>, Collected) {
    let reports = Arc::new(Mutex::new(Vec::new()));
    let completions = Arc::new(AtomicUsize::new(0));
    let last = Arc::new(Mutex::new(None));

    let sink = Arc::clone(&reports);
    let count = Arc::clone(&completions);
    let seen = Arc::clone(&last);
    let pipeline = JobPipeline::new(
        codec,
        options,
        config,
        move |report| sink.lock().unwrap().push(report.clone()),
        move |summary| {
            count.fetch_add(1, Ordering::SeqCst);
            *seen.lock().unwrap() = Some(summary.clone());
        },
    )
    .unwrap();
    (pipeline, (reports, completions, last))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn admission_gate_bounds_resident_images() {
    let mut codec = MemoryCodec::new(Duration::from_millis(20));
    let jobs: Vec<_> = (0..12)
        .map(|i| codec.insert(&format!("img{i}"), over_white()))
        .collect();
    let config = PipelineConfig {
        max_in_flight: 3,
        convert_threads: Some(2),
        serialize_saves: false,
    };
    let (mut pipeline, (reports, completions, _)) =
        start(codec, ConversionOptions::default(), &config);

    for job in jobs {
        pipeline.submit(job).await.unwrap();
    }
    let gate = pipeline.gate().clone();
    let summary = pipeline.finish().await;

    assert!(gate.peak() <= 3, "peak {} exceeded the gate", gate.peak());
    assert!(gate.peak() >= 1);
    assert_eq!(gate.in_use(), 0);
    assert_eq!(summary.finished, 12);
    assert_eq!(summary.converted + summary.skipped, 12);
    assert_eq!(summary.associated_white, 12);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert_eq!(reports.lock().unwrap().len(), 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failures_stay_with_their_job() {
    let mut codec = MemoryCodec::new(Duration::ZERO);
    let good = codec.insert("good", over_white());
    let odd = codec.insert("odd", odd_background());
    let missing = JobSpec {
        source: PathBuf::from("missing.tif"),
        destination: PathBuf::from("missing.png"),
    };
    let encoded = Arc::clone(&codec.encoded);
    let (mut pipeline, (reports, completions, last)) =
        start(codec, ConversionOptions::default(), &PipelineConfig::default());

    for job in [good, missing, odd] {
        pipeline.submit(job).await.unwrap();
    }
    let summary = pipeline.finish().await;

    assert_eq!(summary.finished, 3);
    assert_eq!(summary.converted, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.exit_code(), 2);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert_eq!(last.lock().unwrap().as_ref(), Some(&summary));

    let reports = reports.lock().unwrap();
    let by_name = |name: &str| {
        reports
            .iter()
            .find(|r| r.source == Path::new(name))
            .unwrap()
            .clone()
    };

    let missing = by_name("missing.tif");
    assert!(missing.failed());
    assert_eq!(
        missing.trail,
        [JobState::Created, JobState::Loading, JobState::Failed, JobState::Finished]
    );
    assert!(missing.result.message.as_deref().unwrap().contains("missing.tif"));

    let odd = by_name("odd.tif");
    assert_eq!(odd.result.outcome, Outcome::Warning);
    assert!(odd.trail.contains(&JobState::Warned));
    assert_eq!(odd.trail.last(), Some(&JobState::Finished));
    assert!(odd.bytes_written.is_some());

    let good = by_name("good.tif");
    assert_eq!(good.result.outcome, Outcome::Ok);
    assert_eq!(good.result.alpha_type, AlphaType::Associated);
    assert_eq!(good.result.background_kind, BackgroundKind::White);
    assert_eq!(
        good.trail,
        [
            JobState::Created,
            JobState::Loading,
            JobState::Loaded,
            JobState::Converting,
            JobState::Converted,
            JobState::Saving,
            JobState::Saved,
            JobState::Finished,
        ]
    );

    let mut written = encoded.lock().unwrap().clone();
    written.sort();
    assert_eq!(written, [PathBuf::from("good.png"), PathBuf::from("odd.png")]);
}

#[tokio::test]
async fn dry_run_never_saves() {
    let mut codec = MemoryCodec::new(Duration::ZERO);
    let job = codec.insert("plain", over_white());
    let encoded = Arc::clone(&codec.encoded);
    let options = ConversionOptions {
        dry_run: true,
        ..ConversionOptions::default()
    };
    let (mut pipeline, (reports, _, _)) = start(codec, options, &PipelineConfig::default());

    pipeline.submit(job).await.unwrap();
    assert_eq!(pipeline.submitted(), 1);
    let summary = pipeline.finish().await;

    assert_eq!(summary.converted, 1);
    assert!(encoded.lock().unwrap().is_empty());
    let reports = reports.lock().unwrap();
    assert!(!reports[0].trail.contains(&JobState::Saving));
    assert_eq!(reports[0].bytes_written, None);
}

#[tokio::test]
async fn empty_run_still_completes_once() {
    let codec = MemoryCodec::new(Duration::ZERO);
    let (pipeline, (_, completions, last)) =
        start(codec, ConversionOptions::default(), &PipelineConfig::default());

    let summary = pipeline.finish().await;
    assert_eq!(summary, Summary::default());
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert!(last.lock().unwrap().is_some());
}

fn write_premultiplied_tiff(path: &Path) {
    let mut img = RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 0]));
    img.put_pixel(1, 1, Rgba([254, 130, 130, 128]));
    DynamicImage::ImageRgba8(img)
        .save_with_format(path, ImageFormat::Tiff)
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn directory_converts_to_straight_alpha_png() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    std::fs::create_dir(src.path().join("nested")).unwrap();
    write_premultiplied_tiff(&src.path().join("top.tif"));
    write_premultiplied_tiff(&src.path().join("nested").join("inner.tiff"));
    std::fs::write(src.path().join("notes.txt"), "not an image").unwrap();

    let out = dst.path().join("out");
    let walk = FileWalker::new(false).walk(src.path(), Some(&out));
    assert!(walk.errors.is_empty(), "{:?}", walk.errors);
    assert_eq!(walk.jobs.len(), 2);

    let options = ConversionOptions {
        delete_original: true,
        ..ConversionOptions::default()
    };
    let (mut pipeline, (reports, _, _)) = start(PngCodec, options, &PipelineConfig::default());
    for job in walk.jobs {
        pipeline.submit(job).await.unwrap();
    }
    let summary = pipeline.finish().await;

    assert_eq!(summary.converted, 2, "{:?}", reports.lock().unwrap());
    assert_eq!(summary.associated_white, 2);

    let top = out.join("top.png");
    let inner = out.join("nested").join("inner.png");
    assert!(!src.path().join("top.tif").exists());
    assert!(!src.path().join("nested").join("inner.tiff").exists());
    assert!(src.path().join("notes.txt").exists());

    let decoded = PngCodec.decode(&top).unwrap();
    assert!(decoded.has_alpha);
    assert_eq!(decoded.buffer.get(1, 1).to_argb8(), [128, 253, 6, 6]);
    assert_eq!(decoded.buffer.get(0, 0).alpha, 0.0);
    assert!(PngCodec.decode(&inner).is_ok());
}

#[tokio::test]
async fn keeps_original_when_destination_is_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("same.png");
    PngCodec
        .encode(&over_white().buffer, true, &path)
        .unwrap();

    let options = ConversionOptions {
        delete_original: true,
        ..ConversionOptions::default()
    };
    let (mut pipeline, _) = start(PngCodec, options, &PipelineConfig::default());
    pipeline
        .submit(JobSpec {
            source: path.clone(),
            destination: path.clone(),
        })
        .await
        .unwrap();
    let summary = pipeline.finish().await;

    assert_eq!(summary.converted, 1);
    assert!(path.exists());
}
