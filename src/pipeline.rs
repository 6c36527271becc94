//! Concurrent job pipeline: Load, Convert, Save, Finish.
//!
//! Each submitted image becomes a job that walks an explicit state machine.
//! Decoding and disk writes run on Tokio's blocking pool, analysis runs on a
//! dedicated rayon pool, and every finished job reports to a single
//! completion task that owns the aggregate [`Summary`].
//!
//! An [`AdmissionGate`] caps how many jobs may hold a decoded image at once.
//! A job takes its pass right before loading and gives it back at Finish, so
//! the cap bounds peak memory no matter how many jobs are queued.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::background::BackgroundKind;
use crate::classify::AlphaType;
use crate::codec::{DecodedImage, ImageCodec};
use crate::convert::{convert, ConversionOptions, ConversionResult, Outcome};
use crate::error::{Error, Result};

/// Default number of jobs allowed to hold a decoded image at once.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;

/// Scheduling knobs for [`JobPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Admission gate capacity.
    pub max_in_flight: usize,
    /// Worker threads for conversion; `None` lets rayon decide.
    pub convert_threads: Option<usize>,
    /// Write outputs one at a time.
    pub serialize_saves: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            convert_threads: None,
            serialize_saves: true,
        }
    }
}

/// One source-to-destination conversion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Image to read.
    pub source: PathBuf,
    /// PNG to write.
    pub destination: PathBuf,
}

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Admitted, nothing done yet.
    Created,
    /// Decoding the source.
    Loading,
    /// Source decoded.
    Loaded,
    /// Analysis in progress.
    Converting,
    /// Analysis finished cleanly.
    Converted,
    /// Analysis finished with a warning.
    Warned,
    /// Writing the destination.
    Saving,
    /// Destination written.
    Saved,
    /// A stage failed; the job will not continue.
    Failed,
    /// Resources released and result reported.
    Finished,
}

impl JobState {
    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        use JobState::{
            Converted, Converting, Created, Failed, Finished, Loaded, Loading, Saved, Saving,
            Warned,
        };
        matches!(
            (self, next),
            (Created, Loading)
                | (Loading, Loaded | Failed)
                | (Loaded, Converting)
                | (Converting, Converted | Warned | Failed)
                | (Converted | Warned, Saving | Finished)
                | (Saving, Saved | Failed)
                | (Saved | Failed, Finished)
        )
    }
}

/// What a finished job hands to the completion task.
#[derive(Debug, Clone)]
pub struct JobReport {
    /// Source path.
    pub source: PathBuf,
    /// Destination path.
    pub destination: PathBuf,
    /// Conversion result, including any message.
    pub result: ConversionResult,
    /// Every state the job passed through, in order.
    pub trail: Vec<JobState>,
    /// Bytes written, if the job reached Saved.
    pub bytes_written: Option<u64>,
}

impl JobReport {
    /// Whether the job failed and was skipped.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.result.is_error()
    }
}

/// Aggregate counters over every finished job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    /// Jobs that reached Finished.
    pub finished: usize,
    /// Jobs that completed with OK or a warning.
    pub converted: usize,
    /// Jobs that failed.
    pub skipped: usize,
    /// Converted images without an alpha channel.
    pub alpha_none: usize,
    /// Converted images with straight alpha.
    pub alpha_unassociated: usize,
    /// Converted images whose alpha type could not be determined.
    pub alpha_unknown: usize,
    /// Converted images premultiplied over black.
    pub associated_black: usize,
    /// Converted images premultiplied over white.
    pub associated_white: usize,
    /// Converted images premultiplied over another color.
    pub associated_other: usize,
}

impl Summary {
    fn record(&mut self, report: &JobReport) {
        self.finished += 1;
        if report.failed() {
            self.skipped += 1;
            return;
        }
        self.converted += 1;
        match (report.result.alpha_type, report.result.background_kind) {
            (AlphaType::None, _) => self.alpha_none += 1,
            (AlphaType::Unassociated, _) => self.alpha_unassociated += 1,
            (AlphaType::Unknown, _) => self.alpha_unknown += 1,
            (AlphaType::Associated, BackgroundKind::Black) => self.associated_black += 1,
            (AlphaType::Associated, BackgroundKind::White) => self.associated_white += 1,
            (AlphaType::Associated, BackgroundKind::Other | BackgroundKind::None) => {
                self.associated_other += 1;
            }
        }
    }

    /// Process exit status: 0 when nothing failed, 2 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.skipped == 0 {
            0
        } else {
            2
        }
    }
}

/// Counting gate bounding how many jobs hold a decoded image.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_use: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl AdmissionGate {
    /// A gate with `capacity` passes; a capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_use: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a free pass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Worker`] if the gate was closed.
    pub async fn admit(&self) -> Result<GatePass> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| Error::Worker(e.to_string()))?;
        let now = self.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Ok(GatePass {
            in_use: Arc::clone(&self.in_use),
            _permit: permit,
        })
    }

    /// Total number of passes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Passes currently held.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Highest number of passes ever held at once.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// A held admission pass, returned to the gate on drop.
#[derive(Debug)]
pub struct GatePass {
    in_use: Arc<AtomicUsize>,
    // Declared last so the counter drops before the permit is released.
    _permit: OwnedSemaphorePermit,
}

impl Drop for GatePass {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Shared<C> {
    codec: Arc<C>,
    options: Arc<ConversionOptions>,
    cpu: rayon::ThreadPool,
    save_lock: Option<Mutex<()>>,
}

struct Job {
    spec: JobSpec,
    state: JobState,
    trail: Vec<JobState>,
    image: Option<DecodedImage>,
    result: ConversionResult,
    bytes_written: Option<u64>,
    pass: GatePass,
}

impl Job {
    fn new(spec: JobSpec, pass: GatePass) -> Self {
        Self {
            spec,
            state: JobState::Created,
            trail: vec![JobState::Created],
            image: None,
            result: ConversionResult::default(),
            bytes_written: None,
            pass,
        }
    }

    fn advance(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {next:?}",
            self.state
        );
        log::debug!(
            "{}: {:?} -> {next:?}",
            self.spec.source.display(),
            self.state
        );
        self.state = next;
        self.trail.push(next);
    }

    fn fail(&mut self, err: &Error) {
        self.result.fail(err);
        self.advance(JobState::Failed);
    }

    fn take_image(&mut self) -> Result<DecodedImage> {
        self.image
            .take()
            .ok_or_else(|| Error::Worker(format!("no image held in {:?}", self.state)))
    }

    /// Release the image and the admission pass, then build the report.
    fn finish(mut self) -> JobReport {
        self.advance(JobState::Finished);
        let Self {
            spec,
            trail,
            image,
            result,
            bytes_written,
            pass,
            ..
        } = self;
        drop(image);
        drop(pass);
        JobReport {
            source: spec.source,
            destination: spec.destination,
            result,
            trail,
            bytes_written,
        }
    }
}

/// Drives jobs through Load, Convert, Save and Finish.
///
/// Must be created and used from within a Tokio runtime.
pub struct JobPipeline<C> {
    shared: Arc<Shared<C>>,
    gate: AdmissionGate,
    reports: mpsc::UnboundedSender<JobReport>,
    completion: JoinHandle<Summary>,
    submitted: usize,
}

impl<C: ImageCodec + 'static> JobPipeline<C> {
    /// Start a pipeline.
    ///
    /// `on_report` runs once per finished job and `on_complete` runs exactly
    /// once after the last job has finished, both on the single completion
    /// task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ThreadPool`] if the conversion pool cannot start.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new<R, S>(
        codec: C,
        options: ConversionOptions,
        config: &PipelineConfig,
        mut on_report: R,
        on_complete: S,
    ) -> Result<Self>
    where
        R: FnMut(&JobReport) + Send + 'static,
        S: FnOnce(&Summary) + Send + 'static,
    {
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|i| format!("straight-alpha-convert-{i}"));
        if let Some(n) = config.convert_threads {
            builder = builder.num_threads(n);
        }
        let shared = Arc::new(Shared {
            codec: Arc::new(codec),
            options: Arc::new(options),
            cpu: builder.build()?,
            save_lock: if config.serialize_saves {
                Some(Mutex::new(()))
            } else {
                None
            },
        });

        let (reports, mut inbox) = mpsc::unbounded_channel::<JobReport>();
        let completion = tokio::spawn(async move {
            let mut summary = Summary::default();
            while let Some(report) = inbox.recv().await {
                on_report(&report);
                summary.record(&report);
            }
            on_complete(&summary);
            summary
        });

        Ok(Self {
            shared,
            gate: AdmissionGate::new(config.max_in_flight),
            reports,
            completion,
            submitted: 0,
        })
    }

    /// Submit a job, waiting for an admission pass first.
    ///
    /// This is the pipeline's only point of backpressure; once admitted the
    /// job runs on its own and this returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Worker`] if the admission gate was closed.
    pub async fn submit(&mut self, spec: JobSpec) -> Result<()> {
        let pass = self.gate.admit().await?;
        self.submitted += 1;
        let job = Job::new(spec, pass);
        let shared = Arc::clone(&self.shared);
        let reports = self.reports.clone();
        tokio::spawn(async move {
            let report = run(job, &shared).await;
            // The receiver outlives every sender.
            let _ = reports.send(report);
        });
        Ok(())
    }

    /// Number of jobs submitted so far.
    #[must_use]
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// The admission gate, for inspection.
    #[must_use]
    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Stop accepting jobs and wait for every submitted job to finish.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from the `on_report` or `on_complete` callbacks.
    pub async fn finish(self) -> Summary {
        let Self {
            reports,
            completion,
            ..
        } = self;
        drop(reports);
        match completion.await {
            Ok(summary) => summary,
            Err(e) => panic::resume_unwind(e.into_panic()),
        }
    }
}

async fn run<C: ImageCodec + 'static>(mut job: Job, shared: &Arc<Shared<C>>) -> JobReport {
    loop {
        match job.state {
            JobState::Created => load(&mut job, shared).await,
            JobState::Loaded => convert_image(&mut job, shared).await,
            JobState::Converted | JobState::Warned => {
                if shared.options.dry_run {
                    break;
                }
                save(&mut job, shared).await;
            }
            JobState::Saved | JobState::Failed => break,
            JobState::Loading
            | JobState::Converting
            | JobState::Saving
            | JobState::Finished => {
                unreachable!("{:?} is resolved by its stage", job.state)
            }
        }
    }
    job.finish()
}

async fn load<C: ImageCodec + 'static>(job: &mut Job, shared: &Arc<Shared<C>>) {
    job.advance(JobState::Loading);
    let codec = Arc::clone(&shared.codec);
    let source = job.spec.source.clone();
    match tokio::task::spawn_blocking(move || codec.decode(&source)).await {
        Ok(Ok(image)) => {
            job.image = Some(image);
            job.advance(JobState::Loaded);
        }
        Ok(Err(e)) => job.fail(&e),
        Err(e) => job.fail(&Error::Worker(e.to_string())),
    }
}

async fn convert_image<C>(job: &mut Job, shared: &Arc<Shared<C>>) {
    job.advance(JobState::Converting);
    let mut image = match job.take_image() {
        Ok(image) => image,
        Err(e) => return job.fail(&e),
    };

    let (tx, rx) = oneshot::channel();
    let options = Arc::clone(&shared.options);
    shared.cpu.spawn(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            convert(&mut image.buffer, image.has_alpha, &options)
        }));
        let _ = tx.send(outcome.map(|result| (image, result)));
    });

    match rx.await {
        Ok(Ok((image, result))) => {
            let next = match result.outcome {
                Outcome::Ok => JobState::Converted,
                Outcome::Warning => JobState::Warned,
                Outcome::Error => JobState::Failed,
            };
            job.image = Some(image);
            job.result = result;
            job.advance(next);
        }
        Ok(Err(_)) => job.fail(&Error::Worker("conversion panicked".to_string())),
        Err(e) => job.fail(&Error::Worker(e.to_string())),
    }
}

async fn save<C: ImageCodec + 'static>(job: &mut Job, shared: &Arc<Shared<C>>) {
    job.advance(JobState::Saving);
    let image = match job.take_image() {
        Ok(image) => image,
        Err(e) => return job.fail(&e),
    };

    let _serial = match &shared.save_lock {
        Some(lock) => Some(lock.lock().await),
        None => None,
    };
    let codec = Arc::clone(&shared.codec);
    let spec = job.spec.clone();
    let delete_original = shared.options.delete_original;
    let written = tokio::task::spawn_blocking(move || {
        let written = codec
            .encode(&image.buffer, image.has_alpha, &spec.destination)
            .and_then(|n| {
                if delete_original && spec.source != spec.destination {
                    std::fs::remove_file(&spec.source).map_err(|source| {
                        Error::DeleteOriginal {
                            path: spec.source.clone(),
                            source,
                        }
                    })?;
                }
                Ok(n)
            });
        (image, written)
    })
    .await;

    match written {
        Ok((image, Ok(n))) => {
            job.image = Some(image);
            job.bytes_written = Some(n);
            job.advance(JobState::Saved);
        }
        Ok((_, Err(e))) => job.fail(&e),
        Err(e) => job.fail(&Error::Worker(e.to_string())),
    }
}
