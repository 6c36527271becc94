use std::path::{Path, PathBuf};
use std::process;

use clap::error::ErrorKind;
use clap::Parser;

use straight_alpha::pipeline::DEFAULT_MAX_IN_FLIGHT;
use straight_alpha::{
    AlphaType, AnalysisConfig, BackgroundKind, ConversionOptions, FileWalker, JobPipeline,
    JobReport, PipelineConfig, PngCodec, Summary,
};

#[derive(Parser)]
#[command(
    name = "straight-alpha",
    about = "Convert images to PNG, restoring straight alpha from premultiplied sources",
    version,
    after_help = "Simple usage: straight-alpha <image>  (writes <image>.png next to it)\n\n\
                  Directories are converted recursively and mirrored under <dst>.\n\
                  Exit status: 0 all converted, 1 usage error, 2 some images failed."
)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Source image file or directory
    src: PathBuf,

    /// Destination file or directory (default: next to the source)
    dst: Option<PathBuf>,

    /// Required share of transparent pixels agreeing on the background (0 < r <= 1)
    #[arg(short = 'b', long = "bkgnd-ratio", value_name = "R", default_value_t = 0.8, value_parser = parse_ratio)]
    bkgnd_ratio: f64,

    /// Delete original images after a successful conversion (use with caution)
    #[arg(short, long)]
    delete: bool,

    /// Convert images even when the background looks wrong
    #[arg(short, long)]
    force: bool,

    /// Do not show the summary at the end
    #[arg(short, long)]
    quiet: bool,

    /// Report every converted image
    #[arg(short, long)]
    verbose: bool,

    /// Analyze and convert, but write nothing to disk
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Maximum number of decoded images held in memory at once
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_IN_FLIGHT)]
    max_in_flight: usize,

    /// Analyze on the 8-bit sample grid instead of floats
    #[arg(long)]
    integer: bool,

    /// Tolerance band for rounding noise (default 1/255)
    #[arg(long, value_name = "E")]
    tolerance: Option<f32>,
}

fn parse_ratio(s: &str) -> Result<f64, String> {
    let r: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if r > 0.0 && r <= 1.0 {
        Ok(r)
    } else {
        Err(format!("background ratio out of range (0 < r <= 1): {r}"))
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                e.exit();
            }
            let _ = e.print();
            process::exit(1);
        }
    };

    init_logging(cli.verbose);

    if !cli.src.exists() {
        eprintln!("Error: Source not found: '{}'", cli.src.display());
        process::exit(1);
    }
    if let Some(dst) = &cli.dst {
        let parent = dst.parent().filter(|p| !p.as_os_str().is_empty());
        if !dst.exists() && parent.is_some_and(|p| !p.is_dir()) {
            eprintln!(
                "Error: Destination not found: '{}'",
                parent.unwrap_or(Path::new(".")).display()
            );
            process::exit(1);
        }
    }

    let mut analysis = if cli.integer {
        AnalysisConfig::integer8()
    } else {
        AnalysisConfig::default()
    };
    if let Some(tolerance) = cli.tolerance {
        analysis.tolerance = tolerance;
    }

    let options = ConversionOptions {
        verbose: cli.verbose,
        quiet: cli.quiet,
        dry_run: cli.dry_run,
        force: cli.force,
        delete_original: cli.delete,
        background_ratio_threshold: cli.bkgnd_ratio,
        analysis,
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .thread_name("straight-alpha-io")
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Fatal: Failed to start runtime: {e}");
            process::exit(2);
        }
    };

    let code = runtime.block_on(run(&cli, options));
    process::exit(code);
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

async fn run(cli: &Cli, options: ConversionOptions) -> i32 {
    let walk = FileWalker::new(options.dry_run).walk(&cli.src, cli.dst.as_deref());
    let mut failed = !walk.errors.is_empty();
    for e in &walk.errors {
        eprintln!("{e}");
    }

    let config = PipelineConfig {
        max_in_flight: cli.max_in_flight,
        ..PipelineConfig::default()
    };
    let report_opts = options.clone();
    let summary_opts = options.clone();
    let mut pipeline = match JobPipeline::new(
        PngCodec,
        options,
        &config,
        move |report| print_report(report, &report_opts),
        move |summary| print_summary(summary, &summary_opts),
    ) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Fatal: {e}");
            return 2;
        }
    };

    for job in walk.jobs {
        if let Err(e) = pipeline.submit(job).await {
            eprintln!("{e}");
            failed = true;
        }
    }

    let summary = pipeline.finish().await;
    if failed {
        2
    } else {
        summary.exit_code()
    }
}

/// A job message followed by its source, unless the message already ends
/// with that path.
fn job_line(message: &str, source: &Path) -> String {
    let source = source.display().to_string();
    if message.ends_with(&source) {
        message.to_string()
    } else {
        format!("{message}: {source}")
    }
}

fn print_report(report: &JobReport, opts: &ConversionOptions) {
    if let Some(message) = &report.result.message {
        let line = job_line(message, &report.source);
        if report.failed() {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }

    if report.failed() || !opts.verbose {
        return;
    }

    let result = &report.result;
    let kind = match result.alpha_type {
        AlphaType::None => "no".to_string(),
        AlphaType::Unassociated => "unassociated".to_string(),
        AlphaType::Unknown => "unknown".to_string(),
        AlphaType::Associated => match result.background_kind {
            BackgroundKind::Black => "associated BLACK".to_string(),
            BackgroundKind::White => "associated WHITE".to_string(),
            BackgroundKind::Other | BackgroundKind::None => {
                let [r, g, b] = result.background_color.to_rgb8();
                format!("associated ({r} {g} {b})")
            }
        },
    };
    println!(
        "converted image with {kind} alpha channel: {} to {}",
        report.source.display(),
        report.destination.display()
    );
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn print_summary(summary: &Summary, opts: &ConversionOptions) {
    if opts.quiet {
        return;
    }

    print!(
        "\nstraight-alpha: {} image{} converted",
        summary.converted,
        plural(summary.converted)
    );
    if summary.skipped > 0 {
        print!(", {} image{} skipped", summary.skipped, plural(summary.skipped));
    }
    println!();

    let lines = [
        (summary.alpha_none, "with no alpha channel"),
        (summary.alpha_unassociated, "with an unassociated alpha channel"),
        (summary.alpha_unknown, "with an undetermined alpha channel"),
        (
            summary.associated_black,
            "with an associated alpha channel and black background",
        ),
        (
            summary.associated_white,
            "with an associated alpha channel and white background",
        ),
        (
            summary.associated_other,
            "with an associated alpha channel and other background",
        ),
    ];
    for (count, what) in lines {
        if count > 0 {
            println!("          {count} image{} {what}", plural(count));
        }
    }

    if opts.dry_run {
        println!("          The 'dry run' option prevented any changes from being written to disk.");
    } else if opts.delete_original {
        println!("          The original files were deleted after a successful image conversion.");
    }
}
