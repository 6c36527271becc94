//! Source discovery and destination naming.
//!
//! Turns a `<src> [<dst>]` pair into a list of [`JobSpec`]s. Directories are
//! walked recursively and mirrored under the destination; every output is
//! named after its source with a `.png` extension.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use image::ImageFormat;

use crate::error::{Error, Result};
use crate::pipeline::JobSpec;

/// Longest path, in bytes, the walker will build.
pub const PATH_MAX: usize = 4096;

/// Extensions accepted as source images, compared case-insensitively.
pub const SOURCE_EXTENSIONS: &[&str] = &["tif", "tiff", "tga", "bmp", "webp", "pict", "pct", "pic"];

/// Join `name` onto `base`, refusing results longer than [`PATH_MAX`].
///
/// # Errors
///
/// Returns [`Error::PathTooLong`] if the joined path would exceed the limit.
pub fn join_checked(base: &Path, name: impl AsRef<Path>) -> Result<PathBuf> {
    let name = name.as_ref();
    let len = base.as_os_str().len() + 1 + name.as_os_str().len();
    if len > PATH_MAX {
        return Err(Error::PathTooLong {
            path: base.to_path_buf(),
            limit: PATH_MAX,
        });
    }
    Ok(base.join(name))
}

/// Check if a file has a source extension.
#[must_use]
pub fn has_source_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            SOURCE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Check the leading bytes of a file for a source format signature.
///
/// PNG is never treated as a source so that outputs are not picked up again.
#[must_use]
pub fn sniff_source(path: &Path) -> bool {
    let mut header = [0u8; 16];
    let Ok(mut file) = fs::File::open(path) else {
        return false;
    };
    let Ok(n) = file.read(&mut header) else {
        return false;
    };
    matches!(
        image::guess_format(&header[..n]),
        Ok(ImageFormat::Tiff | ImageFormat::Bmp | ImageFormat::WebP)
    )
}

/// Whether `path` is a recognized source image, by extension or content.
#[must_use]
pub fn is_source_image(path: &Path) -> bool {
    has_source_extension(path) || sniff_source(path)
}

/// Output file name for a source: its stem with a `.png` extension.
#[must_use]
pub fn png_file_name(source: &Path) -> PathBuf {
    let mut name = source.file_stem().unwrap_or_default().to_os_string();
    name.push(".png");
    PathBuf::from(name)
}

/// Jobs and problems found by a walk.
#[derive(Debug, Default)]
pub struct Walk {
    /// Conversion jobs, in discovery order.
    pub jobs: Vec<JobSpec>,
    /// Problems that did not stop the walk.
    pub errors: Vec<Error>,
}

#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    /// Next to the source.
    Beside,
    /// Inside a directory known to be the destination folder.
    Into(&'a Path),
    /// A path given by the user: a directory, an existing file, or new.
    Given(&'a Path),
}

/// Recursive source finder.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileWalker {
    dry_run: bool,
}

impl FileWalker {
    /// A walker; in dry-run mode no destination folder is created.
    #[must_use]
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Collect jobs for `source`, writing under `destination` if given.
    #[must_use]
    pub fn walk(&self, source: &Path, destination: Option<&Path>) -> Walk {
        let mut out = Walk::default();
        let target = destination.map_or(Target::Beside, Target::Given);
        self.visit(source, target, true, &mut out);
        out
    }

    fn visit(&self, source: &Path, target: Target<'_>, top: bool, out: &mut Walk) {
        let meta = match fs::symlink_metadata(source) {
            Ok(meta) => meta,
            Err(e) => {
                out.errors.push(Error::Access {
                    path: source.to_path_buf(),
                    source: e,
                });
                return;
            }
        };

        if meta.is_dir() {
            if let Err(e) = self.visit_dir(source, target, out) {
                out.errors.push(e);
            }
        } else if meta.is_file() {
            if is_source_image(source) {
                match destination_for(source, target) {
                    Ok(destination) => out.jobs.push(JobSpec {
                        source: source.to_path_buf(),
                        destination,
                    }),
                    Err(e) => out.errors.push(e),
                }
            } else if top {
                out.errors.push(Error::NotAnImage(source.to_path_buf()));
            }
        } else if top {
            out.errors.push(Error::UnsupportedEntry(source.to_path_buf()));
        }
    }

    fn visit_dir(&self, source: &Path, target: Target<'_>, out: &mut Walk) -> Result<()> {
        let dest_dir = match target {
            Target::Beside => source.to_path_buf(),
            Target::Into(dir) | Target::Given(dir) => dir.to_path_buf(),
        };
        match fs::symlink_metadata(&dest_dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(Error::Destination(dest_dir)),
            Err(_) => {
                log::info!("creating destination folder: {}", dest_dir.display());
                if !self.dry_run {
                    fs::create_dir_all(&dest_dir).map_err(|_| Error::Destination(dest_dir.clone()))?;
                }
            }
        }

        let listing = fs::read_dir(source).map_err(|e| Error::Access {
            path: source.to_path_buf(),
            source: e,
        })?;
        let mut entries: Vec<_> = listing.filter_map(std::result::Result::ok).collect();
        entries.sort_by_key(fs::DirEntry::file_name);

        for entry in entries {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let child = match join_checked(source, &name) {
                Ok(p) => p,
                Err(e) => {
                    out.errors.push(e);
                    continue;
                }
            };
            if file_type.is_dir() {
                match join_checked(&dest_dir, &name) {
                    Ok(child_dest) => self.visit(&child, Target::Into(&child_dest), false, out),
                    Err(e) => out.errors.push(e),
                }
            } else if file_type.is_file() {
                self.visit(&child, Target::Into(&dest_dir), false, out);
            }
        }
        Ok(())
    }
}

fn destination_for(source: &Path, target: Target<'_>) -> Result<PathBuf> {
    let name = png_file_name(source);
    let chosen = match target {
        Target::Beside => {
            let parent = source.parent().unwrap_or(Path::new("."));
            join_checked(parent, &name)?
        }
        Target::Into(dir) => join_checked(dir, &name)?,
        Target::Given(path) => match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => join_checked(path, &name)?,
            _ => path.to_path_buf(),
        },
    };
    match fs::symlink_metadata(&chosen) {
        Ok(meta) if !meta.is_file() => Err(Error::Destination(chosen)),
        _ => Ok(chosen),
    }
}
