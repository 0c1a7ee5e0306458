//! Track directory resolution and validation.
//!
//! The tool's output-naming convention is not perfectly predictable across
//! versions, so resolution is two-stage: the directory named after the input
//! base name, then — only when that is absent — the sole subdirectory of the
//! output tree. Zero or multiple candidates without an exact match is a hard
//! failure rather than a guess.

use std::fs;
use std::path::Path;

use tracing::warn;
use walkdir::WalkDir;

use crate::error::{JobError, JobResult};
use crate::model::TrackSet;

/// Extensions recognised as separated track output.
pub const TRACK_EXTENSIONS: &[&str] = &["wav", "mp3", "flac"];

/// Outcome of track resolution, noting whether the fallback path was taken.
#[derive(Debug)]
pub struct Resolution {
    /// The validated track set.
    pub tracks: TrackSet,
    /// True when the sole-subdirectory fallback located the directory.
    pub fallback: bool,
}

/// Locate and validate the track directory produced under `output_dir`.
///
/// # Errors
///
/// Returns [`JobError::OutputNotFound`] when no candidate directory exists,
/// [`JobError::NoTracksProduced`] when the located directory holds no
/// recognised audio files, and [`JobError::Resource`]/[`JobError::Walkdir`]
/// on traversal failures.
pub fn resolve(output_dir: &Path, expected_name: &str) -> JobResult<Resolution> {
    let expected = output_dir.join(expected_name);
    let (track_dir, fallback) = if expected.is_dir() {
        (expected, false)
    } else {
        let candidates = subdirectories(output_dir)?;
        match candidates.as_slice() {
            [sole] => {
                warn!(
                    expected = %expected.display(),
                    actual = %sole.display(),
                    "expected track directory absent; using sole subdirectory"
                );
                (sole.clone(), true)
            }
            _ => {
                return Err(JobError::OutputNotFound {
                    expected,
                    candidates: candidates.len(),
                });
            }
        }
    };

    let files = track_files(&track_dir)?;
    if files.is_empty() {
        return Err(JobError::NoTracksProduced { track_dir });
    }

    Ok(Resolution {
        tracks: TrackSet {
            dir: track_dir,
            files,
        },
        fallback,
    })
}

fn subdirectories(output_dir: &Path) -> JobResult<Vec<std::path::PathBuf>> {
    let entries = fs::read_dir(output_dir)
        .map_err(|source| JobError::resource("resolver.read_dir", output_dir, source))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|source| JobError::resource("resolver.read_dir", output_dir, source))?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn track_files(track_dir: &Path) -> JobResult<Vec<std::path::PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(track_dir).sort_by_file_name() {
        let entry =
            entry.map_err(|source| JobError::walkdir("resolver.enumerate", track_dir, source))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let recognised = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                TRACK_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            });
        if recognised {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}
