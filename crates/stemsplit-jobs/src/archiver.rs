//! Delivery archive construction.
//!
//! One zip per job, written at a deterministic path inside the workspace.
//! Entry names are relative to the track directory and restricted to normal
//! path components, so the archive can never smuggle absolute paths or
//! parent-directory traversal.

use std::fs::File;
use std::io;
use std::path::{Component, Path};

use tracing::debug;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{JobError, JobResult};
use crate::model::TrackSet;

/// Write all track files into a deflate-compressed zip at `destination`.
///
/// Returns the archive size in bytes. An archive that ends up missing or
/// empty is treated as a failure even when every write call succeeded.
///
/// # Errors
///
/// Returns [`JobError::ArchiveWrite`] on any I/O or encoding failure.
pub fn archive(destination: &Path, tracks: &TrackSet) -> JobResult<u64> {
    let file = File::create(destination)
        .map_err(|source| JobError::archive("archive.create", destination, ZipError::Io(source)))?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for track in &tracks.files {
        let entry_name = relative_entry_name(&tracks.dir, track)?;
        writer
            .start_file(entry_name, options)
            .map_err(|source| JobError::archive("archive.entry", track, source))?;
        let mut input = File::open(track)
            .map_err(|source| JobError::archive("archive.read", track, ZipError::Io(source)))?;
        io::copy(&mut input, &mut writer)
            .map_err(|source| JobError::archive("archive.copy", track, ZipError::Io(source)))?;
    }

    writer
        .finish()
        .map_err(|source| JobError::archive("archive.finish", destination, source))?;

    let metadata = std::fs::metadata(destination)
        .map_err(|source| JobError::archive("archive.verify", destination, ZipError::Io(source)))?;
    if metadata.len() == 0 {
        return Err(JobError::archive(
            "archive.verify",
            destination,
            ZipError::Io(io::Error::other("archive is empty")),
        ));
    }

    debug!(
        path = %destination.display(),
        bytes = metadata.len(),
        entries = tracks.files.len(),
        "archive written"
    );
    Ok(metadata.len())
}

/// Entry name for `track` relative to `track_dir`, using `/` separators and
/// refusing anything but normal components.
fn relative_entry_name(track_dir: &Path, track: &Path) -> JobResult<String> {
    let relative = track.strip_prefix(track_dir).map_err(|_| {
        JobError::archive(
            "archive.relativize",
            track,
            ZipError::Io(io::Error::other("track escapes the track directory")),
        )
    })?;

    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => {
                return Err(JobError::archive(
                    "archive.relativize",
                    track,
                    ZipError::Io(io::Error::other("track path contains invalid segments")),
                ));
            }
        }
    }
    Ok(segments.join("/"))
}
