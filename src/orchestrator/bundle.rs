//! Zip packaging of a finished run.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::error::BundleError;

/// File name of the archive inside a run directory.
pub const BUNDLE_FILE: &str = "bundle.zip";

/// Zip every regular file under `run_dir` into `bundle_path`.
///
/// Entry names are relative to `run_dir` and use `/` separators. The bundle
/// itself is skipped so it can live inside the directory it packages.
/// Calling again replaces the archive.
pub fn build_bundle(run_dir: &Path, bundle_path: &Path) -> Result<(), BundleError> {
    // Collect first so the new (empty) archive never shows up in the walk.
    let mut files = Vec::new();
    for entry in WalkDir::new(run_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() || entry.path() == bundle_path {
            continue;
        }
        files.push(entry.into_path());
    }

    let mut zip = ZipWriter::new(BufWriter::new(File::create(bundle_path)?));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    for path in &files {
        let Ok(relative) = path.strip_prefix(run_dir) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        zip.start_file(name, options)?;
        let mut source = File::open(path)?;
        std::io::copy(&mut source, &mut zip)?;
    }

    let mut writer = zip.finish()?;
    writer.flush()?;

    tracing::debug!(
        bundle = %bundle_path.display(),
        files = files.len(),
        "Bundle written"
    );
    Ok(())
}
