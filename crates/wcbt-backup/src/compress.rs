use std::fs::File;
use std::io::{BufReader, Read as _, Write as _};
use std::path::{Path, PathBuf};

use tracing::info;
use wcbt_core::error::io_error;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

/// Archive output formats for a completed run directory (spec §4.16).
/// `None` is always a legal choice and is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    None,
    Zip,
    TarZst,
}

/// Compresses a completed run directory into a single portable artifact
/// next to it, named `<run_id>.zip` or `<run_id>.tar.zst`. Returns `None`
/// when `format` is [`CompressionFormat::None`].
///
/// Walks the run directory in deterministic (sorted) order and never reads
/// or writes outside `run_dir` and the single output file (spec §4.16).
pub fn compress_run(run_dir: &Path, run_id: &str, format: CompressionFormat) -> Result<Option<PathBuf>, anyhow::Error> {
    match format {
        CompressionFormat::None => Ok(None),
        CompressionFormat::Zip => Ok(Some(compress_zip(run_dir, run_id)?)),
        CompressionFormat::TarZst => Ok(Some(compress_tar_zst(run_dir, run_id)?)),
    }
}

fn sorted_member_paths(run_dir: &Path) -> Result<Vec<PathBuf>, anyhow::Error> {
    let mut out = Vec::new();
    let mut stack = vec![run_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut children: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| io_error(format!("listing {}: {e}", dir.display())))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        children.sort();
        for child in children {
            if child.is_dir() {
                stack.push(child);
            } else {
                out.push(child);
            }
        }
    }
    out.sort();
    Ok(out)
}

fn compress_zip(run_dir: &Path, run_id: &str) -> Result<PathBuf, anyhow::Error> {
    let output_path = run_dir.with_file_name(format!("{run_id}.zip"));
    let file = File::create(&output_path).map_err(|e| io_error(format!("{}: {e}", output_path.display())))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in sorted_member_paths(run_dir)? {
        let relative = path
            .strip_prefix(run_dir)
            .map_err(|_| io_error(format!("{} is not under {}", path.display(), run_dir.display())))?;
        let member_name = format!("{run_id}/{}", relative.to_string_lossy().replace('\\', "/"));
        writer
            .start_file(member_name, options)
            .map_err(|e| io_error(format!("starting zip entry: {e}")))?;
        let mut reader = BufReader::new(File::open(&path).map_err(|e| io_error(format!("{}: {e}", path.display())))?);
        std::io::copy(&mut reader, &mut writer).map_err(|e| io_error(format!("writing zip entry: {e}")))?;
    }

    writer.finish().map_err(|e| io_error(format!("finalizing zip: {e}")))?;
    info!(run_id, output = %output_path.display(), "compressed run as zip");
    Ok(output_path)
}

fn compress_tar_zst(run_dir: &Path, run_id: &str) -> Result<PathBuf, anyhow::Error> {
    let output_path = run_dir.with_file_name(format!("{run_id}.tar.zst"));
    let file = File::create(&output_path).map_err(|e| io_error(format!("{}: {e}", output_path.display())))?;
    let encoder = zstd::Encoder::new(file, 3).map_err(|e| io_error(format!("creating zstd encoder: {e}")))?;
    let mut tar = tar::Builder::new(encoder);

    for path in sorted_member_paths(run_dir)? {
        let relative = path
            .strip_prefix(run_dir)
            .map_err(|_| io_error(format!("{} is not under {}", path.display(), run_dir.display())))?;
        let member_name = format!("{run_id}/{}", relative.to_string_lossy().replace('\\', "/"));
        let mut reader = File::open(&path).map_err(|e| io_error(format!("{}: {e}", path.display())))?;
        tar.append_file(member_name, &mut reader)
            .map_err(|e| io_error(format!("writing tar entry: {e}")))?;
    }

    let encoder = tar.into_inner().map_err(|e| io_error(format!("finalizing tar: {e}")))?;
    encoder
        .finish()
        .map_err(|e| io_error(format!("finalizing zstd stream: {e}")))?
        .flush()
        .map_err(|e| io_error(format!("flushing archive: {e}")))?;
    info!(run_id, output = %output_path.display(), "compressed run as tar+zstd");
    Ok(output_path)
}

/// Expands a `.zip` or `.tar.zst` archive produced by [`compress_run`] back
/// onto disk, returning `destination_dir`. Mirrors the reference backup
/// engine's `extract_archive()`: used only to recover a manifest for restore
/// planning when the operator points the CLI at an archive member instead
/// of a live run directory (spec §4.16).
pub fn extract_archive(archive_path: &Path, destination_dir: &Path) -> Result<PathBuf, anyhow::Error> {
    std::fs::create_dir_all(destination_dir)
        .map_err(|e| io_error(format!("creating {}: {e}", destination_dir.display())))?;
    let lower = archive_path.to_string_lossy().to_ascii_lowercase();

    if lower.ends_with(".zip") {
        let file = File::open(archive_path).map_err(|e| io_error(format!("{}: {e}", archive_path.display())))?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| io_error(format!("reading zip: {e}")))?;
        archive
            .extract(destination_dir)
            .map_err(|e| io_error(format!("extracting zip: {e}")))?;
        info!(archive = %archive_path.display(), destination = %destination_dir.display(), "extracted zip archive");
        return Ok(destination_dir.to_path_buf());
    }

    if lower.ends_with(".tar.zst") || lower.ends_with(".tarzst") {
        let file = File::open(archive_path).map_err(|e| io_error(format!("{}: {e}", archive_path.display())))?;
        let decoder = zstd::Decoder::new(file).map_err(|e| io_error(format!("creating zstd decoder: {e}")))?;
        let mut tar = tar::Archive::new(decoder);
        tar.unpack(destination_dir).map_err(|e| io_error(format!("extracting tar: {e}")))?;
        info!(archive = %archive_path.display(), destination = %destination_dir.display(), "extracted tar+zstd archive");
        return Ok(destination_dir.to_path_buf());
    }

    Err(io_error(format!("unsupported archive type: {}", archive_path.display())).into())
}
