use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::PipelineError;

/// Zip every regular file under `source` into `archive_path`.
///
/// Entry names are forward-slash paths relative to `source`; the directory itself is
/// not an entry. Entries are written in file-name order so repeated runs over the same
/// tree produce the same listing. Symlinks are not followed. Returns the entry count.
pub fn package_directory(source: &Path, archive_path: &Path) -> Result<usize, PipelineError> {
    write_archive(source, archive_path).map_err(|error| {
        tracing::error!(
            source = %source.display(),
            archive = %archive_path.display(),
            %error,
            "zip creation failed"
        );
        PipelineError::PackagingFailure(error)
    })
}

fn write_archive(source: &Path, archive_path: &Path) -> Result<usize, ZipError> {
    if !source.is_dir() {
        return Err(ZipError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("output directory {} does not exist", source.display()),
        )));
    }

    let file = File::create(archive_path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let mut entries = 0;
    for entry in WalkDir::new(source)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|error| io::Error::other(error.to_string()))?;
        zip.start_file(entry_name(relative), options)?;
        let mut reader = File::open(entry.path())?;
        io::copy(&mut reader, &mut zip)?;
        entries += 1;
    }

    let mut writer = zip.finish()?;
    io::Write::flush(&mut writer)?;
    writer.get_ref().sync_all()?;
    Ok(entries)
}

fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
