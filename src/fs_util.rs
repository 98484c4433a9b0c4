use std::fs;
use std::io;
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::IngestError;
use crate::store::walk_dir;

/// Packs the contents of `source_dir` into a zip of stored (uncompressed)
/// entries, rooted at the directory itself. Written to a temp name first.
pub fn zip_dir(source_dir: &Path, zip_path: &Path) -> Result<(), IngestError> {
    let tmp_path = zip_path.with_extension("zip.tmp");
    let file = fs::File::create(&tmp_path)
        .map_err(|err| IngestError::Filesystem(format!("create zip {}: {err}", tmp_path.display())))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    for path in walk_dir(source_dir)? {
        let relative = path
            .strip_prefix(source_dir)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        let name = relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if path.is_dir() {
            writer
                .add_directory(format!("{name}/"), options)
                .map_err(|err| IngestError::Filesystem(err.to_string()))?;
            continue;
        }
        writer
            .start_file(name, options)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        let mut input =
            fs::File::open(&path).map_err(|err| IngestError::Filesystem(err.to_string()))?;
        io::copy(&mut input, &mut writer).map_err(|err| IngestError::Filesystem(err.to_string()))?;
    }
    writer
        .finish()
        .map_err(|err| IngestError::Filesystem(err.to_string()))?;
    fs::rename(&tmp_path, zip_path).map_err(|err| IngestError::Filesystem(err.to_string()))
}

pub fn validate_zip(zip_path: &Path) -> Result<usize, IngestError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| IngestError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| IngestError::Filesystem(err.to_string()))?;

    let mut files = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        files += 1;
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_dir_keeps_relative_layout() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("day.zarr");
        fs::create_dir_all(source.join("z")).unwrap();
        fs::write(source.join(".zgroup"), b"{\"zarr_format\": 2}").unwrap();
        fs::write(source.join("z").join("0.0"), b"abcd").unwrap();

        let zip_path = temp.path().join("day.zarr.zip");
        zip_dir(&source, &zip_path).unwrap();
        assert_eq!(validate_zip(&zip_path).unwrap(), 2);

        let mut archive = ZipArchive::new(fs::File::open(&zip_path).unwrap()).unwrap();
        let entry = archive.by_name("z/0.0").unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Stored);
    }
}
