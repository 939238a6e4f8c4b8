// 📦 Archive Extractor - unzip a download and give its payload a .csv extension

use crate::error::IbsgError;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;

/// Payload inside the BER register download
pub const BER_PAYLOAD: &str = "BERPublicsearch.txt";

/// Extract every entry of `archive` into `dest_dir`
pub fn unzip(archive: &Path, dest_dir: &Path) -> Result<()> {
    let mut zip = open_archive(archive)?;

    fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory {:?}", dest_dir))?;
    zip.extract(dest_dir)
        .with_context(|| format!("Failed to extract {:?} into {:?}", archive, dest_dir))?;

    info!(entries = zip.len(), archive = %archive.display(), "archive extracted");
    Ok(())
}

/// Rename `path` to the same name with a `.csv` extension
pub fn rename_as_csv(path: &Path) -> Result<PathBuf> {
    let csv_path = path.with_extension("csv");
    fs::rename(path, &csv_path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", path, csv_path))?;
    Ok(csv_path)
}

/// Unzip `archive` and return the path of its payload, renamed to `.csv`.
/// A payload already extracted by an earlier run is reused.
pub fn extract_payload(archive: &Path, dest_dir: &Path, payload: &str) -> Result<PathBuf> {
    let extracted = dest_dir.join(payload);
    let csv_path = extracted.with_extension("csv");
    if csv_path.exists() {
        return Ok(csv_path);
    }

    unzip(archive, dest_dir)?;
    if !extracted.exists() {
        return Err(IbsgError::MissingPayload {
            archive: archive.to_path_buf(),
            payload: payload.to_string(),
        }
        .into());
    }
    if extracted == csv_path {
        return Ok(csv_path);
    }
    rename_as_csv(&extracted)
}

fn open_archive(archive: &Path) -> Result<zip::ZipArchive<File>> {
    let file = File::open(archive).with_context(|| format!("Failed to open archive {:?}", archive))?;
    zip::ZipArchive::new(file).with_context(|| format!("{:?} is not a valid zip archive", archive))
}

/// Name of the first file entry in `archive`, in archive order
pub fn first_entry(archive: &Path) -> Result<String> {
    let mut zip = open_archive(archive)?;
    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        if !entry.is_dir() {
            return Ok(entry.name().to_string());
        }
    }
    Err(IbsgError::MissingPayload {
        archive: archive.to_path_buf(),
        payload: "any file".to_string(),
    }
    .into())
}

/// Hand the decompressed contents of entry `name` to `read`, without extracting to disk
pub fn read_entry<T, F>(archive: &Path, name: &str, read: F) -> Result<T>
where
    F: FnOnce(&mut dyn Read) -> Result<T>,
{
    let mut zip = open_archive(archive)?;
    let mut entry = zip.by_name(name).map_err(|_| IbsgError::MissingPayload {
        archive: archive.to_path_buf(),
        payload: name.to_string(),
    })?;
    read(&mut entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn make_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_extract_and_rename_payload() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("BERPublicsearch-01-02-2024.zip");
        make_zip(&archive, &[(BER_PAYLOAD, b"CountyName\nCo. Cork\n"), ("README", b"hi")]);

        let out = dir.path().join("BERPublicsearch-01-02-2024");
        let csv = extract_payload(&archive, &out, BER_PAYLOAD).unwrap();

        assert_eq!(csv, out.join("BERPublicsearch.csv"));
        assert_eq!(fs::read_to_string(&csv).unwrap(), "CountyName\nCo. Cork\n");
        assert!(!out.join(BER_PAYLOAD).exists());
        assert!(out.join("README").exists(), "Every entry is extracted");

        // A second call reuses the extracted file
        let again = extract_payload(&archive, &out, BER_PAYLOAD).unwrap();
        assert_eq!(again, csv);
    }

    #[test]
    fn test_missing_payload_is_named() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("wrong.zip");
        make_zip(&archive, &[("other.txt", b"x")]);

        let err = extract_payload(&archive, &dir.path().join("out"), BER_PAYLOAD).unwrap_err();
        assert!(err.to_string().contains(BER_PAYLOAD));
    }

    #[test]
    fn test_not_a_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        fs::write(&archive, b"<html>session expired</html>").unwrap();

        assert!(unzip(&archive, dir.path()).is_err());
    }

    #[test]
    fn test_first_entry_follows_archive_order() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("small_area_bers.zip");
        make_zip(&archive, &[("z_small_area_bers.csv", b"x"), ("a_readme.txt", b"y")]);
        assert_eq!(first_entry(&archive).unwrap(), "z_small_area_bers.csv");
    }

    #[test]
    fn test_read_entry_without_extracting() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("small_area_bers.zip");
        make_zip(&archive, &[("small_area_bers.csv", b"countyname\nCo. Cork\n")]);

        let text = read_entry(&archive, "small_area_bers.csv", |r| {
            let mut text = String::new();
            r.read_to_string(&mut text)?;
            Ok(text)
        })
        .unwrap();
        assert_eq!(text, "countyname\nCo. Cork\n");
        assert!(!dir.path().join("small_area_bers.csv").exists());

        let err = read_entry(&archive, "missing.csv", |_| Ok(())).unwrap_err();
        assert!(err.to_string().contains("missing.csv"));
    }
}
