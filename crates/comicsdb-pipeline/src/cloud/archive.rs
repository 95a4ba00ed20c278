//! Comic archive access
//!
//! Opens downloaded comic archives and exposes their pages in lexicographic
//! order. CBZ is a zip, CBT a (possibly gzipped) tar. CBR is rar, which has
//! no maintained pure-Rust reader; opening one reports an unsupported-format
//! error that the ingest job records per item.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use regex::Regex;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O error reading archive: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("Archive has no page at index {0}")]
    PageOutOfRange(usize),

    #[error("Invalid regular expression: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Zip,
    Tar,
}

/// A page-addressable comic archive on disk.
#[derive(Debug)]
pub struct ComicArchive {
    path: PathBuf,
    kind: ArchiveKind,
    pages: Vec<String>,
}

impl ComicArchive {
    /// Open an archive, inferring the container from the key's extension.
    pub fn open(path: &Path, key: &str) -> Result<Self, ArchiveError> {
        let kind = match key.rsplit('.').next().map(str::to_ascii_lowercase) {
            Some(ext) if ext == "cbz" => ArchiveKind::Zip,
            Some(ext) if ext == "cbt" => ArchiveKind::Tar,
            Some(ext) if ext == "cbr" => {
                return Err(ArchiveError::UnsupportedFormat("cbr (rar)".to_string()))
            },
            other => {
                return Err(ArchiveError::UnsupportedFormat(
                    other.unwrap_or_default(),
                ))
            },
        };

        let image_regex = Regex::new(r"(?i)\.(jpg|jpeg|png|gif|tif|tiff|bmp)\s*$")?;

        let mut pages = match kind {
            ArchiveKind::Zip => {
                let file = File::open(path)?;
                let archive = zip::ZipArchive::new(file)?;
                archive
                    .file_names()
                    .filter(|name| !name.ends_with('/') && image_regex.is_match(name))
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            },
            ArchiveKind::Tar => {
                let mut names = Vec::new();
                let mut archive = tar::Archive::new(open_tar_reader(path)?);
                for entry in archive.entries()? {
                    let entry = entry?;
                    if !entry.header().entry_type().is_file() {
                        continue;
                    }
                    let name = entry.path()?.to_string_lossy().into_owned();
                    if image_regex.is_match(&name) {
                        names.push(name);
                    }
                }
                names
            },
        };
        pages.sort();

        Ok(Self {
            path: path.to_path_buf(),
            kind,
            pages,
        })
    }

    /// Page file names, sorted; page 0 is the cover by convention.
    pub fn page_names(&self) -> &[String] {
        &self.pages
    }

    /// Read one page's bytes.
    pub fn read_page(&self, index: usize) -> Result<Vec<u8>, ArchiveError> {
        let name = self
            .pages
            .get(index)
            .ok_or(ArchiveError::PageOutOfRange(index))?;

        match self.kind {
            ArchiveKind::Zip => {
                let file = File::open(&self.path)?;
                let mut archive = zip::ZipArchive::new(file)?;
                let mut page = archive.by_name(name)?;
                let mut data = Vec::new();
                page.read_to_end(&mut data)?;
                Ok(data)
            },
            ArchiveKind::Tar => {
                let mut archive = tar::Archive::new(open_tar_reader(&self.path)?);
                for entry in archive.entries()? {
                    let mut entry = entry?;
                    if entry.path()?.to_string_lossy() == name.as_str() {
                        let mut data = Vec::new();
                        entry.read_to_end(&mut data)?;
                        return Ok(data);
                    }
                }
                Err(ArchiveError::PageOutOfRange(index))
            },
        }
    }
}

/// CBT files in the wild are plain or gzipped tar; sniff the magic bytes.
fn open_tar_reader(path: &Path) -> Result<Box<dyn Read>, io::Error> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    let read = file.read(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;
    if read == 2 && magic == [0x1f, 0x8b] {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// MIME type for a page file, keyed on its extension.
pub fn page_content_type(name: &str) -> &'static str {
    match name
        .rsplit('.')
        .next()
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_cbz(dir: &tempfile::TempDir, pages: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.path().join("comic.cbz");
        let file = File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in pages {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_cbz_pages_sorted_and_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cbz(
            &dir,
            &[
                ("page-02.jpg", b"second".as_slice()),
                ("page-01.jpg", b"first".as_slice()),
                ("info.txt", b"not a page".as_slice()),
            ],
        );

        let archive = ComicArchive::open(&path, "content/x/comic.cbz").unwrap();
        assert_eq!(archive.page_names(), ["page-01.jpg", "page-02.jpg"]);
        assert_eq!(archive.read_page(0).unwrap(), b"first");
        assert_eq!(archive.read_page(1).unwrap(), b"second");
        assert!(matches!(
            archive.read_page(2),
            Err(ArchiveError::PageOutOfRange(2))
        ));
    }

    #[test]
    fn test_cbt_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comic.cbt");
        let file = File::create(&path).unwrap();
        let mut builder = tar::Builder::new(file);

        let mut header = tar::Header::new_gnu();
        header.set_size(5);
        header.set_cksum();
        builder
            .append_data(&mut header, "cover.png", b"cover".as_slice())
            .unwrap();
        builder.into_inner().unwrap();

        let archive = ComicArchive::open(&path, "content/x/comic.cbt").unwrap();
        assert_eq!(archive.page_names(), ["cover.png"]);
        assert_eq!(archive.read_page(0).unwrap(), b"cover");
    }

    #[test]
    fn test_cbr_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comic.cbr");
        File::create(&path).unwrap();

        let err = ComicArchive::open(&path, "content/x/comic.cbr").unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_page_content_type() {
        assert_eq!(page_content_type("cover.JPG"), "image/jpeg");
        assert_eq!(page_content_type("cover.png"), "image/png");
        assert_eq!(page_content_type("cover"), "application/octet-stream");
    }
}
