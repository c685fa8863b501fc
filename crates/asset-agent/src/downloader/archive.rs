//! Archive detection and extraction (tar, tar.gz).
//!
//! The archive type is sniffed from the leading bytes of the file, never
//! from its name: asset URLs frequently carry no extension or the wrong one.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path};

use crate::{AssetError, Result};

/// Number of leading bytes inspected when sniffing an archive.
pub const HEADER_SIZE: usize = 262;

/// Archive type as detected from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    Tar,
    TarGz,
    Zip,
    Bzip2,
    Xz,
    SevenZip,
    Rar,
    Unknown,
}

impl ArchiveType {
    /// Detect archive type from a file header
    pub fn sniff(header: &[u8]) -> Self {
        if header.starts_with(&[0x1f, 0x8b]) {
            ArchiveType::TarGz
        } else if header.len() >= 262 && &header[257..262] == b"ustar" {
            ArchiveType::Tar
        } else if header.starts_with(b"PK\x03\x04")
            || header.starts_with(b"PK\x05\x06")
            || header.starts_with(b"PK\x07\x08")
        {
            ArchiveType::Zip
        } else if header.starts_with(b"BZh") {
            ArchiveType::Bzip2
        } else if header.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            ArchiveType::Xz
        } else if header.starts_with(&[b'7', b'z', 0xbc, 0xaf, 0x27, 0x1c]) {
            ArchiveType::SevenZip
        } else if header.starts_with(b"Rar!\x1a\x07") {
            ArchiveType::Rar
        } else {
            ArchiveType::Unknown
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ArchiveType::Tar => "application/x-tar",
            ArchiveType::TarGz => "application/gzip",
            ArchiveType::Zip => "application/zip",
            ArchiveType::Bzip2 => "application/x-bzip2",
            ArchiveType::Xz => "application/x-xz",
            ArchiveType::SevenZip => "application/x-7z-compressed",
            ArchiveType::Rar => "application/vnd.rar",
            ArchiveType::Unknown => "application/octet-stream",
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, ArchiveType::Tar | ArchiveType::TarGz)
    }
}

/// Read the sniffing header from `file` and rewind it.
pub fn detect_type(file: &mut File) -> Result<ArchiveType> {
    file.seek(SeekFrom::Start(0))?;
    let mut header = Vec::with_capacity(HEADER_SIZE);
    file.by_ref().take(HEADER_SIZE as u64).read_to_end(&mut header)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(ArchiveType::sniff(&header))
}

/// Archive extractor
pub struct ArchiveExtractor;

impl ArchiveExtractor {
    /// Extract `file` into `dest_dir`, detecting the format by content.
    pub fn extract(file: &mut File, dest_dir: &Path) -> Result<()> {
        let archive_type = detect_type(file)?;
        if !archive_type.is_supported() {
            return Err(AssetError::UnsupportedArchive {
                mime: archive_type.mime_type().to_string(),
            });
        }

        std::fs::create_dir_all(dest_dir)?;
        log::debug!(
            "Extracting {} archive to {}",
            archive_type.mime_type(),
            dest_dir.display()
        );

        let reader = BufReader::new(file);
        match archive_type {
            ArchiveType::TarGz => Self::extract_tar_reader(GzDecoder::new(reader), dest_dir),
            _ => Self::extract_tar_reader(reader, dest_dir),
        }
    }

    /// Extract from a tar reader, entry by entry.
    pub fn extract_tar_reader<R: Read>(reader: R, dest_dir: &Path) -> Result<()> {
        let mut archive = tar::Archive::new(reader);
        archive.set_preserve_permissions(true);

        let entries = archive
            .entries()
            .map_err(|e| AssetError::Expand(format!("Failed to read tar: {}", e)))?;

        for entry in entries {
            let mut entry =
                entry.map_err(|e| AssetError::Expand(format!("Failed to read tar entry: {}", e)))?;

            let path = entry
                .path()
                .map_err(|e| AssetError::Expand(format!("Invalid path in tar: {}", e)))?
                .into_owned();

            // Validate path doesn't escape the destination
            if path
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
            {
                return Err(AssetError::Expand(format!(
                    "Path traversal detected in archive: {}",
                    path.display()
                )));
            }

            let unpacked = entry.unpack_in(dest_dir).map_err(|e| {
                AssetError::Expand(format!("Failed to extract {}: {}", path.display(), e))
            })?;
            if !unpacked {
                return Err(AssetError::Expand(format!(
                    "Path traversal detected: {} escapes destination directory",
                    path.display()
                )));
            }
        }

        Ok(())
    }
}
