use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Failed to open archive {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid zip archive {path}: {source}")]
    Zip {
        path: PathBuf,
        source: zip::result::ZipError,
    },

    #[error("Failed to read member {member}: {message}")]
    Member { member: String, message: String },
}

/// A file inside the archive, listed without decompressing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEntry {
    index: usize,
    pub name: String,
    pub crc32: u32,
    pub size: u64,
}

/// Read-only handle over one zip archive.
///
/// `entries` lists members cheaply; `read` decompresses one of them. The
/// handle is not rewound: open the archive again to re-read it.
pub struct ArchiveReader {
    path: PathBuf,
    archive: ZipArchive<BufReader<File>>,
}

impl ArchiveReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| ArchiveError::Open {
            path: path.clone(),
            source,
        })?;
        let archive =
            ZipArchive::new(BufReader::new(file)).map_err(|source| ArchiveError::Zip {
                path: path.clone(),
                source,
            })?;

        debug!("Opened archive {:?} with {} entries", path, archive.len());
        Ok(Self { path, archive })
    }

    /// List file members in archive order; directories are omitted
    pub fn entries(&mut self) -> Result<Vec<MemberEntry>, ArchiveError> {
        let mut entries = Vec::with_capacity(self.archive.len());

        for index in 0..self.archive.len() {
            let file = self
                .archive
                .by_index(index)
                .map_err(|source| ArchiveError::Zip {
                    path: self.path.clone(),
                    source,
                })?;

            if file.is_dir() {
                continue;
            }

            entries.push(MemberEntry {
                index,
                name: file.name().to_string(),
                crc32: file.crc32(),
                size: file.size(),
            });
        }

        Ok(entries)
    }

    /// Decompress one member; checksum mismatches surface here
    pub fn read(&mut self, entry: &MemberEntry) -> Result<Vec<u8>, ArchiveError> {
        let member_error = |message: String| ArchiveError::Member {
            member: entry.name.clone(),
            message,
        };

        let mut file = self
            .archive
            .by_index(entry.index)
            .map_err(|e| member_error(e.to_string()))?;

        let mut content = Vec::with_capacity(entry.size as usize);
        file.read_to_end(&mut content)
            .map_err(|e| member_error(e.to_string()))?;

        debug!("Read {} bytes from {}", content.len(), entry.name);
        Ok(content)
    }
}
