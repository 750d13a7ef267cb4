//! File data extraction
//!
//! Streams the extents of a File Entry to a file on the host filesystem, one
//! chunk at a time

use super::ecma167::DataLocation;
use super::tree::{DirectoryTree, EntryId};
use super::volume::Partition;
use crate::stream::BlockSource;
use crate::{Result, UdfError};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, warn};

/// Copy granularity
pub const CHUNK_SIZE: usize = 2048;

/// Reports the copy progress every tenth of the total
struct Progress<'a> {
    name: &'a str,
    total: u64,
    done: u64,
    next_step: u64,
}

impl<'a> Progress<'a> {
    fn new(name: &'a str, total: u64) -> Self {
        Self {
            name,
            total,
            done: 0,
            next_step: 1,
        }
    }

    fn advance(&mut self, len: usize) {
        self.done += len as u64;
        while self.next_step <= 10 && self.done * 10 >= self.total * self.next_step {
            info!("{}: {}%", self.name, self.next_step * 10);
            self.next_step += 1;
        }
    }
}

/// Copies file entries out of a volume
pub struct FileExtractor<'a, S: BlockSource> {
    source: &'a mut S,
    partition: &'a Partition,
    tree: &'a mut DirectoryTree,
}

impl<'a, S: BlockSource> FileExtractor<'a, S> {
    /// Creates an extractor over the given volume
    pub fn new(source: &'a mut S, partition: &'a Partition, tree: &'a mut DirectoryTree) -> Self {
        Self {
            source,
            partition,
            tree,
        }
    }

    /// Writes the data of `entry` to `destination_dir/name`
    ///
    /// An existing file is truncated; on failure the partial file is left
    /// behind. Returns the number of bytes written
    #[instrument(skip(self, destination_dir))]
    pub fn extract(&mut self, entry: EntryId, name: &str, destination_dir: &Path) -> Result<u64> {
        let is_directory = self
            .tree
            .get(entry)
            .map(|e| e.is_directory)
            .ok_or_else(|| UdfError::NotFound(name.to_string()))?;
        if is_directory {
            return Err(UdfError::IsADirectory(name.to_string()));
        }
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(UdfError::InvalidName(name.to_string()));
        }
        let location = self.tree.data_location(self.source, self.partition, entry);
        self.tree.release_buffer(entry);
        let location = location?;

        let path: PathBuf = destination_dir.join(name);
        debug!("Extracting {} bytes to {}", location.len(), path.display());
        let mut out = BufWriter::new(File::create(&path)?);
        let mut progress = Progress::new(name, location.len());
        let written = match location {
            DataLocation::Embedded(data) => {
                out.write_all(&data)?;
                progress.advance(data.len());
                data.len() as u64
            }
            DataLocation::Extents(ads) => {
                let mut written = 0u64;
                let mut chunk = vec![0u8; CHUNK_SIZE];
                for ad in ads {
                    let mut offset = self.partition.offset(ad.position);
                    let mut remaining = u64::from(ad.unmasked_length());
                    while remaining > 0 {
                        let len = remaining.min(CHUNK_SIZE as u64) as usize;
                        let buf = &mut chunk[0..len];
                        if ad.is_recorded() {
                            self.source.read_at(offset, buf)?;
                        } else {
                            buf.fill(0);
                        }
                        out.write_all(buf)?;
                        progress.advance(len);
                        offset += len as u64;
                        remaining -= len as u64;
                        written += len as u64;
                    }
                }
                written
            }
        };
        out.flush()?;
        info!("Extracted {} ({written} bytes)", path.display());
        Ok(written)
    }
}
