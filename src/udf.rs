//! UDF volume session
//!
//! [`Udf`] bootstraps a volume once, then keeps the block source, the
//! partition geometry, the directory tree visited so far and a current
//! directory
//!
//! Allocation descriptor continuation and partition maps other than the
//! first are NOT supported

pub mod ecma167;
pub mod extract;
pub mod tree;
pub mod volume;

use crate::stream::BlockSource;
use crate::{Result, SECTOR_SIZE, Stage, UdfError};
use ecma167::LogicalVolumeIntegrityDescriptor;
use extract::FileExtractor;
use serde::Serialize;
use std::path::Path;
pub use tree::{DirEntryInfo, EntryId, EntryState, FsEntry, FsEntryLink};
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, warn};
use tree::DirectoryTree;
use volume::{Partition, VolumeInfo};

const GIB: f64 = (1u64 << 30) as f64;

#[derive(Debug, Clone, Serialize)]
/// Volume overview, as reported by the `info` command
pub struct VolumeSummary {
    /// Volume Identifier
    pub name: String,
    /// Recording Date and Time
    pub recording_time: Option<String>,
    /// UDF revision
    pub udf_version: String,
    /// Number of partitions
    pub partitions_count: u32,
    /// Free space in GiB, if known
    pub free_space: Option<f64>,
    /// Total space in GiB, if known
    pub total_space: Option<f64>,
}

/// A loaded UDF volume
pub struct Udf<S: BlockSource> {
    source: S,
    info: VolumeInfo,
    partition: Partition,
    tree: DirectoryTree,
    current: EntryId,
    current_path: String,
}

impl<S: BlockSource> Udf<S> {
    /// Bootstraps the volume found in `source`
    #[instrument(skip_all)]
    pub fn new(mut source: S) -> Result<Self> {
        let bootstrap = volume::locate(&mut source)?;
        let mut tree = DirectoryTree::new(bootstrap.root_icb);
        let root = tree.root();
        tree.initialize(&mut source, &bootstrap.partition, root)
            .map_err(|e| e.at_stage(Stage::RootDirectory))?;
        Ok(Self {
            source,
            info: bootstrap.info,
            partition: bootstrap.partition,
            tree,
            current: root,
            current_path: "/".to_string(),
        })
    }

    /// Volume metadata
    pub fn info(&self) -> &VolumeInfo {
        &self.info
    }

    /// Partition geometry
    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// The root directory
    pub fn root(&self) -> EntryId {
        self.tree.root()
    }

    /// Returns an entry visited so far
    pub fn entry(&self, id: EntryId) -> Option<&FsEntry> {
        self.tree.get(id)
    }

    /// Lists the contents of directory `entry`, in recording order
    pub fn list_children(&mut self, entry: EntryId) -> Result<Vec<DirEntryInfo>> {
        self.tree
            .list_children(&mut self.source, &self.partition, entry)
    }

    /// Decodes the contents of directory `entry` if not done already
    pub fn populate(&mut self, entry: EntryId) -> Result<()> {
        self.tree.populate(&mut self.source, &self.partition, entry)
    }

    /// Looks up `path` from `start` (or from the root for absolute paths)
    pub fn resolve_path(&mut self, start: EntryId, path: &str) -> Result<EntryId> {
        self.tree
            .resolve(&mut self.source, &self.partition, start, path)
    }

    /// The parent of `entry`, the root is its own parent
    pub fn parent(&self, entry: EntryId) -> EntryId {
        self.tree.get_parent_entry(entry)
    }

    /// Changes the current directory
    pub fn cd(&mut self, path: &str) -> Result<()> {
        let target = self.resolve_path(self.current, path)?;
        if !self.tree.get(target).is_some_and(|e| e.is_directory) {
            return Err(UdfError::NotADirectory(path.to_string()));
        }
        self.current = target;
        self.current_path = join_path(&self.current_path, path);
        debug!("Current directory: {}", self.current_path);
        Ok(())
    }

    /// The current directory
    pub fn current_entry(&self) -> EntryId {
        self.current
    }

    /// Path of the current directory
    pub fn current_path(&self) -> &str {
        &self.current_path
    }

    /// Lists the current directory
    pub fn ls(&mut self) -> Result<Vec<DirEntryInfo>> {
        self.list_children(self.current)
    }

    /// Writes the data of `entry` to `destination_dir/name`
    ///
    /// Returns the number of bytes written
    pub fn extract<P: AsRef<Path>>(
        &mut self,
        entry: EntryId,
        name: &str,
        destination_dir: P,
    ) -> Result<u64> {
        FileExtractor::new(&mut self.source, &self.partition, &mut self.tree).extract(
            entry,
            name,
            destination_dir.as_ref(),
        )
    }

    /// Resolves `path` from the current directory and extracts it under its
    /// own name into `destination_dir`
    pub fn cp<P: AsRef<Path>>(&mut self, path: &str, destination_dir: P) -> Result<u64> {
        let entry = self.resolve_path(self.current, path)?;
        let name = path
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or(path)
            .to_string();
        self.extract(entry, &name, destination_dir)
    }

    /// Summarizes the volume, space figures come from the Logical Volume
    /// Integrity Descriptor when one is recorded
    pub fn volume_summary(&self) -> Result<VolumeSummary> {
        let mut summary = VolumeSummary {
            name: self.info.name.clone(),
            recording_time: self.info.recording_time.to_string_maybe(),
            udf_version: self.info.revision.to_string(),
            partitions_count: self.info.partition_maps,
            free_space: None,
            total_space: None,
        };
        let buf = match &self.info.integrity {
            Some(buf) => buf,
            None => return Ok(summary),
        };
        let lvid = LogicalVolumeIntegrityDescriptor::new(buf)?;
        debug!("Integrity descriptor: {lvid:?}");
        let gib = |table: &[u32]| {
            table
                .iter()
                .filter(|v| **v != u32::MAX)
                .map(|v| u64::from(*v) * SECTOR_SIZE)
                .sum::<u64>() as f64
                / GIB
        };
        summary.partitions_count = lvid.free_space.len() as u32;
        summary.free_space = Some(gib(&lvid.free_space));
        summary.total_space = Some(gib(&lvid.size));
        Ok(summary)
    }

    /// Closes the session and returns the block source
    pub fn close(mut self) -> S {
        self.source.close();
        self.source
    }
}

/// Applies `path` to the display path `base`
fn join_path(base: &str, path: &str) -> String {
    let mut parts: Vec<&str> = if path.starts_with('/') {
        Vec::new()
    } else {
        base.split('/').filter(|s| !s.is_empty()).collect()
    };
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    format!("/{}", parts.join("/"))
}
