//! Lazily built directory hierarchy
//!
//! Entries live in an arena owned by [`DirectoryTree`] and are referred to by
//! [`EntryId`]. A File Entry is only read when its entry is first visited and
//! a directory is only decoded when its children are first needed

use super::ecma167::*;
use super::volume::Partition;
use crate::stream::BlockSource;
use crate::{Result, UdfError};
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Index of an entry in its [`DirectoryTree`]
pub struct EntryId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Lifecycle of an entry
pub enum EntryState {
    /// Only the File Entry address is known
    Stub,
    /// The File Entry was read and decoded
    Initialized,
    /// The directory contents were decoded (directories only)
    Populated,
}

#[derive(Debug, Clone)]
/// A decoded File Identifier Descriptor
pub struct FsEntryLink {
    /// File Identifier, printable ASCII only
    pub name: String,
    /// Size of the record on disk, padding included
    pub total_length: usize,
    /// The link points to a directory
    pub is_directory: bool,
    /// Always false: the hidden characteristic is not honored
    pub is_hidden: bool,
    /// The deleted characteristic is set; such links are still listed
    pub is_deleted: bool,
    /// File Characteristics
    pub characteristics: u8,
    /// Address of the child File Entry
    pub icb: LongAD,
    /// The child entry
    pub entry: EntryId,
}

#[derive(Debug)]
/// A file or directory
pub struct FsEntry {
    /// Address of the File Entry
    pub address: LongAD,
    /// Lifecycle state
    pub state: EntryState,
    /// Whether this is a directory, as announced by the referencing link
    pub is_directory: bool,
    header: Option<FileEntryHeader>,
    buffer: Option<Vec<u8>>,
    /// The containing directory, none for the root
    pub parent: Option<EntryId>,
    /// Directory contents, in recording order
    pub children: Vec<FsEntryLink>,
}

impl FsEntry {
    fn new(address: LongAD, is_directory: bool, parent: Option<EntryId>) -> Self {
        Self {
            address,
            state: EntryState::Stub,
            is_directory,
            header: None,
            buffer: None,
            parent,
            children: Vec::new(),
        }
    }

    /// Whether the File Entry was successfully decoded
    pub fn is_valid(&self) -> bool {
        self.header.is_some()
    }

    /// The decoded File Entry, if initialized
    pub fn header(&self) -> Option<&FileEntryHeader> {
        self.header.as_ref()
    }

    /// Information Length (file size)
    pub fn size(&self) -> Option<u64> {
        self.header.as_ref().map(|h| h.information_length)
    }

    /// Modification time, [`UdfDate::Unset`] if not initialized
    pub fn modification_time(&self) -> UdfDate {
        self.header
            .as_ref()
            .map(|h| h.modification_time.clone())
            .unwrap_or(UdfDate::Unset)
    }

    /// Whether the raw File Entry is currently cached
    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }
}

#[derive(Debug, Clone)]
/// Listing record for a directory child
pub struct DirEntryInfo {
    /// The child entry
    pub entry: EntryId,
    /// File name
    pub name: String,
    /// Directory flag
    pub is_directory: bool,
    /// File size, none for directories and unreadable entries
    pub size: Option<u64>,
    /// Modification Date and Time
    pub modification_time: UdfDate,
}

/// Arena of the entries visited so far
#[derive(Debug)]
pub struct DirectoryTree {
    entries: Vec<FsEntry>,
}

impl DirectoryTree {
    /// Creates a tree holding only the (uninitialized) root directory
    pub fn new(root_icb: LongAD) -> Self {
        Self {
            entries: vec![FsEntry::new(root_icb, true, None)],
        }
    }

    /// The root directory
    pub fn root(&self) -> EntryId {
        EntryId(0)
    }

    /// Number of entries allocated so far
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false: the root is allocated at creation
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entry with the given id
    pub fn get(&self, id: EntryId) -> Option<&FsEntry> {
        self.entries.get(id.0)
    }

    fn node(&self, id: EntryId) -> Result<&FsEntry> {
        self.entries
            .get(id.0)
            .ok_or_else(|| UdfError::NotFound(format!("entry #{}", id.0)))
    }

    fn node_mut(&mut self, id: EntryId) -> Result<&mut FsEntry> {
        self.entries
            .get_mut(id.0)
            .ok_or_else(|| UdfError::NotFound(format!("entry #{}", id.0)))
    }

    fn read_file_entry<S: BlockSource>(
        source: &mut S,
        partition: &Partition,
        address: &LongAD,
    ) -> Result<Vec<u8>> {
        let len = address.unmasked_length().min(partition.block_size) as usize;
        if len < FILE_ENTRY_HEADER_LEN {
            return Err(UdfError::Corrupt(format!(
                "File Entry at block {} is too short ({len} bytes)",
                address.lba
            )));
        }
        source.read_vec(partition.offset(address.lba), len)
    }

    /// Reads and decodes the File Entry of `id`
    ///
    /// Does nothing if the entry was already initialized; on failure the
    /// entry stays a stub
    pub fn initialize<S: BlockSource>(
        &mut self,
        source: &mut S,
        partition: &Partition,
        id: EntryId,
    ) -> Result<()> {
        let entry = self.node(id)?;
        if entry.state != EntryState::Stub {
            return Ok(());
        }
        let buf = Self::read_file_entry(source, partition, &entry.address)?;
        let header = FileEntryHeader::new(&buf)?;
        if entry.is_directory != header.is_directory() {
            debug!(
                "File Entry type {} disagrees with the directory flag of entry #{}",
                header.file_type, id.0
            );
        }
        let entry = self.node_mut(id)?;
        entry.header = Some(header);
        // Only directories keep their File Entry until populated
        entry.buffer = entry.is_directory.then_some(buf);
        entry.state = EntryState::Initialized;
        Ok(())
    }

    /// Decodes the location of the data of `id`, rereading the File Entry if
    /// it is no longer cached
    pub(crate) fn data_location<S: BlockSource>(
        &mut self,
        source: &mut S,
        partition: &Partition,
        id: EntryId,
    ) -> Result<DataLocation> {
        self.initialize(source, partition, id)?;
        let entry = self.node(id)?;
        if entry.buffer.is_none() {
            let buf = Self::read_file_entry(source, partition, &entry.address)?;
            self.node_mut(id)?.buffer = Some(buf);
        }
        let entry = self.node(id)?;
        match (&entry.header, &entry.buffer) {
            (Some(header), Some(buf)) => header.data_location(buf),
            _ => Err(UdfError::Corrupt(format!("entry #{} not loaded", id.0))),
        }
    }

    /// Drops the cached File Entry of `id`
    pub(crate) fn release_buffer(&mut self, id: EntryId) {
        if let Some(entry) = self.entries.get_mut(id.0) {
            entry.buffer = None;
        }
    }

    /// Decodes the contents of directory `id`
    ///
    /// Files and already populated directories are left untouched. Nothing
    /// is added to the tree unless the whole directory decodes successfully
    #[instrument(skip(self, source, partition))]
    pub fn populate<S: BlockSource>(
        &mut self,
        source: &mut S,
        partition: &Partition,
        id: EntryId,
    ) -> Result<()> {
        let entry = self.node(id)?;
        if !entry.is_directory || entry.state == EntryState::Populated {
            return Ok(());
        }
        let location = self.data_location(source, partition, id)?;
        let data = read_location(source, partition, location)?;

        let mut fids: Vec<FileIdentifierDescriptor> = Vec::new();
        let mut offset = 0usize;
        while offset < data.len() {
            let fid = FileIdentifierDescriptor::new(&data, offset)?;
            offset += fid.total_length;
            if fid.identifier.is_empty() {
                debug!("Skipping unnamed record (characteristics {:#x})", fid.characteristics);
                continue;
            }
            if fid.is_deleted() {
                debug!("Entry \"{}\" is marked as deleted", fid.identifier);
            }
            fids.push(fid);
        }

        let mut links = Vec::with_capacity(fids.len());
        for fid in fids {
            let child = EntryId(self.entries.len());
            self.entries
                .push(FsEntry::new(fid.icb, fid.is_directory(), Some(id)));
            links.push(FsEntryLink {
                is_directory: fid.is_directory(),
                is_hidden: false,
                is_deleted: fid.is_deleted(),
                characteristics: fid.characteristics,
                total_length: fid.total_length,
                icb: fid.icb,
                name: fid.identifier,
                entry: child,
            });
        }
        debug!("Directory #{} holds {} entries", id.0, links.len());
        let entry = self.node_mut(id)?;
        entry.children = links;
        entry.buffer = None;
        entry.state = EntryState::Populated;
        Ok(())
    }

    /// Looks up `name` in directory `dir` and initializes the match
    pub fn get_sub_entry<S: BlockSource>(
        &mut self,
        source: &mut S,
        partition: &Partition,
        dir: EntryId,
        name: &str,
    ) -> Result<EntryId> {
        if !self.node(dir)?.is_directory {
            return Err(UdfError::NotADirectory(name.to_string()));
        }
        self.populate(source, partition, dir)?;
        let child = self
            .node(dir)?
            .children
            .iter()
            .find(|link| link.name == name)
            .map(|link| link.entry)
            .ok_or_else(|| UdfError::NotFound(name.to_string()))?;
        self.initialize(source, partition, child)?;
        Ok(child)
    }

    /// The containing directory of `id`, the root is its own parent
    pub fn get_parent_entry(&self, id: EntryId) -> EntryId {
        self.get(id).and_then(|e| e.parent).unwrap_or(id)
    }

    /// Walks `path` from `start`, or from the root if `path` is absolute
    pub fn resolve<S: BlockSource>(
        &mut self,
        source: &mut S,
        partition: &Partition,
        start: EntryId,
        path: &str,
    ) -> Result<EntryId> {
        let mut current = if path.starts_with('/') {
            self.root()
        } else {
            start
        };
        let mut walked = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !self.node(current)?.is_directory {
                return Err(UdfError::NotADirectory(walked));
            }
            if !walked.is_empty() || path.starts_with('/') {
                walked.push('/');
            }
            walked.push_str(segment);
            current = match segment {
                "." => current,
                ".." => self.get_parent_entry(current),
                name => self
                    .get_sub_entry(source, partition, current, name)
                    .map_err(|e| match e {
                        UdfError::NotFound(_) => UdfError::NotFound(walked.clone()),
                        e => e,
                    })?,
            };
        }
        Ok(current)
    }

    /// Lists the contents of directory `dir`
    ///
    /// Children whose File Entry cannot be read are still listed, with an
    /// unknown size
    pub fn list_children<S: BlockSource>(
        &mut self,
        source: &mut S,
        partition: &Partition,
        dir: EntryId,
    ) -> Result<Vec<DirEntryInfo>> {
        if !self.node(dir)?.is_directory {
            return Err(UdfError::NotADirectory(format!("entry #{}", dir.0)));
        }
        self.populate(source, partition, dir)?;
        let links = self.node(dir)?.children.clone();
        let mut ret = Vec::with_capacity(links.len());
        for link in links {
            if let Err(e) = self.initialize(source, partition, link.entry) {
                warn!("Cannot read the File Entry of \"{}\": {e}", link.name);
            }
            let child = self.node(link.entry)?;
            ret.push(DirEntryInfo {
                entry: link.entry,
                size: if link.is_directory { None } else { child.size() },
                modification_time: child.modification_time(),
                is_directory: link.is_directory,
                name: link.name,
            });
        }
        Ok(ret)
    }
}

/// Gathers the data of a File Entry in memory
fn read_location<S: BlockSource>(
    source: &mut S,
    partition: &Partition,
    location: DataLocation,
) -> Result<Vec<u8>> {
    let ads = match location {
        DataLocation::Embedded(data) => return Ok(data),
        DataLocation::Extents(ads) => ads,
    };
    let total = ads
        .iter()
        .map(|ad| ad.unmasked_length() as usize)
        .try_fold(0usize, |acc, len| acc.checked_add(len))
        .ok_or_else(|| UdfError::Corrupt("oversized directory".into()))?;
    let mut data: Vec<u8> = Vec::new();
    data.try_reserve_exact(total)
        .map_err(|_| UdfError::Corrupt(format!("cannot allocate {total} bytes for a directory")))?;
    for ad in ads {
        let len = ad.unmasked_length() as usize;
        if ad.is_recorded() {
            data.extend_from_slice(&source.read_vec(partition.offset(ad.position), len)?);
        } else {
            data.resize(data.len() + len, 0);
        }
    }
    Ok(data)
}
