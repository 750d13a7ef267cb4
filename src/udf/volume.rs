//! Volume bootstrap
//!
//! Locates the partition and the root directory of a UDF volume by walking,
//! in order, the Volume Recognition Sequence, the Anchor Volume Descriptor
//! Pointer, the Volume Descriptor Sequence and the File Set Descriptor

use super::ecma167::*;
use crate::stream::BlockSource;
use crate::{Result, SECTOR_SIZE, Stage, UdfError};
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, warn};

/// Sector of the Anchor Volume Descriptor Pointer
pub const ANCHOR_SECTOR: u64 = 256;

/// Sectors where the Volume Recognition Sequence is searched
const RECOGNITION_WINDOW: std::ops::Range<u64> = 16..32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Geometry of the (single) partition of the volume
pub struct Partition {
    /// Partition Number
    pub number: u16,
    /// First sector of the partition
    pub start_sector: u32,
    /// Partition length, in sectors
    pub length: u32,
    /// Logical Block Size
    pub block_size: u32,
}

impl Partition {
    /// Absolute byte offset of a partition relative logical block
    pub fn offset(&self, block: u32) -> u64 {
        u64::from(self.start_sector) * SECTOR_SIZE
            + u64::from(block) * u64::from(self.block_size)
    }
}

#[derive(Debug, Clone)]
/// Volume metadata gathered during the bootstrap
pub struct VolumeInfo {
    /// Volume Identifier, printable characters only
    pub name: String,
    /// Recording Date and Time of the Primary Volume Descriptor
    pub recording_time: UdfDate,
    /// UDF revision announced by the NSR descriptor
    pub revision: UdfRevision,
    /// First sector of the partition
    pub partition_start: u32,
    /// Partition length, in sectors
    pub partition_length: u32,
    /// Logical Block Size
    pub block_size: u32,
    /// Number of Partition Maps
    pub partition_maps: u32,
    /// Logical Volume Identifier
    pub logical_volume_id: String,
    /// File Set Identifier
    pub fileset_id: String,
    /// First sector of the Logical Volume Integrity Sequence, if recorded
    pub integrity: Option<Vec<u8>>,
}

#[derive(Debug)]
/// Result of a successful bootstrap
pub struct Bootstrap {
    /// Volume metadata
    pub info: VolumeInfo,
    /// Partition geometry
    pub partition: Partition,
    /// Address of the root directory File Entry
    pub root_icb: LongAD,
}

/// Bootstraps the volume found in `source`
///
/// Each failure carries the [`Stage`] it occurred in; nothing is retried
#[instrument(skip_all)]
pub fn locate<S: BlockSource>(source: &mut S) -> Result<Bootstrap> {
    let revision = recognize(source).map_err(|e| e.at_stage(Stage::Recognition))?;
    let extent = read_anchor(source).map_err(|e| e.at_stage(Stage::Anchor))?;
    let vds = scan_sequence(source, &extent).map_err(|e| e.at_stage(Stage::VolumeSequence))?;
    let partition = Partition {
        number: vds.pd.partition_number,
        start_sector: vds.pd.partition_starting_location,
        length: vds.pd.partition_length,
        block_size: vds.lvd.block_size,
    };
    let fsd = read_file_set(source, &partition, &vds.lvd.root_desc)
        .map_err(|e| e.at_stage(Stage::RootDirectory))?;
    let (name, recording_time) = match vds.pvd {
        Some(pvd) => (pvd.identifier, pvd.datetime),
        None => {
            warn!("No Primary Volume Descriptor found");
            (String::new(), UdfDate::Unset)
        }
    };
    let info = VolumeInfo {
        name,
        recording_time,
        revision,
        partition_start: partition.start_sector,
        partition_length: partition.length,
        block_size: partition.block_size,
        partition_maps: vds.lvd.n_partition_maps,
        logical_volume_id: vds.lvd.identifier,
        fileset_id: fsd.fileset_id,
        integrity: vds.integrity,
    };
    info!(
        "UDF {} volume \"{}\" (partition at sector {}, {} sectors, block size {})",
        info.revision, info.name, info.partition_start, info.partition_length, info.block_size
    );
    Ok(Bootstrap {
        info,
        partition,
        root_icb: fsd.root_dir_icb,
    })
}

/// Finds the first valid recognition triplet in the search window
fn recognize<S: BlockSource>(source: &mut S) -> Result<UdfRevision> {
    for sector in RECOGNITION_WINDOW {
        let buf = source.read_vec(sector * SECTOR_SIZE, RecognitionSequence::SIZE)?;
        if let Some(revision) = RecognitionSequence::recognize(&buf) {
            debug!("Volume Recognition Sequence at sector {sector} (UDF {revision})");
            return Ok(revision);
        }
    }
    Err(UdfError::Corrupt(
        "UDF recognition sequence not found - not an UDF volume".into(),
    ))
}

/// Reads the anchor and picks the Volume Descriptor Sequence extent
fn read_anchor<S: BlockSource>(source: &mut S) -> Result<ExtentAD> {
    let buf = source.read_vec(
        ANCHOR_SECTOR * SECTOR_SIZE,
        AnchorVolumeDescriptorPointer::SIZE,
    )?;
    let anchor = AnchorVolumeDescriptorPointer::new(&buf)?;
    debug!("Anchor Volume Descriptor Pointer: {anchor:?}");
    anchor
        .sequence_extent()
        .ok_or_else(|| UdfError::Corrupt("anchor corrupted".into()))
}

/// The prevailing descriptors of a Volume Descriptor Sequence
struct SequenceDescriptors {
    pd: PartitionDescriptor,
    lvd: LogicalVolumeDescriptor,
    pvd: Option<PrimaryVolumeDescriptor>,
    integrity: Option<Vec<u8>>,
}

fn scan_sequence<S: BlockSource>(source: &mut S, extent: &ExtentAD) -> Result<SequenceDescriptors> {
    let mut pd: Option<PartitionDescriptor> = None;
    let mut lvd: Option<LogicalVolumeDescriptor> = None;
    let mut pvd: Option<PrimaryVolumeDescriptor> = None;

    let start = u64::from(extent.lba);
    // The last sector of the extent is left out
    let end = start + u64::from(extent.length.saturating_sub(1)) / SECTOR_SIZE;
    let mut sector = start;
    while sector != end {
        let offset = sector * SECTOR_SIZE;
        let head = source.read_vec(offset, DescriptorTag::SIZE)?;
        let tag = DescriptorTag::new(&head, 0)?;
        match tag.identifier {
            DescriptorTag::PRIMARY_VOLUME => {
                let buf = source.read_vec(offset, SECTOR_SIZE as usize)?;
                let desc = PrimaryVolumeDescriptor::new(&buf)?;
                debug!("{desc:?}");
                maybe_replace(desc, &mut pvd);
            }
            DescriptorTag::PARTITION => {
                let buf = source.read_vec(offset, SECTOR_SIZE as usize)?;
                let desc = PartitionDescriptor::new(&buf)?;
                debug!("{desc:?}");
                maybe_replace(desc, &mut pd);
            }
            DescriptorTag::LOGICAL_VOLUME => {
                let buf = source.read_vec(offset, SECTOR_SIZE as usize)?;
                let desc = LogicalVolumeDescriptor::new(&buf)?;
                debug!("{desc:?}");
                maybe_replace(desc, &mut lvd);
            }
            DescriptorTag::TERMINATING => {
                debug!("Terminating Descriptor at sector {sector}");
            }
            other => {
                debug!("Skipping descriptor {other} at sector {sector}");
            }
        }
        sector += 1;
    }

    let pd = pd.ok_or_else(|| UdfError::Corrupt("Partition Descriptor not found".into()))?;
    let lvd =
        lvd.ok_or_else(|| UdfError::Corrupt("Logical Volume Descriptor not found".into()))?;
    if !lvd.block_size.is_power_of_two() || !(512..=32768).contains(&lvd.block_size) {
        return Err(UdfError::Corrupt(format!(
            "invalid logical block size {}",
            lvd.block_size
        )));
    }
    if !lvd.domain.is_osta_udf_compliant() {
        debug!("Logical volume domain \"{}\" is not OSTA", lvd.domain.identifier);
    }
    if lvd.n_partition_maps > 1 {
        warn!(
            "{} partition maps recorded, only the first partition is used",
            lvd.n_partition_maps
        );
    }
    let integrity = if lvd.integrity_seq_extent.length != 0 {
        let offset = u64::from(lvd.integrity_seq_extent.lba) * SECTOR_SIZE;
        Some(source.read_vec(offset, SECTOR_SIZE as usize)?)
    } else {
        debug!("No Logical Volume Integrity Sequence recorded");
        None
    };
    Ok(SequenceDescriptors {
        pd,
        lvd,
        pvd,
        integrity,
    })
}

fn read_file_set<S: BlockSource>(
    source: &mut S,
    partition: &Partition,
    location: &LongAD,
) -> Result<FileSetDescriptor> {
    let buf = source.read_vec(
        partition.offset(location.lba),
        partition.block_size as usize,
    )?;
    let fsd = FileSetDescriptor::new(&buf)?;
    debug!("File Set Descriptor: {fsd:?}");
    Ok(fsd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_offsets() {
        let p = Partition {
            number: 0,
            start_sector: 257,
            length: 1000,
            block_size: 2048,
        };
        assert_eq!(p.offset(0), 257 * 2048);
        assert_eq!(p.offset(3), 260 * 2048);
        let p = Partition {
            block_size: 512,
            ..p
        };
        assert_eq!(p.offset(3), 257 * 2048 + 3 * 512);
    }
}
