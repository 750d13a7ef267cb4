//! ECMA 167 and OSTA UDF 2.01 structures
//!
//! The handful of parsed structures needed to locate the file set and walk
//! the directory hierarchy of a UDF volume
//!
//! Every structure is decoded field by field from a byte buffer read off the
//! device; offsets are relative to the start of the descriptor and all
//! integers are little endian
//!
//! The paragraph number in the specifications is indicated in parentheses

use crate::{Result, SECTOR_SIZE, UdfError};
use std::fmt::Display;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, warn};

/// Crc calculator for Descriptor Tags
const TAG_CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_XMODEM);

/// Size of the fixed part of a File Entry, allocation data follows
pub const FILE_ENTRY_HEADER_LEN: usize = 176;

/// Size of the fixed part of a File Identifier Descriptor
pub const FID_HEADER_LEN: usize = 38;

/// Returns `length` bytes at `offset`, or a [`UdfError::Truncated`]
pub(crate) fn slice_at(buf: &[u8], offset: usize, length: usize) -> Result<&[u8]> {
    offset
        .checked_add(length)
        .and_then(|end| buf.get(offset..end))
        .ok_or(UdfError::Truncated {
            offset,
            length,
            available: buf.len(),
        })
}

/// Single byte `u8` reader
#[inline]
pub(crate) fn rdu8_at(buf: &[u8], offset: usize) -> Result<u8> {
    Ok(slice_at(buf, offset, 1)?[0])
}

/// Little endian `u16` reader
#[inline]
pub(crate) fn rdu16le_at(buf: &[u8], offset: usize) -> Result<u16> {
    let b = slice_at(buf, offset, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

/// Little endian `u32` reader
#[inline]
pub(crate) fn rdu32le_at(buf: &[u8], offset: usize) -> Result<u32> {
    let b = slice_at(buf, offset, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Little endian `u64` reader
#[inline]
pub(crate) fn rdu64le_at(buf: &[u8], offset: usize) -> Result<u64> {
    let b = slice_at(buf, offset, 8)?;
    let mut v = [0u8; 8];
    v.copy_from_slice(b);
    Ok(u64::from_le_bytes(v))
}

/// Keeps only the printable ASCII characters (32 to 126) of `bytes`
pub fn printable_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|b| (32..=126).contains(*b))
        .map(|b| char::from(*b))
        .collect()
}

/// Decodes a fixed-length character field (7.2.12) as printable ASCII
///
/// The last byte holds the recorded length, which includes the leading
/// compression id; 16 bit characters lose their zero high bytes to the filter
pub fn dstring(buf: &[u8]) -> String {
    if buf.len() < 2 {
        return String::new();
    }
    let mut len = usize::from(buf[buf.len() - 1]);
    if len == 0 {
        return String::new();
    }
    if len > buf.len() - 1 {
        warn!("Overflowing Dstring truncated");
        len = buf.len() - 1;
    }
    printable_ascii(&buf[1..len])
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Descriptor tag (7.2)
pub struct DescriptorTag {
    /// Tag Identifier
    pub identifier: u16,
    /// Descriptor Version
    pub version: u16,
    /// Tag Checksum
    pub checksum: u8,
    /// Tag Serial Number
    pub serial_number: u16,
    /// Descriptor CRC
    pub crc: u16,
    /// Descriptor CRC Length
    pub crclen: usize,
    /// Tag Location
    pub lba: u32,
}

impl DescriptorTag {
    /// Tag size
    pub const SIZE: usize = 16;
    /// Primary Volume Descriptor (3/10.1)
    pub const PRIMARY_VOLUME: u16 = 1;
    /// Anchor Volume Descriptor Pointer (3/10.2)
    pub const ANCHOR_POINTER: u16 = 2;
    /// Partition Descriptor (3/10.5)
    pub const PARTITION: u16 = 5;
    /// Logical Volume Descriptor (3/10.6)
    pub const LOGICAL_VOLUME: u16 = 6;
    /// Terminating Descriptor (3/10.9)
    pub const TERMINATING: u16 = 8;
    /// Logical Volume Integrity Descriptor (3/10.10)
    pub const LOGICAL_VOLUME_INTEGRITY: u16 = 9;
    /// File Set Descriptor (4/14.1)
    pub const FILE_SET: u16 = 256;
    /// File Identifier Descriptor (4/14.4)
    pub const FILE_IDENTIFIER: u16 = 257;
    /// File Entry (4/14.9)
    pub const FILE_ENTRY: u16 = 261;

    /// Decodes the tag found at `offset` in `buf`
    ///
    /// A checksum mismatch is only reported
    pub fn new(buf: &[u8], offset: usize) -> Result<Self> {
        let raw = slice_at(buf, offset, Self::SIZE)?;
        let computed_sum = raw
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 4)
            .fold(0u8, |acc, (_, b)| acc.wrapping_add(*b));
        let tag = Self {
            identifier: rdu16le_at(raw, 0)?,
            version: rdu16le_at(raw, 2)?,
            checksum: rdu8_at(raw, 4)?,
            serial_number: rdu16le_at(raw, 6)?,
            crc: rdu16le_at(raw, 8)?,
            crclen: usize::from(rdu16le_at(raw, 10)?),
            lba: rdu32le_at(raw, 12)?,
        };
        if tag.checksum != computed_sum {
            warn!(
                "Tag (id: {}) checksum mismatch ({:#04x} != {:#04x})",
                tag.identifier, tag.checksum, computed_sum
            );
        }
        Ok(tag)
    }

    /// Decodes the tag at `offset` and checks its identifier
    pub fn expect(buf: &[u8], offset: usize, expected: u16) -> Result<Self> {
        let tag = Self::new(buf, offset)?;
        if tag.identifier != expected {
            debug!(
                "Unexpected tag (id {}, lba {}) where {} was expected",
                tag.identifier, tag.lba, expected
            );
            return Err(UdfError::TagMismatch {
                expected,
                found: tag.identifier,
            });
        }
        Ok(tag)
    }

    /// Checks the descriptor CRC over the bytes following the tag at `offset`
    ///
    /// Returns `None` when the covered range is not entirely in `buf`
    pub fn crc_matches(&self, buf: &[u8], offset: usize) -> Option<bool> {
        let body = slice_at(buf, offset + Self::SIZE, self.crclen).ok()?;
        Some(TAG_CRC.checksum(body) == self.crc)
    }

    fn check_crc(&self, buf: &[u8], offset: usize) {
        match self.crc_matches(buf, offset) {
            Some(true) => {}
            Some(false) => warn!("Descriptor (id: {}) crc mismatch", self.identifier),
            None => debug!(
                "Descriptor (id: {}) crc length {} exceeds the buffer",
                self.identifier, self.crclen
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Extent Descriptor (3/7.1), in absolute sectors
pub struct ExtentAD {
    /// Extent Length
    pub length: u32,
    /// Extent Location
    pub lba: u32,
}

impl ExtentAD {
    fn new(buf: &[u8], offset: usize) -> Result<Self> {
        Ok(Self {
            length: rdu32le_at(buf, offset)?,
            lba: rdu32le_at(buf, offset + 4)?,
        })
    }

    /// Whether both length and location are set
    pub fn is_set(&self) -> bool {
        self.length != 0 && self.lba != 0
    }
}

const AD_TYPE_MASK: u32 = 0xc000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Short Allocation Descriptor (4/14.14.1)
pub struct ShortAD {
    /// Extent Length (including the extent type bits)
    pub length: u32,
    /// Extent Position, in logical blocks from the partition start
    pub position: u32,
}

impl ShortAD {
    /// Descriptor size
    pub const SIZE: usize = 8;

    /// Decodes the descriptor at `offset`
    pub fn new(buf: &[u8], offset: usize) -> Result<Self> {
        Ok(Self {
            length: rdu32le_at(buf, offset)?,
            position: rdu32le_at(buf, offset + 4)?,
        })
    }

    /// Extent length in bytes
    pub fn unmasked_length(&self) -> u32 {
        self.length & !AD_TYPE_MASK
    }

    /// Whether the extent is recorded and allocated
    pub fn is_recorded(&self) -> bool {
        self.length & AD_TYPE_MASK == 0
    }

    /// Whether the extent points to the next extent of allocation descriptors
    pub fn is_continuation(&self) -> bool {
        self.length & AD_TYPE_MASK == AD_TYPE_MASK
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Long Allocation Descriptor (4/14.14.2)
pub struct LongAD {
    /// Extent Length (including the extent type bits)
    pub length: u32,
    /// Logical Block Number
    pub lba: u32,
    /// Partition Reference Number
    pub part_num: u16,
    /// Implementation Use
    pub impl_use: [u8; 6],
}

impl LongAD {
    /// Descriptor size
    pub const SIZE: usize = 16;

    /// Decodes the descriptor at `offset`
    pub fn new(buf: &[u8], offset: usize) -> Result<Self> {
        let mut impl_use = [0u8; 6];
        impl_use.copy_from_slice(slice_at(buf, offset + 10, 6)?);
        Ok(Self {
            length: rdu32le_at(buf, offset)?,
            lba: rdu32le_at(buf, offset + 4)?,
            part_num: rdu16le_at(buf, offset + 8)?,
            impl_use,
        })
    }

    /// Extent length in bytes
    pub fn unmasked_length(&self) -> u32 {
        self.length & !AD_TYPE_MASK
    }

    fn to_short(self) -> ShortAD {
        ShortAD {
            length: self.length,
            position: self.lba,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// UDF date and time (1/7.3)
pub enum UdfDate {
    /// The datetime is present, valid and carries TZ info
    ValidTz(time::OffsetDateTime),
    /// The datetime is present, valid and is naive
    ValidNoTz(time::PrimitiveDateTime),
    /// The datetime is missing
    Unset,
    /// The datetime is present but not valid
    Invalid,
}

impl UdfDate {
    /// Timestamp size
    pub const SIZE: usize = 12;

    /// Decodes the timestamp at `offset`
    pub fn new(buf: &[u8], offset: usize) -> Result<Self> {
        let raw = slice_at(buf, offset, Self::SIZE)?;
        let ty_tz = rdu16le_at(raw, 0)?;
        let yr = rdu16le_at(raw, 2)?;
        let [mo, da, hr, mi, se, cs, hs, us] = [
            raw[4], raw[5], raw[6], raw[7], raw[8], raw[9], raw[10], raw[11],
        ];
        if ty_tz == 0 && yr == 0 && [mo, da, hr, mi, se, cs, hs, us].iter().all(|v| *v == 0) {
            return Ok(Self::Unset);
        }
        if ty_tz >> 12 != 1 {
            // All timestamps shall be recorded in local time.
            return Ok(Self::Invalid);
        }
        let mo = match time::Month::try_from(mo) {
            Ok(v) => v,
            Err(_) => return Ok(Self::Invalid),
        };
        let date = match time::Date::from_calendar_date(i32::from(yr as i16), mo, da) {
            Ok(v) => v,
            Err(_) => return Ok(Self::Invalid),
        };
        if cs > 99 || hs > 99 || us > 99 {
            return Ok(Self::Invalid);
        }
        let us = u32::from(us) + u32::from(hs) * 100 + u32::from(cs) * 10000;
        let time = match time::Time::from_hms_micro(hr, mi, se, us) {
            Ok(v) => v,
            Err(_) => return Ok(Self::Invalid),
        };
        let dt = time::PrimitiveDateTime::new(date, time);
        if ty_tz & 0b1111_1111_1111 == 0b1000_0000_0001 {
            // -2047: no timezone specified
            return Ok(Self::ValidNoTz(dt));
        }
        // 12 bit two's complement, in minutes
        let tz = ((ty_tz << 4) as i16) >> 4;
        if !(-1440..=1440).contains(&tz) {
            return Ok(Self::Invalid);
        }
        let offset = match time::UtcOffset::from_whole_seconds(i32::from(tz) * 60) {
            Ok(v) => v,
            Err(_) => return Ok(Self::Invalid),
        };
        Ok(Self::ValidTz(dt.assume_offset(offset)))
    }

    /// Returns a string representation, if possible
    pub fn to_string_maybe(&self) -> Option<String> {
        match self {
            Self::ValidTz(t) => Some(t.to_string()),
            Self::ValidNoTz(t) => Some(t.to_string()),
            Self::Unset => None,
            Self::Invalid => Some("INVALID".to_string()),
        }
    }

    /// Returns the unix_timestamp, if possible
    pub fn to_ts_maybe(&self) -> Option<i64> {
        match self {
            Self::ValidTz(t) => Some(t.unix_timestamp()),
            Self::ValidNoTz(t) => Some(t.assume_offset(time::UtcOffset::UTC).unix_timestamp()),
            Self::Unset => None,
            Self::Invalid => Some(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Entity Identifier (1/7.4)
pub struct EntityId {
    /// Flags
    pub flags: u8,
    /// Identifier, printable characters only
    pub identifier: String,
    /// Identifier Suffix
    pub suffix: [u8; 8],
}

impl EntityId {
    /// Entity Identifier size
    pub const SIZE: usize = 32;

    fn new(buf: &[u8], offset: usize) -> Result<Self> {
        let raw = slice_at(buf, offset, Self::SIZE)?;
        let mut suffix = [0u8; 8];
        suffix.copy_from_slice(&raw[24..32]);
        Ok(Self {
            flags: raw[0],
            identifier: printable_ascii(&raw[1..24]),
            suffix,
        })
    }

    /// Checks for the OSTA UDF domain (UDF 2.1.5.2)
    pub fn is_osta_udf_compliant(&self) -> bool {
        self.identifier == "*OSTA UDF Compliant"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
/// The UDF revision announced by the Volume Recognition Sequence
pub enum UdfRevision {
    /// NSR02
    #[serde(rename = "1.02")]
    V102,
    /// NSR03
    #[serde(rename = "2.01")]
    V201,
}

impl UdfRevision {
    /// The revision number as text
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V102 => "1.02",
            Self::V201 => "2.01",
        }
    }
}

impl Display for UdfRevision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Volume Recognition Sequence (2/8.3)
///
/// Three consecutive Volume Structure Descriptors: a Beginning Extended Area
/// Descriptor, an NSR Descriptor and a Terminating Extended Area Descriptor
pub struct RecognitionSequence;

impl RecognitionSequence {
    /// Size of the three descriptors
    pub const SIZE: usize = 3 * SECTOR_SIZE as usize;

    fn identifier(buf: &[u8], n: usize) -> Option<&[u8]> {
        buf.get(n * SECTOR_SIZE as usize + 1..n * SECTOR_SIZE as usize + 6)
    }

    /// Checks the triplet in `buf` and returns the announced revision
    pub fn recognize(buf: &[u8]) -> Option<UdfRevision> {
        if Self::identifier(buf, 0)? != b"BEA01" || Self::identifier(buf, 2)? != b"TEA01" {
            return None;
        }
        match Self::identifier(buf, 1)? {
            b"NSR02" => Some(UdfRevision::V102),
            b"NSR03" => Some(UdfRevision::V201),
            _ => None,
        }
    }
}

#[derive(Debug)]
/// Anchor Volume Descriptor Pointer (3/10.2)
pub struct AnchorVolumeDescriptorPointer {
    /// Main Volume Descriptor Sequence Extent
    pub main: ExtentAD,
    /// Reserve Volume Descriptor Sequence Extent
    pub reserve: ExtentAD,
}

impl AnchorVolumeDescriptorPointer {
    /// Descriptor size
    pub const SIZE: usize = 512;

    /// Decodes the anchor in `buf`
    #[instrument(skip_all)]
    pub fn new(buf: &[u8]) -> Result<Self> {
        let tag = DescriptorTag::expect(buf, 0, DescriptorTag::ANCHOR_POINTER)?;
        tag.check_crc(buf, 0);
        Ok(Self {
            main: ExtentAD::new(buf, 16)?,
            reserve: ExtentAD::new(buf, 24)?,
        })
    }

    /// The Volume Descriptor Sequence to use: main if set, otherwise reserve
    pub fn sequence_extent(&self) -> Option<ExtentAD> {
        if self.main.is_set() {
            Some(self.main)
        } else if self.reserve.is_set() {
            debug!("Main Volume Descriptor Sequence unset, using the reserve");
            Some(self.reserve)
        } else {
            None
        }
    }
}

/// Prevailing rules of descriptors recorded more than once in a sequence
pub(crate) trait Sequenced {
    fn sequence_number(&self) -> u32;

    fn prevails_over(&self, other: &Self) -> bool {
        self.sequence_number() > other.sequence_number()
    }
}

/// Stores `item` unless an already found descriptor prevails
pub(crate) fn maybe_replace<T: Sequenced>(item: T, slot: &mut Option<T>) {
    match slot {
        Some(previous) if !item.prevails_over(previous) => {
            debug!("Ignoring non-prevailing descriptor");
        }
        _ => *slot = Some(item),
    }
}

#[derive(Debug)]
/// Primary Volume Descriptor (3/10.1)
pub struct PrimaryVolumeDescriptor {
    /// Volume Descriptor Sequence Number
    pub desc_sequence_number: u32,
    /// Primary Volume Descriptor Number
    pub number: u32,
    /// Volume Identifier
    pub identifier: String,
    /// Volume Set Identifier
    pub set_identifier: String,
    /// Recording Date and Time
    pub datetime: UdfDate,
}

impl PrimaryVolumeDescriptor {
    /// Decodes the descriptor in `buf`
    #[instrument(skip_all)]
    pub fn new(buf: &[u8]) -> Result<Self> {
        let tag = DescriptorTag::expect(buf, 0, DescriptorTag::PRIMARY_VOLUME)?;
        tag.check_crc(buf, 0);
        Ok(Self {
            desc_sequence_number: rdu32le_at(buf, 16)?,
            number: rdu32le_at(buf, 20)?,
            identifier: dstring(slice_at(buf, 24, 32)?),
            set_identifier: dstring(slice_at(buf, 72, 128)?),
            datetime: UdfDate::new(buf, 376)?,
        })
    }
}

impl Sequenced for PrimaryVolumeDescriptor {
    fn sequence_number(&self) -> u32 {
        self.desc_sequence_number
    }
}

#[derive(Debug)]
/// Partition Descriptor (3/10.5)
pub struct PartitionDescriptor {
    /// Volume Descriptor Sequence Number
    pub desc_sequence_number: u32,
    /// Partition Flags
    pub flags: u16,
    /// Partition Number
    pub partition_number: u16,
    /// Access Type
    pub access_type: u32,
    /// Partition Starting Location
    pub partition_starting_location: u32,
    /// Partition Length
    pub partition_length: u32,
}

impl PartitionDescriptor {
    /// Decodes the descriptor in `buf`
    #[instrument(skip_all)]
    pub fn new(buf: &[u8]) -> Result<Self> {
        let tag = DescriptorTag::expect(buf, 0, DescriptorTag::PARTITION)?;
        tag.check_crc(buf, 0);
        Ok(Self {
            desc_sequence_number: rdu32le_at(buf, 16)?,
            flags: rdu16le_at(buf, 20)?,
            partition_number: rdu16le_at(buf, 22)?,
            access_type: rdu32le_at(buf, 184)?,
            partition_starting_location: rdu32le_at(buf, 188)?,
            partition_length: rdu32le_at(buf, 192)?,
        })
    }
}

impl Sequenced for PartitionDescriptor {
    fn sequence_number(&self) -> u32 {
        self.desc_sequence_number
    }
}

#[derive(Debug)]
/// Logical Volume Descriptor (3/10.6)
pub struct LogicalVolumeDescriptor {
    /// Volume Descriptor Sequence Number
    pub desc_sequence_number: u32,
    /// Logical Volume Identifier
    pub identifier: String,
    /// Logical Block Size
    pub block_size: u32,
    /// Domain Identifier
    pub domain: EntityId,
    /// Logical Volume Contents Use: the File Set Descriptor location
    pub root_desc: LongAD,
    /// Map Table Length
    pub map_table_length: u32,
    /// Number of Partition Maps
    pub n_partition_maps: u32,
    /// Integrity Sequence Extent
    pub integrity_seq_extent: ExtentAD,
}

impl LogicalVolumeDescriptor {
    /// Decodes the descriptor in `buf`
    #[instrument(skip_all)]
    pub fn new(buf: &[u8]) -> Result<Self> {
        let tag = DescriptorTag::expect(buf, 0, DescriptorTag::LOGICAL_VOLUME)?;
        tag.check_crc(buf, 0);
        Ok(Self {
            desc_sequence_number: rdu32le_at(buf, 16)?,
            identifier: dstring(slice_at(buf, 84, 128)?),
            block_size: rdu32le_at(buf, 212)?,
            domain: EntityId::new(buf, 216)?,
            root_desc: LongAD::new(buf, 248)?,
            map_table_length: rdu32le_at(buf, 264)?,
            n_partition_maps: rdu32le_at(buf, 268)?,
            integrity_seq_extent: ExtentAD::new(buf, 432)?,
        })
    }
}

impl Sequenced for LogicalVolumeDescriptor {
    fn sequence_number(&self) -> u32 {
        self.desc_sequence_number
    }
}

#[derive(Debug)]
/// Logical Volume Integrity Descriptor (3/10.10)
pub struct LogicalVolumeIntegrityDescriptor {
    /// Recording Date and Time
    pub datetime: UdfDate,
    /// Integrity Type (0: open, 1: close)
    pub integrity_type: u32,
    /// Free Space Table, in logical blocks per partition
    pub free_space: Vec<u32>,
    /// Size Table, in logical blocks per partition
    pub size: Vec<u32>,
}

impl LogicalVolumeIntegrityDescriptor {
    /// Decodes the descriptor in `buf`
    #[instrument(skip_all)]
    pub fn new(buf: &[u8]) -> Result<Self> {
        let tag = DescriptorTag::expect(buf, 0, DescriptorTag::LOGICAL_VOLUME_INTEGRITY)?;
        tag.check_crc(buf, 0);
        let n_partitions = rdu32le_at(buf, 72)? as usize;
        // Both tables must fit in the buffer
        slice_at(buf, 80, n_partitions.saturating_mul(8))?;
        let table = |start: usize| -> Result<Vec<u32>> {
            (0..n_partitions)
                .map(|i| rdu32le_at(buf, start + 4 * i))
                .collect()
        };
        Ok(Self {
            datetime: UdfDate::new(buf, 16)?,
            integrity_type: rdu32le_at(buf, 28)?,
            free_space: table(80)?,
            size: table(80 + 4 * n_partitions)?,
        })
    }
}

#[derive(Debug)]
/// File Set Descriptor (4/14.1)
pub struct FileSetDescriptor {
    /// Recording Date and Time
    pub recording_datetime: UdfDate,
    /// File Set Number
    pub fileset_number: u32,
    /// Logical Volume Identifier
    pub lv_id: String,
    /// File Set Identifier
    pub fileset_id: String,
    /// Root Directory ICB
    pub root_dir_icb: LongAD,
}

impl FileSetDescriptor {
    /// Offset of the Root Directory ICB
    pub const ROOT_ICB_OFFSET: usize = 400;

    /// Decodes the descriptor in `buf`
    #[instrument(skip_all)]
    pub fn new(buf: &[u8]) -> Result<Self> {
        let tag = DescriptorTag::expect(buf, 0, DescriptorTag::FILE_SET)?;
        tag.check_crc(buf, 0);
        Ok(Self {
            recording_datetime: UdfDate::new(buf, 16)?,
            fileset_number: rdu32le_at(buf, 40)?,
            lv_id: dstring(slice_at(buf, 112, 128)?),
            fileset_id: dstring(slice_at(buf, 304, 32)?),
            root_dir_icb: LongAD::new(buf, Self::ROOT_ICB_OFFSET)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Indicates where the data of a File Entry lives
pub enum DataLocation {
    /// Partition relative extents, in recording order
    Extents(Vec<ShortAD>),
    /// The data is embedded inside the File Entry
    Embedded(Vec<u8>),
}

impl DataLocation {
    /// Total size of the data in bytes
    pub fn len(&self) -> u64 {
        match self {
            Self::Extents(ads) => ads.iter().map(|ad| u64::from(ad.unmasked_length())).sum(),
            Self::Embedded(data) => data.len() as u64,
        }
    }

    /// Whether there is no data at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
/// The fixed part of a File Entry (4/14.9)
pub struct FileEntryHeader {
    /// ICB Tag File Type
    pub file_type: u8,
    /// ICB Tag Flags
    pub icb_flags: u16,
    /// Information Length
    pub information_length: u64,
    /// Access Date and Time
    pub access_time: UdfDate,
    /// Modification Date and Time
    pub modification_time: UdfDate,
    /// Attribute Date and Time
    pub attribute_time: UdfDate,
    /// Length of Extended Attributes
    pub ea_len: u32,
    /// Length of Allocation Descriptors
    pub ad_len: u32,
}

impl FileEntryHeader {
    /// Decodes the header of the File Entry in `buf`
    #[instrument(skip_all)]
    pub fn new(buf: &[u8]) -> Result<Self> {
        let tag = DescriptorTag::expect(buf, 0, DescriptorTag::FILE_ENTRY)?;
        tag.check_crc(buf, 0);
        Ok(Self {
            file_type: rdu8_at(buf, 27)?,
            icb_flags: rdu16le_at(buf, 34)?,
            information_length: rdu64le_at(buf, 56)?,
            access_time: UdfDate::new(buf, 72)?,
            modification_time: UdfDate::new(buf, 84)?,
            attribute_time: UdfDate::new(buf, 96)?,
            ea_len: rdu32le_at(buf, 168)?,
            ad_len: rdu32le_at(buf, 172)?,
        })
    }

    /// Decodes the allocation descriptors that follow the extended attributes
    ///
    /// A zero length descriptor terminates the list
    pub fn data_location(&self, buf: &[u8]) -> Result<DataLocation> {
        let start = FILE_ENTRY_HEADER_LEN
            .checked_add(self.ea_len as usize)
            .ok_or_else(|| UdfError::Corrupt("extended attributes length overflow".into()))?;
        let ads = slice_at(buf, start, self.ad_len as usize)?;
        let shorts: Vec<ShortAD> = match self.icb_flags & 0b111 {
            0 => ads
                .chunks_exact(ShortAD::SIZE)
                .map(|c| ShortAD::new(c, 0))
                .collect::<Result<_>>()?,
            1 => ads
                .chunks_exact(LongAD::SIZE)
                .map(|c| LongAD::new(c, 0).map(LongAD::to_short))
                .collect::<Result<_>>()?,
            3 => return Ok(DataLocation::Embedded(ads.to_vec())),
            v => {
                return Err(UdfError::Unsupported(format!(
                    "allocation descriptor type {v}"
                )));
            }
        };
        let shorts: Vec<ShortAD> = shorts
            .into_iter()
            .take_while(|ad| ad.unmasked_length() != 0)
            .collect();
        if shorts.iter().any(ShortAD::is_continuation) {
            return Err(UdfError::Unsupported(
                "continuation allocation descriptor".into(),
            ));
        }
        Ok(DataLocation::Extents(shorts))
    }

    /// Checks if the ICB Tag refers to a directory
    pub fn is_directory(&self) -> bool {
        self.file_type == 4
    }
}

#[derive(Debug, Clone)]
/// File Identifier Descriptor (4/14.4)
pub struct FileIdentifierDescriptor {
    /// File Characteristics
    pub characteristics: u8,
    /// ICB of the File Entry
    pub icb: LongAD,
    /// File Identifier, printable ASCII only
    pub identifier: String,
    /// Recorded size, padding included
    pub total_length: usize,
}

impl FileIdentifierDescriptor {
    /// Decodes the record starting at `offset` in `buf`
    pub fn new(buf: &[u8], offset: usize) -> Result<Self> {
        let tag = DescriptorTag::expect(buf, offset, DescriptorTag::FILE_IDENTIFIER)?;
        let characteristics = rdu8_at(buf, offset + 18)?;
        let id_len = usize::from(rdu8_at(buf, offset + 19)?);
        let icb = LongAD::new(buf, offset + 20)?;
        let iu_len = usize::from(rdu16le_at(buf, offset + 36)?);
        let total_length = Self::padded_length(id_len, iu_len);
        let identifier =
            printable_ascii(slice_at(buf, offset + FID_HEADER_LEN + iu_len, id_len)?);
        if tag.crc_matches(buf, offset) == Some(false) {
            warn!("File Identifier Descriptor \"{identifier}\" crc mismatch");
        }
        Ok(Self {
            characteristics,
            icb,
            identifier,
            total_length,
        })
    }

    /// Size of a record with the given identifier and implementation use
    /// lengths, rounded up to a multiple of 4
    pub fn padded_length(id_len: usize, iu_len: usize) -> usize {
        let len = FID_HEADER_LEN + id_len + iu_len;
        len.div_ceil(4) * 4
    }

    /// Whether the record names a directory
    pub fn is_directory(&self) -> bool {
        self.characteristics & 0b10 != 0
    }

    /// Whether the record is marked as deleted
    pub fn is_deleted(&self) -> bool {
        self.characteristics & 0b100 != 0
    }

    /// Whether the record is the parent directory link
    pub fn is_parent(&self) -> bool {
        self.characteristics & 0b1000 != 0
    }
}
