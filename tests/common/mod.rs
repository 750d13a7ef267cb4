//! In-memory UDF image builder and instrumented block source
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Cursor;
use std::rc::Rc;
use udfread::stream::{BlockSource, DataStream};

pub const SECTOR: usize = 2048;
pub const VRS_SECTOR: u32 = 16;
pub const ANCHOR_SECTOR: u32 = 256;
pub const MAIN_VDS_SECTOR: u32 = 32;
pub const RESERVE_VDS_SECTOR: u32 = 48;
pub const LVID_SECTOR: u32 = 64;
pub const PARTITION_START: u32 = 300;

const TAG_CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_XMODEM);

/// Local time, UTC+2
const MTIME: [u8; 12] = [0x78, 0x10, 0xe7, 0x07, 9, 16, 16, 20, 53, 0, 0, 0];

pub enum Node {
    File { name: Vec<u8>, data: Vec<u8> },
    Embedded { name: Vec<u8>, data: Vec<u8> },
    Dir { name: Vec<u8>, children: Vec<Node> },
}

impl Node {
    pub fn file(name: &str, data: &[u8]) -> Self {
        Self::File {
            name: name.as_bytes().to_vec(),
            data: data.to_vec(),
        }
    }

    pub fn raw_file(name: &[u8], data: &[u8]) -> Self {
        Self::File {
            name: name.to_vec(),
            data: data.to_vec(),
        }
    }

    pub fn embedded(name: &str, data: &[u8]) -> Self {
        Self::Embedded {
            name: name.as_bytes().to_vec(),
            data: data.to_vec(),
        }
    }

    pub fn dir(name: &str, children: Vec<Node>) -> Self {
        Self::Dir {
            name: name.as_bytes().to_vec(),
            children,
        }
    }

    fn name(&self) -> &[u8] {
        match self {
            Self::File { name, .. } | Self::Embedded { name, .. } | Self::Dir { name, .. } => name,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Descriptor {
    Primary,
    Partition,
    LogicalVolume,
    Terminating,
}

/// Where things landed in the built image
#[derive(Default, Debug)]
pub struct Layout {
    /// Absolute offset of the File Set Descriptor
    pub fsd_offset: usize,
    /// Absolute offset of each File Entry, by path
    pub fe_offsets: HashMap<String, usize>,
    /// Absolute offset of each directory's FID stream, by path
    pub dir_offsets: HashMap<String, usize>,
    /// Absolute offsets of each FID, by path of the named entry
    pub fid_offsets: HashMap<String, usize>,
}

pub struct Image {
    pub data: Vec<u8>,
    pub layout: Layout,
}

impl Image {
    pub fn source(&self) -> DataStream<Cursor<Vec<u8>>> {
        DataStream::new(Cursor::new(self.data.clone()))
    }

    pub fn recording_source(&self) -> (RecordingSource<DataStream<Cursor<Vec<u8>>>>, Reads) {
        RecordingSource::new(self.source())
    }
}

pub struct UdfImageBuilder {
    pub root: Vec<Node>,
    pub volume_id: String,
    pub nsr: &'static [u8; 5],
    pub vrs_sector: Option<u32>,
    pub main_in_anchor: bool,
    pub write_main: bool,
    pub sequence: Vec<Descriptor>,
    pub vds_sectors: u32,
    pub lvid: Option<(u32, u32)>,
    pub max_extent: usize,
}

impl UdfImageBuilder {
    pub fn new(root: Vec<Node>) -> Self {
        Self {
            root,
            volume_id: "TESTVOL".to_string(),
            nsr: b"NSR03",
            vrs_sector: Some(VRS_SECTOR),
            main_in_anchor: true,
            write_main: true,
            sequence: vec![
                Descriptor::Primary,
                Descriptor::Partition,
                Descriptor::LogicalVolume,
                Descriptor::Terminating,
            ],
            vds_sectors: 16,
            lvid: Some((1000, 4000)),
            max_extent: usize::MAX,
        }
    }

    pub fn build(self) -> Image {
        let mut w = Writer {
            data: vec![0u8; (PARTITION_START as usize) * SECTOR],
            next_block: 0,
            layout: Layout::default(),
            max_extent: self.max_extent,
        };

        if let Some(s) = self.vrs_sector {
            for (i, id) in [b"BEA01", self.nsr, b"TEA01"].iter().enumerate() {
                let off = (s as usize + i) * SECTOR;
                w.data[off + 1..off + 6].copy_from_slice(*id);
                w.data[off + 6] = 1;
            }
        }

        // Partition contents: FSD, root FE, then the tree
        let fsd_block = w.alloc(1);
        let root_fe_block = w.alloc(1);
        w.place_dir(&self.root, root_fe_block, root_fe_block, "");
        let partition_length = w.next_block;
        {
            let fsd = w.block_mut(fsd_block);
            put_dstring(&mut fsd[304..336], "FILESET");
            put_u32(fsd, 400, SECTOR as u32);
            put_u32(fsd, 404, root_fe_block);
            write_tag(fsd, 256, fsd_block, 496);
        }
        w.layout.fsd_offset = w.block_offset(fsd_block);

        // Volume descriptor sequences
        let mut seqs = vec![RESERVE_VDS_SECTOR];
        if self.write_main {
            seqs.push(MAIN_VDS_SECTOR);
        }
        for start in seqs {
            for (i, desc) in self.sequence.iter().enumerate() {
                let sector = start + i as u32;
                let off = sector as usize * SECTOR;
                let buf = &mut w.data[off..off + SECTOR];
                match desc {
                    Descriptor::Primary => {
                        put_u32(buf, 16, 1);
                        put_dstring(&mut buf[24..56], &self.volume_id);
                        buf[376..388].copy_from_slice(&MTIME);
                        write_tag(buf, 1, sector, 496);
                    }
                    Descriptor::Partition => {
                        put_u32(buf, 16, 2);
                        put_u32(buf, 188, PARTITION_START);
                        put_u32(buf, 192, partition_length);
                        write_tag(buf, 5, sector, 496);
                    }
                    Descriptor::LogicalVolume => {
                        put_u32(buf, 16, 3);
                        put_dstring(&mut buf[84..212], "LOGICALVOL");
                        put_u32(buf, 212, SECTOR as u32);
                        put_u32(buf, 248, SECTOR as u32);
                        put_u32(buf, 252, fsd_block);
                        put_u32(buf, 264, 6);
                        put_u32(buf, 268, 1);
                        if self.lvid.is_some() {
                            put_u32(buf, 432, SECTOR as u32);
                            put_u32(buf, 436, LVID_SECTOR);
                        }
                        write_tag(buf, 6, sector, 424);
                    }
                    Descriptor::Terminating => write_tag(buf, 8, sector, 496),
                }
            }
        }

        let vds_len = self.vds_sectors * SECTOR as u32;
        let anchor = &mut w.data[ANCHOR_SECTOR as usize * SECTOR..][..SECTOR];
        if self.main_in_anchor {
            put_u32(anchor, 16, vds_len);
            put_u32(anchor, 20, MAIN_VDS_SECTOR);
        }
        put_u32(anchor, 24, vds_len);
        put_u32(anchor, 28, RESERVE_VDS_SECTOR);
        write_tag(anchor, 2, ANCHOR_SECTOR, 496);

        if let Some((free, size)) = self.lvid {
            let lvid = &mut w.data[LVID_SECTOR as usize * SECTOR..][..SECTOR];
            lvid[16..28].copy_from_slice(&MTIME);
            put_u32(lvid, 28, 1);
            put_u32(lvid, 72, 1);
            put_u32(lvid, 80, free);
            put_u32(lvid, 84, size);
            write_tag(lvid, 9, LVID_SECTOR, 88 - 16);
        }

        Image {
            data: w.data,
            layout: w.layout,
        }
    }
}

struct Writer {
    data: Vec<u8>,
    next_block: u32,
    layout: Layout,
    max_extent: usize,
}

impl Writer {
    fn alloc(&mut self, blocks: u32) -> u32 {
        let ret = self.next_block;
        self.next_block += blocks;
        let end = self.block_offset(self.next_block);
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        ret
    }

    fn block_offset(&self, block: u32) -> usize {
        (PARTITION_START + block) as usize * SECTOR
    }

    fn block_mut(&mut self, block: u32) -> &mut [u8] {
        let off = self.block_offset(block);
        &mut self.data[off..off + SECTOR]
    }

    fn write_data(&mut self, data: &[u8]) -> Vec<(u32, u32)> {
        let mut ads = Vec::new();
        for chunk in data.chunks(self.max_extent.min(data.len().max(1))) {
            let blocks = chunk.len().div_ceil(SECTOR) as u32;
            let first = self.alloc(blocks);
            let off = self.block_offset(first);
            self.data[off..off + chunk.len()].copy_from_slice(chunk);
            ads.push((chunk.len() as u32, first));
            if self.max_extent != usize::MAX {
                // Keep the extents apart
                self.alloc(1);
            }
        }
        ads
    }

    fn write_fe(
        &mut self,
        block: u32,
        file_type: u8,
        info_len: u64,
        ads: &[(u32, u32)],
        embedded: Option<&[u8]>,
    ) {
        let buf = self.block_mut(block);
        // Strategy 4
        buf[20..22].copy_from_slice(&4u16.to_le_bytes());
        buf[27] = file_type;
        put_u64(buf, 56, info_len);
        buf[72..84].copy_from_slice(&MTIME);
        buf[84..96].copy_from_slice(&MTIME);
        buf[96..108].copy_from_slice(&MTIME);
        let ad_len = match embedded {
            Some(data) => {
                buf[34] = 3;
                buf[176..176 + data.len()].copy_from_slice(data);
                data.len()
            }
            None => {
                for (i, (len, pos)) in ads.iter().enumerate() {
                    put_u32(buf, 176 + 8 * i, *len);
                    put_u32(buf, 180 + 8 * i, *pos);
                }
                8 * ads.len()
            }
        };
        put_u32(buf, 172, ad_len as u32);
        write_tag(buf, 261, block, 176 + ad_len - 16);
    }

    fn place_dir(&mut self, children: &[Node], fe_block: u32, parent_fe: u32, path: &str) {
        let mut fids_len = fid_len(&[]);
        for child in children {
            fids_len += fid_len(child.name());
        }
        let data_block = self.alloc(fids_len.div_ceil(SECTOR) as u32);

        let mut links = vec![(Vec::new(), 0b1010u8, parent_fe)];
        for child in children {
            let child_fe = self.alloc(1);
            let child_path = format!("{path}/{}", String::from_utf8_lossy(child.name()));
            self.layout
                .fe_offsets
                .insert(child_path.clone(), self.block_offset(child_fe));
            match child {
                Node::Dir { name, children } => {
                    self.place_dir(children, child_fe, fe_block, &child_path);
                    links.push((name.clone(), 0b10, child_fe));
                }
                Node::File { name, data } => {
                    let ads = self.write_data(data);
                    self.write_fe(child_fe, 5, data.len() as u64, &ads, None);
                    links.push((name.clone(), 0, child_fe));
                }
                Node::Embedded { name, data } => {
                    self.write_fe(child_fe, 5, data.len() as u64, &[], Some(data));
                    links.push((name.clone(), 0, child_fe));
                }
            }
        }

        let dir_off = self.block_offset(data_block);
        let mut off = dir_off;
        for (name, characteristics, icb) in links {
            let len = fid_len(&name);
            let fid = &mut self.data[off..off + len];
            fid[18] = characteristics;
            let id: Vec<u8> = if name.is_empty() {
                Vec::new()
            } else {
                std::iter::once(8u8).chain(name.iter().copied()).collect()
            };
            fid[19] = id.len() as u8;
            put_u32(fid, 20, SECTOR as u32);
            put_u32(fid, 24, icb);
            fid[38..38 + id.len()].copy_from_slice(&id);
            write_tag(fid, 257, data_block, len - 16);
            if !name.is_empty() {
                self.layout.fid_offsets.insert(
                    format!("{path}/{}", String::from_utf8_lossy(&name)),
                    off,
                );
            }
            off += len;
        }
        self.layout
            .dir_offsets
            .insert(if path.is_empty() { "/".to_string() } else { path.to_string() }, dir_off);
        self.write_fe(fe_block, 4, fids_len as u64, &[(fids_len as u32, data_block)], None);
        if path.is_empty() {
            self.layout
                .fe_offsets
                .insert("/".to_string(), self.block_offset(fe_block));
        }
    }
}

/// Padded FID size for a name (compression id included)
pub fn fid_len(name: &[u8]) -> usize {
    let id_len = if name.is_empty() { 0 } else { name.len() + 1 };
    (38 + id_len).div_ceil(4) * 4
}

pub fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

pub fn put_u64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

fn put_dstring(field: &mut [u8], s: &str) {
    field[0] = 8;
    field[1..1 + s.len()].copy_from_slice(s.as_bytes());
    let last = field.len() - 1;
    field[last] = (s.len() + 1) as u8;
}

/// Fills in the tag of the descriptor at the start of `buf`
pub fn write_tag(buf: &mut [u8], id: u16, lba: u32, crc_len: usize) {
    buf[0..2].copy_from_slice(&id.to_le_bytes());
    buf[2..4].copy_from_slice(&3u16.to_le_bytes());
    let crc = TAG_CRC.checksum(&buf[16..16 + crc_len]);
    buf[8..10].copy_from_slice(&crc.to_le_bytes());
    buf[10..12].copy_from_slice(&(crc_len as u16).to_le_bytes());
    put_u32(buf, 12, lba);
    buf[4] = buf[0..16]
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 4)
        .fold(0u8, |a, (_, b)| a.wrapping_add(*b));
}

pub type Reads = Rc<RefCell<Vec<(u64, usize)>>>;

/// A [`BlockSource`] that records every read
pub struct RecordingSource<S: BlockSource> {
    inner: S,
    reads: Reads,
}

impl<S: BlockSource> RecordingSource<S> {
    pub fn new(inner: S) -> (Self, Reads) {
        let reads = Reads::default();
        (
            Self {
                inner,
                reads: reads.clone(),
            },
            reads,
        )
    }
}

impl<S: BlockSource> BlockSource for RecordingSource<S> {
    fn open(&mut self) -> udfread::Result<()> {
        self.inner.open()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> udfread::Result<()> {
        self.reads.borrow_mut().push((offset, buf.len()));
        self.inner.read_at(offset, buf)
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

/// Whether any recorded read touched `sector`
pub fn touched(reads: &Reads, sector: u32) -> bool {
    let start = u64::from(sector) * SECTOR as u64;
    let end = start + SECTOR as u64;
    reads
        .borrow()
        .iter()
        .any(|(off, len)| *off < end && off + *len as u64 > start)
}
