//! # A read-only UDF volume reader
//!
//! Parses the ECMA-167 / OSTA UDF structures of an optical media image or
//! block device and exposes its directory hierarchy as a lazily built tree
//!
//! The volume is bootstrapped once (recognition sequence, anchor, volume
//! descriptor sequence, file set descriptor); directories are decoded only
//! when visited and file data is streamed out on request
//!
//! See [`Udf`](udf::Udf) for the main interface
//!
//! # Examples
//! ```no_run
//! use udfread::{stream::DeviceStream, udf::Udf};
//!
//! let mut udf = Udf::new(DeviceStream::new("/dev/dvd")).unwrap();
//! for child in udf.ls().unwrap() {
//!     println!("{}", child.name);
//! }
//! udf.cp("/VIDEO_TS/VIDEO_TS.IFO", "/tmp").unwrap();
//! ```

#![warn(missing_docs)]

pub mod stream;
pub mod udf;

use std::fmt::Display;
use thiserror::Error;

/// Size of a device sector, which is also the unit of every absolute address
pub const SECTOR_SIZE: u64 = 2048;

/// The bootstrap stage in which a volume failed to load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Volume Recognition Sequence scan
    Recognition,
    /// Anchor Volume Descriptor Pointer read
    Anchor,
    /// Volume Descriptor Sequence scan
    VolumeSequence,
    /// File Set Descriptor and root File Entry resolution
    RootDirectory,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Recognition => "volume recognition",
            Self::Anchor => "anchor volume descriptor",
            Self::VolumeSequence => "volume descriptor sequence",
            Self::RootDirectory => "root directory",
        })
    }
}

/// Errors produced while reading a UDF volume
#[derive(Error, Debug)]
pub enum UdfError {
    /// The volume could not be loaded
    #[error("{stage} stage failed: {source}")]
    Stage {
        /// Where the bootstrap broke
        stage: Stage,
        /// What went wrong
        #[source]
        source: Box<UdfError>,
    },

    /// A descriptor does not carry the tag expected at its location
    #[error("descriptor tag mismatch (expected {expected}, found {found})")]
    TagMismatch {
        /// Expected tag identifier
        expected: u16,
        /// Tag identifier found on disk
        found: u16,
    },

    /// The block source returned less data than requested
    #[error("short read at offset {offset} ({got} of {expected} bytes)")]
    ShortRead {
        /// Absolute byte offset of the read
        offset: u64,
        /// Requested length
        expected: usize,
        /// Bytes actually available
        got: usize,
    },

    /// Wrapper for I/O errors of the block source or of the extraction target
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A path component could not be found
    #[error("no such file or directory: {0}")]
    NotFound(String),

    /// A directory operation was attempted on a file
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// A file operation was attempted on a directory
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// A destination file name that cannot be created safely
    #[error("invalid file name: \"{0}\"")]
    InvalidName(String),

    /// A field lies outside of the buffer it is decoded from
    #[error("truncated structure ({length} bytes at offset {offset}, {available} available)")]
    Truncated {
        /// Offset of the field within its buffer
        offset: usize,
        /// Length of the field
        length: usize,
        /// Buffer size
        available: usize,
    },

    /// Structurally impossible on-disk values
    #[error("corrupted volume: {0}")]
    Corrupt(String),

    /// Valid structures this reader does not handle
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl UdfError {
    pub(crate) fn at_stage(self, stage: Stage) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// The bootstrap stage this error was raised in, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Result type of this crate
pub type Result<T> = std::result::Result<T, UdfError>;
