//! Byte-range access to the underlying device or image
//!
//! The UDF layer only needs positioned reads: [`BlockSource`] abstracts them
//! away from the actual storage
use crate::{Result, UdfError};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, warn};

/// A seekable source of bytes
///
/// Reads are all-or-nothing: a source which cannot deliver the whole range
/// fails with [`UdfError::ShortRead`], while failures of the underlying
/// storage are reported as [`UdfError::Io`]
pub trait BlockSource {
    /// Prepares the source for reading
    ///
    /// Sources open lazily, calling this explicitly is never required
    fn open(&mut self) -> Result<()>;

    /// Fills `buf` with the bytes found at the absolute `offset`
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Releases the underlying resources
    fn close(&mut self);

    /// Reads `len` bytes at `offset` into a newly allocated buffer
    fn read_vec(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf: Vec<u8> = Vec::new();
        buf.try_reserve_exact(len).map_err(|_| {
            UdfError::Corrupt(format!("cannot allocate {len} bytes for offset {offset}"))
        })?;
        buf.resize(len, 0);
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }
}

/// Reads `buf.len()` bytes from the current position, tolerating partial reads
fn fill<R: Read>(r: &mut R, offset: u64, buf: &mut [u8]) -> Result<()> {
    let mut got = 0usize;
    while got < buf.len() {
        match r.read(&mut buf[got..]) {
            Ok(0) => {
                return Err(UdfError::ShortRead {
                    offset,
                    expected: buf.len(),
                    got,
                });
            }
            Ok(n) => got += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// A [`BlockSource`] over any seekable reader (e.g. an in-memory image)
pub struct DataStream<R: Read + Seek> {
    r: R,
}

impl<R: Read + Seek> DataStream<R> {
    /// Wraps a reader
    pub fn new(r: R) -> Self {
        Self { r }
    }

    /// Unwraps this DataStream, returning the underlying reader
    pub fn into_inner(self) -> R {
        self.r
    }
}

impl<R: Read + Seek> BlockSource for DataStream<R> {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.r.seek(SeekFrom::Start(offset))?;
        fill(&mut self.r, offset, buf)
    }

    fn close(&mut self) {}
}

/// A [`BlockSource`] over a device node or an image file
///
/// The path is opened read-only on first use and kept open until
/// [`close`](BlockSource::close) is called
pub struct DeviceStream {
    path: PathBuf,
    file: Option<File>,
}

impl DeviceStream {
    /// Creates a new, unopened, stream
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
        }
    }

    /// The path of the device or image
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the device is currently open
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

impl BlockSource for DeviceStream {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn open(&mut self) -> Result<()> {
        if self.file.is_none() {
            info!("Opening device {}", self.path.display());
            self.file = Some(File::open(&self.path)?);
        }
        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.open()?;
        let f = match self.file.as_mut() {
            Some(f) => f,
            None => {
                return Err(UdfError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "device not open",
                )));
            }
        };
        f.seek(SeekFrom::Start(offset))?;
        fill(f, offset, buf)
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("Closed device {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn short_read_is_distinct() {
        let mut s = DataStream::new(Cursor::new(vec![7u8; 100]));
        let mut buf = [0u8; 10];
        s.read_at(95, &mut buf[..5]).unwrap();
        assert_eq!(&buf[..5], &[7u8; 5]);
        match s.read_at(95, &mut buf) {
            Err(UdfError::ShortRead {
                offset: 95,
                expected: 10,
                got: 5,
            }) => {}
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn device_opens_lazily() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut tmp, b"0123456789").unwrap();
        let mut dev = DeviceStream::new(tmp.path());
        assert!(!dev.is_open());
        assert_eq!(dev.read_vec(3, 4).unwrap(), b"3456");
        assert!(dev.is_open());
        dev.close();
        assert!(!dev.is_open());
    }

    #[test]
    fn missing_device_is_io_error() {
        let mut dev = DeviceStream::new("/nonexistent/udf/device");
        assert!(matches!(dev.read_vec(0, 1), Err(UdfError::Io(_))));
    }
}
