//! Byte source for a single tailed file.
//!
//! A [`FileSource`] wraps an OS file handle identified by `(device, inode)`
//! and exposes positioned reads plus the signature used, together with the
//! inode, to detect rotation and truncation.

use std::fs::File;
use std::hash::Hasher;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Number of leading bytes hashed into the file signature.
pub const SIGNATURE_PREFIX_BYTES: usize = 1024;

/// Device and inode pair uniquely identifying a file on a filesystem.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevInode {
    pub device: u64,
    pub inode: u64,
}

impl DevInode {
    #[must_use]
    pub fn of_metadata(metadata: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            DevInode {
                device: metadata.dev(),
                inode: metadata.ino(),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = metadata;
            DevInode::default()
        }
    }

    pub fn of_path(path: &Path) -> io::Result<Self> {
        Ok(Self::of_metadata(&std::fs::metadata(path)?))
    }
}

/// Fingerprint of a file's leading bytes. Two files with the same signature
/// length and hash are treated as the same logical file; a shrinking or
/// changed signature means the path was truncated or rewritten.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSignature {
    pub hash: u64,
    pub len: u32,
}

impl FileSignature {
    #[must_use]
    pub fn compute(prefix: &[u8]) -> Self {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        hasher.write(prefix);
        FileSignature {
            hash: hasher.finish(),
            len: u32::try_from(prefix.len()).unwrap_or(u32::MAX),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// An open handle on one tailed file.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    file: Option<File>,
    dev_inode: DevInode,
}

impl FileSource {
    /// Opens the file at `path` and records its identity.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        let dev_inode = DevInode::of_metadata(&file.metadata()?);
        Ok(FileSource {
            path,
            file: Some(file),
            dev_inode,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn dev_inode(&self) -> DevInode {
        self.dev_inode
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn file(&self) -> io::Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "file source is closed"))
    }

    /// Current size of the open file.
    pub fn size(&self) -> io::Result<u64> {
        Ok(self.file()?.metadata()?.len())
    }

    /// Reads up to `buf.len()` bytes starting at `offset`. End of file is
    /// reported as `Ok(0)`; short reads before EOF are filled by looping.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "file source is closed"))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Signature of the file's current leading bytes.
    pub fn signature(&mut self) -> io::Result<FileSignature> {
        let size = self.size()?;
        let want = usize::try_from(size.min(SIGNATURE_PREFIX_BYTES as u64)).unwrap_or(0);
        let mut prefix = vec![0u8; want];
        let got = self.read_at(0, &mut prefix)?;
        prefix.truncate(got);
        Ok(FileSignature::compute(&prefix))
    }

    /// Whether the file currently at `path` is still this handle's file.
    pub fn path_identity_matches(&self) -> io::Result<bool> {
        match DevInode::of_path(&self.path) {
            Ok(current) => Ok(current == self.dev_inode),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn close(&mut self) {
        self.file = None;
    }

    /// Re-opens the path after [`FileSource::close`], refreshing identity.
    pub fn reopen(&mut self) -> io::Result<()> {
        let file = File::open(&self.path)?;
        self.dev_inode = DevInode::of_metadata(&file.metadata()?);
        self.file = Some(file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).expect("create");
        f.write_all(content).expect("write");
        path
    }

    #[test]
    fn read_at_reports_eof_as_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(&dir, "a.log", b"hello\n");
        let mut source = FileSource::open(&path).expect("open");

        let mut buf = [0u8; 16];
        let n = source.read_at(0, &mut buf).expect("read");
        assert_eq!(&buf[..n], b"hello\n");

        let n = source.read_at(6, &mut buf).expect("read at eof");
        assert_eq!(n, 0);
    }

    #[test]
    fn read_never_exceeds_buffer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(&dir, "a.log", b"0123456789");
        let mut source = FileSource::open(&path).expect("open");

        let mut buf = [0u8; 4];
        let n = source.read_at(2, &mut buf).expect("read");
        assert_eq!(n, 4);
        assert_eq!(&buf, b"2345");
    }

    #[test]
    fn signature_changes_when_leading_bytes_change() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(&dir, "a.log", b"first line\n");
        let mut source = FileSource::open(&path).expect("open");
        let sig1 = source.signature().expect("sig");

        std::fs::write(&path, b"other line\n").expect("rewrite");
        let sig2 = source.signature().expect("sig");
        assert_ne!(sig1, sig2);
    }

    #[test]
    fn replaced_file_detected_by_inode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(&dir, "a.log", b"one\n");
        let source = FileSource::open(&path).expect("open");
        assert!(source.path_identity_matches().expect("check"));

        // replace: remove + recreate gets a fresh inode
        std::fs::remove_file(&path).expect("remove");
        write_file(&dir, "a.log", b"two\n");
        assert!(!source.path_identity_matches().expect("check"));
    }

    #[test]
    fn signature_is_stable_for_same_prefix() {
        let a = FileSignature::compute(b"same prefix bytes");
        let b = FileSignature::compute(b"same prefix bytes");
        assert_eq!(a, b);
        assert_eq!(a.len, 17);
    }
}
