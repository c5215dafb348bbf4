//! Multi-volume archive access.
//!
//! A split archive is a list of independently sized volumes whose
//! concatenation is the logical archive. [`VolumeSet`] maps a global offset
//! to `(volume, local offset)` and serves reads that cross volume
//! boundaries; [`SequentialReader`] turns any [`ReadAt`] into a plain
//! forward [`Read`].

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{LocalFileReader, ReadAt};

/// Ordered set of volumes presented as one contiguous address space.
#[derive(Clone)]
pub struct VolumeSet {
    volumes: Vec<Arc<dyn ReadAt>>,
    /// Global offset at which each volume starts.
    starts: Vec<u64>,
    size: u64,
}

impl VolumeSet {
    /// Build a set from volumes in archive order.
    pub fn new(volumes: Vec<Arc<dyn ReadAt>>) -> Self {
        let mut starts = Vec::with_capacity(volumes.len());
        let mut size = 0u64;
        for volume in &volumes {
            starts.push(size);
            size += volume.size();
        }
        Self {
            volumes,
            starts,
            size,
        }
    }

    /// A set holding a single source.
    pub fn single(source: Arc<dyn ReadAt>) -> Self {
        Self::new(vec![source])
    }

    /// Open local volume files in the given order.
    pub fn open_paths<P: AsRef<Path>>(paths: &[P]) -> io::Result<Self> {
        let mut volumes: Vec<Arc<dyn ReadAt>> = Vec::with_capacity(paths.len());
        for path in paths {
            volumes.push(Arc::new(LocalFileReader::new(path.as_ref())?));
        }
        Ok(Self::new(volumes))
    }

    /// Number of volumes.
    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    /// Global offset where volume `index` begins.
    pub fn volume_start(&self, index: usize) -> Option<u64> {
        self.starts.get(index).copied()
    }

    /// Translate a global offset into `(volume index, offset within volume)`.
    ///
    /// Empty volumes are skipped, so an offset equal to a boundary resolves
    /// to the start of the next non-empty volume.
    pub fn locate(&self, offset: u64) -> Option<(usize, u64)> {
        if offset >= self.size {
            return None;
        }
        // Last volume whose start is <= offset and which is non-empty.
        let index = self.starts.partition_point(|&start| start <= offset) - 1;
        let mut index = index;
        while self.volumes[index].size() == 0 {
            index += 1;
        }
        Some((index, offset - self.starts[index]))
    }

    /// A forward reader over the concatenated volumes.
    pub fn sequential(self: &Arc<Self>, chunk_size: usize) -> SequentialReader<VolumeSet> {
        SequentialReader::new(Arc::clone(self), chunk_size)
    }
}

impl ReadAt for VolumeSet {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let Some((index, local)) = self.locate(offset + filled as u64) else {
                break;
            };
            let volume = &self.volumes[index];
            let available = (volume.size() - local).min((buf.len() - filled) as u64) as usize;
            let n = volume.read_at(local, &mut buf[filled..filled + available])?;
            if n == 0 {
                // The volume is shorter than it claimed to be.
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

impl std::fmt::Debug for VolumeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeSet")
            .field("starts", &self.starts)
            .field("size", &self.size)
            .finish()
    }
}

/// Forward [`Read`] over a [`ReadAt`] source, fetching `chunk_size` bytes at a time.
pub struct SequentialReader<R: ReadAt + ?Sized> {
    source: Arc<R>,
    position: u64,
    chunk: Vec<u8>,
    chunk_pos: usize,
    chunk_size: usize,
}

impl<R: ReadAt + ?Sized> SequentialReader<R> {
    pub fn new(source: Arc<R>, chunk_size: usize) -> Self {
        Self {
            source,
            position: 0,
            chunk: Vec::new(),
            chunk_pos: 0,
            chunk_size: chunk_size.max(1),
        }
    }
}

impl<R: ReadAt + ?Sized> Read for SequentialReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.chunk_pos == self.chunk.len() {
            // Large reads bypass the chunk buffer.
            if buf.len() >= self.chunk_size {
                let n = self.source.read_at(self.position, buf)?;
                self.position += n as u64;
                return Ok(n);
            }
            self.chunk.resize(self.chunk_size, 0);
            let n = self.source.read_at(self.position, &mut self.chunk)?;
            self.chunk.truncate(n);
            self.chunk_pos = 0;
            self.position += n as u64;
            if n == 0 {
                return Ok(0);
            }
        }
        let n = buf.len().min(self.chunk.len() - self.chunk_pos);
        buf[..n].copy_from_slice(&self.chunk[self.chunk_pos..self.chunk_pos + n]);
        self.chunk_pos += n;
        Ok(n)
    }
}

/// Discover the volumes of a split archive from any one of its paths.
///
/// Recognised layouts:
/// - `name.z01`, `name.z02`, ..., `name.zip` (the `.zip` file is last)
/// - `name.zip.001`, `name.zip.002`, ...
///
/// Anything else is treated as a single-volume archive.
pub fn discover_volumes(path: &Path) -> Vec<PathBuf> {
    let path_str = path.to_string_lossy();

    // name.zip.NNN
    if let Some(pos) = path_str.rfind('.') {
        let suffix = &path_str[pos + 1..];
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
            let base = &path_str[..pos];
            let width = suffix.len();
            let mut volumes = Vec::new();
            for number in 1.. {
                let candidate = PathBuf::from(format!("{base}.{number:0width$}"));
                if !candidate.is_file() {
                    break;
                }
                volumes.push(candidate);
            }
            if !volumes.is_empty() {
                return volumes;
            }
        }
    }

    // name.zNN ... name.zip
    // Compared as bytes: the suffix is ASCII but the stem may not be.
    let lower = path_str.to_ascii_lowercase();
    let tail = lower.as_bytes();
    let split_volume = tail.len() > 4
        && tail[tail.len() - 4..tail.len() - 2] == *b".z"
        && tail[tail.len() - 2..].iter().all(u8::is_ascii_digit);
    let stem = if tail.ends_with(b".zip") || split_volume {
        Some(&path_str[..path_str.len() - 4])
    } else {
        None
    };
    if let Some(stem) = stem {
        let mut volumes = Vec::new();
        for number in 1.. {
            let candidate = PathBuf::from(format!("{stem}.z{number:02}"));
            if !candidate.is_file() {
                break;
            }
            volumes.push(candidate);
        }
        if !volumes.is_empty() {
            let last = PathBuf::from(format!("{stem}.zip"));
            if last.is_file() {
                volumes.push(last);
            }
            return volumes;
        }
    }

    vec![path.to_path_buf()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(parts: &[&[u8]]) -> VolumeSet {
        VolumeSet::new(
            parts
                .iter()
                .map(|p| Arc::new(p.to_vec()) as Arc<dyn ReadAt>)
                .collect(),
        )
    }

    #[test]
    fn test_locate_boundaries() {
        let volumes = set(&[b"abc", b"", b"defg"]);
        assert_eq!(volumes.size(), 7);
        assert_eq!(volumes.locate(0), Some((0, 0)));
        assert_eq!(volumes.locate(2), Some((0, 2)));
        assert_eq!(volumes.locate(3), Some((2, 0)));
        assert_eq!(volumes.locate(6), Some((2, 3)));
        assert_eq!(volumes.locate(7), None);
    }

    #[test]
    fn test_read_spans_volumes() {
        let volumes = set(&[b"ab", b"cd", b"ef"]);
        let mut buf = [0u8; 5];
        volumes.read_exact_at(1, &mut buf).unwrap();
        assert_eq!(&buf, b"bcdef");
    }

    #[test]
    fn test_sequential_reader_concatenates() {
        let volumes = Arc::new(set(&[b"hello ", b"split ", b"world"]));
        let mut reader = volumes.sequential(4);
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello split world");
    }

    #[test]
    fn test_discover_split_zip_volumes() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.z01", "a.z02", "a.zip"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let found = discover_volumes(&dir.path().join("a.zip"));
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, ["a.z01", "a.z02", "a.zip"]);
    }

    #[test]
    fn test_discover_numbered_volumes() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.zip.001", "b.zip.002"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let found = discover_volumes(&dir.path().join("b.zip.002"));
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("b.zip.001"));
    }

    #[test]
    fn test_discover_multibyte_names() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.文件", "备份.z01", "备份.zip"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let plain = dir.path().join("a.文件");
        assert_eq!(discover_volumes(&plain), vec![plain]);

        let found = discover_volumes(&dir.path().join("备份.zip"));
        assert_eq!(
            found,
            vec![dir.path().join("备份.z01"), dir.path().join("备份.zip")]
        );
    }

    #[test]
    fn test_discover_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.zip");
        std::fs::write(&path, b"x").unwrap();
        assert_eq!(discover_volumes(&path), vec![path]);
    }

    proptest! {
        #[test]
        fn prop_volume_reads_match_concatenation(
            parts in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 1..6),
            offset in 0u64..400,
            len in 0usize..200,
        ) {
            let whole: Vec<u8> = parts.concat();
            let volumes = VolumeSet::new(
                parts.into_iter().map(|p| Arc::new(p) as Arc<dyn ReadAt>).collect(),
            );
            let mut buf = vec![0u8; len];
            let n = volumes.read_at(offset, &mut buf).unwrap();

            let start = (offset as usize).min(whole.len());
            let end = (start + len).min(whole.len());
            prop_assert_eq!(&buf[..n], &whole[start..end]);
        }
    }
}
