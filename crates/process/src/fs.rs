//! The file system as seen by the loader and the shell.

use alloc::{string::String, vec, vec::Vec};

/// Identity of a file, stable for as long as the file exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u64);

/// A directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub id: FileId,
    /// Display name in 8.3 form, e.g. `HELLO.TXT`.
    pub name: String,
    pub size: usize,
    pub is_directory: bool,
}

/// A mounted, read-only volume.
pub trait FileSystem: Send + Sync {
    /// Resolves a `/`-separated path, case-insensitively.
    ///
    /// Returns the entry, if any, and whether the path ended with a slash.
    fn find_file(&self, path: &str) -> (Option<DirectoryEntry>, bool);

    /// Copies up to `buf.len()` bytes of the file into `buf`, returning the count.
    fn load_file(&self, entry: &DirectoryEntry, buf: &mut [u8]) -> usize;

    /// Lists a directory, or the root directory when `dir` is `None`.
    fn read_dir(&self, dir: Option<&DirectoryEntry>) -> Vec<DirectoryEntry>;

    /// Copies up to `buf.len()` bytes starting `offset` bytes into the file.
    fn load_file_at(&self, entry: &DirectoryEntry, offset: usize, buf: &mut [u8]) -> usize {
        let end = entry.size.min(offset.saturating_add(buf.len()));
        if end <= offset {
            return 0;
        }
        let mut data = vec![0u8; end];
        let len = self.load_file(entry, &mut data).saturating_sub(offset);
        buf[..len].copy_from_slice(&data[offset..offset + len]);
        len
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloc::{borrow::ToOwned, string::ToString, vec};

    /// A volume held in memory. Paths are stored upper-case without a leading slash.
    #[derive(Default)]
    pub(crate) struct MemoryFs {
        files: Vec<(String, DirectoryEntry, Vec<u8>)>,
    }

    impl MemoryFs {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn with_file(mut self, path: &str, data: &[u8]) -> Self {
            self.add(path, data.to_vec(), false);
            self
        }

        pub(crate) fn with_dir(mut self, path: &str) -> Self {
            self.add(path, Vec::new(), true);
            self
        }

        fn add(&mut self, path: &str, data: Vec<u8>, is_directory: bool) {
            let path = path.to_ascii_uppercase();
            let name = path.rsplit('/').next().unwrap_or(&path).to_owned();
            let entry = DirectoryEntry {
                id: FileId(self.files.len() as u64 + 1),
                name,
                size: data.len(),
                is_directory,
            };
            self.files.push((path, entry, data));
        }
    }

    impl FileSystem for MemoryFs {
        fn find_file(&self, path: &str) -> (Option<DirectoryEntry>, bool) {
            let post_slash = path.ends_with('/');
            let wanted = path.trim_matches('/').to_ascii_uppercase();
            let entry = self
                .files
                .iter()
                .find(|(p, _, _)| *p == wanted)
                .map(|(_, e, _)| e.clone());
            (entry, post_slash)
        }

        fn load_file(&self, entry: &DirectoryEntry, buf: &mut [u8]) -> usize {
            let Some((_, _, data)) = self.files.iter().find(|(_, e, _)| e.id == entry.id) else {
                return 0;
            };
            let len = data.len().min(buf.len());
            buf[..len].copy_from_slice(&data[..len]);
            len
        }

        fn read_dir(&self, dir: Option<&DirectoryEntry>) -> Vec<DirectoryEntry> {
            let prefix = match dir {
                Some(dir) => {
                    let Some((path, _, _)) = self.files.iter().find(|(_, e, _)| e.id == dir.id)
                    else {
                        return vec![];
                    };
                    path.clone() + "/"
                }
                None => "".to_string(),
            };
            self.files
                .iter()
                .filter(|(p, _, _)| {
                    p.strip_prefix(prefix.as_str())
                        .is_some_and(|rest| !rest.contains('/'))
                })
                .map(|(_, e, _)| e.clone())
                .collect()
        }
    }
}
