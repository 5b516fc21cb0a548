//! Read-only FAT32 volumes held in memory.

use alloc::{string::String, vec::Vec};

use process::{DirectoryEntry, FileId, FileSystem};

const DIR_ENTRY_SIZE: usize = 32;
const SHORT_NAME_LEN: usize = 11;
const CLUSTER_MASK: u32 = 0x0FFF_FFFF;
const END_OF_CHAIN: u32 = 0x0FFF_FFF8;

const ATTR_VOLUME_ID: u8 = 0x08;
const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_LONG_NAME: u8 = 0x0F;

const ENTRY_FREE: u8 = 0xE5;
const ENTRY_END: u8 = 0x00;

#[derive(Debug, Clone, Copy)]
struct Geometry {
    bytes_per_cluster: usize,
    fat_offset: usize,
    data_offset: usize,
    root_cluster: u32,
}

impl Geometry {
    fn parse(image: &[u8]) -> Option<Self> {
        let bytes_per_sector = usize::from(read_u16(image, 11)?);
        let sectors_per_cluster = usize::from(*image.get(13)?);
        let reserved_sectors = usize::from(read_u16(image, 14)?);
        let num_fats = usize::from(*image.get(16)?);
        let sectors_per_fat = read_u32(image, 36)? as usize;
        let root_cluster = read_u32(image, 44)?;
        if bytes_per_sector == 0 || sectors_per_cluster == 0 || sectors_per_fat == 0 {
            return None;
        }

        let fat_offset = reserved_sectors * bytes_per_sector;
        Some(Self {
            bytes_per_cluster: bytes_per_sector * sectors_per_cluster,
            fat_offset,
            data_offset: fat_offset + num_fats * sectors_per_fat * bytes_per_sector,
            root_cluster,
        })
    }
}

/// The boot volume, as read into memory by the loader.
///
/// A [`FileId`] is the byte offset of the file's directory entry in the image, so it stays
/// the same for as long as the volume is mounted.
pub struct FatVolume {
    image: &'static [u8],
    geometry: Option<Geometry>,
}

impl FatVolume {
    pub fn mount(image: &'static [u8]) -> Self {
        let geometry = Geometry::parse(image);
        match geometry {
            Some(geometry) => log::info!(
                "FAT32 volume: {} KiB, {} bytes per cluster, root cluster {}",
                image.len() / 1024,
                geometry.bytes_per_cluster,
                geometry.root_cluster
            ),
            None => log::warn!("boot volume is not FAT32, no files will be found"),
        }
        Self { image, geometry }
    }

    fn cluster(&self, geometry: &Geometry, cluster: u32) -> Option<&'static [u8]> {
        let index = (cluster as usize).checked_sub(2)?;
        let begin = geometry.data_offset + index * geometry.bytes_per_cluster;
        self.image.get(begin..begin + geometry.bytes_per_cluster)
    }

    fn next_cluster(&self, geometry: &Geometry, cluster: u32) -> Option<u32> {
        let next = read_u32(self.image, geometry.fat_offset + cluster as usize * 4)? & CLUSTER_MASK;
        (2..END_OF_CHAIN).contains(&next).then_some(next)
    }

    /// Follows the chain starting at `first`, stopping at the end marker or a broken link.
    fn chain(&self, geometry: Geometry, first: u32) -> impl Iterator<Item = &'static [u8]> + '_ {
        let limit = self.image.len() / geometry.bytes_per_cluster;
        let clusters = core::iter::successors(Some(first), move |&cluster| {
            self.next_cluster(&geometry, cluster)
        });
        clusters
            .take(limit)
            .map_while(move |cluster| self.cluster(&geometry, cluster))
    }

    fn entries(&self, geometry: Geometry, first: u32) -> Vec<RawEntry> {
        let mut entries = Vec::new();
        for cluster in self.chain(geometry, first) {
            let base = cluster.as_ptr() as usize - self.image.as_ptr() as usize;
            for (i, bytes) in cluster.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
                let raw = RawEntry::new(base + i * DIR_ENTRY_SIZE, bytes);
                match bytes[0] {
                    ENTRY_END => return entries,
                    ENTRY_FREE => continue,
                    _ if raw.is_hidden_kind() => continue,
                    _ => entries.push(raw),
                }
            }
        }
        entries
    }

    fn raw_entry(&self, id: FileId) -> Option<RawEntry> {
        let offset = id.0 as usize;
        let bytes = self.image.get(offset..offset + DIR_ENTRY_SIZE)?;
        Some(RawEntry::new(offset, bytes))
    }

    fn directory_cluster(&self, geometry: &Geometry, entry: &RawEntry) -> u32 {
        // ".." entries that lead to the root store cluster zero.
        match entry.first_cluster() {
            0 => geometry.root_cluster,
            cluster => cluster,
        }
    }
}

impl FileSystem for FatVolume {
    fn find_file(&self, path: &str) -> (Option<DirectoryEntry>, bool) {
        let mut rest = path.strip_prefix('/').unwrap_or(path);
        let Some(geometry) = self.geometry else {
            return (None, rest.contains('/'));
        };

        let mut directory = geometry.root_cluster;
        loop {
            let (element, next, post_slash) = match rest.split_once('/') {
                Some((element, next)) => (element, next, true),
                None => (rest, "", false),
            };
            let found = self
                .entries(geometry, directory)
                .into_iter()
                .find(|raw| raw.name_matches(element));
            let Some(raw) = found else {
                return (None, post_slash);
            };
            if raw.is_directory() && !next.is_empty() {
                directory = self.directory_cluster(&geometry, &raw);
                rest = next;
                continue;
            }
            return (Some(raw.to_entry()), post_slash);
        }
    }

    fn load_file(&self, entry: &DirectoryEntry, buf: &mut [u8]) -> usize {
        self.load_file_at(entry, 0, buf)
    }

    fn load_file_at(&self, entry: &DirectoryEntry, offset: usize, buf: &mut [u8]) -> usize {
        let (Some(geometry), Some(raw)) = (self.geometry, self.raw_entry(entry.id)) else {
            return 0;
        };
        let end = raw.size().min(offset.saturating_add(buf.len()));
        let Some(wanted) = end.checked_sub(offset) else {
            return 0;
        };

        let mut skip = offset % geometry.bytes_per_cluster;
        let mut copied = 0;
        let clusters = self
            .chain(geometry, raw.first_cluster())
            .skip(offset / geometry.bytes_per_cluster);
        for cluster in clusters {
            if copied == wanted {
                break;
            }
            let data = &cluster[skip..];
            skip = 0;
            let len = (wanted - copied).min(data.len());
            buf[copied..copied + len].copy_from_slice(&data[..len]);
            copied += len;
        }
        copied
    }

    fn read_dir(&self, dir: Option<&DirectoryEntry>) -> Vec<DirectoryEntry> {
        let Some(geometry) = self.geometry else {
            return Vec::new();
        };
        let cluster = match dir.and_then(|dir| self.raw_entry(dir.id)) {
            Some(raw) => self.directory_cluster(&geometry, &raw),
            None => geometry.root_cluster,
        };
        self.entries(geometry, cluster)
            .iter()
            .map(RawEntry::to_entry)
            .collect()
    }
}

/// A 32-byte short-name directory entry.
struct RawEntry {
    offset: usize,
    bytes: [u8; DIR_ENTRY_SIZE],
}

impl RawEntry {
    fn new(offset: usize, bytes: &[u8]) -> Self {
        let mut copy = [0; DIR_ENTRY_SIZE];
        copy.copy_from_slice(bytes);
        Self {
            offset,
            bytes: copy,
        }
    }

    fn attr(&self) -> u8 {
        self.bytes[11]
    }

    fn is_directory(&self) -> bool {
        self.attr() & ATTR_DIRECTORY != 0
    }

    /// Long-name fragments and the volume label are not files.
    fn is_hidden_kind(&self) -> bool {
        self.attr() == ATTR_LONG_NAME || self.attr() & ATTR_VOLUME_ID != 0
    }

    fn first_cluster(&self) -> u32 {
        let high = u32::from(u16::from_le_bytes([self.bytes[20], self.bytes[21]]));
        let low = u32::from(u16::from_le_bytes([self.bytes[26], self.bytes[27]]));
        (high << 16) | low
    }

    fn size(&self) -> usize {
        u32::from_le_bytes([self.bytes[28], self.bytes[29], self.bytes[30], self.bytes[31]])
            as usize
    }

    /// `HELLO   TXT` becomes `HELLO.TXT`.
    fn name(&self) -> String {
        let (base, ext) = self.bytes[..SHORT_NAME_LEN].split_at(8);
        let trim = |part: &[u8]| -> String { String::from_utf8_lossy(part).trim_end().into() };
        let base: String = trim(base);
        let ext: String = trim(ext);
        if ext.is_empty() {
            base
        } else {
            alloc::format!("{base}.{ext}")
        }
    }

    fn name_matches(&self, element: &str) -> bool {
        self.name().eq_ignore_ascii_case(element)
    }

    fn to_entry(&self) -> DirectoryEntry {
        DirectoryEntry {
            id: FileId(self.offset as u64),
            name: self.name(),
            size: self.size(),
            is_directory: self.is_directory(),
        }
    }
}

fn read_u16(image: &[u8], offset: usize) -> Option<u16> {
    let bytes = image.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(image: &[u8], offset: usize) -> Option<u32> {
    let bytes = image.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
