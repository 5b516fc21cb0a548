//! Executables that have already been loaded once.

use alloc::collections::{BTreeMap, btree_map::Entry};

use pmm::{AddressSpace, VirtualAddress};

use crate::FileId;

/// A loaded executable.
///
/// `space` is the canonical root: it owns the page tables and frames holding the
/// executable's segments. Processes only ever alias it.
#[derive(Debug)]
pub struct CachedImage {
    pub load_end: VirtualAddress,
    pub entry: VirtualAddress,
    pub space: AddressSpace,
}

/// Append-only map from file identity to loaded image.
///
/// Entries live for the rest of the kernel's life. A file changed on disk after its first
/// launch keeps running the old image.
#[derive(Debug, Default)]
pub struct LoadCache {
    entries: BTreeMap<FileId, CachedImage>,
}

impl LoadCache {
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: FileId) -> Option<&CachedImage> {
        self.entries.get(&id)
    }

    /// Records the image for `id` and returns the stored entry.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already cached; a second canonical root would leak the first.
    pub fn insert(&mut self, id: FileId, image: CachedImage) -> &CachedImage {
        match self.entries.entry(id) {
            Entry::Vacant(slot) => slot.insert(image),
            Entry::Occupied(_) => {
                panic!("executable {id:?} is already cached")
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
