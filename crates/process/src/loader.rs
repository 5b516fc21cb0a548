//! Loading executables into address spaces.

use alloc::vec;

use pmm::{AddressSpace, FrameArena, PageFlags, VirtualAddress, layout};

use crate::{CachedImage, DirectoryEntry, Error, ExecutableImage, FileSystem, LoadCache};

/// A loaded executable, ready to run in `space`.
#[derive(Debug)]
pub struct AppLoadInfo {
    pub load_end: VirtualAddress,
    pub entry: VirtualAddress,
    /// Private root of the new process. It aliases the cached image and owns nothing else.
    pub space: AddressSpace,
}

/// Flags for every page an application can touch.
pub(crate) fn user_page_flags() -> PageFlags {
    let mut flags = PageFlags::empty();
    flags.set_writable(true);
    flags.set_user(true);
    flags
}

/// Loads executables, reading each one from disk only the first time.
#[derive(Debug, Default)]
pub struct ProcessLoader {
    cache: LoadCache,
}

impl ProcessLoader {
    pub const fn new() -> Self {
        Self {
            cache: LoadCache::new(),
        }
    }

    pub fn cache(&self) -> &LoadCache {
        &self.cache
    }

    /// Returns a fresh private root with `file` mapped into its application half.
    ///
    /// On the first load of a file the segments go into a root that becomes the cached
    /// canonical copy, and the caller gets a second root aliasing it. Later loads alias the
    /// cached root directly. A failed load frees everything it allocated.
    pub fn load(
        &mut self,
        arena: &mut FrameArena,
        fs: &dyn FileSystem,
        file: &DirectoryEntry,
    ) -> Result<AppLoadInfo, Error> {
        let mut space = AddressSpace::create_root(arena)?;

        if let Some(cached) = self.cache.get(file.id) {
            log::debug!("{}: using cached image", file.name);
            space.alias_range(&cached.space, layout::USER_SLOTS);
            return Ok(AppLoadInfo {
                load_end: cached.load_end,
                entry: cached.entry,
                space,
            });
        }

        let image = match load_image(arena, &mut space, fs, file) {
            Ok(image) => image,
            Err(err) => {
                log::warn!("{}: load failed: {err}", file.name);
                discard(arena, space);
                return Err(err);
            }
        };
        log::debug!(
            "{}: loaded {} segments, entry {}",
            file.name,
            image.segments.len(),
            image.entry
        );

        let cached = self.cache.insert(
            file.id,
            CachedImage {
                load_end: image.load_end(),
                entry: image.entry,
                space,
            },
        );

        let mut private = AddressSpace::create_root(arena)?;
        private.alias_range(&cached.space, layout::USER_SLOTS);
        Ok(AppLoadInfo {
            load_end: cached.load_end,
            entry: cached.entry,
            space: private,
        })
    }
}

fn load_image(
    arena: &mut FrameArena,
    space: &mut AddressSpace,
    fs: &dyn FileSystem,
    file: &DirectoryEntry,
) -> Result<ExecutableImage, Error> {
    let mut bytes = vec![0u8; file.size];
    let read = fs.load_file(file, &mut bytes);
    bytes.truncate(read);

    let image = ExecutableImage::parse(&bytes)?;
    for segment in &image.segments {
        space.map_zeroed(arena, segment.vaddr, segment.pages(), user_page_flags())?;
        let data = &bytes[segment.offset..segment.offset + segment.file_size];
        space.write_bytes(segment.vaddr, data)?;
        // Another segment may already have written to a shared page.
        space.fill(
            segment.vaddr + segment.file_size,
            segment.mem_size - segment.file_size,
            0,
        )?;
    }
    Ok(image)
}

/// Frees a root and everything it owns.
pub(crate) fn discard(arena: &mut FrameArena, mut space: AddressSpace) {
    let result = space
        .clean_user_mappings(arena)
        .and_then(|()| space.release(arena));
    if let Err(err) = result {
        log::error!("leaked address space: {err}");
    }
}
