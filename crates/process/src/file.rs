//! Files on the boot volume opened by applications.

use alloc::sync::Arc;

use pmm::VirtualAddress;
use spin::Mutex;
use task::{FileDescriptor, Task};

use crate::{DirectoryEntry, Error, FileSystem};

/// A read-only file with its own read position.
pub struct VolumeFile {
    fs: &'static dyn FileSystem,
    entry: DirectoryEntry,
    position: Mutex<usize>,
}

impl VolumeFile {
    pub fn new(fs: &'static dyn FileSystem, entry: DirectoryEntry) -> Self {
        Self {
            fs,
            entry,
            position: Mutex::new(0),
        }
    }
}

impl FileDescriptor for VolumeFile {
    fn read(&self, buf: &mut [u8]) -> usize {
        let mut position = self.position.lock();
        let len = self.fs.load_file_at(&self.entry, *position, buf);
        *position += len;
        len
    }

    fn write(&self, _buf: &[u8]) -> usize {
        0
    }

    fn size(&self) -> usize {
        self.entry.size
    }

    fn load(&self, buf: &mut [u8], offset: usize) -> usize {
        self.fs.load_file_at(&self.entry, offset, buf)
    }
}

/// Opens the file at `path` for the running application and returns its descriptor.
pub fn open_file(
    task: &mut Task,
    fs: &'static dyn FileSystem,
    path: &str,
) -> Result<usize, Error> {
    let entry = match fs.find_file(path) {
        (None, _) => return Err(Error::NotFound),
        (Some(entry), _) if entry.is_directory => return Err(Error::IsADirectory),
        (Some(_), true) => return Err(Error::NotADirectory),
        (Some(entry), false) => entry,
    };
    log::debug!("task {}: opening {} ({} bytes)", task.id(), entry.name, entry.size);
    Ok(task.open(Arc::new(VolumeFile::new(fs, entry))))
}

/// Reserves address space for the whole of descriptor `fd`, to be filled in page by page
/// as the application touches it. Returns the start of the mapping and the file size.
pub fn map_file(task: &mut Task, fd: usize) -> Result<(VirtualAddress, usize), Error> {
    let file = task.file(fd).ok_or(Error::NotFound)?;
    let size = file.size();
    let begin = task
        .reserve_file_map(fd, size)
        .ok_or(Error::OutOfMemory)?;
    Ok((begin, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::handle_page_fault;
    use crate::fs::tests::MemoryFs;
    use alloc::{boxed::Box, vec};
    use pmm::{AddressSpace, PAGE_SIZE, emulation};
    use task::{DemandPaging, TaskManager};

    const MAPS_END: usize = 0xffff_ffff_ffff_7000;

    extern "sysv64" fn idle(_: u64, _: i64) -> ! {
        unreachable!()
    }

    fn volume() -> &'static MemoryFs {
        let mut big = vec![b'-'; PAGE_SIZE];
        big.extend_from_slice(b"tail");
        Box::leak(Box::new(
            MemoryFs::new()
                .with_file("NOTES.TXT", b"first line\nsecond line\n")
                .with_file("BIG.DAT", &big)
                .with_dir("DOCS"),
        ))
    }

    #[test]
    fn reads_advance_through_the_file() {
        let fs = volume();
        let mut manager = TaskManager::new(idle);
        let task = manager.current_task();

        let fd = open_file(task, fs, "/notes.txt").unwrap();
        let file = task.file(fd).unwrap();
        let mut buf = [0u8; 11];
        assert_eq!(file.read(&mut buf), 11);
        assert_eq!(&buf, b"first line\n");
        assert_eq!(file.read(&mut buf), 11);
        assert_eq!(&buf, b"second line");
        assert_eq!(file.read(&mut buf), 1);
        assert_eq!(file.read(&mut buf), 0);
        assert_eq!(file.write(b"nope"), 0);
    }

    #[test]
    fn open_reports_missing_files_and_directories() {
        let fs = volume();
        let mut manager = TaskManager::new(idle);
        let task = manager.current_task();

        assert_eq!(open_file(task, fs, "missing"), Err(Error::NotFound));
        assert_eq!(open_file(task, fs, "docs"), Err(Error::IsADirectory));
        assert_eq!(open_file(task, fs, "notes.txt/"), Err(Error::NotADirectory));
        assert_eq!(task.open_files(), 0);
    }

    #[test]
    fn mapped_file_is_loaded_on_fault() {
        let fs = volume();
        let (mut arena, _kernel) = emulation::boot(64);
        let mut space = AddressSpace::create_root(&mut arena).unwrap();
        let mut manager = TaskManager::new(idle);
        let task = manager.current_task();
        task.set_file_map_end(VirtualAddress::new(MAPS_END));

        let fd = open_file(task, fs, "big.dat").unwrap();
        let (begin, size) = map_file(task, fd).unwrap();
        assert_eq!(size, PAGE_SIZE + 4);
        assert_eq!(begin, VirtualAddress::new(MAPS_END - 2 * PAGE_SIZE));

        handle_page_fault(task, &mut space, &mut arena, begin + PAGE_SIZE).unwrap();
        let mut buf = [0u8; 4];
        space.read_bytes(begin + PAGE_SIZE, &mut buf).unwrap();
        assert_eq!(&buf, b"tail");
    }

    #[test]
    fn mapping_that_meets_the_heap_is_refused() {
        let fs = volume();
        let mut manager = TaskManager::new(idle);
        let task = manager.current_task();
        let heap = VirtualAddress::new(MAPS_END - PAGE_SIZE);
        *task.demand_paging_mut() = DemandPaging::starting_at(heap);
        task.set_file_map_end(VirtualAddress::new(MAPS_END));

        let fd = open_file(task, fs, "big.dat").unwrap();
        assert_eq!(map_file(task, fd), Err(Error::OutOfMemory));
        assert_eq!(map_file(task, 9), Err(Error::NotFound));
        assert!(task.file_maps().is_empty());
    }
}
