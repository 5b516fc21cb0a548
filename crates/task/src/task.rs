//! A schedulable unit of execution.

use alloc::{boxed::Box, collections::VecDeque, sync::Arc, vec, vec::Vec};
use core::fmt;

use pmm::{AddressSpace, PAGE_SIZE, VirtualAddress};

use crate::{FileDescriptor, Message, TaskContext, TaskEntry};

/// Size of each task's private kernel stack.
pub const DEFAULT_STACK_BYTES: usize = 8 * PAGE_SIZE;

/// Identifier of a task. Ids are handed out in increasing order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Virtual range `[begin, end)` in which page faults are served with fresh zeroed pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemandPaging {
    begin: VirtualAddress,
    end: VirtualAddress,
}

impl DemandPaging {
    /// Creates an empty window starting at `begin`.
    pub const fn starting_at(begin: VirtualAddress) -> Self {
        Self { begin, end: begin }
    }

    pub fn begin(&self) -> VirtualAddress {
        self.begin
    }

    pub fn end(&self) -> VirtualAddress {
        self.end
    }

    /// Returns true if a fault at `addr` should be served from the window.
    pub fn contains(&self, addr: VirtualAddress) -> bool {
        self.begin <= addr && addr < self.end
    }

    /// Extends the window by `pages` pages and returns the previous end.
    pub fn grow(&mut self, pages: usize) -> VirtualAddress {
        let old = self.end;
        self.end = old + pages * PAGE_SIZE;
        old
    }

    /// Like [`grow`](Self::grow), but leaves the window alone and returns `None` if the new
    /// end would pass `limit`.
    pub fn try_grow(&mut self, pages: usize, limit: VirtualAddress) -> Option<VirtualAddress> {
        let end = pages
            .checked_mul(PAGE_SIZE)
            .and_then(|bytes| self.end.checked_add(bytes))
            .filter(|&end| end <= limit)?;
        Some(core::mem::replace(&mut self.end, end))
    }
}

impl Default for DemandPaging {
    fn default() -> Self {
        Self::starting_at(VirtualAddress::new(0))
    }
}

/// A file mapped into the process at `[begin, end)`, loaded page by page on fault.
#[derive(Clone)]
pub struct FileMapping {
    pub fd: usize,
    pub begin: VirtualAddress,
    pub end: VirtualAddress,
}

/// A kernel task.
pub struct Task {
    id: TaskId,
    stack: Box<[u64]>,
    context: TaskContext,
    os_stack_ptr: u64,
    mailbox: VecDeque<Message>,
    demand_paging: DemandPaging,
    file_map_end: VirtualAddress,
    files: Vec<Option<Arc<dyn FileDescriptor>>>,
    file_maps: Vec<FileMapping>,
}

impl Task {
    pub(crate) fn new(id: TaskId) -> Self {
        Self {
            id,
            stack: vec![0u64; DEFAULT_STACK_BYTES / 8].into_boxed_slice(),
            context: TaskContext::new(),
            os_stack_ptr: 0,
            mailbox: VecDeque::new(),
            demand_paging: DemandPaging::default(),
            file_map_end: VirtualAddress::new(0),
            files: Vec::new(),
            file_maps: Vec::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Arranges for the first dispatch of this task to run `entry(id, data)`.
    ///
    /// The task starts with the kernel mappings of the currently active root.
    pub fn init_context(&mut self, entry: TaskEntry, data: i64) -> &mut Self {
        let stack_end = self.stack.as_ptr_range().end as u64;
        let root = AddressSpace::active().root().as_u64();
        self.context
            .prepare(entry, self.id.as_u64(), data, stack_end, root);
        self
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut TaskContext {
        &mut self.context
    }

    /// Slot the user-mode trampoline saves the kernel stack pointer into.
    ///
    /// The slot lives as long as the task and never moves.
    pub fn os_stack_ptr(&mut self) -> *mut u64 {
        &mut self.os_stack_ptr
    }

    /// Appends `msg` to the mailbox.
    pub(crate) fn push_message(&mut self, msg: Message) {
        self.mailbox.push_back(msg);
    }

    /// Pops the oldest message, or `None` if the mailbox is empty.
    pub fn receive_message(&mut self) -> Option<Message> {
        self.mailbox.pop_front()
    }

    pub fn pending_messages(&self) -> usize {
        self.mailbox.len()
    }

    pub fn demand_paging(&self) -> &DemandPaging {
        &self.demand_paging
    }

    pub fn demand_paging_mut(&mut self) -> &mut DemandPaging {
        &mut self.demand_paging
    }

    pub fn file_map_end(&self) -> VirtualAddress {
        self.file_map_end
    }

    pub fn set_file_map_end(&mut self, end: VirtualAddress) {
        self.file_map_end = end;
    }

    /// Opens `fd` and returns its descriptor number, reusing the lowest free slot.
    pub fn open(&mut self, fd: Arc<dyn FileDescriptor>) -> usize {
        match self.files.iter().position(Option::is_none) {
            Some(slot) => {
                self.files[slot] = Some(fd);
                slot
            }
            None => {
                self.files.push(Some(fd));
                self.files.len() - 1
            }
        }
    }

    /// Returns the descriptor behind number `fd`.
    pub fn file(&self, fd: usize) -> Option<Arc<dyn FileDescriptor>> {
        self.files.get(fd).and_then(|f| f.clone())
    }

    pub fn open_files(&self) -> usize {
        self.files.iter().filter(|f| f.is_some()).count()
    }

    pub fn file_maps(&self) -> &[FileMapping] {
        &self.file_maps
    }

    /// Reserves room for descriptor `fd` just below the current file-map boundary and
    /// returns the start of the mapping.
    ///
    /// Returns `None` if the mapping would reach down into the demand-paging window.
    pub fn reserve_file_map(&mut self, fd: usize, bytes: usize) -> Option<VirtualAddress> {
        let end = self.file_map_end;
        let begin = end
            .as_usize()
            .checked_sub(bytes)
            .and_then(VirtualAddress::try_new)?
            .align_down(PAGE_SIZE);
        if begin < self.demand_paging.end() {
            return None;
        }
        self.file_map_end = begin;
        self.file_maps.push(FileMapping { fd, begin, end });
        Some(begin)
    }

    /// Drops every open file and file mapping.
    pub fn close_all(&mut self) {
        self.files.clear();
        self.file_maps.clear();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("mailbox", &self.mailbox.len())
            .field("files", &self.open_files())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullFile;

    impl FileDescriptor for NullFile {
        fn read(&self, _: &mut [u8]) -> usize {
            0
        }

        fn write(&self, buf: &[u8]) -> usize {
            buf.len()
        }

        fn size(&self) -> usize {
            0
        }

        fn load(&self, _: &mut [u8], _: usize) -> usize {
            0
        }
    }

    #[test]
    fn mailbox_is_fifo() {
        let mut task = Task::new(TaskId::new(5));
        for activate in [true, false, true] {
            task.push_message(Message::WindowActive { activate });
        }

        assert_eq!(task.receive_message(), Some(Message::WindowActive { activate: true }));
        assert_eq!(task.receive_message(), Some(Message::WindowActive { activate: false }));
        assert_eq!(task.receive_message(), Some(Message::WindowActive { activate: true }));
        assert_eq!(task.receive_message(), None);
    }

    #[test]
    fn demand_paging_window_grows_from_begin() {
        let start = VirtualAddress::new(0xffff_8000_0000_3000);
        let mut window = DemandPaging::starting_at(start);
        assert!(!window.contains(start));

        assert_eq!(window.grow(2), start);
        assert!(window.contains(start));
        assert!(window.contains(start + PAGE_SIZE + 8));
        assert!(!window.contains(start + 2 * PAGE_SIZE));
    }

    #[test]
    fn try_grow_stops_at_the_limit() {
        let start = VirtualAddress::new(0xffff_8000_0010_0000);
        let limit = start + 3 * PAGE_SIZE;
        let mut window = DemandPaging::starting_at(start);

        assert_eq!(window.try_grow(2, limit), Some(start));
        assert_eq!(window.try_grow(2, limit), None);
        assert_eq!(window.end(), start + 2 * PAGE_SIZE);
        assert_eq!(window.try_grow(1, limit), Some(start + 2 * PAGE_SIZE));
        assert_eq!(window.end(), limit);
        assert_eq!(window.try_grow(usize::MAX, limit), None);
        assert_eq!(window.try_grow(0, limit), Some(limit));
    }

    #[test]
    fn file_maps_grow_downward_page_aligned() {
        let mut task = Task::new(TaskId::new(1));
        let top = VirtualAddress::new(0xffff_ffff_ffff_7000);
        task.set_file_map_end(top);

        let first = task.reserve_file_map(3, 100).unwrap();
        assert_eq!(first, top - PAGE_SIZE);
        let second = task.reserve_file_map(4, PAGE_SIZE + 1).unwrap();
        assert_eq!(second, first - 2 * PAGE_SIZE);
        assert_eq!(task.file_map_end(), second);
        assert_eq!(task.file_maps().len(), 2);
    }

    #[test]
    fn file_maps_stop_at_the_demand_window() {
        let mut task = Task::new(TaskId::new(1));
        let heap = VirtualAddress::new(0xffff_8000_0010_0000);
        task.demand_paging = DemandPaging::starting_at(heap);
        task.demand_paging.grow(1);
        task.set_file_map_end(heap + 3 * PAGE_SIZE);

        assert_eq!(task.reserve_file_map(3, 3 * PAGE_SIZE), None);
        assert_eq!(task.file_map_end(), heap + 3 * PAGE_SIZE);
        assert!(task.file_maps().is_empty());
        assert_eq!(task.reserve_file_map(3, 2 * PAGE_SIZE), Some(heap + PAGE_SIZE));
    }

    #[test]
    fn open_reuses_lowest_free_slot() {
        let mut task = Task::new(TaskId::new(1));
        for expected in 0..3 {
            assert_eq!(task.open(Arc::new(NullFile)), expected);
        }
        assert_eq!(task.open_files(), 3);
        assert!(task.file(7).is_none());

        task.close_all();
        assert_eq!(task.open_files(), 0);
        assert_eq!(task.open(Arc::new(NullFile)), 0);
    }
}
