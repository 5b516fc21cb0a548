//! What a user-mode page fault means.

use alloc::vec;

use pmm::{AddressSpace, FrameArena, PAGE_SIZE, VirtualAddress};
use task::Task;

use crate::{Error, loader::user_page_flags};

/// Resolves a fault at `addr` raised by `task` running in `space`.
///
/// Addresses in the task's demand-paging window get a fresh zeroed page. Addresses in one
/// of its file maps get a page filled from the mapped descriptor. Anything else is
/// [`Error::NotMapped`], and the application should be stopped.
pub fn handle_page_fault(
    task: &Task,
    space: &mut AddressSpace,
    arena: &mut FrameArena,
    addr: VirtualAddress,
) -> Result<(), Error> {
    let page = addr.align_down(PAGE_SIZE);
    if task.demand_paging().contains(addr) {
        space.map_zeroed(arena, page, 1, user_page_flags())?;
        return Ok(());
    }

    let Some(map) = task
        .file_maps()
        .iter()
        .find(|map| map.begin <= addr && addr < map.end)
    else {
        log::debug!("task {}: unhandled fault at {addr}", task.id());
        return Err(Error::NotMapped);
    };
    let file = task.file(map.fd).ok_or(Error::NotFound)?;

    space.map_zeroed(arena, page, 1, user_page_flags())?;
    let mut buf = vec![0u8; PAGE_SIZE];
    let len = file.load(&mut buf, page - map.begin);
    space.write_bytes(page, &buf[..len])?;
    Ok(())
}

/// Makes every page of `[begin, begin + len)` present so the kernel can touch it on the
/// task's behalf, resolving missing pages the way a fault would.
///
/// The whole range must lie in the application half. Pages that are already mapped are
/// left alone.
pub fn fault_in_range(
    task: &Task,
    space: &mut AddressSpace,
    arena: &mut FrameArena,
    begin: VirtualAddress,
    len: usize,
) -> Result<(), Error> {
    if len == 0 {
        return Ok(());
    }
    let last = begin.checked_add(len - 1).ok_or(Error::NotMapped)?;
    if !begin.is_user() || !last.is_user() {
        return Err(Error::NotMapped);
    }

    let last_page = last.align_down(PAGE_SIZE);
    let mut page = begin.align_down(PAGE_SIZE);
    loop {
        if space.translate(page).is_none() {
            handle_page_fault(task, space, arena, page)?;
        }
        if page == last_page {
            return Ok(());
        }
        page = page + PAGE_SIZE;
    }
}
