//! The kernel's tasks and the state they share.

use alloc::sync::Arc;

use pmm::{AddressSpace, VirtualAddress};
use process::{FileSystem, ProcessLoader, ProcessRunner, Shell, Terminal, TerminalFileDescriptor};
use spin::{Mutex, Once};
use task::{FileDescriptor, Message, Scheduler, TaskId, TaskManager};

use crate::{
    arch::{self, Ring3},
    console::SerialTerminal,
    fat::FatVolume,
    input::KeyDecoder,
    mem, syscall,
};

/// The boot context, which also receives the shell's redraw notices.
pub const MAIN_TASK: TaskId = TaskId::new(1);
pub const SHELL_TASK: TaskId = TaskId::new(3);

static SCHEDULER: Once<Scheduler> = Once::new();
static LOADER: Mutex<ProcessLoader> = Mutex::new(ProcessLoader::new());
static VOLUME: Once<FatVolume> = Once::new();

pub fn scheduler() -> &'static Scheduler {
    SCHEDULER.get().expect("scheduler used before tasks::init")
}

/// The scheduler, or `None` while interrupts can still arrive ahead of `init`.
pub fn try_scheduler() -> Option<&'static Scheduler> {
    SCHEDULER.get()
}

pub fn volume() -> &'static FatVolume {
    VOLUME.get().expect("volume mounted before tasks run")
}

/// Creates the idle and shell tasks. The caller becomes the main task.
pub fn init(volume: &'static [u8]) {
    VOLUME.call_once(|| FatVolume::mount(volume));
    let scheduler = SCHEDULER.call_once(|| Scheduler::new(TaskManager::new(idle)));
    let shell = scheduler.spawn(shell_task, 0);
    assert_eq!(shell, SHELL_TASK, "shell must be the first spawned task");
    log::debug!("tasks ready, shell is task {shell}");
}

/// Types `command_line` into the shell, then services redraw notices forever.
pub fn run_main(command_line: &str) -> ! {
    let scheduler = scheduler();
    if !command_line.is_empty() {
        let mut decoder = KeyDecoder::new();
        let keys = command_line
            .bytes()
            .chain(core::iter::once(b'\n'))
            .filter_map(|byte| decoder.feed(byte));
        for msg in keys {
            if let Err(err) = scheduler.send_message(SHELL_TASK, msg) {
                log::error!("cannot reach the shell: {err}");
                break;
            }
        }
    }

    loop {
        match scheduler.wait_message() {
            Message::DrawArea { layer_id, area } => {
                log::trace!("redraw layer {layer_id}: {area:?}");
            }
            other => log::debug!("main task ignoring {other:?}"),
        }
    }
}

/// Serves a user-mode page fault at `addr` for the running task.
pub fn handle_user_fault(addr: VirtualAddress) -> Result<(), process::Error> {
    let mut frames = mem::frames().lock();
    scheduler().with_current(|task| {
        process::handle_page_fault(task, &mut AddressSpace::active(), &mut frames, addr)
    })
}

/// Points ring-3 interrupts at the kernel stack the running task's application was
/// entered from. Tasks that never entered one leave the TSS alone.
pub fn load_privilege_stack() {
    let os_stack = syscall::current_os_stack();
    if os_stack != 0 {
        arch::set_privilege_stack(os_stack);
    }
}

/// Maps in every page of `[begin, begin + len)` that the running task could fault in.
pub fn fault_in_user_range(begin: VirtualAddress, len: usize) -> Result<(), process::Error> {
    let mut frames = mem::frames().lock();
    scheduler().with_current(|task| {
        process::fault_in_range(task, &mut AddressSpace::active(), &mut frames, begin, len)
    })
}

extern "sysv64" fn idle(_: u64, _: i64) -> ! {
    loop {
        arch::enable_interrupts();
        x86_64::instructions::hlt();
        scheduler().switch_task(false);
    }
}

/// The first shell, and every shell `noterm` starts. Those get [`Shell::HEADLESS`] and
/// share the serial line without a window of their own.
extern "sysv64" fn shell_task(id: u64, data: i64) -> ! {
    let scheduler = scheduler();
    let terminal: Arc<dyn Terminal> = Arc::new(SerialTerminal);
    let stdio: Arc<dyn FileDescriptor> =
        Arc::new(TerminalFileDescriptor::new(terminal.clone(), scheduler));
    let fs: &'static dyn FileSystem = volume();
    let runner = ProcessRunner::new(scheduler, mem::frames(), &LOADER);

    let mut shell =
        Shell::new(terminal, fs, runner, stdio, &Ring3).with_terminal_entry(shell_task);
    if data == Shell::HEADLESS {
        shell = shell.headless();
    }
    log::info!("shell started as task {id} (data {data})");
    shell.run(MAIN_TASK)
}
