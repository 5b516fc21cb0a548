//! Running a loaded application to completion on the current task.

use alloc::sync::Arc;

use pmm::{AddressSpace, FrameArena, PAGE_SIZE, VirtualAddress};
use spin::Mutex;
use task::{DemandPaging, FileDescriptor, Scheduler};

use crate::{
    ArgVector, DirectoryEntry, Error, FileSystem, ProcessLoader,
    loader::{self, user_page_flags},
};

/// Address of the argument frame, the last page of the address space.
pub const ARGS_FRAME: usize = 0xffff_ffff_ffff_f000;

/// Size of the user stack, which sits directly below the argument frame.
pub const STACK_FRAMES: usize = 8;

const STANDARD_DESCRIPTORS: usize = 3;

fn stack_base() -> VirtualAddress {
    VirtualAddress::new(ARGS_FRAME - STACK_FRAMES * PAGE_SIZE)
}

/// Everything needed to enter an application.
#[derive(Debug)]
pub struct Launch<'a> {
    /// The process's private root, already active.
    pub space: &'a AddressSpace,
    pub entry: VirtualAddress,
    pub argc: usize,
    pub argv: VirtualAddress,
    pub stack_pointer: VirtualAddress,
    /// Where the trampoline parks the kernel stack pointer while the application runs.
    pub os_stack_ptr: *mut u64,
}

/// Transfers control to user mode and returns the application's exit status.
pub trait UserEntry {
    fn call_app(&self, launch: &Launch<'_>) -> i32;
}

impl<F> UserEntry for F
where
    F: Fn(&Launch<'_>) -> i32,
{
    fn call_app(&self, launch: &Launch<'_>) -> i32 {
        self(launch)
    }
}

/// Executes applications on behalf of the current task.
pub struct ProcessRunner<'k> {
    scheduler: &'k Scheduler,
    frames: &'k Mutex<FrameArena>,
    loader: &'k Mutex<ProcessLoader>,
}

impl<'k> ProcessRunner<'k> {
    pub fn new(
        scheduler: &'k Scheduler,
        frames: &'k Mutex<FrameArena>,
        loader: &'k Mutex<ProcessLoader>,
    ) -> Self {
        Self {
            scheduler,
            frames,
            loader,
        }
    }

    pub fn frames(&self) -> &'k Mutex<FrameArena> {
        self.frames
    }

    pub fn scheduler(&self) -> &'k Scheduler {
        self.scheduler
    }

    /// Loads `file`, runs it with `command` and `args` as its argument vector, and returns
    /// its exit status once it has been torn down.
    ///
    /// All three standard descriptors are `stdio`. On failure the calling task keeps its
    /// previous address space and no frames are leaked.
    pub fn execute(
        &self,
        fs: &dyn FileSystem,
        file: &DirectoryEntry,
        command: &str,
        args: &str,
        stdio: Arc<dyn FileDescriptor>,
        entry: &dyn UserEntry,
    ) -> Result<i32, Error> {
        let app = {
            let mut frames = self.frames.lock();
            self.loader.lock().load(&mut frames, fs, file)?
        };
        let previous = AddressSpace::active();
        let mut space = app.space;

        let staged = stage(&mut self.frames.lock(), &mut space, command, args);
        let argv = match staged {
            Ok(argv) => argv,
            Err(err) => {
                log::warn!("{command}: cannot set up arguments: {err}");
                // Nothing on the task has changed yet.
                loader::discard(&mut self.frames.lock(), space);
                return Err(err);
            }
        };

        let heap_start = app.load_end.align_up(PAGE_SIZE);
        let root = space.root().as_u64();
        let os_stack_ptr = self.scheduler.with_current(|task| {
            for _ in 0..STANDARD_DESCRIPTORS {
                task.open(stdio.clone());
            }
            *task.demand_paging_mut() = DemandPaging::starting_at(heap_start);
            task.set_file_map_end(stack_base());
            task.context_mut().cr3 = root;
            task.os_stack_ptr()
        });

        log::info!("{command}: entering at {} with {} args", app.entry, argv.argc());
        // SAFETY: the private root mirrors the kernel half of the active root.
        unsafe { space.activate() };
        let ret = entry.call_app(&Launch {
            space: &space,
            entry: app.entry,
            argc: argv.argc(),
            argv: argv.argv(),
            stack_pointer: VirtualAddress::new(ARGS_FRAME - size_of::<u64>()),
            os_stack_ptr,
        });
        log::info!("{command}: exited with {ret}");

        self.teardown(previous, space);
        Ok(ret)
    }

    fn teardown(&self, previous: AddressSpace, space: AddressSpace) {
        // SAFETY: `previous` was active when the application was launched.
        unsafe { previous.activate() };
        let root = previous.root().as_u64();
        self.scheduler.with_current(|task| {
            task.close_all();
            task.context_mut().cr3 = root;
        });
        loader::discard(&mut self.frames.lock(), space);
    }
}

/// Maps the argument frame and the stack, and writes the argument vector.
fn stage(
    arena: &mut FrameArena,
    space: &mut AddressSpace,
    command: &str,
    args: &str,
) -> Result<ArgVector, Error> {
    let base = VirtualAddress::new(ARGS_FRAME);
    space.map_zeroed(arena, base, 1, user_page_flags())?;

    let mut argv = ArgVector::new(base);
    argv.fill(command, args).map_err(|(pushed, err)| {
        log::debug!("{command}: argument frame full after {pushed} arguments");
        err
    })?;
    argv.write_to(space)?;

    space.map_zeroed(arena, stack_base(), STACK_FRAMES, user_page_flags())?;
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::tests::MemoryFs;
    use crate::image::tests::{BASE, ElfBuilder};
    use alloc::{string::String, vec};
    use pmm::emulation;
    use task::TaskManager;

    extern "sysv64" fn idle(_: u64, _: i64) -> ! {
        unreachable!()
    }

    struct Sink;

    impl FileDescriptor for Sink {
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

    struct Machine {
        scheduler: Scheduler,
        frames: Mutex<FrameArena>,
        loader: Mutex<ProcessLoader>,
        fs: MemoryFs,
    }

    impl Machine {
        fn boot() -> Self {
            let (arena, _kernel) = emulation::boot(256);
            let image = ElfBuilder::executable(BASE)
                .segment(BASE, b"\xb8\x07\0\0\0\xc3", 0x1800)
                .build();
            Self {
                scheduler: Scheduler::new(TaskManager::new(idle)),
                frames: Mutex::new(arena),
                loader: Mutex::new(ProcessLoader::new()),
                fs: MemoryFs::new().with_file("RET7", &image),
            }
        }

        fn runner(&self) -> ProcessRunner<'_> {
            ProcessRunner::new(&self.scheduler, &self.frames, &self.loader)
        }

        fn run(&self, command: &str, args: &str, entry: &dyn UserEntry) -> Result<i32, Error> {
            let file = self.fs.find_file(command).0.unwrap();
            self.runner()
                .execute(&self.fs, &file, command, args, Arc::new(Sink), entry)
        }

        fn free(&self) -> usize {
            self.frames.lock().free_frames()
        }
    }

    fn read_arg(launch: &Launch<'_>, index: usize) -> String {
        let mut pointer = [0u8; 8];
        launch
            .space
            .read_bytes(launch.argv + index * 8, &mut pointer)
            .unwrap();
        let mut bytes = vec![0u8; 16];
        launch
            .space
            .read_bytes(VirtualAddress::new(u64::from_le_bytes(pointer) as usize), &mut bytes)
            .unwrap();
        let len = bytes.iter().position(|&b| b == 0).unwrap();
        String::from_utf8(bytes[..len].to_vec()).unwrap()
    }

    #[test]
    fn warm_run_returns_status_and_reclaims_frames() {
        let machine = Machine::boot();
        let exit7 = |_: &Launch<'_>| 7;
        assert_eq!(machine.run("ret7", "", &exit7), Ok(7));

        let before = machine.free();
        assert_eq!(machine.run("ret7", "", &exit7), Ok(7));
        assert_eq!(machine.free(), before);
        assert_eq!(machine.loader.lock().cache().len(), 1);
    }

    #[test]
    fn application_sees_its_arguments() {
        let machine = Machine::boot();
        let ret = machine.run("ret7", "foo.txt  bar", &|launch: &Launch<'_>| {
            assert_eq!(launch.argc, 3);
            assert_eq!(read_arg(launch, 0), "ret7");
            assert_eq!(read_arg(launch, 1), "foo.txt");
            assert_eq!(read_arg(launch, 2), "bar");
            assert_eq!(launch.entry, VirtualAddress::new(BASE as usize));
            0
        });
        assert_eq!(ret, Ok(0));
    }

    #[test]
    fn task_state_is_set_for_the_run_and_cleared_after() {
        let machine = Machine::boot();
        let kernel_root = AddressSpace::active().root();

        machine
            .run("ret7", "", &|launch: &Launch<'_>| {
                assert_eq!(AddressSpace::active().root(), launch.space.root());
                assert!(launch.space.translate(launch.stack_pointer).is_some());
                machine.scheduler.with_current(|task| {
                    assert_eq!(task.open_files(), 3);
                    let heap = VirtualAddress::new(BASE as usize + PAGE_SIZE * 2);
                    assert_eq!(task.demand_paging().begin(), heap);
                    assert_eq!(task.demand_paging().end(), heap);
                    assert_eq!(task.file_map_end(), stack_base());
                    assert_eq!(task.context().cr3, launch.space.root().as_u64());
                });
                0
            })
            .unwrap();

        assert_eq!(AddressSpace::active().root(), kernel_root);
        machine.scheduler.with_current(|task| {
            assert_eq!(task.open_files(), 0);
            assert_eq!(task.context().cr3, kernel_root.as_u64());
        });
    }

    #[test]
    fn too_many_arguments_fail_without_leaking() {
        let machine = Machine::boot();
        machine.run("ret7", "", &|_: &Launch<'_>| 0).unwrap();
        let before = machine.free();

        let args: String = (0..40).map(|_| "x ").collect();
        let err = machine.run("ret7", &args, &|_: &Launch<'_>| -> i32 {
            panic!("must not be entered")
        });
        assert_eq!(err, Err(Error::Full));
        assert_eq!(machine.free(), before);
    }

    #[test]
    fn failed_setup_leaves_the_callers_descriptors_alone() {
        let machine = Machine::boot();
        let kernel_root = AddressSpace::active().root();
        machine.scheduler.with_current(|task| {
            task.open(Arc::new(Sink));
            task.set_file_map_end(VirtualAddress::new(ARGS_FRAME));
            task.reserve_file_map(0, PAGE_SIZE).unwrap();
        });

        let args: String = (0..40).map(|_| "x ").collect();
        let err = machine.run("ret7", &args, &|_: &Launch<'_>| -> i32 {
            panic!("must not be entered")
        });

        assert_eq!(err, Err(Error::Full));
        assert_eq!(AddressSpace::active().root(), kernel_root);
        machine.scheduler.with_current(|task| {
            assert_eq!(task.open_files(), 1);
            assert_eq!(task.file_maps().len(), 1);
        });
    }
}
