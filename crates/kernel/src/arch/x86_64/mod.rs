use core::arch::asm;

use x86_64::{
    VirtAddr,
    instructions::tables::load_tss,
    registers::{
        model_specific::{Efer, EferFlags, LStar, SFMask, Star},
        rflags::RFlags,
        segmentation::{CS, DS, ES, SS, Segment},
    },
    structures::{
        gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector},
        tss::TaskStateSegment,
    },
};

use crate::boot::BootInfo;

mod interrupts;
mod pic;
mod pit;
mod usermode;

pub use ::x86_64::instructions::interrupts::{
    disable as disable_interrupts, enable as enable_interrupts, without_interrupts,
};
pub use interrupts::exception_name;
pub use pic::{SERIAL_IRQ, TIMER_IRQ, end_of_interrupt};
pub use usermode::{Ring3, exit_app};

const KERNEL_STACK_SIZE: usize = 1024 * 1024;
const INTERRUPT_STACK_SIZE: usize = 4096 * 5;

#[repr(C, align(16))]
struct Stack<const N: usize>([u8; N]);

static mut KERNEL_STACK: Stack<KERNEL_STACK_SIZE> = Stack([0; KERNEL_STACK_SIZE]);

/// Written by `kestrel_call_app` and `set_privilege_stack` while the CPU uses it.
static mut TSS: TaskStateSegment = TaskStateSegment::new();
static GDT: spin::Once<(GlobalDescriptorTable, Selectors)> = spin::Once::new();

/// The architecture-specific entry point.
///
/// The loader calls this with its own stack still active. We move onto the kernel's
/// stack before anything else runs, so loader memory is never written to again.
#[unsafe(no_mangle)]
pub extern "sysv64" fn kenter(boot_info: &'static BootInfo) -> ! {
    let top = (&raw mut KERNEL_STACK).cast::<u8>().wrapping_add(KERNEL_STACK_SIZE);
    // SAFETY: nothing else uses KERNEL_STACK, and kernel_main never returns.
    unsafe {
        asm!(
            "cli",
            "mov rsp, {top}",
            "call {main}",
            top = in(reg) top,
            main = sym crate::kernel_main,
            in("rdi") boot_info as *const BootInfo,
            options(noreturn),
        )
    }
}

fn stack_top<const N: usize>(stack: *mut Stack<N>) -> VirtAddr {
    VirtAddr::from_ptr(stack) + N as u64
}

fn init_tss() {
    static mut BOOT_PRIVILEGE_STACK: Stack<INTERRUPT_STACK_SIZE> =
        Stack([0; INTERRUPT_STACK_SIZE]);
    static mut DOUBLE_FAULT_STACK: Stack<INTERRUPT_STACK_SIZE> = Stack([0; INTERRUPT_STACK_SIZE]);

    let mut tss = TaskStateSegment::new();
    // Used until the first application is entered.
    tss.privilege_stack_table[0] = stack_top(&raw mut BOOT_PRIVILEGE_STACK);
    tss.interrupt_stack_table[interrupts::DOUBLE_FAULT_IST_INDEX as usize] =
        stack_top(&raw mut DOUBLE_FAULT_STACK);
    // SAFETY: runs once, before the TSS is loaded.
    unsafe { TSS = tss };
}

/// Sets the stack the CPU switches to when an interrupt arrives in ring 3.
pub fn set_privilege_stack(top: u64) {
    without_interrupts(|| {
        let tss = &raw mut TSS;
        // SAFETY: there is one CPU and interrupts are off, so nothing else writes the TSS
        // meanwhile. The table is copied whole because the TSS is packed.
        unsafe {
            let mut stacks = (*tss).privilege_stack_table;
            stacks[0] = VirtAddr::new(top);
            (*tss).privilege_stack_table = stacks;
        }
    });
}

fn gdt() -> (&'static GlobalDescriptorTable, &'static Selectors) {
    let (gdt, selectors) = GDT.call_once(|| {
        // sysret derives user CS from user SS, so user data must come first.
        let mut gdt = GlobalDescriptorTable::new();
        let kernel_code = gdt.append(Descriptor::kernel_code_segment());
        let kernel_data = gdt.append(Descriptor::kernel_data_segment());
        let user_data = gdt.append(Descriptor::user_data_segment());
        let user_code = gdt.append(Descriptor::user_code_segment());
        // SAFETY: TSS is a static, so the descriptor never dangles.
        let tss = gdt.append(unsafe { Descriptor::tss_segment_unchecked(&raw const TSS) });
        let selectors = Selectors {
            kernel_code,
            kernel_data,
            user_data,
            user_code,
            tss,
        };
        (gdt, selectors)
    });
    (gdt, selectors)
}

struct Selectors {
    kernel_code: SegmentSelector,
    kernel_data: SegmentSelector,
    user_data: SegmentSelector,
    user_code: SegmentSelector,
    tss: SegmentSelector,
}

/// Selector applications run with in SS. CS is always the next descriptor.
pub fn user_stack_selector() -> u16 {
    gdt().1.user_data.0
}

pub fn init() {
    init_tss();
    let (gdt, selectors) = gdt();
    gdt.load();
    // SAFETY: the selectors index the table just loaded.
    unsafe {
        CS::set_reg(selectors.kernel_code);
        SS::set_reg(selectors.kernel_data);
        DS::set_reg(SegmentSelector::NULL);
        ES::set_reg(SegmentSelector::NULL);
        load_tss(selectors.tss);
    }
    interrupts::idt().load();
    pic::init();
    pit::init(task::TIMER_FREQ);
    init_syscall(selectors);
}

fn init_syscall(selectors: &Selectors) {
    // SAFETY: the entry point and selectors are valid for as long as the kernel runs.
    let star = unsafe {
        Efer::update(|flags| flags.insert(EferFlags::SYSTEM_CALL_EXTENSIONS));
        LStar::write(VirtAddr::new(usermode::syscall_entry_address()));
        SFMask::write(RFlags::INTERRUPT_FLAG | RFlags::TRAP_FLAG);
        Star::write(
            selectors.user_code,
            selectors.user_data,
            selectors.kernel_code,
            selectors.kernel_data,
        )
    };
    if let Err(err) = star {
        panic!("cannot program syscall selectors: {err}");
    }
    log::debug!("syscall entry installed");
}
