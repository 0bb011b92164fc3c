//! The context-switch trampoline: the PendSV handler, `yield_cpu`,
//! and the global kernel-state cell exception handlers reach into.
use core::cell::UnsafeCell;
use core::sync::atomic::{compiler_fence, Ordering};

#[cfg(target_os = "none")]
use memoffset::offset_of;
use rtk_kernel::state::KernelState;
#[cfg(target_os = "none")]
use rtk_kernel::thread::CalleeContext;
use rtk_kernel::thread::SavedFrame;

/// The single kernel-state value, created once by [`rt::reset_init`]
/// and reached by every exception handler in this crate. Protected by
/// running entirely at or below PendSV's priority with interrupts masked
/// during the section that touches it -- never by a lock.
///
/// [`rt::reset_init`]: crate::rt::reset_init
pub struct KernelCell(UnsafeCell<Option<KernelState>>);

// Safety: access is serialized by exception-priority ordering; no two
// exception contexts that touch this cell ever run concurrently on a
// single core.
unsafe impl Sync for KernelCell {}

pub static KERNEL: KernelCell = KernelCell(UnsafeCell::new(None));

impl KernelCell {
    /// # Safety
    /// The caller must be running with interrupts masked, or inside an
    /// exception whose priority excludes re-entrant access (SVCall,
    /// PendSV, SysTick all qualify per `rt::reset_init`'s priority setup).
    pub unsafe fn get(&self) -> &mut KernelState {
        let slot = unsafe { &mut *self.0.get() };
        slot.get_or_insert_with(KernelState::bootstrap)
    }
}

/// Request a context switch: pend PendSV and let the exception-priority
/// scheme deliver it once the current exception (if any) unwinds.
///
/// # Safety
/// Must be called with CPU Lock held on entry, per `rtk_kernel`'s
/// expectation that a kernel operation completes its mutations before
/// requesting a switch.
#[cfg(target_os = "none")]
pub unsafe fn yield_cpu() {
    compiler_fence(Ordering::Release);
    cortex_m::peripheral::SCB::set_pendsv();
    cortex_m::asm::dsb();
    compiler_fence(Ordering::Acquire);
}

#[cfg(target_os = "none")]
const OFFSET_USER_SP: usize = offset_of!(SavedFrame, user_sp);
#[cfg(target_os = "none")]
const OFFSET_CALLEE: usize = offset_of!(SavedFrame, callee);
#[cfg(target_os = "none")]
const OFFSET_EXC_RETURN: usize = offset_of!(CalleeContext, exc_return);

/// Runs on the PendSV handler's own stack, between the raw asm save and
/// restore halves: picks the next thread and returns pointers to both
/// saved-frame records so the asm can finish the switch.
///
/// # Safety
/// Must only be called from [`handle_pend_sv`], with `current`'s callee
/// context and user stack pointer already written into its `SavedFrame`.
#[cfg(target_os = "none")]
unsafe extern "C" fn choose_next_thread(current: usize) -> *mut SavedFrame {
    // Safety: PendSV runs at the lowest priority; nothing else touches the
    // kernel state while this handler is live.
    let state = unsafe { KERNEL.get() };
    let _ = current;
    let next = state.switch();
    state.saved_frame_ptr(next)
}

/// The PendSV handler: saves the outgoing thread's callee-saved context,
/// picks the next thread, and restores its context. The privilege-level
/// transition is folded into the saved/restored `CONTROL` value the same
/// way the hardware frame folds in the rest of the user context.
///
/// # Safety
/// Must be registered as the PendSV exception handler. Entered in Thread
/// mode is never valid; PendSV is configured at the lowest priority so it
/// always preempts exactly one background (user) context.
#[cfg(target_os = "none")]
#[naked]
pub unsafe extern "C" fn handle_pend_sv() {
    // Precondition: the interrupted context's exception frame is already
    // on PSP (user threads always run on PSP; see `rt::new_thread_frame`).
    //
    // r0 is loaded with the address of the current thread's `SavedFrame`
    // by the svc/tick glue before PendSV is pended -- see
    // `KERNEL_SAVED_FRAME` below -- so this handler never has to resolve
    // "which thread is current" itself.
    unsafe {
        core::arch::asm!(
            "
            ldr  r0, ={current_ptr}
            ldr  r0, [r0]

            mrs  r1, psp
            mrs  r2, control
            str  r1, [r0, #{off_sp}]
            str  r2, [r0, #{off_exc}]
            add  r3, r0, #{off_callee}
            stm  r3, {{r4-r11}}

            bl   {choose_next}

            ldr  r1, [r0, #{off_sp}]
            ldr  r2, [r0, #{off_exc}]
            add  r3, r0, #{off_callee}
            ldm  r3, {{r4-r11}}
            msr  psp, r1
            msr  control, r2
            ldr  lr, ={exc_return}
            bx   lr
            ",
            current_ptr = sym CURRENT_FRAME,
            choose_next = sym choose_next_thread,
            off_sp = const OFFSET_USER_SP,
            off_exc = const OFFSET_EXC_RETURN,
            off_callee = const OFFSET_CALLEE,
            exc_return = const 0xFFFF_FFFDu32,
            options(noreturn),
        );
    }
}

/// Raw pointer to the currently-running thread's `SavedFrame`, refreshed
/// by `svc`/`systick` glue immediately before pending PendSV. The naked
/// handler above cannot call back into safe Rust to look this up itself.
#[repr(transparent)]
pub struct CurrentFrameCell(UnsafeCell<*mut SavedFrame>);

// Safety: same serialization argument as `KernelCell` above -- access is
// confined to interrupts-masked sections and exception-priority ordering.
unsafe impl Sync for CurrentFrameCell {}

impl CurrentFrameCell {
    pub const fn get(&self) -> *mut *mut SavedFrame {
        self.0.get()
    }
}

pub static CURRENT_FRAME: CurrentFrameCell = CurrentFrameCell(UnsafeCell::new(core::ptr::null_mut()));

/// Publish `t`'s saved-frame address so the next PendSV entry saves into
/// the right place.
///
/// # Safety
/// Must be called with interrupts masked.
pub unsafe fn set_current_frame(ptr: *mut SavedFrame) {
    unsafe { *CURRENT_FRAME.get() = ptr };
}
