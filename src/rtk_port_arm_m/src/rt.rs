//! Reset-time setup. This crate relies on `cortex-m-rt` for the vector
//! table and reset sequence; it only configures exception priorities and
//! the initial kernel-state value once control reaches it.
#[cfg(target_os = "none")]
use crate::threading::KERNEL;

/// Runs once, early in the reset handler a binary crate provides via
/// `cortex-m-rt`: sets SVCall and PendSV to the lowest exception priority
/// (so the context-switch trampoline never preempts an IRQ) and
/// seeds the kernel-state cell so the first `thread_init` syscall has
/// something to mutate.
///
/// # Safety
/// Must run in Thread mode, before any of this crate's exception handlers
/// can fire (i.e. before SVCall/PendSV/SysTick are unmasked).
#[cfg(target_os = "none")]
pub unsafe fn reset_init() {
    let mut peripherals = unsafe { cortex_m::Peripherals::steal() };
    unsafe {
        peripherals
            .SCB
            .set_priority(cortex_m::peripheral::scb::SystemHandler::SVCall, 0xe0);
        peripherals
            .SCB
            .set_priority(cortex_m::peripheral::scb::SystemHandler::PendSV, 0xff);
    }
    // Force the kernel-state cell to exist before any syscall can race it.
    let _ = unsafe { KERNEL.get() };
}

/// Fatal-fault fallback: log and halt. Used by the memory-fault
/// handler a binary crate wires up when the faulting thread is the idle or
/// default slot.
#[cfg(target_os = "none")]
pub fn halt(msg: &str) -> ! {
    crate::diag::diag_error!("{msg}");
    cortex_m::asm::udf()
}

#[cfg(all(not(target_os = "none"), any(test, feature = "host-sim")))]
pub fn halt(msg: &str) -> ! {
    panic!("{msg}")
}
