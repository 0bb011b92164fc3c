//! The tick source: SysTick configured from a caller-supplied
//! `frequency`, running the tick accountant on every underflow.
use crate::threading::{set_current_frame, KERNEL};

/// Configure SysTick for `frequency` Hz relative to `core_clock` Hz.
/// `scheduler_start` is the only caller; reconfiguring after it has been
/// called once is not supported.
///
/// # Safety
/// Must run with interrupts masked, before SysTick's interrupt is enabled.
#[cfg(target_os = "none")]
pub unsafe fn configure(core_clock: u32, frequency: u32) {
    let reload = core_clock / frequency - 1;
    let mut peripherals = unsafe { cortex_m::Peripherals::steal() };
    peripherals.SYST.set_reload(reload);
    peripherals.SYST.clear_current();
    peripherals.SYST.enable_interrupt();
    peripherals.SYST.enable_counter();
}

/// The SysTick exception handler: runs the tick accountant and, if
/// it requests a switch, publishes the new current thread's saved-frame
/// address and pends PendSV.
///
/// # Safety
/// Must be registered as the SysTick handler.
#[cfg(target_os = "none")]
pub unsafe fn handle_systick() {
    let state = unsafe { KERNEL.get() };
    state.on_tick();
    // Every tick requests a switch unconditionally.
    let current = state.current_thread();
    unsafe { set_current_frame(state.saved_frame_ptr(current)) };
    unsafe { crate::threading::yield_cpu() };
}
