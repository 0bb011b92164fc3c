//! The `svc` trap handler: the only module that knows the raw shape
//! of a Cortex-M exception frame. Decodes the operation number and
//! arguments, calls into `rtk_kernel::syscall::dispatch`, writes the
//! return value back into the frame, and requests a switch if the
//! operation asked for one.
use rtk_kernel::syscall::{dispatch, SyscallArgs, SyscallOp};
use rtk_kernel::thread::ExceptionFrame;

use crate::threading::{set_current_frame, KERNEL};

/// Decode and run the operation trapped by `svc`.
///
/// `frame` points at the hardware-stacked exception frame (r0-r3, r12, lr,
/// pc, xpsr); the fifth argument, when the operation needs one, sits in the
/// word immediately above it on the user stack. The `svc` instruction's
/// immediate byte -- the operation number -- is recovered from the
/// instruction two bytes before the return address.
///
/// # Safety
/// Must be called from the `svc` exception handler with `frame` pointing
/// at that exception's hardware-stacked frame on the interrupted stack.
#[cfg(target_os = "none")]
pub unsafe fn handle_svc(frame: *mut ExceptionFrame) {
    let f = unsafe { &mut *frame };

    let svc_instr = unsafe { *((f.pc as *const u16).offset(-1)) };
    let code = (svc_instr & 0xff) as u8;

    let Some(op) = SyscallOp::from_code(code) else {
        crate::diag::diag_error!("undefined svc number {code}");
        return;
    };

    // A fifth argument, when the operation needs one, lives on the user
    // stack immediately above the saved frame.
    let a4 = if matches!(op, SyscallOp::ThreadCreate) {
        unsafe { *(frame.add(1) as *const u32) }
    } else {
        0
    };

    let args = SyscallArgs {
        a0: f.r0,
        a1: f.r1,
        a2: f.r2,
        a3: f.r3,
        a4,
    };

    // Safety: SVCall runs at the lowest priority above PendSV; nothing
    // else touches the kernel state while this handler is live.
    let state = unsafe { KERNEL.get() };
    *state.privilege_mut(state.current_thread()) = rtk_kernel::thread::PrivilegeLevel::InKernelCall;

    let result = dispatch(state, op, args);

    f.r0 = result.retval as u32;
    *state.privilege_mut(state.current_thread()) = rtk_kernel::thread::PrivilegeLevel::User;

    if result.request_switch {
        let current = state.current_thread();
        unsafe { set_current_frame(state.saved_frame_ptr(current)) };
        unsafe { crate::threading::yield_cpu() };
    }
}
