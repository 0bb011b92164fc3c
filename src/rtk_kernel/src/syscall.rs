//! The syscall boundary's target-independent half. Dispatch is a
//! pure function of kernel state, an operation code, and its arguments; the
//! only thing that knows about the Cortex-M trap frame's raw register
//! layout is `rtk_port_arm_m::svc`.
use crate::{state::KernelState, ThreadId};

/// One argument slot's worth of a trap frame, already decoded by the port.
/// `a4` is the fifth argument some operations need, read by the port from
/// the user stack slot immediately above the saved trap frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyscallArgs {
    pub a0: u32,
    pub a1: u32,
    pub a2: u32,
    pub a3: u32,
    pub a4: u32,
}

/// The recognized supervisor-call operations, numbered per the ABI table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyscallOp {
    Sbrk = 0,
    Write = 1,
    Read = 6,
    Exit = 7,
    ThreadInit = 9,
    ThreadCreate = 10,
    ThreadKill = 11,
    SchedulerStart = 12,
    MutexInit = 13,
    MutexLock = 14,
    MutexUnlock = 15,
    WaitUntilNextPeriod = 16,
    GetTime = 17,
    GetPriority = 19,
    ThreadTime = 20,
}

impl SyscallOp {
    /// Decodes the trap's 8-bit operation number. `None` for any code not
    /// in the ABI table; the port treats that as a fault.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Sbrk,
            1 => Self::Write,
            6 => Self::Read,
            7 => Self::Exit,
            9 => Self::ThreadInit,
            10 => Self::ThreadCreate,
            11 => Self::ThreadKill,
            12 => Self::SchedulerStart,
            13 => Self::MutexInit,
            14 => Self::MutexLock,
            15 => Self::MutexUnlock,
            16 => Self::WaitUntilNextPeriod,
            17 => Self::GetTime,
            19 => Self::GetPriority,
            20 => Self::ThreadTime,
            _ => return None,
        })
    }
}

/// Whether the operation just run should cause the port to request a
/// context switch before returning to user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    pub retval: i32,
    pub request_switch: bool,
}

/// `rtk_kernel::syscall::dispatch(state, op, args)`: runs `op` against
/// `state` on behalf of the current thread and returns the value to place
/// in the trap frame's first register, plus whether a switch is due.
pub fn dispatch(state: &mut KernelState, op: SyscallOp, args: SyscallArgs) -> Dispatched {
    let current: ThreadId = state.current_thread();

    match op {
        SyscallOp::Sbrk => {
            let incr = args.a0 as i32;
            let retval = match state.sbrk(incr) {
                Ok(prev) => prev as i32,
                Err(e) => e.sentinel(),
            };
            Dispatched { retval, request_switch: false }
        }
        SyscallOp::Write => {
            let fd = args.a0 as i32;
            let len = args.a2 as i32;
            let retval = match KernelState::check_fd(fd) {
                Ok(()) => len,
                Err(e) => e.sentinel(),
            };
            Dispatched { retval, request_switch: false }
        }
        SyscallOp::Read => {
            let fd = args.a0 as i32;
            let len = args.a2 as i32;
            let retval = match KernelState::check_fd(fd) {
                Ok(()) => len,
                Err(e) => e.sentinel(),
            };
            Dispatched { retval, request_switch: false }
        }
        SyscallOp::Exit => {
            log::info!("thread {current} exited with status {}", args.a0 as i32);
            Dispatched { retval: args.a0 as i32, request_switch: false }
        }
        SyscallOp::ThreadInit => {
            let max_threads = args.a0 as usize;
            let stack_words = args.a1 as usize;
            let idle_fn = if args.a2 == 0 { None } else { Some(args.a2 as usize) };
            let max_mutexes = args.a3 as usize;
            let retval = match state.thread_init(max_threads, stack_words, idle_fn, max_mutexes) {
                Ok(()) => 0,
                Err(e) => e.sentinel(),
            };
            Dispatched { retval, request_switch: false }
        }
        SyscallOp::ThreadCreate => {
            let entry = args.a0 as usize;
            let prio = args.a1 as u8;
            let c = args.a2;
            let t = args.a3;
            let argp = args.a4 as usize;
            let retval = match state.thread_create(entry, prio, c, t, argp) {
                Ok(()) => 0,
                Err(e) => e.sentinel(),
            };
            Dispatched { retval, request_switch: false }
        }
        SyscallOp::ThreadKill => {
            let request_switch = state.thread_kill(current);
            Dispatched { retval: 0, request_switch }
        }
        SyscallOp::SchedulerStart => {
            // The requested tick frequency is consumed by the port's
            // systick configuration, not by the kernel-state operation.
            let retval = match state.scheduler_start() {
                Ok(()) => 0,
                Err(e) => e.sentinel(),
            };
            Dispatched { retval, request_switch: true }
        }
        SyscallOp::MutexInit => {
            let max_prio = args.a0 as u8;
            let retval = match state.mutex_init(max_prio) {
                Ok(handle) => handle as i32,
                Err(e) => e.sentinel(),
            };
            Dispatched { retval, request_switch: false }
        }
        SyscallOp::MutexLock => {
            let m = args.a0 as usize;
            let request_switch = match state.mutex_lock(current, m) {
                Ok(outcome) => outcome == crate::mutex::LockOutcome::Blocked
                    || outcome == crate::mutex::LockOutcome::CeilingViolationKilled,
                Err(e) => {
                    log::warn!("mutex_lock({m}) by thread {current} failed: {e}");
                    false
                }
            };
            Dispatched { retval: 0, request_switch }
        }
        SyscallOp::MutexUnlock => {
            let m = args.a0 as usize;
            if let Err(e) = state.mutex_unlock(current, m) {
                log::warn!("mutex_unlock({m}) by thread {current} failed: {e}");
            }
            Dispatched { retval: 0, request_switch: true }
        }
        SyscallOp::WaitUntilNextPeriod => {
            let request_switch = state.wait_until_next_period(current);
            Dispatched { retval: 0, request_switch }
        }
        SyscallOp::GetTime => Dispatched {
            retval: state.tick_count() as i32,
            request_switch: false,
        },
        SyscallOp::GetPriority => Dispatched {
            retval: state.get_priority(current) as i32,
            request_switch: false,
        },
        SyscallOp::ThreadTime => Dispatched {
            retval: state.thread_time(current) as i32,
            request_switch: false,
        },
    }
}
