//! The kernel's internal error taxonomy.
//!
//! Kernel operations return [`Result<T, KernelError>`] internally; only the
//! syscall boundary (see [`crate::syscall`]) collapses a `KernelError` down
//! to the ABI's `-1`/null sentinel. Keeping the typed error around inside
//! the kernel lets a caller such as the tick accountant use `?` instead of
//! re-parsing a sentinel integer it just produced.
use core::fmt;

/// Everything that can go wrong inside a kernel operation.
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// `prio >= max_threads`, or a priority outside `[0, MAX_SLOTS)`.
    BadPriority,
    /// The target slot is not in a state the requested operation accepts
    /// (e.g. `thread_create` on a slot that is `Ready`/`Running`/`Waiting`/
    /// `Blocked`).
    SlotBusy,
    /// `ub_admit` rejected the new `(C, T)` pair.
    Oversubscribed,
    /// `mutex_init` was called after `max_mutexes` mutexes were allocated.
    MutexTableFull,
    /// The mutex index does not refer to an allocated mutex.
    BadMutex,
    /// `mutex_lock` was attempted by a thread whose static priority is
    /// stronger than the mutex's declared ceiling -- the ceiling was
    /// declared too weak for this caller. The caller is killed; this error
    /// is still returned so the syscall boundary can log it uniformly.
    CeilingViolation,
    /// Not a valid file descriptor for `read`/`write`.
    BadFd,
    /// `sbrk` exceeded the heap region.
    HeapExhausted,
    /// `thread_init`'s requested `max_threads`/`stack_words` do not fit in
    /// the linker-provided stack pools.
    StackPoolExhausted,
}

impl KernelError {
    /// The ABI-level sentinel for this error: always `-1`.
    pub const fn sentinel(self) -> i32 {
        -1
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::BadPriority => "priority out of range",
            Self::SlotBusy => "thread slot is not available",
            Self::Oversubscribed => "utilization bound test rejected admission",
            Self::MutexTableFull => "mutex table exhausted",
            Self::BadMutex => "invalid mutex handle",
            Self::CeilingViolation => "caller's static priority is stronger than the mutex's ceiling",
            Self::BadFd => "invalid file descriptor",
            Self::HeapExhausted => "heap region exhausted",
            Self::StackPoolExhausted => "stack pools too small for the requested configuration",
        };
        f.write_str(msg)
    }
}

pub type KResult<T> = Result<T, KernelError>;
