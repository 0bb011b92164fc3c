//! The thread control block, stack pools, and the state machine attached to
//! a thread slot.
use crate::bitmap::MutexBitmap;

/// Total TCB slots, including the two reserved slots beyond user threads
/// (idle, default). `max_threads` passed to `thread_init` must leave room
/// for both.
pub const MAX_SLOTS: usize = 16;
/// The largest `max_threads` `thread_init` can accept.
pub const MAX_USER_THREADS: usize = MAX_SLOTS - 2;
/// Capacity of the mutex table.
pub const MAX_MUTEXES: usize = 32;
/// Combined size of the user and kernel stack pools, in bytes.
pub const TOTAL_STACK_BYTES: usize = 32 * 1024;
/// The smallest per-thread stack size `thread_init` will round up to.
pub const MIN_STACK_WORDS: usize = 256;

/// An index into the TCB table. Doubles as the thread's static priority for
/// user slots (slot `i` has static priority `i`); the idle slot is
/// `max_threads`, the default slot is `max_threads + 1`.
pub type ThreadId = usize;

/// The thread lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Slot allocated but never created, or killed and not yet reused.
    New,
    /// Runnable, not currently executing.
    Ready,
    /// Currently executing. Exactly one thread holds this state at a time.
    Running,
    /// The thread's job has completed (budget exhausted or voluntary yield)
    /// and it is waiting for its next period to release a new job.
    Waiting,
    /// Blocked on a mutex this thread is not yet eligible to acquire.
    Blocked,
    /// Terminated via `thread_kill`. A `Done` slot can be reused by a later
    /// `thread_create` if admission allows it.
    Done,
}

impl Default for ThreadState {
    fn default() -> Self {
        Self::New
    }
}

/// Whether a thread is currently inside a kernel call. A preemption that
/// lands while this is `InKernelCall` must restore to privileged mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrivilegeLevel {
    #[default]
    User,
    InKernelCall,
}

/// The Cortex-M hardware-stacked exception frame: the eight words the core
/// itself pushes to the active stack on exception entry, and pops on
/// exception return. `thread_create` fabricates one of these on a new
/// thread's user stack so the first context restore looks exactly like a
/// return from an ordinary exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct ExceptionFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

/// The bit set in a fabricated `xpsr` so the processor stays in Thumb state
/// (Cortex-M has no ARM state; this bit must always be 1).
pub const XPSR_THUMB_BIT: u32 = 1 << 24;

/// The callee-preserved register image the PendSV handler saves/restores
/// around a switch (r4-r11 plus the `EXC_RETURN` value that was in `lr` at
/// the time of the switch). Zeroed for a freshly created thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct CalleeContext {
    pub r4_r11: [u32; 8],
    pub exc_return: u32,
}

/// The sole handle to "the rest of a thread's state" while it is not
/// running: the address of its saved kernel-stack frame, and the user stack
/// pointer captured inside it. On the host simulation build there is no
/// real stack, so these are represented by value instead of as raw
/// addresses; a target port stores the same information at the addresses
/// its trap-frame layout and context-switch code agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SavedFrame {
    pub callee: CalleeContext,
    pub user_sp: usize,
}

/// Thread control block. One per slot in [`crate::state::KernelState`].
#[derive(Debug, Clone, Copy)]
pub struct Tcb {
    pub static_priority: u8,
    pub dynamic_priority: u8,
    /// Computation budget per job, in ticks.
    pub c: u32,
    /// Period between job releases, in ticks. Also the relative deadline.
    pub t: u32,
    pub state: ThreadState,
    pub privilege: PrivilegeLevel,
    pub saved_frame: SavedFrame,
    pub held_mutex_bitmap: MutexBitmap,
    pub waiting_mutex_bitmap: MutexBitmap,
    /// Remaining compute ticks in the current job.
    pub c_remaining: u32,
    /// Absolute tick of the last job release.
    pub release_time: u32,
    /// Ticks of CPU time this thread has consumed since it was created,
    /// for `thread_time` introspection. Not reset on job release; it is a
    /// lifetime counter, not a per-job one.
    pub elapsed: u32,
}

impl Default for Tcb {
    fn default() -> Self {
        Self {
            static_priority: 0,
            dynamic_priority: 0,
            c: 0,
            t: 0,
            state: ThreadState::New,
            privilege: PrivilegeLevel::User,
            saved_frame: SavedFrame::default(),
            held_mutex_bitmap: MutexBitmap::EMPTY,
            waiting_mutex_bitmap: MutexBitmap::EMPTY,
            c_remaining: 0,
            release_time: 0,
            elapsed: 0,
        }
    }
}

impl Tcb {
    /// A thread participates in admission, the release pass, and budget
    /// accounting only while it is neither fresh nor terminated.
    pub fn is_active(&self) -> bool {
        !matches!(self.state, ThreadState::New | ThreadState::Done)
    }

    /// `dynamic_priority := min(static_priority, min(ceiling(m) for m in held))`.
    /// `ceilings` maps a mutex index to its ceiling priority.
    pub fn recompute_dynamic_priority(&mut self, ceilings: impl Fn(usize) -> u8) {
        let mut prio = self.static_priority;
        for m in self.held_mutex_bitmap.iter() {
            prio = prio.min(ceilings(m));
        }
        self.dynamic_priority = prio;
    }
}

/// The two stack pools carved by `thread_init`, each `max_threads + 2`
/// equal top-down regions out of a fixed byte arena.
pub struct StackPools {
    user: [u8; TOTAL_STACK_BYTES / 2],
    kernel: [u8; TOTAL_STACK_BYTES / 2],
    slot_bytes: usize,
    slots: usize,
}

impl StackPools {
    pub const fn empty() -> Self {
        Self {
            user: [0; TOTAL_STACK_BYTES / 2],
            kernel: [0; TOTAL_STACK_BYTES / 2],
            slot_bytes: 0,
            slots: 0,
        }
    }

    /// Carve both pools into `slots` equal regions of `stack_words` each.
    /// Returns `Err` if the requested configuration does not fit.
    pub fn carve(&mut self, slots: usize, stack_words: usize) -> Result<(), crate::KernelError> {
        let slot_bytes = stack_words * core::mem::size_of::<u32>();
        let needed = slot_bytes * slots;
        if needed > self.user.len() || needed > self.kernel.len() {
            return Err(crate::KernelError::StackPoolExhausted);
        }
        self.slot_bytes = slot_bytes;
        self.slots = slots;
        Ok(())
    }

    /// The top-of-stack address (as a pool-relative byte offset, growing
    /// down) for the user stack of slot `i`.
    pub fn user_stack_top(&self, i: usize) -> usize {
        debug_assert!(i < self.slots);
        (i + 1) * self.slot_bytes
    }

    pub fn kernel_stack_top(&self, i: usize) -> usize {
        debug_assert!(i < self.slots);
        (i + 1) * self.slot_bytes
    }

    pub fn user_base_ptr(&self) -> *const u8 {
        self.user.as_ptr()
    }

    pub fn kernel_base_ptr(&self) -> *const u8 {
        self.kernel.as_ptr()
    }
}

/// Round `words` up to the next power of two, floored at
/// [`MIN_STACK_WORDS`].
pub fn round_stack_words(words: usize) -> usize {
    words.max(MIN_STACK_WORDS).next_power_of_two()
}
